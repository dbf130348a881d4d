//! Per-session state machine (allocate → spawn → drain → inspect) and the per-run report.

use super::error::PtyError;
use super::io::{OutputBuffer, OutputRelay};
use super::launcher::{ChildSession, Launcher};
use super::namespace::{lowest_free_index, DeviceNamespace};
use super::pty::{PtyAllocator, PtyPair};
use crate::config::{AppConfig, DEFAULT_READ_CHUNK_BYTES};
use crate::log_debug;
use serde::Serialize;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unopened,
    Allocated,
    Spawned,
    Draining,
    /// Terminal: the output buffer is final.
    Complete,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Unopened => "unopened",
            SessionState::Allocated => "allocated",
            SessionState::Spawned => "spawned",
            SessionState::Draining => "draining",
            SessionState::Complete => "complete",
        };
        write!(f, "{label}")
    }
}

/// One PTY-backed child run from allocation to end-of-stream.
#[derive(Debug)]
pub struct PtySession {
    state: SessionState,
    launcher: Launcher,
    read_chunk_bytes: usize,
    device_index: Option<u32>,
    pair: Option<PtyPair>,
    child: Option<ChildSession>,
    relay: Option<OutputRelay>,
    output: OutputBuffer,
}

impl Default for PtySession {
    fn default() -> Self {
        Self {
            state: SessionState::Unopened,
            launcher: Launcher::new(),
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            device_index: None,
            pair: None,
            child: None,
            relay: None,
            output: OutputBuffer::new(),
        }
    }
}

impl PtySession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session using the configured TERM and read size.
    #[must_use]
    pub fn with_config(config: &AppConfig) -> Self {
        Self {
            launcher: Launcher::new().term(config.term.clone()),
            read_chunk_bytes: config.read_chunk_bytes,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn device_index(&self) -> Option<u32> {
        self.device_index
    }

    #[must_use]
    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    #[must_use]
    pub fn child(&self) -> Option<&ChildSession> {
        self.child.as_ref()
    }

    fn expect_state(&self, operation: &'static str, expected: &[SessionState]) -> Result<(), PtyError> {
        if expected.contains(&self.state) {
            return Ok(());
        }
        Err(PtyError::InvalidState {
            operation,
            state: self.state,
        })
    }

    /// `Unopened → Allocated`: open a pair from `allocator`.
    ///
    /// # Errors
    ///
    /// Propagates allocator failures; [`PtyError::InvalidState`] outside `Unopened`.
    pub fn open<A: PtyAllocator + ?Sized>(&mut self, allocator: &A) -> Result<u32, PtyError> {
        self.expect_state("open", &[SessionState::Unopened])?;
        let pair = allocator.open()?;
        let index = pair.index();
        self.device_index = Some(index);
        self.pair = Some(pair);
        self.state = SessionState::Allocated;
        Ok(index)
    }

    /// `Allocated → Spawned`: start `argv` on the slave; the master moves to the relay.
    ///
    /// On failure both handles are closed, the index is released, and the
    /// session is back in `Unopened`.
    ///
    /// # Errors
    ///
    /// [`PtyError::LaunchFailure`] from the launcher; [`PtyError::InvalidState`] outside `Allocated`.
    pub fn spawn(&mut self, argv: &[String]) -> Result<i32, PtyError> {
        self.expect_state("spawn", &[SessionState::Allocated])?;
        let Some(pair) = self.pair.take() else {
            return Err(PtyError::InvalidState {
                operation: "spawn",
                state: self.state,
            });
        };
        let (master, slave) = pair.into_split();
        match self.launcher.spawn(argv, slave) {
            Ok(child) => {
                let pid = child.pid();
                self.relay = Some(OutputRelay::new(master).with_chunk_bytes(self.read_chunk_bytes));
                self.child = Some(child);
                self.state = SessionState::Spawned;
                Ok(pid)
            }
            Err(err) => {
                drop(master);
                log_debug(&format!("pty session spawn failed: {err}"));
                self.device_index = None;
                self.state = SessionState::Unopened;
                Err(err)
            }
        }
    }

    /// `Spawned → Draining → Complete`: block until end-of-stream and return the output.
    ///
    /// Once `Complete`, returns the sealed output without reading again.
    ///
    /// # Errors
    ///
    /// [`PtyError::IoFault`] on read failure (the session stays `Draining`);
    /// [`PtyError::InvalidState`] before a child was spawned.
    pub fn drain(&mut self) -> Result<&[u8], PtyError> {
        if self.state == SessionState::Complete {
            return Ok(self.output.as_bytes());
        }
        self.expect_state("drain", &[SessionState::Spawned, SessionState::Draining])?;
        let Some(relay) = self.relay.as_mut() else {
            return Err(PtyError::InvalidState {
                operation: "drain",
                state: self.state,
            });
        };
        self.state = SessionState::Draining;
        relay.drain(&mut self.output)?;
        self.relay = None;
        self.state = SessionState::Complete;
        Ok(self.output.as_bytes())
    }

    /// Exit status of the child; only available once the session is `Complete`.
    ///
    /// # Errors
    ///
    /// [`PtyError::InvalidState`] before `Complete`; [`PtyError::IoFault`] if reaping fails.
    pub fn wait(&mut self) -> Result<ExitStatus, PtyError> {
        self.expect_state("wait", &[SessionState::Complete])?;
        match self.child.as_mut() {
            Some(child) => child.wait(),
            None => Err(PtyError::InvalidState {
                operation: "wait",
                state: self.state,
            }),
        }
    }
}

/// What one run exposes to the harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub argv: Vec<String>,
    /// Index of the pair the child ran on.
    pub device_index: u32,
    /// Lowest free index observed just before allocation.
    pub lowest_free_before: u32,
    /// Namespace snapshot taken right after allocation.
    pub namespace: Vec<u32>,
    /// Relayed bytes, including line-discipline translation.
    pub output: Vec<u8>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl RunReport {
    /// True when the child exited normally with status 0.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// True when the assigned index was the lowest free one.
    #[must_use]
    pub fn allocated_lowest_free(&self) -> bool {
        self.device_index == self.lowest_free_before
    }

    /// Namespace snapshot rendered as `[0, 1]`, the line the probe prints to stderr.
    #[must_use]
    pub fn namespace_listing(&self) -> String {
        format!("{:?}", self.namespace)
    }

    /// # Errors
    ///
    /// Propagates `serde_json` serialization failures.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Run `argv` in a fresh session: allocate, snapshot the namespace, spawn, drain, reap.
///
/// # Errors
///
/// Any [`PtyError`] from the namespace or the session; handles are released on every path.
pub fn run_session<D>(devices: &D, argv: &[String], config: &AppConfig) -> Result<RunReport, PtyError>
where
    D: PtyAllocator + DeviceNamespace + ?Sized,
{
    let started = Instant::now();
    let lowest_free_before = lowest_free_index(&devices.current_indices()?);

    let mut session = PtySession::with_config(config);
    let device_index = session.open(devices)?;
    if device_index != lowest_free_before {
        tracing::warn!(
            device_index,
            lowest_free_before,
            "pty index is not the lowest free slot"
        );
        log_debug(&format!(
            "pty index {device_index} assigned while {lowest_free_before} was free"
        ));
    }
    let namespace: Vec<u32> = devices.current_indices()?.into_iter().collect();
    let allocated_at = started.elapsed();

    let pid = session.spawn(argv)?;
    let spawned_at = started.elapsed();
    let output = session.drain()?.to_vec();
    let drained_at = started.elapsed();
    let status = session.wait()?;

    tracing::info!(
        device_index,
        pid,
        bytes = output.len(),
        exit_code = status.code(),
        "pty session complete"
    );
    if config.log_timings {
        log_debug(&format!(
            "pty session timings: allocate={}ms spawn={}ms drain={}ms total={}ms",
            allocated_at.as_millis(),
            spawned_at.saturating_sub(allocated_at).as_millis(),
            drained_at.saturating_sub(spawned_at).as_millis(),
            started.elapsed().as_millis()
        ));
    }

    Ok(RunReport {
        argv: argv.to_vec(),
        device_index,
        lowest_free_before,
        namespace,
        output,
        exit_code: status.code(),
        signal: status.signal(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty_session::{DeviceNamespace, VirtualPtys};
    use std::fs::OpenOptions;
    use std::os::fd::AsRawFd;

    #[test]
    fn read_fault_leaves_session_draining() {
        let _guard = crate::pty_session::tests::pty_test_lock();
        let ptys = VirtualPtys::new(4);
        let mut session = PtySession::new();
        session.open(&ptys).expect("open");
        let master_fd = session
            .pair
            .as_ref()
            .expect("allocated pair")
            .master()
            .as_raw_fd();
        session
            .spawn(&["sleep".to_string(), "30".to_string()])
            .expect("spawn sleep");

        let sink = OpenOptions::new()
            .write(true)
            .open("/dev/null")
            .expect("open /dev/null");
        // SAFETY: the relay still owns master_fd; dup2 swaps what it refers to.
        let rc = unsafe { libc::dup2(sink.as_raw_fd(), master_fd) };
        assert!(rc >= 0, "dup2 failed: {}", std::io::Error::last_os_error());
        drop(sink);

        let err = session.drain().unwrap_err();
        assert!(
            matches!(
                err,
                PtyError::IoFault {
                    device_index: Some(0),
                    operation: "read",
                    ..
                }
            ),
            "{err}"
        );
        assert_eq!(session.state(), SessionState::Draining);
        assert!(!session.output().is_sealed());
        assert!(session.wait().is_err());
        assert_eq!(ptys.current_indices().expect("snapshot").len(), 1);

        drop(session);
        assert!(ptys.current_indices().expect("snapshot").is_empty());
    }
}
