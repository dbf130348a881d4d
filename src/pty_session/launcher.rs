//! Child launch with the PTY slave as controlling terminal.
//!
//! Everything the child needs (program path, argv, envp) is built before `fork()`
//! so the child only makes async-signal-safe libc calls until `execve`.

use super::error::PtyError;
use super::pty::{set_cloexec, PtySlave};
use crate::log_debug;
use crate::process_signal::signal_process_group_or_pid;
use std::env;
use std::ffi::{CString, OsStr};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::ptr;

/// Bytes the child writes to the status pipe when setup fails: stage tag + errno.
const STATUS_REPORT_LEN: usize = 5;
const CHILD_SETUP_FAILED: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ChildStage {
    Setsid = 1,
    ControllingTerminal = 2,
    BindStreams = 3,
    Exec = 4,
}

impl ChildStage {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Setsid),
            2 => Some(Self::ControllingTerminal),
            3 => Some(Self::BindStreams),
            4 => Some(Self::Exec),
            _ => None,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Setsid => "setsid in child failed",
            Self::ControllingTerminal => "ioctl(TIOCSCTTY) in child failed",
            Self::BindStreams => "binding standard streams to the pty failed",
            Self::Exec => "execve failed",
        }
    }
}

/// A child attached to a PTY. Reap it with [`ChildSession::wait`] once output is drained.
#[derive(Debug)]
pub struct ChildSession {
    pid: i32,
    argv: Vec<String>,
    device_index: u32,
    status: Option<ExitStatus>,
}

impl ChildSession {
    #[must_use]
    pub fn pid(&self) -> i32 {
        self.pid
    }

    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Index of the PTY the child runs on.
    #[must_use]
    pub fn device_index(&self) -> u32 {
        self.device_index
    }

    /// Block until the child exits. Repeat calls return the cached status.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::IoFault`] if `waitpid` fails for a reason other than `EINTR`.
    pub fn wait(&mut self) -> Result<ExitStatus, PtyError> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = waitpid_blocking(self.pid)
            .map_err(PtyError::io_fault("waitpid", Some(self.device_index)))?;
        self.status = Some(status);
        Ok(status)
    }

    /// Reap the child if it has exited, without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::IoFault`] if `waitpid` fails.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, PtyError> {
        if self.status.is_some() {
            return Ok(self.status);
        }
        let mut raw = 0;
        // SAFETY: pid belongs to our unreaped child; raw is a valid out pointer.
        let ret = unsafe { libc::waitpid(self.pid, &mut raw, libc::WNOHANG) };
        if ret < 0 {
            return Err(PtyError::io_fault("waitpid", Some(self.device_index))(
                io::Error::last_os_error(),
            ));
        }
        if ret == 0 {
            return Ok(None);
        }
        let status = ExitStatus::from_raw(raw);
        self.status = Some(status);
        Ok(Some(status))
    }
}

impl Drop for ChildSession {
    fn drop(&mut self) {
        if matches!(self.try_wait(), Ok(Some(_)) | Err(_)) {
            return;
        }
        log_debug(&format!(
            "pty child pid={} dropped before exit; killing its process group",
            self.pid
        ));
        if let Err(err) = signal_process_group_or_pid(self.pid, libc::SIGKILL, true) {
            log_debug(&format!("SIGKILL to pty child {} failed: {err}", self.pid));
        }
        if let Err(err) = waitpid_blocking(self.pid) {
            log_debug(&format!("reaping pty child {} failed: {err}", self.pid));
        }
    }
}

/// Builds and starts PTY-attached children.
#[derive(Debug, Clone, Default)]
pub struct Launcher {
    term: Option<String>,
}

impl Launcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Export `TERM=<value>` to children instead of inheriting the caller's.
    #[must_use]
    pub fn term(mut self, value: impl Into<String>) -> Self {
        self.term = Some(value.into());
        self
    }

    /// Start `argv` with `terminal` as stdin, stdout, stderr and controlling terminal.
    ///
    /// The slave is consumed and closed in the parent whatever the outcome, so the
    /// master reaches end-of-stream once the child closes its streams.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::LaunchFailure`] when `argv` is empty or malformed, the
    /// program cannot be found, or the child fails before `execve` completes.
    pub fn spawn(&self, argv: &[String], terminal: PtySlave) -> Result<ChildSession, PtyError> {
        let device_index = terminal.index();
        let plan = ExecPlan::build(argv, self.term.as_deref())?;
        let (status_read, status_write) =
            status_pipe().map_err(|err| PtyError::launch_os(argv, "status pipe", err))?;

        // SAFETY: the child branch below only performs async-signal-safe calls.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(PtyError::launch_os(argv, "fork", io::Error::last_os_error()));
        }
        if pid == 0 {
            // SAFETY: we are the freshly forked child; every pointer in plan outlives execve.
            unsafe {
                child_exec(
                    &plan,
                    terminal.as_raw_fd(),
                    status_write.as_raw_fd(),
                );
            }
        }

        drop(status_write);
        drop(terminal);

        match read_status_report(&status_read) {
            Ok(None) => {
                tracing::debug!(pid, device_index, program = %plan.program.display(), "pty child started");
                Ok(ChildSession {
                    pid,
                    argv: argv.to_vec(),
                    device_index,
                    status: None,
                })
            }
            Ok(Some((stage, err))) => {
                let _ = waitpid_blocking(pid);
                let reason = stage.map_or("child setup failed", ChildStage::describe);
                Err(PtyError::launch_os(argv, reason, err))
            }
            Err(err) => {
                let _ = signal_process_group_or_pid(pid, libc::SIGKILL, true);
                let _ = waitpid_blocking(pid);
                Err(PtyError::launch_os(argv, "reading child status", err))
            }
        }
    }
}

/// Start `argv` on `terminal` with the caller's environment.
///
/// # Errors
///
/// See [`Launcher::spawn`].
pub fn spawn(argv: &[String], terminal: PtySlave) -> Result<ChildSession, PtyError> {
    Launcher::new().spawn(argv, terminal)
}

/// Everything the child needs, allocated in the parent.
struct ExecPlan {
    program: PathBuf,
    program_c: CString,
    _argv: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    _envp: Vec<CString>,
    envp_ptrs: Vec<*const libc::c_char>,
}

impl ExecPlan {
    fn build(argv: &[String], term: Option<&str>) -> Result<Self, PtyError> {
        let Some(program_name) = argv.first() else {
            return Err(PtyError::launch(argv, "argv is empty"));
        };
        let argv_c = argv
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| PtyError::launch(argv, "argv contains a NUL byte"))?;
        let program = resolve_program(program_name, env::var_os("PATH").as_deref())
            .ok_or_else(|| PtyError::launch(argv, "executable not found"))?;
        let program_c = CString::new(program.as_os_str().as_bytes())
            .map_err(|_| PtyError::launch(argv, "program path contains a NUL byte"))?;

        let mut envp_c = Vec::new();
        for (key, value) in env::vars_os() {
            if term.is_some() && key == "TERM" {
                continue;
            }
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            if let Ok(entry) = CString::new(entry) {
                envp_c.push(entry);
            }
        }
        if let Some(term) = term {
            let entry = CString::new(format!("TERM={term}"))
                .map_err(|_| PtyError::launch(argv, "TERM contains a NUL byte"))?;
            envp_c.push(entry);
        }

        let argv_ptrs = null_terminated(&argv_c);
        let envp_ptrs = null_terminated(&envp_c);
        Ok(Self {
            program,
            program_c,
            _argv: argv_c,
            argv_ptrs,
            _envp: envp_c,
            envp_ptrs,
        })
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// PATH lookup mirroring `execvp`: names containing `/` are taken as-is.
pub(crate) fn resolve_program(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    if name.contains('/') {
        let path = PathBuf::from(name);
        return path.exists().then_some(path);
    }
    let search = path_var.unwrap_or_else(|| OsStr::new("/usr/local/bin:/usr/bin:/bin"));
    env::split_paths(search)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable_file(candidate))
}

fn is_executable_file(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn status_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [-1 as RawFd; 2];
    #[cfg(target_os = "linux")]
    // SAFETY: pipe2 fills the two-element array on success.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    #[cfg(not(target_os = "linux"))]
    // SAFETY: pipe fills the two-element array on success.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created and are owned by nobody else.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(read.as_raw_fd())?;
    set_cloexec(write.as_raw_fd())?;
    Ok((read, above_stdio(write)?))
}

/// The child overwrites fds 0-2 with the slave, so the status pipe must live above them.
fn above_stdio(fd: OwnedFd) -> io::Result<OwnedFd> {
    if fd.as_raw_fd() > libc::STDERR_FILENO {
        return Ok(fd);
    }
    // SAFETY: F_DUPFD_CLOEXEC duplicates a descriptor we own.
    let duplicate = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, 3) };
    if duplicate < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fcntl returned a fresh descriptor.
    Ok(unsafe { OwnedFd::from_raw_fd(duplicate) })
}

/// `Ok(None)` means the pipe closed without a report: `execve` succeeded.
fn read_status_report(
    status_read: &OwnedFd,
) -> io::Result<Option<(Option<ChildStage>, io::Error)>> {
    let mut report = [0u8; STATUS_REPORT_LEN];
    let mut filled = 0;
    while filled < STATUS_REPORT_LEN {
        // SAFETY: the destination range lies inside `report`.
        let n = unsafe {
            libc::read(
                status_read.as_raw_fd(),
                report[filled..].as_mut_ptr().cast(),
                STATUS_REPORT_LEN - filled,
            )
        };
        if n == 0 {
            break;
        }
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        filled += n as usize;
    }
    match filled {
        0 => Ok(None),
        STATUS_REPORT_LEN => {
            let stage = ChildStage::from_tag(report[0]);
            let errno = i32::from_ne_bytes([report[1], report[2], report[3], report[4]]);
            Ok(Some((stage, io::Error::from_raw_os_error(errno))))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated child status report",
        )),
    }
}

fn waitpid_blocking(pid: i32) -> io::Result<ExitStatus> {
    let mut raw = 0;
    loop {
        // SAFETY: pid is our child; raw is a valid out pointer.
        let ret = unsafe { libc::waitpid(pid, &mut raw, 0) };
        if ret >= 0 {
            return Ok(ExitStatus::from_raw(raw));
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Child half of [`Launcher::spawn`]: attach to the slave and exec. Never returns.
///
/// # Safety
///
/// Only call in the child right after `fork()`. No allocation happens here.
unsafe fn child_exec(plan: &ExecPlan, slave_fd: RawFd, status_fd: RawFd) -> ! {
    // Rust ignores SIGPIPE in the parent; the exec'd program expects the default.
    libc::signal(libc::SIGPIPE, libc::SIG_DFL);

    if libc::setsid() == -1 {
        report_and_exit(status_fd, ChildStage::Setsid);
    }
    if libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) == -1 {
        report_and_exit(status_fd, ChildStage::ControllingTerminal);
    }
    if libc::dup2(slave_fd, libc::STDIN_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDOUT_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDERR_FILENO) < 0
    {
        report_and_exit(status_fd, ChildStage::BindStreams);
    }
    // dup2 onto itself keeps FD_CLOEXEC, which would close a slave already sitting on 0-2.
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if libc::fcntl(fd, libc::F_SETFD, 0) < 0 {
            report_and_exit(status_fd, ChildStage::BindStreams);
        }
    }
    close_inherited_fds(status_fd);

    libc::execve(
        plan.program_c.as_ptr(),
        plan.argv_ptrs.as_ptr(),
        plan.envp_ptrs.as_ptr(),
    );
    report_and_exit(status_fd, ChildStage::Exec);
}

/// Write `stage` and the current errno to the status pipe, then `_exit`.
unsafe fn report_and_exit(status_fd: RawFd, stage: ChildStage) -> ! {
    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
    let mut report = [0u8; STATUS_REPORT_LEN];
    report[0] = stage as u8;
    report[1..].copy_from_slice(&errno.to_ne_bytes());
    let _ = libc::write(status_fd, report.as_ptr().cast(), report.len());
    libc::_exit(CHILD_SETUP_FAILED);
}

/// Close every descriptor above stderr except the status pipe, so descriptors
/// other threads opened concurrently never outlive exec in this child.
unsafe fn close_inherited_fds(keep: RawFd) {
    #[cfg(target_os = "linux")]
    {
        let keep = keep as libc::c_uint;
        let flags: libc::c_uint = 0;
        let below_closed = keep <= 3
            || libc::syscall(libc::SYS_close_range, 3 as libc::c_uint, keep - 1, flags) == 0;
        let above_closed =
            libc::syscall(libc::SYS_close_range, keep + 1, libc::c_uint::MAX, flags) == 0;
        if below_closed && above_closed {
            return;
        }
    }
    let max_fd = libc::sysconf(libc::_SC_OPEN_MAX);
    let upper = if max_fd > 3 { max_fd.min(65_536) as RawFd } else { 1024 };
    for fd in 3..upper {
        if fd != keep {
            libc::close(fd);
        }
    }
}
