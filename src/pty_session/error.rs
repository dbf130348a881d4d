//! Failure taxonomy for allocation, launch, and relay.

use super::session::SessionState;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum PtyError {
    /// No pseudoterminal slot is left in the namespace.
    ResourceExhausted {
        detail: String,
        source: Option<io::Error>,
    },
    /// The child could not be located or started.
    LaunchFailure {
        argv: Vec<String>,
        reason: String,
        source: Option<io::Error>,
    },
    /// An OS call on a PTY handle or the namespace failed (clean end-of-stream is not a fault).
    IoFault {
        device_index: Option<u32>,
        operation: &'static str,
        source: io::Error,
    },
    /// A session call arrived in a state that cannot accept it.
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl PtyError {
    pub(crate) fn io_fault(
        operation: &'static str,
        device_index: Option<u32>,
    ) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::IoFault {
            device_index,
            operation,
            source,
        }
    }

    pub(crate) fn launch(argv: &[String], reason: impl Into<String>) -> Self {
        Self::LaunchFailure {
            argv: argv.to_vec(),
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn launch_os(argv: &[String], reason: impl Into<String>, source: io::Error) -> Self {
        Self::LaunchFailure {
            argv: argv.to_vec(),
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Device index the failure is attributed to, when one was assigned.
    #[must_use]
    pub fn device_index(&self) -> Option<u32> {
        match self {
            Self::IoFault { device_index, .. } => *device_index,
            _ => None,
        }
    }
}

impl fmt::Display for PtyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted { detail, source } => match source {
                Some(err) => write!(f, "no pseudoterminal slots left: {detail}: {err}"),
                None => write!(f, "no pseudoterminal slots left: {detail}"),
            },
            Self::LaunchFailure {
                argv,
                reason,
                source,
            } => {
                write!(f, "failed to launch {argv:?}: {reason}")?;
                if let Some(err) = source {
                    write!(f, ": {err}")?;
                }
                Ok(())
            }
            Self::IoFault {
                device_index: Some(index),
                operation,
                source,
            } => write!(f, "{operation} failed on pty {index}: {source}"),
            Self::IoFault {
                device_index: None,
                operation,
                source,
            } => write!(f, "{operation} failed: {source}"),
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {operation} while session is {state}")
            }
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ResourceExhausted { source, .. } | Self::LaunchFailure { source, .. } => source
                .as_ref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Self::IoFault { source, .. } => Some(source),
            Self::InvalidState { .. } => None,
        }
    }
}

/// Errno values that mean the kernel ran out of PTY slots rather than failing outright.
pub(crate) fn is_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::ENOSPC || code == libc::EAGAIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn io_fault_names_operation_and_index() {
        let err = PtyError::io_fault("read", Some(3))(io::Error::from_raw_os_error(libc::EBADF));
        let text = err.to_string();
        assert!(text.starts_with("read failed on pty 3: "), "{text}");
        assert_eq!(err.device_index(), Some(3));
        assert!(err.source().is_some());
    }

    #[test]
    fn launch_failure_carries_argv() {
        let argv = vec!["/nope/missing".to_string(), "arg".to_string()];
        let err = PtyError::launch(&argv, "executable not found");
        assert_eq!(
            err.to_string(),
            r#"failed to launch ["/nope/missing", "arg"]: executable not found"#
        );
        assert!(err.source().is_none());
    }

    #[test]
    fn exhaustion_errnos_are_recognised() {
        assert!(is_exhaustion(&io::Error::from_raw_os_error(libc::ENOSPC)));
        assert!(is_exhaustion(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(!is_exhaustion(&io::Error::from_raw_os_error(libc::EBADF)));
    }
}
