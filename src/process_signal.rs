//! Process-group signaling used when a PTY child is torn down before it was reaped.

use std::io;

/// Signal the child's process group, falling back to the bare pid.
///
/// Launched children call `setsid()`, so `-pid` addresses the whole session the
/// child may have forked. `ESRCH` counts as success when `missing_is_ok` is set,
/// since an exited child is the outcome the caller wanted.
pub(crate) fn signal_process_group_or_pid(
    pid: i32,
    signal: i32,
    missing_is_ok: bool,
) -> io::Result<()> {
    if pid <= 0 {
        return Ok(());
    }

    // SAFETY: kill has no memory-safety preconditions; pid is positive.
    let group_err = match unsafe { libc::kill(-pid, signal) } {
        0 => return Ok(()),
        _ => io::Error::last_os_error(),
    };
    // SAFETY: as above.
    let pid_err = match unsafe { libc::kill(pid, signal) } {
        0 => return Ok(()),
        _ => io::Error::last_os_error(),
    };

    if missing_is_ok && (is_no_such_process(&group_err) || is_no_such_process(&pid_err)) {
        return Ok(());
    }

    Err(io::Error::new(
        pid_err.kind(),
        format!("group(-{pid}) signal failed: {group_err}; pid({pid}) signal failed: {pid_err}"),
    ))
}

fn is_no_such_process(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unused_pid() -> i32 {
        let mut candidate = unsafe { libc::getpid() } + 20_000;
        for _ in 0..1000 {
            if unsafe { libc::kill(candidate, 0) } != 0
                && io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
            {
                return candidate;
            }
            candidate += 1;
        }
        candidate
    }

    #[test]
    fn non_positive_pids_are_ignored() {
        assert!(signal_process_group_or_pid(0, libc::SIGKILL, false).is_ok());
        assert!(signal_process_group_or_pid(-7, libc::SIGKILL, false).is_ok());
    }

    #[test]
    fn vanished_pid_is_only_an_error_when_requested() {
        let pid = unused_pid();
        assert!(signal_process_group_or_pid(pid, libc::SIGTERM, true).is_ok());
        let err = signal_process_group_or_pid(pid, libc::SIGTERM, false).unwrap_err();
        assert!(err.to_string().contains(&format!("pid({pid})")));
    }
}
