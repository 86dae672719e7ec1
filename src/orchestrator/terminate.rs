//! Two-phase termination: graceful signal to the child's process group,
//! then a forced kill once the grace window has elapsed.

use tokio::process::Command;

/// Put the child in its own process group so signals reach wrapper
/// processes (`uv run`, shells) and the real application alike.
pub(crate) fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// Process group led by `pid`. Zero would address our own group.
#[cfg(unix)]
fn group(pid: u32) -> Option<nix::unistd::Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(nix::unistd::Pid::from_raw(raw)),
        _ => None,
    }
}

/// Ask the process group to terminate. Returns `false` when no graceful
/// mechanism exists on this platform or the signal could not be delivered.
pub(crate) fn request_graceful(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};

        let Some(pgid) = group(pid) else {
            tracing::warn!(pid, "refusing to signal an invalid process group");
            return false;
        };
        match killpg(pgid, Signal::SIGTERM) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(pid, error = %e, "failed to send SIGTERM");
                false
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Kill the whole process group, then the direct child as a fallback.
pub(crate) fn force(child: &mut tokio::process::Child, pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};

        if let Some(pgid) = group(pid) {
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                tracing::warn!(pid, error = %e, "failed to SIGKILL process group");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
    if let Err(e) = child.start_kill() {
        // Already reaped or gone: the subsequent wait reports the status.
        tracing::debug!(pid, error = %e, "start_kill on child failed");
    }
}
