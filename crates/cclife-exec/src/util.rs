use std::{io, process::ExitStatus, time::Duration};

use tokio::process::{Child, Command};
use tracing::debug;

pub fn cmd_program(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(|s| s.as_str()));
    cmd
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Ask the child to exit.
        pub fn terminate(child: &Child) -> io::Result<()> {
            let Some(pid) = child.id() else {
                return Ok(());
            };
            // SAFETY: plain signal delivery to our own child.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    } else {
        pub fn terminate(_child: &Child) -> io::Result<()> {
            Ok(())
        }
    }
}

/// SIGTERM, then wait up to `grace` for the child to exit.
///
/// A child still alive after the grace period is killed, unless `keep_running` is set.
/// Returns `None` when the child was left running.
pub async fn kill_graceful(
    child: &mut Child,
    grace: Duration,
    keep_running: bool,
) -> io::Result<Option<ExitStatus>> {
    if let Some(status) = child.try_wait()? {
        return Ok(Some(status));
    }

    if let Err(e) = terminate(child) {
        debug!(error = %e, "SIGTERM failed");
    }
    if grace.is_zero() {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
    } else if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status.map(Some);
    }

    if keep_running {
        debug!(pid = ?child.id(), "grace period elapsed; leaving process running");
        return Ok(None);
    }
    child.kill().await?;
    child.wait().await.map(Some)
}
