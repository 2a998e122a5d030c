//! POSIX rlimits applied to chaincode processes.
//!
//! On Unix the limits are set in a `pre_exec` hook, in the child after `fork()` and right before `execve()`,
//! so the chaincode never runs unrestricted. Elsewhere a non-empty config is logged and ignored.
use tokio::process::Command;

/// Limits for one chaincode process. `None` leaves the inherited limit unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RlimitConfig {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,
    /// `RLIMIT_FSIZE`. Writing past it usually ends the process with `SIGXFSZ`.
    pub max_file_size_bytes: Option<u64>,
    /// `RLIMIT_AS`.
    pub max_address_space_bytes: Option<u64>,
    /// Set `RLIMIT_CORE` to 0.
    pub disable_core_dumps: bool,
}

impl RlimitConfig {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none()
            && self.max_file_size_bytes.is_none()
            && self.max_address_space_bytes.is_none()
            && !self.disable_core_dumps
    }
}

pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
    if config.is_empty() {
        return;
    }

    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            unix_impl::attach_rlimits(cmd, config);
        } else {
            let _ = cmd;
            tracing::warn!(
                target: "cclife_exec::limits",
                ?config,
                "rlimits requested on a non-Unix OS; ignored"
            );
        }
    }
}

#[cfg(unix)]
mod unix_impl {
    use std::io;

    use tokio::process::Command;

    use super::RlimitConfig;

    pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
        let nofile = config.max_open_files;
        let fsize = config.max_file_size_bytes;
        let address_space = config.max_address_space_bytes;
        let no_core = config.disable_core_dumps;

        // SAFETY: the hook only calls setrlimit, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                if let Some(v) = nofile {
                    apply_rlimit(libc::RLIMIT_NOFILE, v)?;
                }
                if let Some(v) = fsize {
                    apply_rlimit(libc::RLIMIT_FSIZE, v)?;
                }
                if let Some(v) = address_space {
                    apply_rlimit(libc::RLIMIT_AS, v)?;
                }
                if no_core {
                    apply_rlimit(libc::RLIMIT_CORE, 0)?;
                }
                Ok(())
            });
        }
    }

    cfg_if::cfg_if! {
        if #[cfg(all(target_os = "linux", target_env = "gnu"))] {
            type Resource = libc::__rlimit_resource_t;
        } else {
            type Resource = libc::c_int;
        }
    }

    fn apply_rlimit(resource: Resource, value: u64) -> io::Result<()> {
        let rlim = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };
        let rc = unsafe { libc::setrlimit(resource, &rlim) };
        if rc != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}
