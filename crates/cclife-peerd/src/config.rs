use std::{path::PathBuf, time::Duration};

use anyhow::{Context, bail};
use cclife_chaincode::SupportConfig;
use cclife_core::kinds;
use cclife_exec::ProcConfig;

/// Everything the daemon reads from `CCLIFE_*` variables.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub support: SupportConfig,
    pub proc: ProcConfig,
    /// Where installed chaincode packages live.
    pub package_dir: PathBuf,
}

impl PeerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str| -> anyhow::Result<Option<Duration>> {
            get(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map(Duration::from_secs)
                        .with_context(|| format!("{key} must be a number of seconds, got {v:?}"))
                })
                .transpose()
        };

        // In-process chaincodes are the only ones that can register without a shim connection.
        let mut support = SupportConfig {
            user_driver: kinds::SYSTEM.to_string(),
            ..Default::default()
        };
        if let Some(v) = get("CCLIFE_PEER_ID") {
            support.peer_id = v;
        }
        if let Some(v) = get("CCLIFE_NETWORK_ID") {
            support.network_id = v;
        }
        if let Some(v) = get("CCLIFE_PEER_ADDRESS") {
            support.peer_address = v;
        }
        if let Some(v) = get("CCLIFE_USER_DRIVER") {
            if v != kinds::SYSTEM && v != kinds::PROCESS {
                bail!("CCLIFE_USER_DRIVER must be {} or {}, got {v:?}", kinds::SYSTEM, kinds::PROCESS);
            }
            support.user_driver = v;
        }
        if let Some(v) = get("CCLIFE_DEV_MODE") {
            support.user_runs_cc = matches!(v.trim(), "1" | "true" | "yes");
        }
        if let Some(d) = secs("CCLIFE_STARTUP_TIMEOUT_SECS")? {
            support.startup_timeout = d;
        }
        if let Some(d) = secs("CCLIFE_EXECUTE_TIMEOUT_SECS")? {
            support.execute_timeout = d;
        }
        support.reaper = support.reaper.with_overrides(
            secs("CCLIFE_IDLE_THRESHOLD_SECS")?.unwrap_or_default(),
            secs("CCLIFE_SWEEP_INTERVAL_SECS")?.unwrap_or_default(),
        );
        if let Some(v) = get("CCLIFE_LOG_LEVEL") {
            support.log_level = v;
        }
        if let Some(v) = get("CCLIFE_LOG_FORMAT") {
            support.log_format = v;
        }

        let mut proc = ProcConfig::default();
        if let Some(v) = get("CCLIFE_PROC_ROOT") {
            proc.root = PathBuf::from(v);
        }
        let package_dir = get("CCLIFE_PACKAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("cclife-packages"));

        Ok(Self {
            support,
            proc,
            package_dir,
        })
    }
}
