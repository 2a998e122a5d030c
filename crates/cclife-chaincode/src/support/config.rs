use std::time::Duration;

use cclife_core::{ReaperConfig, kinds};

/// Settings of [`super::ChaincodeSupport`].
#[derive(Debug, Clone)]
pub struct SupportConfig {
    /// Defaults to the host name.
    pub peer_id: String,
    pub network_id: String,
    /// Address chaincodes dial back to.
    pub peer_address: String,
    pub startup_timeout: Duration,
    pub execute_timeout: Duration,
    /// Developer mode: chaincodes are started by hand and connect on their own.
    pub user_runs_cc: bool,
    /// Driver kind running user chaincodes.
    pub user_driver: String,
    pub reaper: ReaperConfig,
    pub log_level: String,
    pub shim_log_level: String,
    pub log_format: String,
}

impl SupportConfig {
    pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Environment shared by every chaincode container.
    pub fn common_env(&self) -> Vec<String> {
        vec![
            format!("CORE_CHAINCODE_LOGGING_LEVEL={}", self.log_level),
            format!("CORE_CHAINCODE_LOGGING_SHIM={}", self.shim_log_level),
            format!("CORE_CHAINCODE_LOGGING_FORMAT={}", self.log_format),
        ]
    }
}

impl Default for SupportConfig {
    fn default() -> Self {
        let peer_id = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "peer0".to_string());

        Self {
            peer_id,
            network_id: "dev".to_string(),
            peer_address: "0.0.0.0:7052".to_string(),
            startup_timeout: Self::DEFAULT_STARTUP_TIMEOUT,
            execute_timeout: Self::DEFAULT_EXECUTE_TIMEOUT,
            user_runs_cc: false,
            user_driver: kinds::PROCESS.to_string(),
            reaper: ReaperConfig::default(),
            log_level: "info".to_string(),
            shim_log_level: "warning".to_string(),
            log_format: "text".to_string(),
        }
    }
}
