use std::io::IsTerminal;

use crate::logger::{error::LoggerError, format::LoggerFormat};

/// Environment variable overriding [`LoggerConfig::level`]; any `EnvFilter` directive is accepted.
pub const ENV_LEVEL: &str = "CCLIFE_LOG_LEVEL";
/// Environment variable overriding [`LoggerConfig::format`].
pub const ENV_FORMAT: &str = "CCLIFE_LOG_FORMAT";

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
}

impl LoggerConfig {
    /// Defaults, overridden by `CCLIFE_LOG_LEVEL` and `CCLIFE_LOG_FORMAT` when set.
    pub fn from_env() -> Result<Self, LoggerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, LoggerError> {
        let mut cfg = Self::default();
        if let Some(level) = get(ENV_LEVEL).filter(|l| !l.trim().is_empty()) {
            cfg.level = level;
        }
        if let Some(format) = get(ENV_FORMAT) {
            cfg.format = format.parse()?;
        }
        Ok(cfg)
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let use_color = cfg!(test) || std::io::stdout().is_terminal();
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color,
        }
    }
}
