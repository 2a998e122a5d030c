use thiserror::Error;

/// Error reported by a runtime driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("name resolution failed: {0}")]
    Name(String),
    #[error("build failed: {0}")]
    Build(String),
    #[error("prelaunch hook failed: {0}")]
    Prelaunch(String),
    #[error("start failed: {0}")]
    Start(String),
    #[error("stop failed: {0}")]
    Stop(String),
    #[error("destroy failed: {0}")]
    Destroy(String),
    #[error("deploy failed: {0}")]
    Deploy(String),
    #[error("no chaincode registered under {0}")]
    NotRegistered(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Io(e.to_string())
    }
}

/// Error returned by the lifecycle controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContainerError {
    /// No driver registered for the requested kind. This is a wiring mistake, not a runtime condition.
    #[error("unknown driver kind: {0}")]
    UnknownDriver(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// The caller stopped waiting. The operation itself ran to completion; its outcome is unknown to the caller.
    #[error("lifecycle operation cancelled by caller")]
    Cancelled,
    #[error("lifecycle task failed: {0}")]
    Join(String),
}

impl ContainerError {
    /// Configuration errors must not be retried.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ContainerError::UnknownDriver(_))
    }
}
