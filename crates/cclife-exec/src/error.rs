use cclife_core::DriverError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("missing program")]
    MissingProgram,
    #[error("unsafe file path: {0}")]
    UnsafePath(String),
    #[error("empty package")]
    EmptyPackage,
    #[error("invalid container name: {0}")]
    InvalidName(String),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("signal failed: {0}")]
    Signal(String),
    #[error("io error: {0}")]
    Io(String),
}

pub type ExecResult<T> = Result<T, ExecError>;

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl From<ExecError> for DriverError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::MissingProgram | ExecError::UnsafePath(_) | ExecError::EmptyPackage => {
                DriverError::InvalidRequest(e.to_string())
            }
            ExecError::InvalidName(reason) => DriverError::Name(reason),
            ExecError::Spawn(reason) => DriverError::Start(reason),
            ExecError::Signal(reason) => DriverError::Stop(reason),
            ExecError::Io(reason) => DriverError::Io(reason),
        }
    }
}
