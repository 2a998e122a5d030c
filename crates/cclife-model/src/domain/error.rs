use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid chaincode spec: {0}")]
    InvalidSpec(String),
}
