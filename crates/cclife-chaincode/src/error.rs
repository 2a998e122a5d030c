use cclife_core::ContainerError;
use cclife_model::ModelError;
use thiserror::Error;

/// Handler registry failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("handler registry is closed")]
    Closed,
    #[error("could not find handler: {0}")]
    NotFound(String),
    #[error("duplicate chaincode handler: {0}")]
    Duplicate(String),
    /// A chaincode connected without being launched by this peer.
    #[error("peer will not accept external chaincode connection {0} (except in dev mode)")]
    Unsolicited(String),
    #[error("launch of {0} already failed")]
    LaunchFailed(String),
}

/// Failure of a handler to process a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("handler is closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("{0}")]
    Failed(String),
}

/// Package provider failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PackageError {
    #[error("chaincode {0} not found")]
    NotFound(String),
    #[error("failed to decode package {name}: {reason}")]
    Decode { name: String, reason: String },
    #[error("io error: {0}")]
    Io(String),
}

/// Error returned by the launcher and the execution facade.
#[derive(Debug, Error)]
pub enum SupportError {
    #[error("a system chaincode should be running (it cannot be launched): {0}")]
    SystemNotRunning(String),
    #[error("failed to get deployment spec for {name}: {reason}")]
    DeploymentSpec { name: String, reason: String },
    #[error("failed to get chaincode package: {0}")]
    Package(String),
    #[error("failed to register {name} as launching: {reason}")]
    Registration { name: String, reason: String },
    #[error("error starting container: {0}")]
    Start(String),
    #[error("timeout expired while starting chaincode {name} for transaction {tx_id}")]
    StartupTimeout { name: String, tx_id: String },
    /// Another caller's launch of the same chaincode failed.
    #[error("chaincode registration failed: {0}")]
    LaunchFailed(String),
    #[error("unable to invoke chaincode {0}")]
    NotRunning(String),
    #[error("failed to execute transaction {tx_id}: {source}")]
    Execute {
        tx_id: String,
        source: Box<SupportError>,
    },
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),
    #[error("timeout expired while executing transaction {tx_id}")]
    ExecuteTimeout { tx_id: String },
    #[error("transaction returned with failure: {0}")]
    TransactionFailed(String),
    #[error("failed to decode response for transaction {tx_id}: {reason}")]
    MalformedResponse { tx_id: String, reason: String },
    #[error("unexpected response type {kind} for transaction {tx_id}")]
    UnexpectedResponse { kind: String, tx_id: String },
    #[error("{0}")]
    Lifecycle(String),
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<ModelError> for SupportError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::InvalidSpec(reason) => SupportError::InvalidSpec(reason),
        }
    }
}

impl From<std::io::Error> for PackageError {
    fn from(e: std::io::Error) -> Self {
        PackageError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_chaincode() {
        let err = SupportError::StartupTimeout {
            name: "mycc:1.0".into(),
            tx_id: "tx-1".into(),
        };
        assert_eq!(
            err.to_string(),
            "timeout expired while starting chaincode mycc:1.0 for transaction tx-1"
        );

        let err = SupportError::Execute {
            tx_id: "tx-1".into(),
            source: Box::new(SupportError::NotRunning("mycc:1.0".into())),
        };
        assert_eq!(
            err.to_string(),
            "failed to execute transaction tx-1: unable to invoke chaincode mycc:1.0"
        );
    }
}
