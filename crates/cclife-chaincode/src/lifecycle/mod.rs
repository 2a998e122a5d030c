//! Client of the lifecycle system chaincode, which serves deployment specs of installed chaincodes.
use std::sync::Arc;

use async_trait::async_trait;
use cclife_model::{
    CcContext, ChaincodeEvent, DeploymentSpec, LIFECYCLE_CHAINCODE, Response,
    SYSTEM_CHAINCODE_VERSION,
};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::SupportError;

/// Runs a chaincode call to completion. Implemented by the execution facade.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute_chaincode(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        args: Vec<Vec<u8>>,
    ) -> Result<(Response, Option<ChaincodeEvent>), SupportError>;
}

pub struct Lifecycle {
    executor: Arc<dyn Executor>,
}

impl Lifecycle {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Ask the lifecycle chaincode for the deployment spec of `name` on `chain_id`.
    pub async fn get_deployment_spec(
        &self,
        ctx: &CancellationToken,
        chain_id: &str,
        tx_id: &str,
        name: &str,
    ) -> Result<DeploymentSpec, SupportError> {
        let cccid = CcContext::new(
            chain_id,
            LIFECYCLE_CHAINCODE,
            SYSTEM_CHAINCODE_VERSION,
            tx_id,
            true,
        );
        let args = ["getdepspec", chain_id, name]
            .iter()
            .map(|a| a.as_bytes().to_vec())
            .collect();
        trace!(chain_id, name, "fetching deployment spec");

        let (res, _) = self
            .executor
            .execute_chaincode(ctx, &cccid, args)
            .await
            .map_err(|e| SupportError::Lifecycle(format!("getdepspec {chain_id}/{name} failed: {e}")))?;
        if res.status != Response::OK {
            return Err(SupportError::Lifecycle(format!(
                "getdepspec {chain_id}/{name} responded with error: {}",
                res.message
            )));
        }
        if res.payload.is_empty() {
            return Err(SupportError::Lifecycle(format!(
                "getdepspec {chain_id}/{name} failed: payload is empty"
            )));
        }
        serde_json::from_slice(&res.payload).map_err(|e| {
            SupportError::Lifecycle(format!(
                "failed to decode deployment spec for {chain_id}/{name}: {e}"
            ))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use cclife_model::{ChaincodeId, ChaincodeSpec};

    /// Returns a fixed answer and records every call.
    #[derive(Default)]
    pub(crate) struct FakeExecutor {
        pub(crate) answer: Mutex<Option<Result<Response, String>>>,
        pub(crate) calls: Mutex<Vec<(CcContext, Vec<Vec<u8>>)>>,
    }

    impl FakeExecutor {
        pub(crate) fn returning(answer: Result<Response, String>) -> Arc<Self> {
            Arc::new(Self {
                answer: Mutex::new(Some(answer)),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn serving(cds: &DeploymentSpec) -> Arc<Self> {
            Self::returning(Ok(Response::success(serde_json::to_vec(cds).unwrap())))
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn execute_chaincode(
            &self,
            _ctx: &CancellationToken,
            cccid: &CcContext,
            args: Vec<Vec<u8>>,
        ) -> Result<(Response, Option<ChaincodeEvent>), SupportError> {
            self.calls.lock().unwrap().push((cccid.clone(), args));
            match self.answer.lock().unwrap().clone() {
                Some(Ok(res)) => Ok((res, None)),
                Some(Err(reason)) => Err(SupportError::Lifecycle(reason)),
                None => Err(SupportError::NotRunning(cccid.canonical_name())),
            }
        }
    }

    fn cds() -> DeploymentSpec {
        DeploymentSpec {
            chaincode_spec: ChaincodeSpec {
                chaincode_id: ChaincodeId::new("mycc", "1.0"),
                ..Default::default()
            },
            code_package: b"code".to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn asks_lifecycle_chaincode_for_spec() {
        let exec = FakeExecutor::serving(&cds());
        let lc = Lifecycle::new(exec.clone());

        let got = lc
            .get_deployment_spec(&CancellationToken::new(), "ch1", "tx-1", "mycc")
            .await
            .unwrap();
        assert_eq!(got, cds());

        let calls = exec.calls.lock().unwrap();
        let (cccid, args) = &calls[0];
        assert_eq!(cccid, &CcContext::new("ch1", "lscc", "latest", "tx-1", true));
        assert_eq!(
            args,
            &vec![b"getdepspec".to_vec(), b"ch1".to_vec(), b"mycc".to_vec()]
        );
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let exec = FakeExecutor::returning(Ok(Response::error("not installed")));
        let err = Lifecycle::new(exec)
            .get_deployment_spec(&CancellationToken::new(), "ch1", "tx-1", "mycc")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "getdepspec ch1/mycc responded with error: not installed"
        );
    }

    #[tokio::test]
    async fn garbage_payload_is_a_decode_error() {
        let exec = FakeExecutor::returning(Ok(Response::success(b"not json".to_vec())));
        let err = Lifecycle::new(exec)
            .get_deployment_spec(&CancellationToken::new(), "ch1", "tx-1", "mycc")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to decode deployment spec for ch1/mycc"));
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let exec = FakeExecutor::returning(Ok(Response::success(Vec::new())));
        let err = Lifecycle::new(exec)
            .get_deployment_spec(&CancellationToken::new(), "ch1", "tx-1", "mycc")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("payload is empty"));
    }
}
