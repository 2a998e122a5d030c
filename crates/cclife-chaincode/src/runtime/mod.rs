use std::sync::Arc;

use async_trait::async_trait;
use cclife_core::{Controller, StartRequest, StopRequest, kinds};
use cclife_model::{CcContext, ChaincodeLang, DeploymentSpec};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SupportError;

/// Starts and stops chaincode containers.
#[async_trait]
pub trait Runtime: Send + Sync {
    async fn start(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        cds: &DeploymentSpec,
    ) -> Result<(), SupportError>;

    async fn stop(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        cds: &DeploymentSpec,
    ) -> Result<(), SupportError>;
}

/// Program arguments and environment of a chaincode container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub args: Vec<String>,
    pub env: Vec<String>,
}

/// [`Runtime`] backed by the lifecycle controller.
///
/// System chaincodes go to the in-process driver, everything else to the configured user driver.
pub struct ContainerRuntime {
    controller: Arc<Controller>,
    peer_id: String,
    network_id: String,
    peer_address: String,
    user_driver: String,
    common_env: Vec<String>,
}

impl ContainerRuntime {
    pub fn new(
        controller: Arc<Controller>,
        peer_id: impl Into<String>,
        network_id: impl Into<String>,
        peer_address: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            peer_id: peer_id.into(),
            network_id: network_id.into(),
            peer_address: peer_address.into(),
            user_driver: kinds::PROCESS.to_string(),
            common_env: Vec::new(),
        }
    }

    pub fn with_user_driver(mut self, kind: impl Into<String>) -> Self {
        self.user_driver = kind.into();
        self
    }

    /// `KEY=VALUE` pairs passed to every chaincode.
    pub fn with_common_env(mut self, env: Vec<String>) -> Self {
        self.common_env = env;
        self
    }

    pub fn launch_config(&self, cname: &str, lang: ChaincodeLang) -> LaunchConfig {
        let addr = &self.peer_address;
        let args = match lang {
            ChaincodeLang::Golang | ChaincodeLang::Car => {
                vec!["chaincode".to_string(), format!("-peer.address={addr}")]
            }
            ChaincodeLang::Java => vec![
                "/root/chaincode-java/start".to_string(),
                "--peerAddress".to_string(),
                addr.clone(),
            ],
            ChaincodeLang::Node => vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!("cd /usr/local/src; npm start -- --peer.address {addr}"),
            ],
        };

        let mut env = self.common_env.clone();
        env.push(format!("CORE_CHAINCODE_ID_NAME={cname}"));
        env.push("CORE_PEER_TLS_ENABLED=false".to_string());
        LaunchConfig { args, env }
    }

    fn driver_for(&self, cds: &DeploymentSpec) -> &str {
        if cds.is_system() {
            kinds::SYSTEM
        } else {
            &self.user_driver
        }
    }
}

#[async_trait]
impl Runtime for ContainerRuntime {
    async fn start(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        cds: &DeploymentSpec,
    ) -> Result<(), SupportError> {
        let cname = cccid.canonical_name();
        let lc = self.launch_config(&cname, cds.chaincode_spec.lang);
        debug!(chaincode = %cname, args = ?lc.args, "starting container");

        let mut req = StartRequest::new(cccid.container_id(&self.peer_id, &self.network_id))
            .with_args(lc.args)
            .with_env(lc.env);
        if cds.has_package() {
            req = req.with_builder(Arc::new(cds.code_package.clone()));
        }
        self.controller
            .dispatch(ctx, self.driver_for(cds), req.into())
            .await?;
        Ok(())
    }

    async fn stop(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        cds: &DeploymentSpec,
    ) -> Result<(), SupportError> {
        let req = StopRequest {
            id: cccid.container_id(&self.peer_id, &self.network_id),
            timeout: std::time::Duration::ZERO,
            keep_running: false,
            keep_artifact: false,
        };
        debug!(chaincode = %cccid.canonical_name(), "stopping container");
        self.controller
            .dispatch(ctx, self.driver_for(cds), req.into())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cclife_core::{Action, DriverRouter, MockCall, MockDriver};
    use cclife_model::{ChaincodeId, ChaincodeSpec, ExecEnv};

    fn cds(exec_env: ExecEnv) -> DeploymentSpec {
        DeploymentSpec {
            chaincode_spec: ChaincodeSpec {
                chaincode_id: ChaincodeId::new("mycc", "1.0"),
                ..Default::default()
            },
            code_package: b"code".to_vec(),
            exec_env,
        }
    }

    fn runtime() -> (Arc<MockDriver>, Arc<MockDriver>, ContainerRuntime) {
        let user = Arc::new(MockDriver::with_kind(kinds::PROCESS));
        let system = Arc::new(MockDriver::with_kind(kinds::SYSTEM));
        let ctl = Arc::new(Controller::new(
            DriverRouter::new()
                .with(Arc::clone(&user) as _)
                .with(Arc::clone(&system) as _),
        ));
        let rt = ContainerRuntime::new(ctl, "peer0", "dev", "peer0:7052")
            .with_common_env(vec!["CORE_CHAINCODE_LOGGING_LEVEL=info".into()]);
        (user, system, rt)
    }

    #[test]
    fn launch_config_per_language() {
        let (_, _, rt) = runtime();
        let lc = rt.launch_config("mycc:1.0", ChaincodeLang::Golang);
        assert_eq!(lc.args, vec!["chaincode", "-peer.address=peer0:7052"]);
        assert_eq!(
            lc.env,
            vec![
                "CORE_CHAINCODE_LOGGING_LEVEL=info",
                "CORE_CHAINCODE_ID_NAME=mycc:1.0",
                "CORE_PEER_TLS_ENABLED=false",
            ]
        );

        let node = rt.launch_config("mycc:1.0", ChaincodeLang::Node);
        assert_eq!(node.args[0], "/bin/sh");
        assert!(node.args[2].ends_with("--peer.address peer0:7052"));
    }

    #[tokio::test]
    async fn user_chaincode_goes_to_user_driver() {
        let (user, system, rt) = runtime();
        let ctx = CancellationToken::new();
        let cccid = CcContext::new("ch1", "mycc", "1.0", "tx-1", false);

        rt.start(&ctx, &cccid, &cds(ExecEnv::Process)).await.unwrap();
        rt.stop(&ctx, &cccid, &cds(ExecEnv::Process)).await.unwrap();

        assert_eq!(
            user.calls(),
            vec![MockCall::Start("mycc-1.0".into()), MockCall::Stop("mycc-1.0".into())]
        );
        assert!(system.calls().is_empty());
    }

    #[tokio::test]
    async fn system_chaincode_goes_to_system_driver() {
        let (user, system, rt) = runtime();
        let cccid = CcContext::new("", "escc", "latest", "", true);

        rt.start(&CancellationToken::new(), &cccid, &cds(ExecEnv::System))
            .await
            .unwrap();
        assert_eq!(system.count(Action::Start), 1);
        assert!(user.calls().is_empty());
    }

    #[tokio::test]
    async fn driver_failure_is_returned() {
        let (user, _, rt) = runtime();
        user.fail_start("no image");
        let cccid = CcContext::new("ch1", "mycc", "1.0", "tx-1", false);

        let err = rt
            .start(&CancellationToken::new(), &cccid, &cds(ExecEnv::Process))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "start failed: no image");
    }
}
