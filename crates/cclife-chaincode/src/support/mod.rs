//! Execution facade: launch, execute and stop chaincodes.
mod config;
pub use config::SupportConfig;

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use cclife_core::{Controller, MetricsHandle, Reaper};
use cclife_model::{
    CcContext, ChaincodeEvent, ChaincodeId, ChaincodeInput, ChaincodeMessage, ChaincodeSpec,
    DeploymentSpec, InvocationSpec, LaunchSpec, MessageType, Response,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace};

use crate::{
    error::{HandlerError, SupportError},
    launcher::Launcher,
    lifecycle::{Executor, Lifecycle},
    package::PackageProvider,
    registry::{HandlerRegistry, Registry},
    runtime::{ContainerRuntime, Runtime},
};

/// Entry point for running chaincode transactions.
///
/// Launches chaincodes on demand, forwards transactions to their handlers and records successful
/// executions of user chaincodes with the idle reaper.
pub struct ChaincodeSupport {
    cfg: SupportConfig,
    registry: Arc<HandlerRegistry>,
    runtime: Arc<dyn Runtime>,
    launcher: Launcher,
    reaper: Reaper,
}

impl ChaincodeSupport {
    /// Wire the facade to the lifecycle controller.
    ///
    /// Starts the reaper, so this must run inside a tokio runtime.
    pub fn new(
        cfg: SupportConfig,
        controller: Arc<Controller>,
        registry: Arc<HandlerRegistry>,
        packages: Arc<dyn PackageProvider>,
    ) -> Arc<Self> {
        let runtime = ContainerRuntime::new(
            Arc::clone(&controller),
            cfg.peer_id.clone(),
            cfg.network_id.clone(),
            cfg.peer_address.clone(),
        )
        .with_user_driver(cfg.user_driver.clone())
        .with_common_env(cfg.common_env());
        let reaper = Reaper::new(Arc::clone(&controller), cfg.user_driver.clone(), cfg.reaper);
        let metrics = Arc::clone(controller.metrics());

        Self::with_runtime(cfg, registry, Arc::new(runtime), packages, reaper, metrics)
    }

    /// Assemble the facade from its parts.
    pub fn with_runtime(
        cfg: SupportConfig,
        registry: Arc<HandlerRegistry>,
        runtime: Arc<dyn Runtime>,
        packages: Arc<dyn PackageProvider>,
        reaper: Reaper,
        metrics: MetricsHandle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let lifecycle = Lifecycle::new(Arc::new(SupportExecutor(me.clone())));
            let launcher = Launcher::new(
                Arc::clone(&runtime),
                Arc::clone(&registry) as Arc<dyn Registry>,
                packages,
                lifecycle,
                cfg.startup_timeout,
            )
            .with_metrics(metrics);
            Self {
                cfg,
                registry,
                runtime,
                launcher,
                reaper,
            }
        })
    }

    #[inline]
    pub fn config(&self) -> &SupportConfig {
        &self.cfg
    }

    #[inline]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    #[inline]
    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }

    /// Launch the chaincode if it is not running and wait until it is ready.
    pub async fn launch(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        spec: &LaunchSpec,
    ) -> Result<(), SupportError> {
        let cname = cccid.canonical_name();
        if self.registry.handler(&cname).is_some() {
            return Ok(());
        }
        if self.cfg.user_runs_cc && !cccid.syscc {
            error!(
                chaincode = %cname,
                "chaincode is not running and the peer is in developer mode; did you forget to start it?"
            );
        }
        self.launcher.launch(ctx, cccid, spec).await
    }

    /// Stop the chaincode's container. The handler is deregistered even when stopping fails.
    #[instrument(level = "debug", skip_all, fields(chaincode = %cccid.canonical_name()))]
    pub async fn stop(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        cds: &DeploymentSpec,
    ) -> Result<(), SupportError> {
        let cname = cccid.canonical_name();
        let res = self.runtime.stop(ctx, cccid, cds).await;
        if let Err(e) = self.registry.deregister(&cname) {
            debug!(error = %e, "nothing to deregister");
        }
        self.reaper.untrack(&cname);
        res
    }

    /// Invoke the chaincode of `cccid` with `args`.
    #[instrument(level = "debug", skip_all, fields(chaincode = %cccid.canonical_name(), tx_id = %cccid.tx_id))]
    pub async fn execute_chaincode(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        args: Vec<Vec<u8>>,
    ) -> Result<(Response, Option<ChaincodeEvent>), SupportError> {
        let spec = InvocationSpec {
            chaincode_spec: ChaincodeSpec {
                chaincode_id: ChaincodeId::new(cccid.name.clone(), ""),
                input: ChaincodeInput {
                    args,
                    decorations: HashMap::new(),
                },
                ..Default::default()
            },
        };
        self.execute_spec(ctx, cccid, &spec.into())
            .await
            .inspect_err(|e| error!(error = %e, "error invoking chaincode"))
    }

    /// Launch if needed, then send `Init` (deployment) or `Transaction` (invocation) and wait for the answer.
    pub async fn execute_spec(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        spec: &LaunchSpec,
    ) -> Result<(Response, Option<ChaincodeEvent>), SupportError> {
        spec.validate()?;
        let kind = match spec {
            LaunchSpec::Deployment(_) => MessageType::Init,
            LaunchSpec::Invocation(_) => MessageType::Transaction,
        };

        self.launch(ctx, cccid, spec).await?;

        let mut input = spec.chaincode_spec().input.clone();
        input.decorations = cccid.decorations.clone();
        let payload = serde_json::to_vec(&input).map_err(|e| HandlerError::Encode(e.to_string()))?;
        let msg = ChaincodeMessage::new(kind, payload, cccid.tx_id.clone(), cccid.chain_id.clone());

        let resp = self
            .execute(ctx, cccid, msg)
            .await
            .map_err(|e| SupportError::Execute {
                tx_id: cccid.tx_id.clone(),
                source: Box::new(e),
            })?;
        let out = normalize(cccid, resp)?;

        if !(cccid.syscc || self.cfg.user_runs_cc) {
            let id = cccid.container_id(&self.cfg.peer_id, &self.cfg.network_id);
            self.reaper
                .record_activity(&cccid.canonical_name(), &id, Instant::now());
        }
        Ok(out)
    }

    /// Refuse new launches and stop the reaper.
    pub async fn close(&self) {
        self.registry.close();
        self.reaper.shutdown().await;
    }

    /// Hand `msg` to the running handler, bounded by the execute timeout.
    async fn execute(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        msg: ChaincodeMessage,
    ) -> Result<ChaincodeMessage, SupportError> {
        let cname = cccid.canonical_name();
        let Some(handler) = self.registry.handler(&cname) else {
            debug!(chaincode = %cname, "chaincode is not running");
            return Err(SupportError::NotRunning(cname));
        };

        trace!(chaincode = %cname, kind = msg.kind.kind(), "sending message to chaincode");
        let call_ctx = ctx.child_token();
        match tokio::time::timeout(
            self.cfg.execute_timeout,
            handler.execute(&call_ctx, cccid, msg),
        )
        .await
        {
            Ok(res) => res.map_err(SupportError::from),
            Err(_) => {
                call_ctx.cancel();
                Err(SupportError::ExecuteTimeout {
                    tx_id: cccid.tx_id.clone(),
                })
            }
        }
    }
}

/// Turn a chaincode's answer into a response.
fn normalize(
    cccid: &CcContext,
    mut resp: ChaincodeMessage,
) -> Result<(Response, Option<ChaincodeEvent>), SupportError> {
    if let Some(event) = resp.chaincode_event.as_mut() {
        event.chaincode_id = cccid.name.clone();
        event.tx_id = cccid.tx_id.clone();
    }

    match resp.kind {
        MessageType::Completed => {
            let res: Response = serde_json::from_slice(&resp.payload).map_err(|e| {
                SupportError::MalformedResponse {
                    tx_id: cccid.tx_id.clone(),
                    reason: e.to_string(),
                }
            })?;
            Ok((res, resp.chaincode_event))
        }
        MessageType::Error => Err(SupportError::TransactionFailed(
            String::from_utf8_lossy(&resp.payload).into_owned(),
        )),
        other => Err(SupportError::UnexpectedResponse {
            kind: other.kind().to_string(),
            tx_id: cccid.tx_id.clone(),
        }),
    }
}

/// Lets the lifecycle client call back into the facade without an ownership cycle.
struct SupportExecutor(Weak<ChaincodeSupport>);

#[async_trait]
impl Executor for SupportExecutor {
    async fn execute_chaincode(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        args: Vec<Vec<u8>>,
    ) -> Result<(Response, Option<ChaincodeEvent>), SupportError> {
        let support = self
            .0
            .upgrade()
            .ok_or_else(|| SupportError::NotRunning(cccid.canonical_name()))?;
        support.execute_chaincode(ctx, cccid, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Mutex, time::Duration};

    use cclife_core::{DriverRouter, MockDriver, ReaperConfig, kinds, metrics};
    use cclife_model::ExecEnv;

    use crate::{error::PackageError, registry::Handler};

    type Reply = Box<dyn Fn(&ChaincodeMessage) -> ChaincodeMessage + Send + Sync>;

    /// Handler answering with a fixed function; records message kinds.
    struct Scripted {
        reply: Reply,
        delay: Duration,
        seen: Mutex<Vec<MessageType>>,
    }

    impl Scripted {
        fn new(reply: impl Fn(&ChaincodeMessage) -> ChaincodeMessage + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                reply: Box::new(reply),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn completing(res: Response) -> Arc<Self> {
            Self::new(move |m| m.reply(MessageType::Completed, serde_json::to_vec(&res).unwrap()))
        }
    }

    #[async_trait]
    impl Handler for Scripted {
        async fn execute(
            &self,
            _ctx: &CancellationToken,
            _cccid: &CcContext,
            msg: ChaincodeMessage,
        ) -> Result<ChaincodeMessage, HandlerError> {
            self.seen.lock().unwrap().push(msg.kind);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok((self.reply)(&msg))
        }
    }

    /// Runtime that registers a prepared handler for every started chaincode.
    struct FakeRuntime {
        registry: Arc<HandlerRegistry>,
        handlers: Mutex<HashMap<String, Arc<dyn Handler>>>,
        /// Deregister right after registering, like a chaincode that crashes at once.
        vanish: bool,
        stop_fails: bool,
        starts: Mutex<usize>,
    }

    #[async_trait]
    impl Runtime for FakeRuntime {
        async fn start(
            &self,
            _ctx: &CancellationToken,
            cccid: &CcContext,
            _cds: &DeploymentSpec,
        ) -> Result<(), SupportError> {
            *self.starts.lock().unwrap() += 1;
            let cname = cccid.canonical_name();
            let handler = self
                .handlers
                .lock()
                .unwrap()
                .get(&cname)
                .cloned()
                .ok_or_else(|| SupportError::Lifecycle(format!("no image for {cname}")))?;
            self.registry.ready(&cname, handler)?;
            if self.vanish {
                self.registry.deregister(&cname)?;
            }
            Ok(())
        }

        async fn stop(
            &self,
            _ctx: &CancellationToken,
            _cccid: &CcContext,
            _cds: &DeploymentSpec,
        ) -> Result<(), SupportError> {
            if self.stop_fails {
                return Err(SupportError::Lifecycle("stuck".into()));
            }
            Ok(())
        }
    }

    struct NoPackages;

    #[async_trait]
    impl PackageProvider for NoPackages {
        async fn get_chaincode(&self, name: &str, _: &str) -> Result<DeploymentSpec, PackageError> {
            Err(PackageError::NotFound(name.to_string()))
        }
    }

    fn mycc_cds() -> DeploymentSpec {
        DeploymentSpec {
            chaincode_spec: ChaincodeSpec {
                chaincode_id: ChaincodeId::new("mycc", "1.0"),
                ..Default::default()
            },
            code_package: b"code".to_vec(),
            exec_env: ExecEnv::Process,
        }
    }

    /// Lifecycle chaincode serving the deployment spec of `mycc`.
    fn lscc() -> Arc<Scripted> {
        Scripted::completing(Response::success(serde_json::to_vec(&mycc_cds()).unwrap()))
    }

    fn mycc() -> CcContext {
        CcContext::new("ch1", "mycc", "1.0", "tx-1", false)
    }

    struct Fixture {
        support: Arc<ChaincodeSupport>,
        runtime: Arc<FakeRuntime>,
    }

    fn fixture_with(cfg: SupportConfig, mycc_handler: Arc<dyn Handler>, vanish: bool, stop_fails: bool) -> Fixture {
        let registry = Arc::new(HandlerRegistry::new(true));
        registry.ready("lscc:latest", lscc()).unwrap();

        let mut handlers: HashMap<String, Arc<dyn Handler>> = HashMap::new();
        handlers.insert("mycc:1.0".into(), mycc_handler);
        let runtime = Arc::new(FakeRuntime {
            registry: Arc::clone(&registry),
            handlers: Mutex::new(handlers),
            vanish,
            stop_fails,
            starts: Mutex::new(0),
        });

        let ctl = Arc::new(Controller::new(
            DriverRouter::new().with(Arc::new(MockDriver::new())),
        ));
        let reaper = Reaper::new(ctl, kinds::MOCK, ReaperConfig::default());
        let support = ChaincodeSupport::with_runtime(
            cfg,
            registry,
            runtime.clone(),
            Arc::new(NoPackages),
            reaper,
            metrics::noop(),
        );
        Fixture { support, runtime }
    }

    fn fixture(mycc_handler: Arc<dyn Handler>) -> Fixture {
        fixture_with(test_config(), mycc_handler, false, false)
    }

    fn test_config() -> SupportConfig {
        SupportConfig {
            peer_id: "peer0".into(),
            startup_timeout: Duration::from_secs(5),
            execute_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn execute_launches_once_and_feeds_reaper() {
        let handler = Scripted::new(|m| {
            m.reply(
                MessageType::Completed,
                serde_json::to_vec(&Response::success(b"ok".to_vec())).unwrap(),
            )
            .with_event(ChaincodeEvent {
                event_name: "moved".into(),
                chaincode_id: "forged".into(),
                ..Default::default()
            })
        });
        let f = fixture(handler.clone());
        let ctx = CancellationToken::new();

        let (res, event) = f
            .support
            .execute_chaincode(&ctx, &mycc(), vec![b"invoke".to_vec()])
            .await
            .unwrap();
        assert_eq!(res.payload, b"ok");
        let event = event.unwrap();
        assert_eq!(event.chaincode_id, "mycc");
        assert_eq!(event.tx_id, "tx-1");
        assert!(f.support.reaper().is_tracked("mycc:1.0"));
        let first_seen = f.support.reaper().last_active("mycc:1.0").unwrap();

        f.support
            .execute_chaincode(&ctx, &mycc(), vec![b"invoke".to_vec()])
            .await
            .unwrap();
        assert_eq!(*f.runtime.starts.lock().unwrap(), 1);
        assert!(f.support.reaper().last_active("mycc:1.0").unwrap() >= first_seen);
        assert_eq!(
            *handler.seen.lock().unwrap(),
            vec![MessageType::Transaction, MessageType::Transaction]
        );
    }

    #[tokio::test]
    async fn system_chaincode_calls_are_not_tracked() {
        let f = fixture(Scripted::completing(Response::success(Vec::new())));
        let cccid = CcContext::new("ch1", "lscc", "latest", "tx-1", true);

        f.support
            .execute_chaincode(&CancellationToken::new(), &cccid, vec![b"getdepspec".to_vec()])
            .await
            .unwrap();
        assert!(f.support.reaper().is_empty());
    }

    #[tokio::test]
    async fn developer_mode_is_not_tracked() {
        let cfg = SupportConfig {
            user_runs_cc: true,
            ..test_config()
        };
        let f = fixture_with(cfg, Scripted::completing(Response::success(Vec::new())), false, false);
        f.support
            .registry()
            .ready("mycc:1.0", Scripted::completing(Response::success(Vec::new())))
            .unwrap();

        f.support
            .execute_chaincode(&CancellationToken::new(), &mycc(), vec![b"invoke".to_vec()])
            .await
            .unwrap();
        assert!(f.support.reaper().is_empty());
        assert_eq!(*f.runtime.starts.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_handler_fails_without_reaper_update() {
        let f = fixture_with(
            test_config(),
            Scripted::completing(Response::success(Vec::new())),
            true,
            false,
        );

        let err = f
            .support
            .execute_chaincode(&CancellationToken::new(), &mycc(), vec![b"invoke".to_vec()])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to execute transaction tx-1: unable to invoke chaincode mycc:1.0"
        );
        assert!(f.support.reaper().is_empty());
    }

    #[tokio::test]
    async fn error_reply_is_a_failure() {
        let f = fixture(Scripted::new(|m| m.reply(MessageType::Error, b"boom".to_vec())));
        let err = f
            .support
            .execute_chaincode(&CancellationToken::new(), &mycc(), vec![b"invoke".to_vec()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "transaction returned with failure: boom");
        assert!(f.support.reaper().is_empty());
    }

    #[tokio::test]
    async fn malformed_and_unexpected_replies_are_typed() {
        let f = fixture(Scripted::new(|m| m.reply(MessageType::Completed, b"{".to_vec())));
        let err = f
            .support
            .execute_chaincode(&CancellationToken::new(), &mycc(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SupportError::MalformedResponse { .. }));

        let f = fixture(Scripted::new(|m| m.reply(MessageType::Keepalive, Vec::new())));
        let err = f
            .support
            .execute_chaincode(&CancellationToken::new(), &mycc(), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unexpected response type keepalive for transaction tx-1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let slow = Arc::new(Scripted {
            reply: Box::new(|m: &ChaincodeMessage| m.reply(MessageType::Completed, Vec::new())),
            delay: Duration::from_secs(60),
            seen: Mutex::new(Vec::new()),
        });
        let f = fixture(slow);

        let err = f
            .support
            .execute_chaincode(&CancellationToken::new(), &mycc(), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to execute transaction tx-1: timeout expired while executing transaction tx-1"
        );
        assert!(f.support.reaper().is_empty());
    }

    #[tokio::test]
    async fn deployment_sends_init_with_decorations() {
        let handler = Scripted::new(|m| {
            let input: ChaincodeInput = serde_json::from_slice(&m.payload).unwrap();
            let res = Response::success(input.decorations.get("k").cloned().unwrap_or_default());
            m.reply(MessageType::Completed, serde_json::to_vec(&res).unwrap())
        });
        let f = fixture(handler.clone());
        let mut decorations = HashMap::new();
        decorations.insert("k".to_string(), b"v".to_vec());
        let cccid = mycc().with_decorations(decorations);

        let (res, _) = f
            .support
            .execute_spec(&CancellationToken::new(), &cccid, &mycc_cds().into())
            .await
            .unwrap();
        assert_eq!(res.payload, b"v");
        assert_eq!(*handler.seen.lock().unwrap(), vec![MessageType::Init]);
    }

    #[tokio::test]
    async fn stop_always_deregisters() {
        let f = fixture_with(
            test_config(),
            Scripted::completing(Response::success(Vec::new())),
            false,
            true,
        );
        let ctx = CancellationToken::new();
        f.support
            .execute_chaincode(&ctx, &mycc(), Vec::new())
            .await
            .unwrap();
        assert!(f.support.registry().handler("mycc:1.0").is_some());

        let err = f.support.stop(&ctx, &mycc(), &mycc_cds()).await.unwrap_err();
        assert_eq!(err.to_string(), "stuck");
        assert!(f.support.registry().handler("mycc:1.0").is_none());
        assert!(!f.support.reaper().is_tracked("mycc:1.0"));
    }

    #[tokio::test]
    async fn close_refuses_new_launches() {
        let f = fixture(Scripted::completing(Response::success(Vec::new())));
        f.support.close().await;
        assert!(f.support.reaper().is_closed());

        let err = f
            .support
            .execute_chaincode(&CancellationToken::new(), &mycc(), Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to register mycc:1.0 as launching"));
    }
}
