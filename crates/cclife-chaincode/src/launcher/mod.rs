//! Launch coordination: exactly one launch attempt per chaincode, bounded by the startup timeout.
use std::{sync::Arc, time::Duration};

use cclife_core::{ContainerError, MetricsHandle, Outcome, metrics};
use cclife_model::{CcContext, DeploymentSpec, LaunchSpec};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::{
    error::SupportError,
    lifecycle::Lifecycle,
    package::PackageProvider,
    registry::{LaunchState, Registry},
    runtime::Runtime,
};

pub struct Launcher {
    attempt: Attempt,
    packages: Arc<dyn PackageProvider>,
    lifecycle: Lifecycle,
}

impl Launcher {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        registry: Arc<dyn Registry>,
        packages: Arc<dyn PackageProvider>,
        lifecycle: Lifecycle,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            attempt: Attempt {
                runtime,
                registry,
                startup_timeout,
                metrics: metrics::noop(),
            },
            packages,
            lifecycle,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.attempt.metrics = metrics;
        self
    }

    #[inline]
    pub fn startup_timeout(&self) -> Duration {
        self.attempt.startup_timeout
    }

    /// Make sure the chaincode of `cccid` is running.
    ///
    /// A chaincode with a ready handler returns at once. Concurrent callers for the same chaincode share one launch:
    /// the first starts the container, the others wait for its outcome, never longer than the startup timeout.
    ///
    /// The attempt runs on its own task. Dropping the returned future does not abandon it: a failed or timed out
    /// start still stops the container and deregisters the chaincode.
    #[instrument(level = "debug", skip_all, fields(chaincode = %cccid.canonical_name(), tx_id = %cccid.tx_id, spec = spec.kind()))]
    pub async fn launch(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        spec: &LaunchSpec,
    ) -> Result<(), SupportError> {
        let cname = cccid.canonical_name();
        let registry = &self.attempt.registry;
        if registry.handler(&cname).is_some() {
            return Ok(());
        }

        let cds = self.deployment_spec(ctx, cccid, spec).await?;

        let (state, already_started) =
            registry
                .launching(&cname)
                .map_err(|e| SupportError::Registration {
                    name: cname.clone(),
                    reason: e.to_string(),
                })?;

        if already_started {
            debug!("launch already in progress; waiting for its outcome");
            if tokio::time::timeout(self.startup_timeout(), state.wait())
                .await
                .is_err()
            {
                warn!("gave up waiting for another caller's launch");
                return Err(SupportError::StartupTimeout {
                    name: cname,
                    tx_id: cccid.tx_id.clone(),
                });
            }
            return match state.err() {
                None => Ok(()),
                Some(reason) => Err(SupportError::LaunchFailed(reason)),
            };
        }

        let task = tokio::spawn(
            self.attempt
                .clone()
                .run(ctx.clone(), cccid.clone(), cds, state)
                .in_current_span(),
        );
        match task.await {
            Ok(result) => result,
            Err(e) => Err(ContainerError::Join(e.to_string()).into()),
        }
    }

    /// Deployment spec to start, with its code package.
    async fn deployment_spec(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        spec: &LaunchSpec,
    ) -> Result<DeploymentSpec, SupportError> {
        let cname = cccid.canonical_name();
        let cds = match spec {
            LaunchSpec::Invocation(_) if cccid.syscc => {
                return Err(SupportError::SystemNotRunning(cname));
            }
            LaunchSpec::Invocation(_) => self
                .lifecycle
                .get_deployment_spec(ctx, &cccid.chain_id, &cccid.tx_id, &cccid.name)
                .await
                .map_err(|e| SupportError::DeploymentSpec {
                    name: cname,
                    reason: e.to_string(),
                })?,
            LaunchSpec::Deployment(cds) => cds.clone(),
        };

        if cds.has_package() || cds.is_system() || cccid.syscc {
            return Ok(cds);
        }
        let id = &cds.chaincode_spec.chaincode_id;
        debug!(name = %id.name, version = %id.version, "fetching chaincode package");
        self.packages
            .get_chaincode(&id.name, &id.version)
            .await
            .map_err(|e| SupportError::Package(e.to_string()))
    }
}

/// One launch attempt, owned by the task that runs it.
#[derive(Clone)]
struct Attempt {
    runtime: Arc<dyn Runtime>,
    registry: Arc<dyn Registry>,
    startup_timeout: Duration,
    metrics: MetricsHandle,
}

impl Attempt {
    /// Start, wait for readiness, and on failure notify waiters and clean up.
    async fn run(
        self,
        ctx: CancellationToken,
        cccid: CcContext,
        cds: DeploymentSpec,
        state: Arc<LaunchState>,
    ) -> Result<(), SupportError> {
        let cname = cccid.canonical_name();
        let result = match self.start_and_wait(&ctx, &cccid, &cds, &state).await {
            Ok(()) => match state.err() {
                None => Ok(()),
                Some(reason) => Err(SupportError::LaunchFailed(reason)),
            },
            Err(e) => {
                self.registry.failed(&cname, &e.to_string());
                Err(e)
            }
        };

        match &result {
            Ok(()) => {
                info!("chaincode launched");
                self.metrics.record_launch(Outcome::Success);
            }
            Err(e) => {
                error!(error = %e, "stopping due to error while launching");
                let outcome = match e {
                    SupportError::StartupTimeout { .. } => Outcome::Timeout,
                    _ => Outcome::Failure,
                };
                self.metrics.record_launch(outcome);
                self.cleanup(&ctx, &cccid, &cds).await;
            }
        }
        result
    }

    /// Start the container and wait for the chaincode to become ready.
    async fn start_and_wait(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        cds: &DeploymentSpec,
        state: &LaunchState,
    ) -> Result<(), SupportError> {
        let (fail_tx, mut fail_rx) = oneshot::channel();
        {
            let runtime = Arc::clone(&self.runtime);
            let ctx = ctx.clone();
            let cccid = cccid.clone();
            let cds = cds.clone();
            tokio::spawn(async move {
                if let Err(e) = runtime.start(&ctx, &cccid, &cds).await {
                    let _ = fail_tx.send(e);
                }
            });
        }

        let timeout = tokio::time::sleep(self.startup_timeout);
        tokio::pin!(timeout);
        tokio::select! {
            _ = state.wait() => Ok(()),
            Ok(e) = &mut fail_rx => Err(SupportError::Start(e.to_string())),
            _ = &mut timeout => Err(SupportError::StartupTimeout {
                name: cccid.canonical_name(),
                tx_id: cccid.tx_id.clone(),
            }),
        }
    }

    /// Stop the container and forget the chaincode. Failures are logged; the launch error stands.
    async fn cleanup(&self, ctx: &CancellationToken, cccid: &CcContext, cds: &DeploymentSpec) {
        let cname = cccid.canonical_name();
        if let Err(e) = self.runtime.stop(ctx, cccid, cds).await {
            warn!(chaincode = %cname, error = %e, "failed to stop chaincode after launch error");
        }
        if let Err(e) = self.registry.deregister(&cname) {
            debug!(chaincode = %cname, error = %e, "deregister after launch error");
        }
    }
}
