use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::{
    driver::{Action, DriverRouter, LifecycleRequest},
    error::ContainerError,
    lock::LockTable,
    metrics::{self, MetricsHandle, Outcome},
};

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResponse {
    /// Resource name the request resolved to.
    pub resource: String,
    pub action: Action,
    /// Time spent waiting for the lock plus running the action.
    pub elapsed: Duration,
}

/// Dispatches lifecycle requests to drivers.
///
/// Requests resolving to the same resource run one at a time, in arrival order.
/// Requests for different resources never wait on each other.
pub struct Controller {
    router: DriverRouter,
    locks: Arc<LockTable>,
    metrics: MetricsHandle,
}

impl Controller {
    pub fn new(router: DriverRouter) -> Self {
        Self {
            router,
            locks: Arc::new(LockTable::new()),
            metrics: metrics::noop(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    #[inline]
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    #[inline]
    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }

    #[inline]
    pub fn router(&self) -> &DriverRouter {
        &self.router
    }

    /// Run `req` against the driver registered for `kind`.
    ///
    /// The request runs on its own task. When `ctx` is cancelled first this returns [`ContainerError::Cancelled`],
    /// but only after the task has finished: the resource lock is never abandoned and a second operation
    /// on the same resource cannot overtake the first.
    #[instrument(level = "debug", skip(self, ctx, req), fields(action = %req.action(), container = %req.container_id()))]
    pub async fn dispatch(
        &self,
        ctx: &CancellationToken,
        kind: &str,
        req: LifecycleRequest,
    ) -> Result<DispatchResponse, ContainerError> {
        let driver = self.router.require(kind)?;
        let action = req.action();
        let locks = Arc::clone(&self.locks);
        let task_ctx = ctx.clone();
        let started = Instant::now();

        let mut task = tokio::spawn(async move {
            let resource = driver.resolve_name(req.container_id(), None)?;
            let _guard = locks.acquire(&resource).await;
            trace!(resource = %resource, "running lifecycle action");
            req.apply(&task_ctx, driver.as_ref()).await?;
            Ok::<_, ContainerError>(resource)
        });

        let result = tokio::select! {
            joined = &mut task => flatten(joined),
            _ = ctx.cancelled() => {
                debug!("caller cancelled; waiting for in-flight action to finish");
                if let Err(e) = flatten((&mut task).await) {
                    warn!(error = %e, "lifecycle action failed after caller cancelled");
                }
                Err(ContainerError::Cancelled)
            }
        };

        let elapsed = started.elapsed();
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(ContainerError::Cancelled) => Outcome::Cancelled,
            Err(_) => Outcome::Failure,
        };
        self.metrics.record_dispatch(kind, action, outcome, elapsed);

        match result {
            Ok(resource) => {
                debug!(resource = %resource, elapsed_ms = elapsed.as_millis() as u64, "lifecycle action completed");
                Ok(DispatchResponse {
                    resource,
                    action,
                    elapsed,
                })
            }
            Err(e) => {
                debug!(error = %e, "lifecycle action failed");
                Err(e)
            }
        }
    }

    /// [`Controller::dispatch`] with a caller deadline.
    pub async fn dispatch_with_deadline(
        &self,
        kind: &str,
        req: LifecycleRequest,
        deadline: Duration,
    ) -> Result<DispatchResponse, ContainerError> {
        let ctx = CancellationToken::new();
        let timer = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                ctx.cancel();
            })
        };
        let result = self.dispatch(&ctx, kind, req).await;
        timer.abort();
        result
    }
}

fn flatten(joined: Result<Result<String, ContainerError>, JoinError>) -> Result<String, ContainerError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(ContainerError::Join(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DriverError, StartRequest, StopRequest, kinds,
        mock::{MockCall, MockDriver},
    };
    use cclife_model::ContainerId;

    fn id(name: &str) -> ContainerId {
        ContainerId::new("peer0", "dev", name, "1.0")
    }

    fn controller(driver: Arc<MockDriver>) -> Arc<Controller> {
        Arc::new(Controller::new(DriverRouter::new().with(driver)))
    }

    #[tokio::test]
    async fn dispatch_start_and_stop() {
        let driver = Arc::new(MockDriver::new());
        let ctl = controller(Arc::clone(&driver));
        let ctx = CancellationToken::new();

        let resp = ctl
            .dispatch(&ctx, kinds::MOCK, StartRequest::new(id("cc")).into())
            .await
            .unwrap();
        assert_eq!(resp.resource, "cc-1.0");
        assert_eq!(resp.action, Action::Start);
        assert!(driver.is_running("cc-1.0"));

        ctl.dispatch(&ctx, kinds::MOCK, StopRequest::new(id("cc")).into())
            .await
            .unwrap();
        assert!(!driver.is_running("cc-1.0"));
        assert_eq!(
            driver.calls(),
            vec![MockCall::Start("cc-1.0".into()), MockCall::Stop("cc-1.0".into())]
        );
        assert!(ctl.locks().is_empty());
    }

    #[tokio::test]
    async fn unknown_kind_does_not_reach_driver() {
        let driver = Arc::new(MockDriver::new());
        let ctl = controller(Arc::clone(&driver));

        let err = ctl
            .dispatch(&CancellationToken::new(), "docker", StartRequest::new(id("cc")).into())
            .await
            .unwrap_err();
        assert_eq!(err, ContainerError::UnknownDriver("docker".into()));
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn driver_errors_propagate_and_release_lock() {
        let driver = Arc::new(MockDriver::new());
        driver.fail_start("no image");
        let ctl = controller(Arc::clone(&driver));

        let err = ctl
            .dispatch(&CancellationToken::new(), kinds::MOCK, StartRequest::new(id("cc")).into())
            .await
            .unwrap_err();
        assert_eq!(err, ContainerError::Driver(DriverError::Start("no image".into())));
        assert!(ctl.locks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn same_resource_is_serialized() {
        let driver = Arc::new(MockDriver::new().with_delay(Duration::from_millis(50)));
        let ctl = controller(Arc::clone(&driver));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let ctl = Arc::clone(&ctl);
            handles.push(tokio::spawn(async move {
                ctl.dispatch(&CancellationToken::new(), kinds::MOCK, StartRequest::new(id("cc")).into())
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(driver.max_in_flight("cc-1.0"), 1);
        assert_eq!(driver.count(Action::Start), 5);
        assert!(ctl.locks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_resources_run_in_parallel() {
        let driver = Arc::new(MockDriver::new().with_delay(Duration::from_millis(100)));
        let ctl = controller(Arc::clone(&driver));
        let started = tokio::time::Instant::now();

        let mut handles = Vec::new();
        for i in 0..4 {
            let ctl = Arc::clone(&ctl);
            handles.push(tokio::spawn(async move {
                ctl.dispatch(
                    &CancellationToken::new(),
                    kinds::MOCK,
                    StartRequest::new(id(&format!("cc{i}"))).into(),
                )
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(driver.peak_in_flight(), 4);
        assert!(ctl.locks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_early_but_action_completes() {
        let driver = Arc::new(MockDriver::new().with_delay(Duration::from_secs(2)));
        let ctl = controller(Arc::clone(&driver));

        let err = ctl
            .dispatch_with_deadline(
                kinds::MOCK,
                StartRequest::new(id("cc")).into(),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();

        assert_eq!(err, ContainerError::Cancelled);
        // the in-flight start was awaited, not abandoned
        assert!(driver.is_running("cc-1.0"));
        assert!(ctl.locks().is_empty());
    }

    #[tokio::test]
    async fn deadline_not_hit_returns_response() {
        let driver = Arc::new(MockDriver::new());
        let ctl = controller(Arc::clone(&driver));

        let resp = ctl
            .dispatch_with_deadline(
                kinds::MOCK,
                StartRequest::new(id("cc")).into(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(resp.resource, "cc-1.0");
    }
}
