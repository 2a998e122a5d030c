mod router;
pub use router::DriverRouter;

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use cclife_model::ContainerId;
use tokio_util::sync::CancellationToken;

use crate::error::DriverError;

/// Produces the deployable artifact of a chaincode.
pub trait Builder: Send + Sync {
    fn build(&self) -> Result<Vec<u8>, DriverError>;
}

/// Any byte buffer is a builder that hands out a copy of itself.
impl Builder for Vec<u8> {
    fn build(&self) -> Result<Vec<u8>, DriverError> {
        Ok(self.clone())
    }
}

/// Hook run by the driver right before the container is started.
pub type PrelaunchHook = Arc<dyn Fn() -> Result<(), DriverError> + Send + Sync>;

/// Post-processing applied to a resolved resource name.
pub type NameFormatter = dyn Fn(&str) -> Result<String, DriverError> + Send + Sync;

/// Pluggable backend creating, starting and stopping chaincode containers.
///
/// Drivers receive the caller's token but must bring a started operation to a consistent end:
/// the controller never aborts an in-flight operation.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Kind this driver is registered under (see [`crate::kinds`]).
    fn kind(&self) -> &str;

    async fn start(&self, ctx: &CancellationToken, req: &StartRequest) -> Result<(), DriverError>;

    async fn stop(&self, ctx: &CancellationToken, req: &StopRequest) -> Result<(), DriverError>;

    async fn destroy(
        &self,
        ctx: &CancellationToken,
        req: &DestroyRequest,
    ) -> Result<(), DriverError>;

    async fn deploy(&self, ctx: &CancellationToken, req: &DeployRequest)
    -> Result<(), DriverError>;

    /// Resolve a container identity to the resource name used for locking and bookkeeping.
    ///
    /// Must be deterministic: the same id always yields the same name.
    fn resolve_name(
        &self,
        id: &ContainerId,
        formatter: Option<&NameFormatter>,
    ) -> Result<String, DriverError>;
}

/// Apply an optional formatter to a resolved name.
pub fn format_name(name: String, formatter: Option<&NameFormatter>) -> Result<String, DriverError> {
    match formatter {
        Some(f) => f(&name),
        None => Ok(name),
    }
}

#[derive(Clone, Default)]
pub struct StartRequest {
    pub id: ContainerId,
    /// Program and arguments; `args[0]` is the program.
    pub args: Vec<String>,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    /// Files placed into the container before start, keyed by relative path.
    pub files: HashMap<String, Vec<u8>>,
    pub builder: Option<Arc<dyn Builder>>,
    pub prelaunch: Option<PrelaunchHook>,
}

impl StartRequest {
    pub fn new(id: ContainerId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, content: Vec<u8>) -> Self {
        self.files.insert(path.into(), content);
        self
    }

    pub fn with_builder(mut self, builder: Arc<dyn Builder>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn with_prelaunch(mut self, hook: PrelaunchHook) -> Self {
        self.prelaunch = Some(hook);
        self
    }

    /// Split `env` into key/value pairs. Entries without `=` get an empty value.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env
            .iter()
            .map(|kv| kv.split_once('=').unwrap_or((kv.as_str(), "")))
    }
}

impl fmt::Debug for StartRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartRequest")
            .field("id", &self.id)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("files", &self.files.keys().collect::<Vec<_>>())
            .field("builder", &self.builder.is_some())
            .field("prelaunch", &self.prelaunch.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopRequest {
    pub id: ContainerId,
    /// Grace period between the stop signal and a forced kill.
    pub timeout: Duration,
    /// Skip the forced kill once the grace period elapses.
    pub keep_running: bool,
    /// Keep the built artifact and working directory after stopping.
    pub keep_artifact: bool,
}

impl StopRequest {
    pub fn new(id: ContainerId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DestroyRequest {
    pub id: ContainerId,
    /// Kill the container even when it is still running.
    pub force: bool,
    /// Keep the built artifact.
    pub no_prune: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub id: ContainerId,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub package: Vec<u8>,
}

/// Lifecycle operation, as reported in responses and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Stop,
    Destroy,
    Deploy,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Destroy => "destroy",
            Action::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed lifecycle request handed to [`crate::Controller::dispatch`].
#[derive(Debug, Clone)]
pub enum LifecycleRequest {
    Start(StartRequest),
    Stop(StopRequest),
    Destroy(DestroyRequest),
    Deploy(DeployRequest),
}

impl LifecycleRequest {
    pub fn container_id(&self) -> &ContainerId {
        match self {
            LifecycleRequest::Start(r) => &r.id,
            LifecycleRequest::Stop(r) => &r.id,
            LifecycleRequest::Destroy(r) => &r.id,
            LifecycleRequest::Deploy(r) => &r.id,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            LifecycleRequest::Start(_) => Action::Start,
            LifecycleRequest::Stop(_) => Action::Stop,
            LifecycleRequest::Destroy(_) => Action::Destroy,
            LifecycleRequest::Deploy(_) => Action::Deploy,
        }
    }

    /// Run this request against `driver`.
    pub async fn apply(
        &self,
        ctx: &CancellationToken,
        driver: &dyn Driver,
    ) -> Result<(), DriverError> {
        match self {
            LifecycleRequest::Start(r) => driver.start(ctx, r).await,
            LifecycleRequest::Stop(r) => driver.stop(ctx, r).await,
            LifecycleRequest::Destroy(r) => driver.destroy(ctx, r).await,
            LifecycleRequest::Deploy(r) => driver.deploy(ctx, r).await,
        }
    }
}

impl From<StartRequest> for LifecycleRequest {
    fn from(r: StartRequest) -> Self {
        LifecycleRequest::Start(r)
    }
}

impl From<StopRequest> for LifecycleRequest {
    fn from(r: StopRequest) -> Self {
        LifecycleRequest::Stop(r)
    }
}

impl From<DestroyRequest> for LifecycleRequest {
    fn from(r: DestroyRequest) -> Self {
        LifecycleRequest::Destroy(r)
    }
}

impl From<DeployRequest> for LifecycleRequest {
    fn from(r: DeployRequest) -> Self {
        LifecycleRequest::Deploy(r)
    }
}
