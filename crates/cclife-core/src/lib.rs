//! Container lifecycle core: runtime drivers, the per-resource lock table, the lifecycle controller and the idle reaper.
//!
//! Every lifecycle operation goes through [`Controller::dispatch`], which serializes operations on the same container
//! and lets operations on different containers run in parallel.

pub mod error;
pub use error::{ContainerError, DriverError};

pub mod driver;
pub use driver::{
    Action, Builder, DeployRequest, DestroyRequest, Driver, DriverRouter, LifecycleRequest,
    NameFormatter, PrelaunchHook, StartRequest, StopRequest,
};

pub mod lock;
pub use lock::{LockTable, ResourceGuard};

pub mod controller;
pub use controller::{Controller, DispatchResponse};

pub mod reaper;
pub use reaper::{Reaper, ReaperConfig};

pub mod metrics;
pub use metrics::{MetricsBackend, MetricsHandle, NoopMetrics, Outcome};

pub mod mock;
pub use mock::{MockCall, MockDriver};

/// Well-known driver kinds.
pub mod kinds {
    /// Isolated host process per container.
    pub const PROCESS: &str = "process";
    /// In-process runtime for built-in chaincodes.
    pub const SYSTEM: &str = "system";
    /// Recording test double.
    pub const MOCK: &str = "mock";
}
