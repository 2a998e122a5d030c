mod container_id;
pub use container_id::ContainerId;

mod context;
pub use context::CcContext;

mod response;
pub use response::{ChaincodeEvent, Response};

mod error;
pub use error::ModelError;

/// Canonical `name:version` identity of a chaincode.
///
/// Keys the handler registry and the idle reaper.
pub type CanonicalName = String;

/// Name of the lifecycle system chaincode that serves deployment specs.
pub const LIFECYCLE_CHAINCODE: &str = "lscc";

/// Version every system chaincode runs under.
pub const SYSTEM_CHAINCODE_VERSION: &str = "latest";
