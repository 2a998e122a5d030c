//! Host-process runtime: one OS process per chaincode container, each in its own working directory.

mod error;
pub use error::{ExecError, ExecResult};

pub mod limits;
pub use limits::{RlimitConfig, attach_rlimits};

pub mod util;

#[cfg(feature = "proc")]
pub mod proc;
#[cfg(feature = "proc")]
pub use proc::{ARTIFACT, ProcConfig, ProcessDriver};

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::limits::RlimitConfig;
    #[cfg(feature = "proc")]
    pub use crate::proc::{ProcConfig, ProcessDriver};
}
