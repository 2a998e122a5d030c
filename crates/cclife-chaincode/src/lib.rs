//! Chaincode side of the lifecycle: handler registry, launch coordination and the execution facade.
//!
//! [`ChaincodeSupport`] is the entry point. It makes sure a chaincode is running (launching it through
//! [`Launcher`] when needed), forwards transactions to its handler and feeds the idle reaper.

pub mod error;
pub use error::{HandlerError, PackageError, RegistryError, SupportError};

pub mod registry;
pub use registry::{Handler, HandlerRegistry, LaunchState, Registry};

pub mod lifecycle;
pub use lifecycle::{Executor, Lifecycle};

pub mod package;
pub use package::{FsPackageProvider, PackageProvider};

pub mod runtime;
pub use runtime::{ContainerRuntime, Runtime};

pub mod launcher;
pub use launcher::Launcher;

pub mod support;
pub use support::{ChaincodeSupport, SupportConfig};

pub mod inproc;
pub use inproc::{InprocDriver, SystemChaincode};
