//! Public data model for chaincode container lifecycle management.
//!
//! Everything here is plain data: identities, deployment/invocation specs, the messages exchanged with
//! running chaincode handlers and the transaction context carried through launch and execution.

mod domain;
pub use domain::*;

mod kind;
pub use kind::*;
