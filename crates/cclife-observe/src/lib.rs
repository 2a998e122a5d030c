//! Logging setup shared by cclife binaries.
mod logger;
pub use logger::*;
