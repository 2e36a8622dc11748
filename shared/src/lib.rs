//! Shared types for the chaos agent workspace
//!
//! Contains the experiment record persisted by the registry, the runner
//! outcome shared by every workload, and the logging setup used by all
//! binaries and libraries in the workspace.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;
