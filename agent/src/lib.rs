//! Fault-injection agent
//!
//! Starts CPU, memory, disk and network experiments on the local host, tracks
//! each one as an ownership record on disk, and stops them again on request,
//! on a deadline or when the owning process receives a signal.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod runners;
pub mod services;
pub mod traits;

// Re-export commonly used types
pub use config::{AgentConfig, LaunchConfig};
pub use core::{
    ExperimentPhase, ExperimentRegistry, ExperimentRequest, ExperimentSpec, LaunchOutcome, LifecycleCoordinator,
    Liveness, ListedExperiment, RunReport,
};
pub use error::{AgentError, AgentResult, ErrorCategory};
pub use traits::{ProcessLauncher, ProcessProbe, Runner, SystemResources};
