//! Experiment lifecycle: requests, the record registry and the coordinator

pub mod coordinator;
pub mod experiment;
pub mod registry;

pub use coordinator::{ExperimentPhase, LaunchOutcome, LifecycleCoordinator, RunReport};
pub use experiment::{ExperimentRequest, ExperimentSpec, ResolvedExperiment, Workload, DISK_SAFETY_MARGIN_BYTES};
pub use registry::{ExperimentIter, ExperimentRegistry, Liveness, ListedExperiment, ReleaseHandle};
