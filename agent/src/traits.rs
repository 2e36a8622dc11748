//! Trait definitions with mockall annotations for testing
//!
//! Everything the agent needs from the operating system goes through one of
//! these seams, so the registry and coordinator can be driven by mocks.

use std::ffi::OsString;
use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use shared::RunOutcome;

use crate::error::AgentResult;

/// Result of delivering a signal to a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// The process no longer existed ("no such process")
    AlreadyGone,
}

/// Capacity of the volume holding a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Operating system process inspection and signalling
#[mockall::automock]
pub trait ProcessProbe: Send + Sync {
    /// Whether `pid` names a running (not exited, not zombie) process
    fn is_alive(&self, pid: u32) -> bool;

    /// Ask the process to stop gracefully
    fn terminate(&self, pid: u32) -> AgentResult<SignalOutcome>;

    /// Stop the process unconditionally
    fn kill(&self, pid: u32) -> AgentResult<SignalOutcome>;
}

/// Starts the current executable again as a detached worker
#[mockall::automock]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn with `args` and return the child pid without waiting for it
    fn spawn_detached(&self, args: &[OsString]) -> AgentResult<u32>;
}

/// Host capacity queries used to turn percentages into byte counts
#[mockall::automock]
pub trait SystemResources: Send + Sync {
    fn cpu_count(&self) -> usize;

    fn total_memory_bytes(&self) -> AgentResult<u64>;

    fn disk_space(&self, path: &Path) -> AgentResult<DiskSpace>;
}

/// A unit of work that runs until it finishes or is told to stop
///
/// Cancellation is a normal way to finish and is reported as
/// `RunOutcome::Cancelled`, not as an error.
#[async_trait]
pub trait Runner: Send {
    /// Short human-readable description for logs
    fn describe(&self) -> String;

    /// Check the host can run this workload before anything is registered
    fn preflight(&self) -> AgentResult<()> {
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> AgentResult<RunOutcome>;
}
