//! Core shared types for experiment tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{SharedError, SharedResult};

/// Free-form resolved configuration echoed into an experiment record
pub type Parameters = BTreeMap<String, String>;

/// Resource category subject to fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Cpu,
    Mem,
    Disk,
    Net,
}

impl Target {
    /// Every target, in the order the CLI lists them
    pub const ALL: [Target; 4] = [Target::Cpu, Target::Mem, Target::Disk, Target::Net];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Cpu => "cpu",
            Target::Mem => "mem",
            Target::Disk => "disk",
            Target::Net => "net",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(Target::Cpu),
            "mem" | "memory" => Ok(Target::Mem),
            "disk" => Ok(Target::Disk),
            "net" | "network" => Ok(Target::Net),
            _ => Err(SharedError::InvalidTarget { input: s.to_string() }),
        }
    }
}

/// Globally unique experiment identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(String);

impl ExperimentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ExperimentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ExperimentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ExperimentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ownership record persisted for every running experiment
///
/// The record is the only source of truth for whether an experiment is live.
/// `pid` is written once at creation and never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: ExperimentId,
    pub target: Target,
    pub action: String,
    pub pid: u32,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Parameters,
}

impl ExperimentRecord {
    /// Build a record with a fresh id, stamped now
    pub fn new(target: Target, action: impl Into<String>, pid: u32, params: Parameters) -> Self {
        Self {
            id: ExperimentId::new(),
            target,
            action: action.into(),
            pid,
            started_at: Utc::now(),
            params,
        }
    }

    pub fn to_json_pretty(&self) -> SharedResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SharedError::SerializationError { message: e.to_string() })
    }

    pub fn from_json(content: &str) -> SharedResult<Self> {
        serde_json::from_str(content).map_err(|e| SharedError::DeserializationError { message: e.to_string() })
    }
}

/// How a workload runner finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The workload reached its natural end
    Completed,
    /// The workload stopped because its cancellation token fired
    Cancelled,
}

/// Which side of a detached launch the current process plays
///
/// Passed explicitly through launch configuration and log calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessRole {
    /// Invocation driven directly by the operator
    Cli,
    /// Spawned process that owns a detached experiment
    Worker,
}

impl ProcessRole {
    pub fn from_worker_flag(worker: bool) -> Self {
        if worker {
            ProcessRole::Worker
        } else {
            ProcessRole::Cli
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Cli => write!(f, "cli"),
            ProcessRole::Worker => write!(f, "worker"),
        }
    }
}
