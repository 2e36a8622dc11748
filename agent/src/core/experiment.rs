//! Experiment requests: operator input resolved into validated workloads
//!
//! Resolution runs before anything is registered or spawned, so an invalid
//! request never leaves a record or a child process behind.

use std::path::PathBuf;
use std::time::Duration;

use shaper::{ShapingConfig, ShapingSession, WinDivertCapture};
use shared::{Parameters, Target};

use crate::error::{AgentError, AgentResult};
use crate::runners::disk::default_fill_path;
use crate::runners::{CpuLoadRunner, DiskFillRunner, MemoryHoldRunner, NetworkRunner};
use crate::traits::{Runner, SystemResources};

const MIB: u64 = 1024 * 1024;
/// Free space left untouched by a percentage-based disk fill
pub const DISK_SAFETY_MARGIN_BYTES: u64 = 64 * MIB;

/// What to run, as the operator asked for it
#[derive(Debug, Clone, PartialEq)]
pub enum ExperimentSpec {
    CpuLoad {
        /// Zero, negative or more than the host has means every core
        cores: i64,
        percent: i64,
        /// Seconds; zero means until stopped
        duration_secs: i64,
    },
    MemLoad {
        size_mb: i64,
        /// Share of total memory; overrides `size_mb` when positive
        percent: f64,
    },
    DiskFill {
        size_mb: i64,
        /// Share of the volume; overrides `size_mb` when positive
        percent: f64,
        path: Option<PathBuf>,
    },
    NetDelay(ShapingConfig),
}

/// Registry-facing description of an experiment
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRequest {
    pub target: Target,
    pub action: String,
    pub params: Parameters,
    /// Stop the experiment after this long
    pub deadline: Option<Duration>,
}

impl ExperimentRequest {
    pub fn new(target: Target, action: impl Into<String>) -> Self {
        Self {
            target,
            action: action.into(),
            params: Parameters::new(),
            deadline: None,
        }
    }

    /// Add an echoed parameter (fluent API)
    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Configure the run deadline (fluent API)
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.action.trim().is_empty() {
            return Err(AgentError::validation("action", "", "must not be empty"));
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(AgentError::validation("deadline", "0s", "must be positive when set"));
        }
        Ok(())
    }
}

/// Validated workload parameters, ready to become a runner
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Cpu { cores: usize, percent: u8 },
    Memory { bytes: u64 },
    Disk { path: PathBuf, bytes: u64 },
    Network(ShapingSession),
}

impl Workload {
    pub fn into_runner(self) -> Box<dyn Runner> {
        match self {
            Workload::Cpu { cores, percent } => Box::new(CpuLoadRunner::new(cores, percent)),
            Workload::Memory { bytes } => Box::new(MemoryHoldRunner::new(bytes)),
            Workload::Disk { path, bytes } => Box::new(DiskFillRunner::new(Some(path), bytes)),
            Workload::Network(session) => Box::new(NetworkRunner::new(session, Box::new(WinDivertCapture::new()))),
        }
    }
}

/// A request paired with the workload that implements it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedExperiment {
    pub request: ExperimentRequest,
    pub workload: Workload,
}

impl ExperimentSpec {
    pub fn target(&self) -> Target {
        match self {
            ExperimentSpec::CpuLoad { .. } => Target::Cpu,
            ExperimentSpec::MemLoad { .. } => Target::Mem,
            ExperimentSpec::DiskFill { .. } => Target::Disk,
            ExperimentSpec::NetDelay(_) => Target::Net,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            ExperimentSpec::CpuLoad { .. } | ExperimentSpec::MemLoad { .. } => "load",
            ExperimentSpec::DiskFill { .. } => "fill",
            ExperimentSpec::NetDelay(_) => "delay",
        }
    }

    /// Validate every parameter and turn percentages into concrete sizes
    pub fn resolve(&self, resources: &dyn SystemResources) -> AgentResult<ResolvedExperiment> {
        let request = ExperimentRequest::new(self.target(), self.action());

        match self {
            ExperimentSpec::CpuLoad {
                cores,
                percent,
                duration_secs,
            } => {
                if !(1..=100).contains(percent) {
                    return Err(AgentError::validation("percent", percent, "must be between 1 and 100"));
                }
                if *duration_secs < 0 {
                    return Err(AgentError::validation("duration", duration_secs, "must be zero or positive"));
                }

                let available = resources.cpu_count().max(1);
                let cores = match usize::try_from(*cores) {
                    Ok(n) if n > 0 && n <= available => n,
                    _ => available,
                };
                let deadline = (*duration_secs > 0).then(|| Duration::from_secs(*duration_secs as u64));

                Ok(ResolvedExperiment {
                    request: request
                        .with_param("cores", cores)
                        .with_param("percent", percent)
                        .with_param("duration", format!("{}s", duration_secs))
                        .with_deadline(deadline),
                    workload: Workload::Cpu {
                        cores,
                        percent: *percent as u8,
                    },
                })
            }

            ExperimentSpec::MemLoad { size_mb, percent } => {
                let size_bytes = size_in_bytes(*size_mb)?;
                check_percent(*percent)?;

                let bytes = if *percent > 0.0 {
                    share_of(resources.total_memory_bytes()?, *percent)
                } else {
                    size_bytes
                };

                Ok(ResolvedExperiment {
                    request: request
                        .with_param("bytes", bytes)
                        .with_param("percent", format!("{:.2}", percent)),
                    workload: Workload::Memory { bytes },
                })
            }

            ExperimentSpec::DiskFill { size_mb, percent, path } => {
                let size_bytes = size_in_bytes(*size_mb)?;
                check_percent(*percent)?;

                let path = path.clone().unwrap_or_else(default_fill_path);
                // The fill file is deleted on stop, so it must be ours from the start
                if std::fs::symlink_metadata(&path).is_ok() {
                    return Err(AgentError::validation("path", path.display(), "file already exists"));
                }

                let bytes = if *percent > 0.0 {
                    let volume = match path.parent() {
                        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                        _ => std::env::temp_dir(),
                    };
                    let space = resources.disk_space(&volume)?;
                    let wanted = share_of(space.total_bytes, *percent);
                    let cap = space.free_bytes.saturating_sub(DISK_SAFETY_MARGIN_BYTES);
                    if cap > 0 {
                        wanted.min(cap)
                    } else {
                        wanted
                    }
                } else {
                    size_bytes
                };

                Ok(ResolvedExperiment {
                    request: request
                        .with_param("bytes", bytes)
                        .with_param("path", path.display())
                        .with_param("percent", format!("{:.2}", percent)),
                    workload: Workload::Disk { path, bytes },
                })
            }

            ExperimentSpec::NetDelay(config) => {
                let session = config.validate()?;
                Ok(ResolvedExperiment {
                    request: request
                        .with_param("delay", config.delay_ms)
                        .with_param("jitter", config.jitter_ms)
                        .with_param("loss", format!("{:.2}", config.loss_percent))
                        .with_param("bandwidthKbps", config.bandwidth_kbps)
                        .with_param("filter", &session.filter_expression),
                    workload: Workload::Network(session),
                })
            }
        }
    }
}

fn size_in_bytes(size_mb: i64) -> AgentResult<u64> {
    u64::try_from(size_mb)
        .ok()
        .and_then(|mb| mb.checked_mul(MIB))
        .ok_or_else(|| AgentError::validation("size", size_mb, "must be zero or positive"))
}

fn check_percent(percent: f64) -> AgentResult<()> {
    if (0.0..=100.0).contains(&percent) {
        Ok(())
    } else {
        Err(AgentError::validation("percent", percent, "must be between 0 and 100"))
    }
}

fn share_of(total: u64, percent: f64) -> u64 {
    (total as f64 * percent / 100.0) as u64
}
