//! Command line surface of the `chaos-agent` binary

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use shaper::{ShapingConfig, DEFAULT_FILTER};
use shared::{Parameters, Target};

use crate::core::ExperimentSpec;

/// Inject controlled faults (CPU, memory, disk, network) into this host
#[derive(Parser, Debug)]
#[command(name = "chaos-agent", version)]
#[command(about = "Fault-injection agent for CPU, memory, disk and network experiments")]
pub struct Cli {
    /// Start the experiment in a background worker and return immediately
    #[arg(long, global = true)]
    pub detach: bool,

    /// Marks the relaunched background worker
    #[arg(long, global = true, hide = true)]
    pub worker: bool,

    /// Stop the experiment after this many seconds (0 = no timeout)
    #[arg(long, global = true, allow_negative_numbers = true)]
    pub timeout: Option<i64>,

    /// Directory holding experiment records
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an experiment
    Create {
        #[command(subcommand)]
        experiment: CreateCommand,
    },
    /// Show tracked experiments, optionally for one target
    List { target: Option<Target> },
    /// Stop one experiment, or every experiment of a target
    Destroy { target: Target, id: Option<String> },
}

#[derive(Subcommand, Debug)]
pub enum CreateCommand {
    /// CPU experiments
    Cpu {
        #[command(subcommand)]
        action: CpuAction,
    },
    /// Memory experiments
    Mem {
        #[command(subcommand)]
        action: MemAction,
    },
    /// Disk experiments
    Disk {
        #[command(subcommand)]
        action: DiskAction,
    },
    /// Network experiments
    Net {
        #[command(subcommand)]
        action: NetAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CpuAction {
    /// Keep cores busy for a share of every period
    Load(CpuLoadArgs),
}

#[derive(Subcommand, Debug)]
pub enum MemAction {
    /// Allocate and hold memory
    Load(MemLoadArgs),
}

#[derive(Subcommand, Debug)]
pub enum DiskAction {
    /// Write a file and hold it
    Fill(DiskFillArgs),
}

#[derive(Subcommand, Debug)]
pub enum NetAction {
    /// Delay, jitter, drop and throttle matching packets
    Delay(NetDelayArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct CpuLoadArgs {
    /// Cores to load (0 = all)
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub cores: i64,

    /// Busy share of each period, 1-100
    #[arg(long, default_value_t = 100, allow_negative_numbers = true)]
    pub percent: i64,

    /// Seconds to run (0 = until stopped)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub duration: i64,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct MemLoadArgs {
    /// Megabytes to allocate
    #[arg(long, default_value_t = 256, allow_negative_numbers = true)]
    pub size: i64,

    /// Share of total memory, overrides --size when above 0
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub percent: f64,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct DiskFillArgs {
    /// Megabytes to write
    #[arg(long, default_value_t = 512, allow_negative_numbers = true)]
    pub size: i64,

    /// Share of the volume, overrides --size when above 0
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub percent: f64,

    /// File to create (must not exist yet)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct NetDelayArgs {
    /// Base delay in milliseconds
    #[arg(long, default_value_t = 100, allow_negative_numbers = true)]
    pub delay: i64,

    /// Jitter bound in milliseconds
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub jitter: i64,

    /// Drop probability in percent
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub loss: f64,

    /// Bandwidth cap in kbps (0 = unlimited)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub bandwidth: i64,

    /// Capture filter expression
    #[arg(long, default_value = DEFAULT_FILTER)]
    pub filter: String,
}

impl CreateCommand {
    pub fn into_spec(self) -> ExperimentSpec {
        match self {
            CreateCommand::Cpu {
                action: CpuAction::Load(args),
            } => ExperimentSpec::CpuLoad {
                cores: args.cores,
                percent: args.percent,
                duration_secs: args.duration,
            },
            CreateCommand::Mem {
                action: MemAction::Load(args),
            } => ExperimentSpec::MemLoad {
                size_mb: args.size,
                percent: args.percent,
            },
            CreateCommand::Disk {
                action: DiskAction::Fill(args),
            } => ExperimentSpec::DiskFill {
                size_mb: args.size,
                percent: args.percent,
                path: args.path,
            },
            CreateCommand::Net {
                action: NetAction::Delay(args),
            } => ExperimentSpec::NetDelay(ShapingConfig {
                filter: args.filter,
                delay_ms: args.delay,
                jitter_ms: args.jitter,
                loss_percent: args.loss,
                bandwidth_kbps: args.bandwidth,
            }),
        }
    }
}

/// Render parameters as `{key=value, ...}` in key order
pub fn format_params(params: &Parameters) -> String {
    let pairs: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{{{}}}", pairs.join(", "))
}
