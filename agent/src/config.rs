//! Agent and launch configuration

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use shared::ProcessRole;

use crate::error::{AgentError, AgentResult};

/// Environment variable overriding the state directory
pub const STATE_DIR_ENV: &str = "CHAOS_AGENT_STATE_DIR";

/// Flag that marks a relaunched detached worker
pub const WORKER_FLAG: &str = "--worker";

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where experiment records live and how long termination waits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub state_dir: PathBuf,
    /// How long a process gets to exit after SIGTERM before SIGKILL
    pub grace_period: Duration,
    pub poll_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            grace_period: DEFAULT_GRACE_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl AgentConfig {
    /// Build from the command line flag, then the environment, then the default
    pub fn resolve(state_dir_flag: Option<PathBuf>) -> Self {
        let env_dir = std::env::var_os(STATE_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Self {
            state_dir: state_dir_flag.or(env_dir).unwrap_or_else(default_state_dir),
            ..Self::default()
        }
    }

    /// Configure state directory (fluent API)
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    /// Configure termination grace period (fluent API)
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Configure liveness poll interval (fluent API)
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

fn default_state_dir() -> PathBuf {
    std::env::temp_dir().join("chaos-agent")
}

/// How a `create` invocation should be carried out
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchConfig {
    /// This process is the relaunched worker of a detached launch
    pub worker: bool,
    pub detach: bool,
    /// Upper bound on the experiment's run time
    pub timeout: Option<Duration>,
    /// Arguments relayed to the worker on a detached launch
    pub args: Vec<OsString>,
}

impl LaunchConfig {
    /// Validate raw flag values; a timeout of zero means none
    pub fn new(worker: bool, detach: bool, timeout_secs: Option<i64>, args: Vec<OsString>) -> AgentResult<Self> {
        let timeout = match timeout_secs {
            None | Some(0) => None,
            Some(secs) if secs < 0 => {
                return Err(AgentError::validation("timeout", secs, "must be zero or positive"));
            }
            Some(secs) => Some(Duration::from_secs(secs as u64)),
        };

        Ok(Self {
            worker,
            detach,
            timeout,
            args,
        })
    }

    pub fn role(&self) -> ProcessRole {
        ProcessRole::from_worker_flag(self.worker)
    }

    /// Only the operator-facing invocation relays; a worker always runs in place
    pub fn should_detach(&self) -> bool {
        self.detach && !self.worker
    }

    /// Relay arguments with the worker flag appended exactly once
    pub fn worker_args(&self) -> Vec<OsString> {
        let mut args = self.args.clone();
        if !args.iter().any(|a| a == WORKER_FLAG) {
            args.push(OsString::from(WORKER_FLAG));
        }
        args
    }
}
