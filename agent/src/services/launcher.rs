//! Detached worker launcher

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{AgentError, AgentResult};
use crate::traits::ProcessLauncher;

/// Relaunches an executable (by default the running one) as a detached worker
#[derive(Debug, Clone, Default)]
pub struct RealProcessLauncher {
    program: Option<PathBuf>,
    log_file: Option<PathBuf>,
}

impl RealProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch a specific program instead of the current executable (fluent API)
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Append the worker's stderr to a file instead of discarding it (fluent API)
    pub fn with_log_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = Some(log_file.into());
        self
    }

    fn program(&self) -> AgentResult<PathBuf> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().map_err(|e| AgentError::Spawn {
                reason: format!("cannot resolve current executable: {}", e),
            }),
        }
    }

    fn stderr(&self) -> Stdio {
        let Some(path) = &self.log_file else {
            return Stdio::null();
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Stdio::from(file),
            Err(_) => Stdio::null(),
        }
    }
}

impl ProcessLauncher for RealProcessLauncher {
    fn spawn_detached(&self, args: &[OsString]) -> AgentResult<u32> {
        let program = self.program()?;

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(self.stderr());

        // Own process group, so the operator's Ctrl+C does not reach the worker
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| AgentError::Spawn {
            reason: format!("{}: {}", program.display(), e),
        })?;
        Ok(child.id())
    }
}
