//! Real process probe: liveness checks and signal delivery

use crate::error::{AgentError, AgentResult};
use crate::traits::{ProcessProbe, SignalOutcome};

/// Probe backed by the host operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessProbe;

impl SystemProcessProbe {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
mod imp {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    use super::*;

    fn to_pid(pid: u32) -> Option<Pid> {
        i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
    }

    /// An exited child that has not been reaped yet still answers signal 0
    #[cfg(target_os = "linux")]
    fn is_zombie(pid: u32) -> bool {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            return false;
        };
        // Format: "pid (comm) S ...", where comm may itself contain ") "
        stat.rfind(')')
            .and_then(|idx| stat[idx + 1..].split_whitespace().next())
            .is_some_and(|state| state == "Z" || state == "X")
    }

    #[cfg(not(target_os = "linux"))]
    fn is_zombie(_pid: u32) -> bool {
        false
    }

    pub(super) fn is_alive(pid: u32) -> bool {
        let Some(nix_pid) = to_pid(pid) else {
            return false;
        };
        match signal::kill(nix_pid, None) {
            Ok(()) => !is_zombie(pid),
            // Exists but belongs to someone else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    pub(super) fn send(pid: u32, sig: Signal) -> AgentResult<SignalOutcome> {
        let Some(nix_pid) = to_pid(pid) else {
            return Ok(SignalOutcome::AlreadyGone);
        };
        match signal::kill(nix_pid, sig) {
            Ok(()) => Ok(SignalOutcome::Delivered),
            Err(Errno::ESRCH) => Ok(SignalOutcome::AlreadyGone),
            Err(e) => Err(AgentError::TerminateFailed {
                pid,
                reason: format!("{:?} rejected: {}", sig, e),
            }),
        }
    }

    pub(super) fn terminate(pid: u32) -> AgentResult<SignalOutcome> {
        send(pid, Signal::SIGTERM)
    }

    pub(super) fn kill(pid: u32) -> AgentResult<SignalOutcome> {
        send(pid, Signal::SIGKILL)
    }
}

#[cfg(not(unix))]
mod imp {
    use sysinfo::{Pid, ProcessStatus, Signal, System};

    use super::*;

    fn with_process<T>(pid: u32, f: impl FnOnce(&sysinfo::Process) -> T) -> Option<T> {
        let mut system = System::new();
        let pid = Pid::from_u32(pid);
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(f)
    }

    pub(super) fn is_alive(pid: u32) -> bool {
        pid != 0
            && with_process(pid, |p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead)).unwrap_or(false)
    }

    fn send(pid: u32, signal: Signal) -> AgentResult<SignalOutcome> {
        match with_process(pid, |p| p.kill_with(signal).unwrap_or_else(|| p.kill())) {
            None => Ok(SignalOutcome::AlreadyGone),
            Some(true) => Ok(SignalOutcome::Delivered),
            Some(false) => Err(AgentError::TerminateFailed {
                pid,
                reason: format!("{:?} rejected", signal),
            }),
        }
    }

    pub(super) fn terminate(pid: u32) -> AgentResult<SignalOutcome> {
        send(pid, Signal::Term)
    }

    pub(super) fn kill(pid: u32) -> AgentResult<SignalOutcome> {
        send(pid, Signal::Kill)
    }
}

impl ProcessProbe for SystemProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        imp::is_alive(pid)
    }

    fn terminate(&self, pid: u32) -> AgentResult<SignalOutcome> {
        imp::terminate(pid)
    }

    fn kill(&self, pid: u32) -> AgentResult<SignalOutcome> {
        imp::kill(pid)
    }
}
