//! Experiment registry: ownership records and their lifecycle
//!
//! Every running experiment has exactly one record naming its owner pid.
//! Liveness is never stored; it is probed again each time a record is read.

use std::time::Duration;

use tokio::time::Instant;

use shared::{process_debug, process_info, process_warn, ExperimentId, ExperimentRecord, Parameters, ProcessRole, Target};

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::services::{RecordScan, RecordStore};
use crate::traits::{ProcessProbe, SignalOutcome};

/// Whether a record's owner is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Live,
    Stale,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Live => "alive",
            Liveness::Stale => "stale",
        }
    }
}

/// A record together with the liveness observed while listing it
#[derive(Debug, Clone, PartialEq)]
pub struct ListedExperiment {
    pub record: ExperimentRecord,
    pub liveness: Liveness,
}

/// Ownership-checked deletion of one record
///
/// Runs at most once: explicitly through `release`, otherwise on drop.
#[must_use = "dropping the handle releases the record immediately"]
pub struct ReleaseHandle {
    store: RecordStore,
    target: Target,
    id: ExperimentId,
    owner_pid: u32,
    role: ProcessRole,
    released: bool,
}

impl ReleaseHandle {
    pub fn id(&self) -> &ExperimentId {
        &self.id
    }

    /// Delete the record if it is still ours. Returns whether a file was removed.
    pub fn release(mut self) -> AgentResult<bool> {
        self.released = true;
        self.store.remove_if_owned(self.target, &self.id, Some(self.owner_pid))
    }
}

impl Drop for ReleaseHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.store.remove_if_owned(self.target, &self.id, Some(self.owner_pid)) {
            process_warn!(self.role, "⚠️ Failed to release record {}: {}", self.id, e);
        }
    }
}

/// Durable per-target, per-id record store with liveness probing
pub struct ExperimentRegistry<P: ProcessProbe> {
    store: RecordStore,
    probe: P,
    owner_pid: u32,
    grace_period: Duration,
    poll_interval: Duration,
    role: ProcessRole,
}

impl<P: ProcessProbe> ExperimentRegistry<P> {
    pub fn new(config: &AgentConfig, probe: P) -> Self {
        Self {
            store: RecordStore::new(&config.state_dir),
            probe,
            owner_pid: std::process::id(),
            grace_period: config.grace_period,
            poll_interval: config.poll_interval,
            role: ProcessRole::Cli,
        }
    }

    /// Configure the pid written into new records (fluent API)
    pub fn with_owner_pid(mut self, owner_pid: u32) -> Self {
        self.owner_pid = owner_pid;
        self
    }

    /// Configure the role reported in log lines (fluent API)
    pub fn with_role(mut self, role: ProcessRole) -> Self {
        self.store = self.store.with_role(role);
        self.role = role;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    /// Record the calling process as owner of a new experiment
    pub fn create(&self, target: Target, action: &str, params: Parameters) -> AgentResult<(ExperimentId, ReleaseHandle)> {
        let record = ExperimentRecord::new(target, action, self.owner_pid, params);
        self.store.write_new(&record)?;

        process_debug!(self.role, "Registered {} {} as {} (pid {})", target, action, record.id, self.owner_pid);

        let handle = ReleaseHandle {
            store: self.store.clone(),
            target,
            id: record.id.clone(),
            owner_pid: self.owner_pid,
            role: self.role,
            released: false,
        };
        Ok((record.id, handle))
    }

    /// Lazily list a target's records with freshly probed liveness
    pub fn list(&self, target: Target) -> AgentResult<ExperimentIter<'_, P>> {
        Ok(ExperimentIter {
            scan: self.store.scan(target)?,
            probe: &self.probe,
        })
    }

    /// All records of a target, oldest first
    pub fn list_sorted(&self, target: Target) -> AgentResult<Vec<ListedExperiment>> {
        let mut listed: Vec<_> = self.list(target)?.collect();
        listed.sort_by(|a, b| {
            a.record
                .started_at
                .cmp(&b.record.started_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        Ok(listed)
    }

    fn liveness(&self, record: &ExperimentRecord) -> Liveness {
        probe_liveness(&self.probe, record.pid)
    }

    /// Stop the owner of one record (`id` non-empty) or of every record of a target
    ///
    /// Returns the last record whose owner was stopped.
    pub async fn terminate(&self, target: Target, id: &str) -> AgentResult<ExperimentRecord> {
        if id.is_empty() {
            self.terminate_all(target).await
        } else {
            self.terminate_one(target, &ExperimentId::from(id)).await
        }
    }

    async fn terminate_one(&self, target: Target, id: &ExperimentId) -> AgentResult<ExperimentRecord> {
        let record = self.store.read(target, id)?.ok_or_else(|| AgentError::RecordNotFound {
            target,
            id: id.to_string(),
        })?;

        if self.liveness(&record) == Liveness::Stale {
            self.store.remove_if_owned(target, id, None)?;
            process_info!(self.role, "🧹 Removed stale {} record {} (pid {})", target, id, record.pid);
            return Err(AgentError::NoActiveExperiment {
                target,
                detail: "stale record removed".to_string(),
            });
        }

        self.stop_owner(&record).await?;
        Ok(record)
    }

    async fn terminate_all(&self, target: Target) -> AgentResult<ExperimentRecord> {
        let mut last_stopped = None;
        let mut first_failure = None;
        let mut stale = 0usize;

        for record in self.store.scan(target)? {
            if self.liveness(&record) == Liveness::Stale {
                match self.store.remove_if_owned(target, &record.id, None) {
                    Ok(_) => stale += 1,
                    Err(e) => {
                        process_warn!(self.role, "⚠️ Could not remove stale {} record {}: {}", target, record.id, e);
                        first_failure.get_or_insert(e);
                    }
                }
                continue;
            }

            match self.stop_owner(&record).await {
                Ok(()) => last_stopped = Some(record),
                Err(e) => {
                    process_warn!(self.role, "⚠️ Could not stop {} experiment {}: {}", target, record.id, e);
                    first_failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_failure {
            return Err(e);
        }
        last_stopped.ok_or_else(|| AgentError::NoActiveExperiment {
            target,
            detail: match stale {
                0 => "nothing tracked".to_string(),
                n => format!("{} stale record(s) removed", n),
            },
        })
    }

    /// Signal the owner, wait for it to exit, then delete its record
    async fn stop_owner(&self, record: &ExperimentRecord) -> AgentResult<()> {
        let pid = record.pid;

        if self.probe.terminate(pid)? == SignalOutcome::Delivered && !self.wait_for_exit(pid).await {
            process_warn!(
                self.role,
                "🔨 Process {} still running after {:?}, using SIGKILL",
                pid,
                self.grace_period
            );
            if self.probe.kill(pid)? == SignalOutcome::Delivered && !self.wait_for_exit(pid).await {
                return Err(AgentError::TerminateFailed {
                    pid,
                    reason: "still running after SIGKILL".to_string(),
                });
            }
        }

        self.store.remove_if_owned(record.target, &record.id, Some(pid))?;
        process_info!(self.role, "🛑 Stopped {} experiment {} (pid {})", record.target, record.id, pid);
        Ok(())
    }

    /// Poll until the process is gone or the grace period runs out
    async fn wait_for_exit(&self, pid: u32) -> bool {
        let deadline = Instant::now() + self.grace_period;
        loop {
            if !self.probe.is_alive(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn probe_liveness<P: ProcessProbe>(probe: &P, pid: u32) -> Liveness {
    if pid != 0 && probe.is_alive(pid) {
        Liveness::Live
    } else {
        Liveness::Stale
    }
}

/// Lazy, single-pass listing of one target's records
pub struct ExperimentIter<'a, P: ProcessProbe> {
    scan: RecordScan,
    probe: &'a P,
}

impl<P: ProcessProbe> Iterator for ExperimentIter<'_, P> {
    type Item = ListedExperiment;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.scan.next()?;
        let liveness = probe_liveness(self.probe, record.pid);
        Some(ListedExperiment { record, liveness })
    }
}
