//! Shared helpers for agent integration tests
#![allow(dead_code)]

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use agent::services::{RecordStore, SystemProcessProbe};
use agent::{AgentConfig, ProcessProbe};
use shared::{ExperimentRecord, Parameters, Target};

/// Config rooted at `dir` with timings short enough for tests
pub fn config(dir: &Path) -> AgentConfig {
    AgentConfig::default()
        .with_state_dir(dir)
        .with_grace_period(Duration::from_secs(2))
        .with_poll_interval(Duration::from_millis(20))
}

/// A `sleep` child reaped by a background thread as soon as it exits
///
/// Killed on drop so a failing test never leaves it behind.
pub struct Sleeper {
    pub pid: u32,
}

impl Sleeper {
    pub fn spawn() -> Self {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .spawn()
            .expect("sleep should be available");
        let pid = child.id();
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Self { pid }
    }
}

impl Drop for Sleeper {
    fn drop(&mut self) {
        let _ = SystemProcessProbe::new().kill(self.pid);
    }
}

/// Store a record owned by `pid` as if another process had created it
pub fn plant_record(dir: &Path, target: Target, pid: u32) -> ExperimentRecord {
    let mut params = Parameters::new();
    params.insert("bytes".to_string(), "1048576".to_string());
    let record = ExperimentRecord::new(target, "load", pid, params);
    RecordStore::new(dir).write_new(&record).expect("record should be written");
    record
}

/// Poll `check` every 20ms until it holds or `timeout` runs out
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// A pid that belongs to no running process
pub fn dead_pid() -> u32 {
    let mut child = Command::new("true").spawn().expect("true should be available");
    let pid = child.id();
    child.wait().expect("true should exit");
    pid
}
