//! Lifecycle coordinator: runs one experiment from record creation to release
//!
//! A foreground run owns its record for exactly as long as the runner is
//! alive. The runner gets a child of the caller's cancellation token, so an
//! operator signal, a deadline and a runner that finishes on its own all end
//! the same way: the record is released through its ownership-checked handle.

use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use shared::{process_debug, process_error, process_info, process_warn, ExperimentId, ExperimentRecord, ProcessRole, RunOutcome, Target};

use crate::config::LaunchConfig;
use crate::core::experiment::ExperimentRequest;
use crate::core::registry::{ExperimentRegistry, ListedExperiment};
use crate::error::AgentResult;
use crate::traits::{ProcessLauncher, ProcessProbe, Runner};

/// Where an experiment is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentPhase {
    Created,
    Running,
    /// The caller's cancellation token fired (operator signal)
    StoppedBySignal,
    StoppedByDeadline,
    /// Stopped while someone else had already removed the record
    KilledExternally,
    Completed,
    Failed,
}

impl ExperimentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentPhase::Created => "created",
            ExperimentPhase::Running => "running",
            ExperimentPhase::StoppedBySignal => "stopped by signal",
            ExperimentPhase::StoppedByDeadline => "stopped by deadline",
            ExperimentPhase::KilledExternally => "killed externally",
            ExperimentPhase::Completed => "completed",
            ExperimentPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExperimentPhase::Created | ExperimentPhase::Running)
    }
}

impl fmt::Display for ExperimentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a foreground run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub id: ExperimentId,
    pub phase: ExperimentPhase,
}

/// What `launch` ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// A worker was started and owns the experiment from now on
    Detached { pid: u32 },
    Finished(RunReport),
}

pub struct LifecycleCoordinator<P, L>
where
    P: ProcessProbe,
    L: ProcessLauncher,
{
    registry: ExperimentRegistry<P>,
    launcher: L,
    role: ProcessRole,
}

impl<P, L> LifecycleCoordinator<P, L>
where
    P: ProcessProbe,
    L: ProcessLauncher,
{
    pub fn new(registry: ExperimentRegistry<P>, launcher: L) -> Self {
        let role = registry.role();
        Self {
            registry,
            launcher,
            role,
        }
    }

    pub fn registry(&self) -> &ExperimentRegistry<P> {
        &self.registry
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    /// Validate and preflight, then either relay to a detached worker or run in place
    ///
    /// The runner is built after validation and preflighted before a worker is
    /// spawned or a record written; a detached launch then drops it unused.
    pub async fn launch<F>(
        &self,
        request: &ExperimentRequest,
        runner_factory: F,
        config: &LaunchConfig,
        cancel: &CancellationToken,
    ) -> AgentResult<LaunchOutcome>
    where
        F: FnOnce() -> AgentResult<Box<dyn Runner>>,
    {
        request.validate()?;
        let mut runner = runner_factory()?;
        runner.preflight()?;

        if config.should_detach() {
            let pid = self.run_detached(&config.worker_args())?;
            return Ok(LaunchOutcome::Detached { pid });
        }

        let request = request
            .clone()
            .with_deadline(earliest(request.deadline, config.timeout));
        let report = self.run_foreground(runner.as_mut(), &request, cancel).await?;
        Ok(LaunchOutcome::Finished(report))
    }

    /// Start the same executable as a worker and return its pid immediately
    pub fn run_detached(&self, args: &[OsString]) -> AgentResult<u32> {
        let pid = self.launcher.spawn_detached(args)?;
        process_info!(self.role, "🛰️ Detached worker started with pid {}", pid);
        Ok(pid)
    }

    /// Register, run until stopped, then release the record on every path
    pub async fn run_foreground(
        &self,
        runner: &mut dyn Runner,
        request: &ExperimentRequest,
        cancel: &CancellationToken,
    ) -> AgentResult<RunReport> {
        request.validate()?;
        runner.preflight()?;

        let (id, handle) = self
            .registry
            .create(request.target, &request.action, request.params.clone())?;
        process_debug!(self.role, "Experiment {} {}", id, ExperimentPhase::Created);

        process_info!(
            self.role,
            "🚀 {} {} experiment {} running: {}",
            request.target,
            request.action,
            id,
            runner.describe()
        );
        process_debug!(self.role, "Experiment {} {}", id, ExperimentPhase::Running);

        let child = cancel.child_token();
        let mut deadline_hit = false;
        let result = {
            let run = runner.run(child.clone());
            tokio::pin!(run);
            let deadline = wait_for(request.deadline);
            tokio::pin!(deadline);

            tokio::select! {
                result = &mut run => result,
                _ = &mut deadline => {
                    deadline_hit = true;
                    process_info!(self.role, "⏰ Deadline reached for experiment {}", id);
                    child.cancel();
                    run.await
                }
            }
        };
        child.cancel();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(release_err) = handle.release() {
                    process_warn!(self.role, "⚠️ Failed to release record {}: {}", id, release_err);
                }
                process_error!(self.role, "❌ Experiment {} {}: {}", id, ExperimentPhase::Failed, e);
                return Err(e);
            }
        };

        let released = handle.release()?;
        let phase = match outcome {
            RunOutcome::Completed => ExperimentPhase::Completed,
            RunOutcome::Cancelled if deadline_hit => ExperimentPhase::StoppedByDeadline,
            RunOutcome::Cancelled if !released => ExperimentPhase::KilledExternally,
            RunOutcome::Cancelled => ExperimentPhase::StoppedBySignal,
        };

        process_info!(self.role, "🏁 Experiment {} {}", id, phase);
        Ok(RunReport { id, phase })
    }

    pub fn list(&self, target: Target) -> AgentResult<Vec<ListedExperiment>> {
        self.registry.list_sorted(target)
    }

    /// Stop one experiment, or every experiment of the target when `id` is empty
    pub async fn destroy(&self, target: Target, id: &str) -> AgentResult<ExperimentRecord> {
        self.registry.terminate(target, id).await
    }
}

async fn wait_for(deadline: Option<Duration>) {
    match deadline {
        Some(after) => tokio::time::sleep(after).await,
        None => std::future::pending::<()>().await,
    }
}

fn earliest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::time::Instant;

    use shaper::{ShapingConfig, WinDivertCapture};

    use crate::config::AgentConfig;
    use crate::error::{AgentError, ErrorCategory};
    use crate::runners::NetworkRunner;
    use crate::traits::{MockProcessLauncher, MockProcessProbe};

    fn coordinator(dir: &TempDir, launcher: MockProcessLauncher) -> LifecycleCoordinator<MockProcessProbe, MockProcessLauncher> {
        let config = AgentConfig::default().with_state_dir(dir.path());
        let registry = ExperimentRegistry::new(&config, MockProcessProbe::new());
        LifecycleCoordinator::new(registry, launcher)
    }

    fn record_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir.join("mem"))
            .map(|entries| entries.map(|e| e.unwrap().path()).collect())
            .unwrap_or_default()
    }

    fn request() -> ExperimentRequest {
        ExperimentRequest::new(Target::Mem, "load").with_param("bytes", 1024)
    }

    /// Waits for cancellation, noting whether its record existed meanwhile
    struct HoldRunner {
        dir: PathBuf,
        saw_record: Arc<AtomicBool>,
        /// Delete the record mid-run, as another process would
        steal_record: bool,
    }

    impl HoldRunner {
        fn new(dir: &Path) -> Self {
            Self {
                dir: dir.to_path_buf(),
                saw_record: Arc::new(AtomicBool::new(false)),
                steal_record: false,
            }
        }
    }

    #[async_trait]
    impl Runner for HoldRunner {
        fn describe(&self) -> String {
            "hold".to_string()
        }

        async fn run(&mut self, cancel: CancellationToken) -> AgentResult<RunOutcome> {
            let files = record_files(&self.dir);
            self.saw_record.store(files.len() == 1, Ordering::SeqCst);
            if self.steal_record {
                for file in files {
                    std::fs::remove_file(file).unwrap();
                }
            }
            cancel.cancelled().await;
            Ok(RunOutcome::Cancelled)
        }
    }

    struct FixedRunner(Option<AgentResult<RunOutcome>>);

    #[async_trait]
    impl Runner for FixedRunner {
        fn describe(&self) -> String {
            "fixed".to_string()
        }

        async fn run(&mut self, _cancel: CancellationToken) -> AgentResult<RunOutcome> {
            self.0.take().unwrap_or(Ok(RunOutcome::Completed))
        }
    }

    /// External cancellation stops the runner and releases its record
    #[tokio::test]
    async fn test_signal_stops_and_releases() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, MockProcessLauncher::new());
        let mut runner = HoldRunner::new(dir.path());
        let saw_record = runner.saw_record.clone();
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });

        // Act
        let report = coordinator.run_foreground(&mut runner, &request(), &cancel).await.unwrap();

        // Assert
        assert_eq!(report.phase, ExperimentPhase::StoppedBySignal);
        assert!(saw_record.load(Ordering::SeqCst));
        assert!(record_files(dir.path()).is_empty());
        assert!(coordinator.list(Target::Mem).unwrap().is_empty());
    }

    /// The deadline cancels the runner and is reported as such
    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_runner() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, MockProcessLauncher::new());
        let mut runner = HoldRunner::new(dir.path());
        let request = request().with_deadline(Some(Duration::from_secs(5)));
        let started = Instant::now();

        let report = coordinator
            .run_foreground(&mut runner, &request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.phase, ExperimentPhase::StoppedByDeadline);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(record_files(dir.path()).is_empty());
    }

    /// A runner that returns on its own completes the experiment
    #[tokio::test]
    async fn test_runner_completion() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, MockProcessLauncher::new());
        let mut runner = FixedRunner(Some(Ok(RunOutcome::Completed)));

        let report = coordinator
            .run_foreground(&mut runner, &request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.phase, ExperimentPhase::Completed);
        assert!(report.phase.is_terminal());
        assert!(record_files(dir.path()).is_empty());
    }

    /// A failing runner still has its record released, and the error surfaces
    #[tokio::test]
    async fn test_runner_failure_releases_record() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, MockProcessLauncher::new());
        let mut runner = FixedRunner(Some(Err(AgentError::Runner {
            reason: "boom".to_string(),
        })));

        let err = coordinator
            .run_foreground(&mut runner, &request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Runner { .. }));
        assert!(record_files(dir.path()).is_empty());
    }

    /// A record removed by someone else means the stop came from outside
    #[tokio::test]
    async fn test_record_removed_elsewhere() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, MockProcessLauncher::new());
        let mut runner = HoldRunner::new(dir.path());
        runner.steal_record = true;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = coordinator.run_foreground(&mut runner, &request(), &cancel).await.unwrap();

        assert_eq!(report.phase, ExperimentPhase::KilledExternally);
    }

    /// Detached launches relay to a worker and never write a record themselves
    #[tokio::test]
    async fn test_launch_detached_relays_worker_flag() {
        let dir = TempDir::new().unwrap();
        let mut launcher = MockProcessLauncher::new();
        launcher
            .expect_spawn_detached()
            .withf(|args| args.last().is_some_and(|a| a == "--worker") && args.contains(&OsString::from("mem")))
            .times(1)
            .returning(|_| Ok(4242));
        let coordinator = coordinator(&dir, launcher);
        let config = LaunchConfig::new(false, true, None, vec!["create".into(), "mem".into(), "load".into()]).unwrap();

        let outcome = coordinator
            .launch(
                &request(),
                || Ok(Box::new(FixedRunner(None)) as Box<dyn Runner>),
                &config,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, LaunchOutcome::Detached { pid: 4242 });
        assert!(record_files(dir.path()).is_empty());
    }

    fn missing_driver_runner() -> Box<dyn Runner> {
        let session = ShapingConfig {
            filter: "outbound and tcp".to_string(),
            delay_ms: 50,
            jitter_ms: 10,
            loss_percent: 0.0,
            bandwidth_kbps: 0,
        }
        .validate()
        .unwrap();
        let capture = WinDivertCapture::with_library("chaos-agent-test-no-windivert");
        Box::new(NetworkRunner::new(session, Box::new(capture)))
    }

    /// A missing capture driver stops a detached launch before the worker is spawned
    #[tokio::test]
    async fn test_detached_launch_without_driver_spawns_nothing() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let mut launcher = MockProcessLauncher::new();
        launcher.expect_spawn_detached().times(0);
        let coordinator = coordinator(&dir, launcher);
        let config = LaunchConfig::new(false, true, None, vec!["create".into(), "net".into(), "delay".into()]).unwrap();

        // Act
        let err = coordinator
            .launch(
                &ExperimentRequest::new(Target::Net, "delay"),
                || Ok(missing_driver_runner()),
                &config,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        // Assert
        assert_eq!(err.category(), ErrorCategory::Environment);
        assert!(!dir.path().join("net").exists());
    }

    /// A missing capture driver stops a foreground run before its record is written
    #[tokio::test]
    async fn test_foreground_run_without_driver_writes_no_record() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, MockProcessLauncher::new());
        let mut runner = missing_driver_runner();

        let err = coordinator
            .run_foreground(
                runner.as_mut(),
                &ExperimentRequest::new(Target::Net, "delay"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Shaper(_)));
        assert!(!dir.path().join("net").exists());
    }

    /// An invalid request neither spawns a worker nor builds a runner
    #[tokio::test]
    async fn test_launch_validates_first() {
        let dir = TempDir::new().unwrap();
        let mut launcher = MockProcessLauncher::new();
        launcher.expect_spawn_detached().times(0);
        let coordinator = coordinator(&dir, launcher);
        let config = LaunchConfig::new(false, true, None, vec![]).unwrap();
        let built = AtomicBool::new(false);

        let err = coordinator
            .launch(
                &ExperimentRequest::new(Target::Mem, " "),
                || {
                    built.store(true, Ordering::SeqCst);
                    Ok(Box::new(FixedRunner(None)) as Box<dyn Runner>)
                },
                &config,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Validation { .. }));
        assert!(!built.load(Ordering::SeqCst));
        assert!(!dir.path().join("mem").exists());
    }

    /// A worker runs in place with the tighter of the two deadlines
    #[tokio::test(start_paused = true)]
    async fn test_worker_runs_in_foreground_with_earliest_deadline() {
        let dir = TempDir::new().unwrap();
        let mut launcher = MockProcessLauncher::new();
        launcher.expect_spawn_detached().times(0);
        let coordinator = coordinator(&dir, launcher);
        let config = LaunchConfig::new(true, true, Some(3), vec![]).unwrap();
        let request = request().with_deadline(Some(Duration::from_secs(10)));
        let runner_dir = dir.path().to_path_buf();
        let started = Instant::now();

        let outcome = coordinator
            .launch(
                &request,
                move || Ok(Box::new(HoldRunner::new(&runner_dir)) as Box<dyn Runner>),
                &config,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let LaunchOutcome::Finished(report) = outcome else {
            panic!("expected a foreground run");
        };
        assert_eq!(report.phase, ExperimentPhase::StoppedByDeadline);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_earliest_deadline() {
        let s = Duration::from_secs;
        assert_eq!(earliest(None, None), None);
        assert_eq!(earliest(Some(s(4)), None), Some(s(4)));
        assert_eq!(earliest(None, Some(s(2))), Some(s(2)));
        assert_eq!(earliest(Some(s(4)), Some(s(2))), Some(s(2)));
    }
}
