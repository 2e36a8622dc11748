//! Entry point for the `chaos-agent` binary
//!
//! Wires the real services into the lifecycle coordinator. The same binary
//! serves as operator CLI and, with the hidden worker flag, as the background
//! worker of a detached launch.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use agent::{
    cli::{format_params, Cli, Command, CreateCommand},
    config::LaunchConfig,
    core::ResolvedExperiment,
    services::{RealProcessLauncher, SysinfoResources, SystemProcessProbe},
    AgentConfig, ExperimentRegistry, LaunchOutcome, LifecycleCoordinator,
};
use shared::{logging, process_debug, ProcessRole, Target};

type Coordinator = LifecycleCoordinator<SystemProcessProbe, RealProcessLauncher>;

#[tokio::main]
async fn main() -> ExitCode {
    // Pick up CHAOS_AGENT_STATE_DIR and friends from a local .env
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    logging::init_tracing(Some(&cli.log_level));
    let role = ProcessRole::from_worker_flag(cli.worker);

    match run(cli, role).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logging::log_error(role, "chaos-agent", &format!("{:#}", e));
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, role: ProcessRole) -> anyhow::Result<()> {
    let config = AgentConfig::resolve(cli.state_dir.clone());
    process_debug!(role, "Using state directory {}", config.state_dir.display());

    let registry = ExperimentRegistry::new(&config, SystemProcessProbe::new()).with_role(role);
    let launcher = RealProcessLauncher::new().with_log_file(config.state_dir.join("worker.log"));
    let coordinator = LifecycleCoordinator::new(registry, launcher);

    match cli.command {
        Command::Create { experiment } => {
            let launch = LaunchConfig::new(cli.worker, cli.detach, cli.timeout, std::env::args_os().skip(1).collect())?;
            create(&coordinator, experiment, &launch, role).await
        }
        Command::List { target } => list(&coordinator, target),
        Command::Destroy { target, id } => {
            let record = coordinator
                .destroy(target, id.as_deref().unwrap_or(""))
                .await
                .with_context(|| format!("destroy {}", target))?;
            println!("Stopped {} experiment id={} pid={}.", target, record.id, record.pid);
            Ok(())
        }
    }
}

async fn create(coordinator: &Coordinator, experiment: CreateCommand, launch: &LaunchConfig, role: ProcessRole) -> anyhow::Result<()> {
    let spec = experiment.into_spec();
    let ResolvedExperiment { request, workload } = spec
        .resolve(&SysinfoResources::new())
        .with_context(|| format!("create {} {}", spec.target(), spec.action()))?;

    let cancel = CancellationToken::new();
    if !launch.should_detach() {
        listen_for_shutdown(cancel.clone(), role);
        logging::log_startup(role, &format!("{} {} experiment", request.target, request.action));
    }

    let outcome = coordinator
        .launch(&request, move || Ok(workload.into_runner()), launch, &cancel)
        .await
        .with_context(|| format!("{} {} experiment", request.target, request.action))?;

    match outcome {
        LaunchOutcome::Detached { pid } => {
            println!("Started {} {} experiment in background worker pid={}.", request.target, request.action, pid);
        }
        LaunchOutcome::Finished(report) => {
            println!("{} {} experiment {} {}.", request.target, request.action, report.id, report.phase);
            logging::log_success(role, "Experiment finished");
        }
    }
    Ok(())
}

fn list(coordinator: &Coordinator, target: Option<Target>) -> anyhow::Result<()> {
    let targets = match target {
        Some(target) => vec![target],
        None => Target::ALL.to_vec(),
    };

    for target in targets {
        let listed = coordinator.list(target)?;
        if listed.is_empty() {
            println!("{}: none", target);
            continue;
        }
        println!("{}:", target);
        for entry in listed {
            let record = &entry.record;
            println!(
                "  id={} pid={} started={} status={} params={}",
                record.id,
                record.pid,
                record.started_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                entry.liveness.as_str(),
                format_params(&record.params)
            );
        }
    }
    Ok(())
}

/// Cancel the running experiment on Ctrl+C or, on unix, SIGTERM
fn listen_for_shutdown(cancel: CancellationToken, role: ProcessRole) {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                logging::log_shutdown(role, &format!("Received {}", name));
                cancel.cancel();
            }
            Err(err) => logging::log_error(role, "Signal handling", &err),
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "Ctrl+C"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
}

