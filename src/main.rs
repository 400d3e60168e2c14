use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use warden::adapters::{SysinfoProvider, SystemRemediator, SystemdServiceManager, WebhookSink};
use warden::cli::{self, Cli, Commands};
use warden::config::AppConfig;
use warden::coordination::{wait_for_os_signal, Shutdown, TargetLocks, Ticker};
use warden::error::Result;
use warden::persistence::StateStore;
use warden::services::{HealCollaborators, HealEngine, ResourceGovernor};
use warden::supervisor::{AlertManager, AlertManagerConfig, AlertSink, LogSink, ProcessSupervisor};

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        error!("{}", e);
        eprintln!("warden: {}", e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = cli::load_config(&cli.config)?;
            run_daemon(config).await
        }
        Commands::CheckConfig => {
            init_logging_simple();
            let config = cli::load_config(&cli.config)?;
            cli::check_config(&config)
        }
        Commands::Status => {
            init_logging_simple();
            let store = state_store(&cli::load_config(&cli.config)?);
            cli::show_status(&store).await
        }
        Commands::History { limit } => {
            init_logging_simple();
            let store = state_store(&cli::load_config(&cli.config)?);
            cli::show_history(&store, limit).await
        }
    }
}

fn state_store(config: &AppConfig) -> StateStore {
    let storage = &config.storage;
    StateStore::new(&storage.state_dir, storage.max_healing_actions)
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let _log_guard = init_logging(&config.logging);

    info!(
        "warden {} starting: {} managed process(es), {} probed service(s)",
        env!("CARGO_PKG_VERSION"),
        config.supervisor.processes.len(),
        config.health.services.len()
    );

    let shutdown = Shutdown::new();
    let locks = TargetLocks::new();
    let store = Arc::new(state_store(&config));

    let sink: Arc<dyn AlertSink> = match WebhookSink::from_config(&config.alerts)? {
        Some(webhook) => webhook,
        None => {
            info!("No webhook configured, alerts are log-only");
            Arc::new(LogSink)
        }
    };
    let alerts = AlertManager::new(AlertManagerConfig::from(&config.alerts), sink);

    // One metrics provider per loop so CPU deltas span that loop's interval
    let disk_mount = config.governor.disk_mount.clone();
    let supervisor = ProcessSupervisor::new(
        &config.supervisor,
        locks.clone(),
        alerts.clone(),
        Arc::new(SysinfoProvider::new(&disk_mount)),
        Some(store.clone()),
    );
    let governor = Arc::new(ResourceGovernor::new(
        &config.governor,
        Arc::new(SysinfoProvider::new(&disk_mount)),
        alerts.clone(),
    ));
    let engine = Arc::new(HealEngine::new(
        config.health.clone(),
        HealCollaborators {
            services: Arc::new(SystemdServiceManager::new(config.health.probe_timeout())),
            metrics: Arc::new(SysinfoProvider::new(&disk_mount)),
            remediator: Arc::new(SystemRemediator::new(config.health.logs.clone())),
        },
        supervisor.clone(),
        locks.clone(),
        alerts.clone(),
        store.clone(),
    ));

    supervisor.start_all().await;

    let mut loops = Vec::new();

    loops.push(tokio::spawn({
        let supervisor = supervisor.clone();
        let listener = shutdown.listener();
        async move { supervisor.run_exit_loop(listener).await }
    }));

    loops.push(tokio::spawn({
        let supervisor = supervisor.clone();
        let listener = shutdown.listener();
        let period = config.supervisor.poll_interval();
        async move {
            Ticker::new("resource policing", period)
                .run(listener, || supervisor.police_resources())
                .await;
        }
    }));

    loops.push(tokio::spawn({
        let governor = governor.clone();
        let listener = shutdown.listener();
        let period = std::time::Duration::from_secs(config.governor.sample_interval_secs);
        async move {
            Ticker::new("resource governor", period)
                .run(listener, || governor.tick())
                .await;
        }
    }));

    loops.push(tokio::spawn({
        let engine = engine.clone();
        let listener = shutdown.listener();
        let period = std::time::Duration::from_secs(config.health.interval_secs);
        async move {
            Ticker::new("self-heal", period)
                .run(listener, || engine.tick())
                .await;
        }
    }));

    loops.push(tokio::spawn({
        let engine = engine.clone();
        let listener = shutdown.listener();
        let period = std::time::Duration::from_secs(config.health.heartbeat_interval_secs);
        async move {
            Ticker::new("heartbeat", period)
                .run(listener, || engine.heartbeat_tick())
                .await;
        }
    }));

    wait_for_os_signal(shutdown.clone()).await;

    // In-flight ticks complete before the loops return
    for result in futures::future::join_all(loops).await {
        if let Err(e) = result {
            error!("Monitoring loop panicked: {}", e);
        }
    }

    supervisor.shutdown().await;
    info!("warden stopped");
    Ok(())
}
