use clap::{Parser, Subcommand};

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::error::{Result, WardenError};
use crate::persistence::StateStore;

#[derive(Parser)]
#[command(name = "warden")]
#[command(version)]
#[command(about = "Process supervision and self-healing daemon", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true, env = "WARDEN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the supervisor, governor and self-heal loops (default)
    Run,
    /// Load and validate the configuration, then print it
    CheckConfig,
    /// Show the last heartbeat and health report
    Status,
    /// Show recent healing actions
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// Load the configuration and reject it with one line listing every problem
pub fn load_config(path: &str) -> Result<AppConfig> {
    let config = AppConfig::load_from(path)?;
    config
        .validate()
        .map_err(|errors| WardenError::InvalidConfig(errors.join("; ")))?;
    Ok(config)
}

pub fn check_config(config: &AppConfig) -> Result<()> {
    println!("# Configuration is valid");
    println!(
        "# {} managed process(es), {} probed service(s)",
        config.supervisor.processes.len(),
        config.health.services.len()
    );
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}

pub async fn show_status(store: &StateStore) -> Result<()> {
    println!("State directory: {}", store.dir().display());

    match store.read_heartbeat().await? {
        Some(hb) => println!(
            "Heartbeat: pid {} at {} (up {}s)",
            hb.pid,
            hb.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            hb.uptime_secs
        ),
        None => println!("Heartbeat: none recorded"),
    }

    let Some(report) = store.read_health_report().await? else {
        println!("Health report: none recorded");
        return Ok(());
    };

    let verdict = if report.is_healthy() {
        "healthy"
    } else {
        "DEGRADED"
    };
    println!(
        "\nHealth report from {} ({})",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        verdict
    );
    for service in &report.services {
        println!(
            "  service  {:<24} {}",
            service.name,
            if service.active { "active" } else { "INACTIVE" }
        );
    }
    for process in &report.critical_processes {
        let status = process
            .supervisor_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  process  {:<24} {} ({} pid(s), supervisor: {})",
            process.name,
            if process.running { "running" } else { "DOWN" },
            process.pid_count,
            status
        );
    }
    match &report.resources {
        Some(resources) => println!("  resources {}", resources.summary()),
        None => println!("  resources unavailable"),
    }
    let flag = |v: Option<bool>| match v {
        Some(true) => "active",
        Some(false) => "INACTIVE",
        None => "not checked",
    };
    println!(
        "  security firewall {}, intrusion prevention {}",
        flag(report.security.firewall_active),
        flag(report.security.intrusion_prevention_active)
    );

    if let Some(record) = store.read_supervisor_state().await? {
        println!(
            "\nSupervisor state from {}",
            record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        for view in record.processes {
            println!(
                "  {:<24} {:<10} restarts {} (resource {}), starts {}",
                view.name,
                view.status,
                view.restart_count,
                view.resource_restarts,
                view.start_attempts
            );
        }
    }
    Ok(())
}

pub async fn show_history(store: &StateStore, limit: usize) -> Result<()> {
    let actions = store.read_healing_actions(limit).await?;
    if actions.is_empty() {
        println!("No healing actions recorded");
        return Ok(());
    }
    for action in actions {
        println!("{}", action.describe());
    }
    Ok(())
}
