//! Process Supervisor
//!
//! Owns the roster of managed processes and their runtime state:
//! - Spawns each spec in its own process group with stdin detached and
//!   stdout/stderr forwarded into tracing
//! - Exit handling is event-driven: a wait task per child reports the exit on
//!   a channel drained by `run_exit_loop`
//! - Critical specs are restarted under a rolling restart budget; exhausting it
//!   marks the process failed and raises one critical alert
//! - `police_resources` samples every live child; a memory breach triggers a
//!   graceful restart that is tracked apart from the crash budget
//!
//! Every mutation of one roster entry happens while holding that entry's
//! serialization token from `TargetLocks`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::alert_manager::AlertManager;
use super::restart_budget::{BudgetDecision, RestartBudget};
use crate::adapters::{signals, MetricsProvider};
use crate::config::SupervisorConfig;
use crate::coordination::{ShutdownListener, TargetGuard, TargetLocks};
use crate::domain::{ProcessSpec, ProcessStatus, ProcessView, RestartPolicy};
use crate::error::{Result, WardenError};
use crate::persistence::StateStore;

/// Event emitted by the supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Started {
        name: String,
        pid: u32,
        attempt: u32,
    },
    Exited {
        name: String,
        pid: Option<u32>,
        status: String,
    },
    RestartScheduled {
        name: String,
        attempt: u32,
        delay: Duration,
    },
    ResourceRestart {
        name: String,
        memory_bytes: u64,
        limit_bytes: u64,
    },
    Failed {
        name: String,
        start_attempts: u32,
    },
    Stopped {
        name: String,
    },
}

/// Runtime state of one roster entry
#[derive(Debug)]
struct ManagedProcess {
    spec: ProcessSpec,
    status: ProcessStatus,
    pid: Option<u32>,
    /// Bumped on every successful spawn; exits of older instances are ignored
    generation: u64,
    started_at: Option<DateTime<Utc>>,
    last_restart_at: Option<DateTime<Utc>>,
    budget: RestartBudget,
    resource_restarts: u32,
    start_attempts: u32,
    memory_bytes: u64,
    cpu_percent: f32,
}

impl ManagedProcess {
    fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            status: ProcessStatus::Pending,
            pid: None,
            generation: 0,
            started_at: None,
            last_restart_at: None,
            budget: RestartBudget::new(),
            resource_restarts: 0,
            start_attempts: 0,
            memory_bytes: 0,
            cpu_percent: 0.0,
        }
    }

    fn view(&self) -> ProcessView {
        ProcessView {
            name: self.spec.name.clone(),
            critical: self.spec.critical,
            status: self.status,
            pid: self.pid,
            healthy: self.status.is_live(),
            started_at: self.started_at,
            restart_count: self.budget.restart_count(),
            last_restart_at: self.last_restart_at,
            resource_restarts: self.resource_restarts,
            start_attempts: self.start_attempts,
            memory_bytes: self.memory_bytes,
            cpu_percent: self.cpu_percent,
        }
    }
}

#[derive(Debug)]
struct ExitEvent {
    name: String,
    generation: u64,
    pid: Option<u32>,
    status: String,
}

struct Inner {
    policy: RestartPolicy,
    grace_period: Duration,
    /// Roster order for snapshots
    order: Vec<String>,
    processes: RwLock<HashMap<String, ManagedProcess>>,
    locks: TargetLocks,
    alerts: AlertManager,
    metrics: Arc<dyn MetricsProvider>,
    store: Option<Arc<StateStore>>,
    exit_tx: mpsc::UnboundedSender<ExitEvent>,
    exit_rx: Mutex<Option<mpsc::UnboundedReceiver<ExitEvent>>>,
    event_tx: broadcast::Sender<SupervisorEvent>,
    shutting_down: AtomicBool,
}

/// Supervisor handle; clones share the same roster
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(
        config: &SupervisorConfig,
        locks: TargetLocks,
        alerts: AlertManager,
        metrics: Arc<dyn MetricsProvider>,
        store: Option<Arc<StateStore>>,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);

        let order: Vec<String> = config.processes.iter().map(|s| s.name.clone()).collect();
        let processes = config
            .processes
            .iter()
            .cloned()
            .map(|spec| (spec.name.clone(), ManagedProcess::new(spec)))
            .collect();

        Self {
            inner: Arc::new(Inner {
                policy: config.restart_policy(),
                grace_period: config.grace_period(),
                order,
                processes: RwLock::new(processes),
                locks,
                alerts,
                metrics,
                store,
                exit_tx,
                exit_rx: Mutex::new(Some(exit_rx)),
                event_tx,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.event_tx.subscribe()
    }

    fn emit(&self, event: SupervisorEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Read-only view of the roster in declaration order
    pub async fn snapshot(&self) -> Vec<ProcessView> {
        let processes = self.inner.processes.read().await;
        self.inner
            .order
            .iter()
            .filter_map(|name| processes.get(name))
            .map(ManagedProcess::view)
            .collect()
    }

    pub async fn view(&self, name: &str) -> Option<ProcessView> {
        self.inner.processes.read().await.get(name).map(ManagedProcess::view)
    }

    /// Executable name of a roster entry, for process-table lookups
    pub async fn spec_executable(&self, name: &str) -> Option<String> {
        self.inner
            .processes
            .read()
            .await
            .get(name)
            .map(|p| p.spec.executable_name().to_string())
    }

    /// PIDs of all live managed children
    pub async fn managed_pids(&self) -> Vec<u32> {
        let processes = self.inner.processes.read().await;
        processes.values().filter_map(|p| p.pid).collect()
    }

    async fn persist(&self) {
        if let Some(store) = &self.inner.store {
            let snapshot = self.snapshot().await;
            if let Err(e) = store.write_supervisor_state(&snapshot).await {
                warn!("Failed to persist supervisor state: {}", e);
            }
        }
    }

    /// Start every spec in the roster. Critical specs that fail to spawn enter
    /// the restart path in the background.
    pub async fn start_all(&self) {
        info!("Starting {} managed process(es)", self.inner.order.len());

        for name in &self.inner.order {
            let guard = self.inner.locks.acquire(name).await;
            if let Err(e) = self.spawn_locked(name).await {
                error!("{}", e);
                if self.is_critical(name).await {
                    let supervisor = self.clone();
                    tokio::spawn(async move {
                        supervisor.crash_path(guard).await;
                    });
                }
            }
        }

        self.persist().await;
    }

    async fn is_critical(&self, name: &str) -> bool {
        self.inner
            .processes
            .read()
            .await
            .get(name)
            .map(|p| p.spec.critical)
            .unwrap_or(false)
    }

    /// Spawn one instance. Caller holds the target's token.
    async fn spawn_locked(&self, name: &str) -> Result<u32> {
        let (spec, attempt) = {
            let mut processes = self.inner.processes.write().await;
            let process = processes
                .get_mut(name)
                .ok_or_else(|| WardenError::ProcessNotFound(name.to_string()))?;
            process.start_attempts += 1;
            (process.spec.clone(), process.start_attempts)
        };

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let mut processes = self.inner.processes.write().await;
                if let Some(process) = processes.get_mut(name) {
                    process.status = ProcessStatus::Exited;
                    process.pid = None;
                }
                return Err(WardenError::Spawn {
                    name: name.to_string(),
                    source,
                });
            }
        };

        let pid = child.id();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(name.to_string(), stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(name.to_string(), stderr, true));
        }

        let generation = {
            let mut processes = self.inner.processes.write().await;
            let process = processes
                .get_mut(name)
                .ok_or_else(|| WardenError::ProcessNotFound(name.to_string()))?;
            process.generation += 1;
            process.status = ProcessStatus::Running;
            process.pid = pid;
            process.started_at = Some(Utc::now());
            process.memory_bytes = 0;
            process.cpu_percent = 0.0;
            process.generation
        };

        let exit_tx = self.inner.exit_tx.clone();
        let exit_name = name.to_string();
        tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {}", e),
            };
            let _ = exit_tx.send(ExitEvent {
                name: exit_name,
                generation,
                pid,
                status,
            });
        });

        let pid = pid.unwrap_or_default();
        info!("Started {} (pid {}, attempt {})", name, pid, attempt);
        self.emit(SupervisorEvent::Started {
            name: name.to_string(),
            pid,
            attempt,
        });
        Ok(pid)
    }

    /// Drain exit notifications until shutdown. Each exit is handled on its own
    /// task so one target's restart delay never stalls another's.
    pub async fn run_exit_loop(&self, mut shutdown: ShutdownListener) {
        let Some(mut rx) = self.inner.exit_rx.lock().await.take() else {
            warn!("Exit loop already running");
            return;
        };

        info!("Liveness loop started");
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                event = rx.recv() => match event {
                    Some(event) => {
                        let supervisor = self.clone();
                        tokio::spawn(async move { supervisor.handle_exit(event).await });
                    }
                    None => break,
                },
            }
        }
        info!("Liveness loop stopped");
    }

    async fn handle_exit(&self, event: ExitEvent) {
        let guard = self.inner.locks.acquire(&event.name).await;

        let critical = {
            let mut processes = self.inner.processes.write().await;
            let Some(process) = processes.get_mut(&event.name) else {
                return;
            };

            if process.generation != event.generation
                || matches!(
                    process.status,
                    ProcessStatus::Stopping | ProcessStatus::Stopped
                )
                || self.is_shutting_down()
            {
                debug!(
                    "Ignoring exit of {} (generation {}, {})",
                    event.name, event.generation, event.status
                );
                return;
            }

            process.status = ProcessStatus::Exited;
            process.pid = None;
            process.spec.critical
        };

        self.emit(SupervisorEvent::Exited {
            name: event.name.clone(),
            pid: event.pid,
            status: event.status.clone(),
        });

        if critical {
            warn!("Critical process {} exited: {}", event.name, event.status);
            self.crash_path(guard).await;
        } else {
            info!(
                "Process {} exited: {} (not critical, left down)",
                event.name, event.status
            );
            self.persist().await;
        }
    }

    /// Restart-budget path shared by crashes and failed spawns
    async fn crash_path(&self, guard: TargetGuard) {
        let name = guard.target().to_string();

        loop {
            let (decision, start_attempts) = {
                let mut processes = self.inner.processes.write().await;
                let Some(process) = processes.get_mut(&name) else {
                    return;
                };
                let decision = process.budget.on_crash(Instant::now(), &self.inner.policy);
                match decision {
                    BudgetDecision::Restart { .. } => {
                        process.status = ProcessStatus::Restarting;
                        process.last_restart_at = Some(Utc::now());
                    }
                    BudgetDecision::Exhausted => process.status = ProcessStatus::Failed,
                }
                (decision, process.start_attempts)
            };
            self.persist().await;

            match decision {
                BudgetDecision::Exhausted => {
                    error!(
                        "Process {} exhausted its restart budget after {} start attempts, marked failed",
                        name, start_attempts
                    );
                    self.emit(SupervisorEvent::Failed {
                        name: name.clone(),
                        start_attempts,
                    });
                    self.inner
                        .alerts
                        .restart_exhausted(&name, start_attempts)
                        .await;
                    return;
                }
                BudgetDecision::Restart { attempt } => {
                    let delay = self.inner.policy.restart_delay;
                    info!(
                        "Restarting {} in {:?} (restart {}/{})",
                        name, delay, attempt, self.inner.policy.max_restarts
                    );
                    self.emit(SupervisorEvent::RestartScheduled {
                        name: name.clone(),
                        attempt,
                        delay,
                    });
                    tokio::time::sleep(delay).await;

                    if self.is_shutting_down() {
                        self.mark_stopped(&name).await;
                        return;
                    }

                    match self.spawn_locked(&name).await {
                        Ok(_) => {
                            self.persist().await;
                            return;
                        }
                        Err(e) => error!("{}", e),
                    }
                }
            }
        }
    }

    /// Sample every live child and enforce its resource caps
    pub async fn police_resources(&self) {
        let targets: Vec<(String, u32, u64, Option<u64>, Option<f32>)> = {
            let processes = self.inner.processes.read().await;
            processes
                .values()
                .filter(|p| p.status == ProcessStatus::Running)
                .filter_map(|p| {
                    p.pid.map(|pid| {
                        (
                            p.spec.name.clone(),
                            pid,
                            p.generation,
                            p.spec.max_memory_bytes,
                            p.spec.max_cpu_percent,
                        )
                    })
                })
                .collect()
        };

        for (name, pid, generation, max_memory, max_cpu) in targets {
            let Some(usage) = self.inner.metrics.process_usage(pid).await else {
                // Exited; the liveness loop owns that
                continue;
            };

            {
                let mut processes = self.inner.processes.write().await;
                if let Some(process) = processes.get_mut(&name) {
                    if process.generation == generation {
                        process.memory_bytes = usage.memory_bytes;
                        process.cpu_percent = usage.cpu_percent;
                    }
                }
            }

            if let Some(limit) = max_cpu {
                if usage.cpu_percent > limit {
                    warn!(
                        "Process {} CPU at {:.1}% exceeds {:.1}% (no action taken)",
                        name, usage.cpu_percent, limit
                    );
                }
            }

            if let Some(limit) = max_memory {
                if usage.memory_bytes > limit {
                    self.resource_restart(&name, generation, usage.memory_bytes, limit)
                        .await;
                }
            }
        }
    }

    async fn resource_restart(&self, name: &str, generation: u64, memory_bytes: u64, limit: u64) {
        let Some(guard) = self.inner.locks.try_acquire(name) else {
            debug!("{} is busy, skipping resource restart this tick", name);
            return;
        };

        let pid = {
            let mut processes = self.inner.processes.write().await;
            let Some(process) = processes.get_mut(name) else {
                return;
            };
            if process.generation != generation || process.status != ProcessStatus::Running {
                return;
            }
            process.status = ProcessStatus::Stopping;
            process.pid
        };

        warn!(
            "Process {} uses {} bytes, above its {} byte limit; restarting",
            name, memory_bytes, limit
        );
        self.inner
            .alerts
            .warning(
                "supervisor",
                "Memory Limit Exceeded",
                &format!(
                    "Process {} used {} bytes (limit {}), restarting it",
                    name, memory_bytes, limit
                ),
            )
            .await;

        if let Some(pid) = pid {
            match signals::terminate_gracefully(pid, self.inner.grace_period).await {
                Ok(true) => warn!("{} ignored SIGTERM, killed", name),
                Ok(false) => {}
                Err(e) => warn!("Failed to terminate {}: {}", name, e),
            }
        }

        {
            let mut processes = self.inner.processes.write().await;
            if let Some(process) = processes.get_mut(name) {
                process.resource_restarts += 1;
                process.pid = None;
            }
        }
        self.emit(SupervisorEvent::ResourceRestart {
            name: name.to_string(),
            memory_bytes,
            limit_bytes: limit,
        });

        if self.is_shutting_down() {
            self.mark_stopped(name).await;
            return;
        }

        match self.spawn_locked(name).await {
            Ok(_) => self.persist().await,
            Err(e) => {
                error!("{}", e);
                if self.is_critical(name).await {
                    self.crash_path(guard).await;
                }
            }
        }
    }

    /// External reset of a failed or exited target: clears its budget and respawns
    pub async fn reset(&self, name: &str) -> Result<()> {
        let guard = self.inner.locks.acquire(name).await;
        {
            let mut processes = self.inner.processes.write().await;
            let process = processes
                .get_mut(name)
                .ok_or_else(|| WardenError::ProcessNotFound(name.to_string()))?;
            if process.status.is_live() {
                return Err(WardenError::InvalidState(format!(
                    "{} is {}, only a stopped target can be reset",
                    name, process.status
                )));
            }
            process.budget.reset();
            info!("Restart budget of {} reset", name);
        }

        let result = self.spawn_locked(name).await.map(|_| ());
        drop(guard);
        self.persist().await;
        result
    }

    async fn mark_stopped(&self, name: &str) {
        {
            let mut processes = self.inner.processes.write().await;
            if let Some(process) = processes.get_mut(name) {
                process.status = ProcessStatus::Stopped;
                process.pid = None;
            }
        }
        self.emit(SupervisorEvent::Stopped {
            name: name.to_string(),
        });
    }

    /// Terminate every managed child: SIGTERM, grace period, then SIGKILL
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        info!(
            "Stopping managed processes (grace period {:?})",
            self.inner.grace_period
        );

        let stops = self.inner.order.iter().map(|name| async move {
            let _guard = self.inner.locks.acquire(name).await;
            let pid = {
                let mut processes = self.inner.processes.write().await;
                match processes.get_mut(name) {
                    Some(process) => {
                        process.status = ProcessStatus::Stopping;
                        process.pid
                    }
                    None => None,
                }
            };

            if let Some(pid) = pid {
                match signals::terminate_gracefully(pid, self.inner.grace_period).await {
                    Ok(true) => warn!("{} did not stop within the grace period, killed", name),
                    Ok(false) => debug!("{} stopped", name),
                    Err(e) => warn!("Failed to stop {}: {}", name, e),
                }
            }
            self.mark_stopped(name).await;
        });
        futures::future::join_all(stops).await;

        self.persist().await;
        info!("All managed processes stopped");
    }
}

async fn forward_output<R>(name: String, stream: R, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if is_stderr {
                    warn!(process = %name, "{}", line);
                } else {
                    info!(process = %name, "{}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Output capture for {} ended: {}", name, e);
                break;
            }
        }
    }
}
