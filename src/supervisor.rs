//! Worker pool supervisor
//!
//! The supervisor keeps exactly one worker process alive per slot. It does no
//! matchmaking itself: when a worker exits, for any reason, a replacement is
//! launched into the same slot straight away.

use crate::error::{MatchmakingError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Wait before retrying a slot whose worker could not be spawned at all
const SPAWN_FAILURE_DELAY: Duration = Duration::from_secs(1);

/// How a worker process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub slot: usize,
    pub pid: Option<u32>,
    /// Exit status, `None` when the process was killed by a signal
    pub code: Option<i32>,
}

/// Starts a worker for a slot and resolves once it has exited
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    async fn launch(&self, slot: usize) -> Result<WorkerExit>;
}

/// Launches workers as child processes of a given executable
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// `args` are passed ahead of the `worker --slot N` subcommand
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-execute the running binary
    pub fn current_exe(args: Vec<String>) -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| MatchmakingError::WorkerSpawnFailed {
            slot: 0,
            message: format!("Cannot locate own executable: {}", e),
        })?;
        Ok(Self::new(program, args))
    }

    fn command(&self, slot: usize) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("worker")
            .arg("--slot")
            .arg(slot.to_string())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, slot: usize) -> Result<WorkerExit> {
        let mut child =
            self.command(slot)
                .spawn()
                .map_err(|e| MatchmakingError::WorkerSpawnFailed {
                    slot,
                    message: e.to_string(),
                })?;

        let pid = child.id();
        info!(slot, pid, "Forking new worker");

        let status = child
            .wait()
            .await
            .map_err(|e| MatchmakingError::WorkerSpawnFailed {
                slot,
                message: format!("Failed to wait for worker: {}", e),
            })?;

        Ok(WorkerExit {
            slot,
            pid,
            code: status.code(),
        })
    }
}

/// Fixed-size pool of supervised workers
pub struct WorkerPool {
    size: usize,
    launcher: Arc<dyn WorkerLauncher>,
    launches: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(size: usize, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            size,
            launcher,
            launches: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Total workers launched so far, replacements included
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    /// Launch every slot and keep replacing exited workers
    ///
    /// Only returns if every slot task has ended, which means they panicked.
    pub async fn run(&self) -> Result<()> {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        info!("Total cores: {}", cpus);
        info!("Supervisor process {} is running", std::process::id());
        info!("Starting {} matchmaking workers", self.size);

        let mut slots = JoinSet::new();
        for slot in 0..self.size {
            slots.spawn(supervise_slot(
                slot,
                self.launcher.clone(),
                self.launches.clone(),
            ));
        }

        while let Some(result) = slots.join_next().await {
            if let Err(e) = result {
                error!("Worker slot supervisor ended unexpectedly: {}", e);
            }
        }

        Ok(())
    }
}

async fn supervise_slot(slot: usize, launcher: Arc<dyn WorkerLauncher>, launches: Arc<AtomicU64>) {
    loop {
        launches.fetch_add(1, Ordering::Relaxed);

        match launcher.launch(slot).await {
            Ok(exit) => {
                let pid = exit
                    .pid
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "?".to_string());
                match exit.code {
                    Some(code) => warn!(slot, "Worker {} exited with code {}", pid, code),
                    None => warn!(slot, "Worker {} was terminated by a signal", pid),
                }
            }
            Err(e) => {
                error!(slot, "Could not start worker: {:#}", e);
                tokio::time::sleep(SPAWN_FAILURE_DELAY).await;
            }
        }
    }
}
