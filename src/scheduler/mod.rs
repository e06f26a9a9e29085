//! Reconciliation scheduler
//!
//! Independent periodic jobs (heartbeat, metrics, rotation, pruning), each
//! on its own timer task. Jobs share nothing but the handles they were built
//! with. Drift found by the heartbeat is handed to the [`RemediationQueue`]
//! so pushes never block the heartbeat loop.

mod jobs;
mod remediation;

pub use jobs::{fleet_scheduler, HeartbeatJob, MetricsJob, PruningJob, RotationJob};
pub use remediation::RemediationQueue;

use crate::error::{ArmorError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A unit of periodic work
#[async_trait]
pub trait Job: Send + Sync {
    /// Stable identifier
    fn id(&self) -> &'static str;

    /// Run once; the returned text is logged
    async fn run(&self) -> Result<String>;
}

struct RegisteredJob {
    job: Arc<dyn Job>,
    interval: Duration,
}

/// Runs registered jobs on fixed intervals until shut down
pub struct Scheduler {
    jobs: BTreeMap<&'static str, RegisteredJob>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            jobs: BTreeMap::new(),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `job` every `interval` once started
    pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
        self.jobs.insert(job.id(), RegisteredJob { job, interval });
    }

    /// Registered job ids
    pub fn job_ids(&self) -> Vec<&'static str> {
        self.jobs.keys().copied().collect()
    }

    /// Spawn one timer task per job
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;

        for (job_id, registered) in &self.jobs {
            let job = Arc::clone(&registered.job);
            let interval = registered.interval;
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let job_id = *job_id;

            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {
                            run_logged(job.as_ref()).await;
                        }
                        _ = shutdown_rx.recv() => {
                            info!(job_id, "Shutting down periodic job");
                            break;
                        }
                    }
                }
            });
            handles.push(handle);
        }

        info!(job_count = handles.len(), "Scheduler started");
    }

    /// Run a job now, outside its timer
    pub async fn trigger(&self, job_id: &str) -> Result<String> {
        let registered = self
            .jobs
            .get(job_id)
            .ok_or_else(|| ArmorError::NotFound(format!("Job '{}'", job_id)))?;
        registered.job.run().await
    }

    /// Stop every timer and wait for in-flight runs to finish
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("Scheduler shut down");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_logged(job: &dyn Job) {
    match job.run().await {
        Ok(summary) => debug!(job_id = job.id(), %summary, "Job finished"),
        Err(e) => warn!(job_id = job.id(), error = %e, "Job failed"),
    }
}
