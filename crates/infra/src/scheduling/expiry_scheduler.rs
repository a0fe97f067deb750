//! Expiry scheduler: deferred release tasks plus the periodic sweep.
//!
//! `schedule` arms one deferred task per lease, keyed by lease id, firing
//! release at the expiry instant. The key makes redelivery idempotent: a
//! second schedule for the same lease replaces the pending task, and a
//! duplicate firing hits the idempotent release path. Deferred tasks are
//! an optimization only; the startup + interval sweep is the correctness
//! backstop that tolerates lost, duplicated, or crashed tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use portbroker_core::{ExpirySweeper, LeaseService};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::{SchedulerError, SchedulerResult};

type DeferredTasks = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

/// Configuration for the expiry scheduler
#[derive(Debug, Clone)]
pub struct ExpirySchedulerConfig {
    /// Interval between sweep passes
    pub sweep_interval: Duration,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for ExpirySchedulerConfig {
    fn default() -> Self {
        Self { sweep_interval: Duration::from_secs(60), join_timeout: Duration::from_secs(5) }
    }
}

/// Expiry scheduler with explicit lifecycle management.
pub struct ExpiryScheduler {
    sweeper: Arc<ExpirySweeper>,
    lease_service: Arc<LeaseService>,
    config: ExpirySchedulerConfig,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
    deferred: DeferredTasks,
}

impl ExpiryScheduler {
    pub fn new(
        sweeper: Arc<ExpirySweeper>,
        lease_service: Arc<LeaseService>,
        config: ExpirySchedulerConfig,
    ) -> Self {
        Self {
            sweeper,
            lease_service,
            config,
            cancellation: CancellationToken::new(),
            task_handle: None,
            deferred: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start the sweep loop. One pass runs immediately so leases that
    /// expired while the process was down are released at startup.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!("Starting expiry scheduler");
        self.cancellation = CancellationToken::new();

        let sweeper = Arc::clone(&self.sweeper);
        let interval = self.config.sweep_interval;
        let cancel = self.cancellation.clone();

        let handle = tokio::spawn(async move {
            Self::sweep_loop(sweeper, interval, cancel).await;
        });

        self.task_handle = Some(handle);
        info!("Expiry scheduler started");
        Ok(())
    }

    /// Stop the scheduler: cancel the sweep loop and abort every pending
    /// deferred task.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("Stopping expiry scheduler");
        self.cancellation.cancel();

        if let Some(handle) = self.task_handle.take() {
            let join_timeout = self.config.join_timeout;
            match tokio::time::timeout(join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(error = %err, "sweep task panicked");
                    return Err(SchedulerError::TaskJoinFailed(err.to_string()));
                }
                Err(_) => {
                    return Err(SchedulerError::Timeout { seconds: join_timeout.as_secs() });
                }
            }
        }

        let mut deferred = self.deferred.lock().await;
        for (_, handle) in deferred.drain() {
            handle.abort();
        }

        info!("Expiry scheduler stopped");
        Ok(())
    }

    /// Check if the sweep loop is running
    pub fn is_running(&self) -> bool {
        self.task_handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Arm a deferred release for the lease, firing at `expires_at` or
    /// immediately if that instant has passed. A later call for the same
    /// lease replaces the pending task.
    pub async fn schedule(&self, lease_id: &str, expires_at: DateTime<Utc>) {
        let delay = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        let lease_service = Arc::clone(&self.lease_service);
        let deferred = Arc::clone(&self.deferred);
        let cancel = self.cancellation.clone();
        let key = lease_id.to_string();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(lease_id = %task_key, "deferred release cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // Release is idempotent, so a task that fires after a manual
            // release (or a sweep) is a harmless no-op.
            if let Err(err) = lease_service.release(&task_key).await {
                warn!(lease_id = %task_key, error = %err, "deferred release failed");
            }
            deferred.lock().await.remove(&task_key);
        });

        let mut tasks = self.deferred.lock().await;
        if let Some(previous) = tasks.insert(key.clone(), handle) {
            previous.abort();
            debug!(lease_id = %key, "replaced pending deferred release");
        }
    }

    /// Number of armed deferred tasks
    pub async fn pending_tasks(&self) -> usize {
        self.deferred.lock().await.len()
    }

    async fn sweep_loop(
        sweeper: Arc<ExpirySweeper>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        // Startup pass before the first interval elapses.
        Self::run_sweep(&sweeper).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("sweep loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    Self::run_sweep(&sweeper).await;
                }
            }
        }
    }

    async fn run_sweep(sweeper: &Arc<ExpirySweeper>) {
        match sweeper.sweep_expired(Utc::now()).await {
            Ok(report) if report.released > 0 || report.failed > 0 => {
                info!(released = report.released, failed = report.failed, "sweep pass");
            }
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "sweep pass failed");
            }
        }
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("ExpiryScheduler dropped while running; cancelling");
            self.cancellation.cancel();
        }
    }
}
