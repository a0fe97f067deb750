//! Relay configuration publisher.
//!
//! Rebuilds the relay artifact from a consistent lease snapshot, publishes
//! it atomically (temp file + rename in the same directory), and triggers a
//! best-effort reload. Lease state is authoritative; the artifact is an
//! eventually-consistent projection of it, so a failed reload is logged and
//! retried on the next rebuild rather than rolled back.
//!
//! The background worker rebuilds whenever a lease mutation marks the
//! config stale and on a periodic reconciliation interval.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use portbroker_core::lease::ports::{LeaseStore, RelayHandle};
use portbroker_core::relaycfg::{synthesize, RelaySettings};
use portbroker_domain::{BrokerError, RelayConfig, Result};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What one rebuild did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A new artifact was written and the reload was triggered.
    Published,
    /// The synthesized artifact matched what is on disk; nothing written.
    Unchanged,
}

/// Cheap handle lease mutations use to request a rebuild.
#[derive(Clone, Default)]
pub struct RelayStaleHandle {
    notify: Arc<Notify>,
}

impl RelayHandle for RelayStaleHandle {
    fn mark_stale(&self) {
        self.notify.notify_one();
    }
}

/// Relay configuration publisher with explicit lifecycle management.
pub struct RelayPublisher {
    leases: Arc<dyn LeaseStore>,
    config: RelayConfig,
    stale: RelayStaleHandle,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl RelayPublisher {
    pub fn new(leases: Arc<dyn LeaseStore>, config: RelayConfig) -> Self {
        Self {
            leases,
            config,
            stale: RelayStaleHandle::default(),
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    /// Handle to hand to the lease service; marking it stale wakes the
    /// worker.
    pub fn stale_handle(&self) -> RelayStaleHandle {
        self.stale.clone()
    }

    /// One full rebuild: snapshot, synthesize, publish, reload.
    #[instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<PublishOutcome> {
        let snapshot = self.leases.relay_snapshot().await?;
        let settings = RelaySettings {
            bind_host: self.config.bind_host.clone(),
            socks_port_offset: self.config.socks_port_offset,
        };
        let artifact = synthesize(&snapshot, &settings);

        let path = PathBuf::from(&self.config.config_path);
        if read_current(&path).await.as_deref() == Some(artifact.as_str()) {
            debug!("relay artifact unchanged; skipping publish");
            return Ok(PublishOutcome::Unchanged);
        }

        publish_atomically(&path, &artifact).await?;
        info!(
            path = %path.display(),
            blocks = snapshot.blocks.len(),
            "relay artifact published"
        );

        // Reload failure never unwinds the publish: the artifact on disk is
        // already consistent and the next rebuild retries the trigger.
        if let Err(err) = self.trigger_reload().await {
            warn!(error = %err, "relay reload failed; will retry on next rebuild");
        }

        Ok(PublishOutcome::Published)
    }

    /// Start the background worker.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(BrokerError::Validation("relay publisher already running".into()));
        }

        info!("Starting relay publisher");
        self.cancellation = CancellationToken::new();

        let leases = Arc::clone(&self.leases);
        let config = self.config.clone();
        let notify = Arc::clone(&self.stale.notify);
        let cancel = self.cancellation.clone();

        let handle = tokio::spawn(async move {
            let worker = RelayPublisher {
                leases,
                config,
                stale: RelayStaleHandle { notify },
                cancellation: cancel.clone(),
                task_handle: None,
            };
            worker.rebuild_loop(cancel).await;
        });

        self.task_handle = Some(handle);
        info!("Relay publisher started");
        Ok(())
    }

    /// Stop the worker and wait for it to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(BrokerError::Validation("relay publisher not running".into()));
        }

        info!("Stopping relay publisher");
        self.cancellation.cancel();

        if let Some(handle) = self.task_handle.take() {
            let join_timeout = Duration::from_secs(5);
            match tokio::time::timeout(join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(error = %err, "relay publisher task panicked");
                    return Err(BrokerError::Internal("relay publisher task panicked".into()));
                }
                Err(_) => {
                    warn!("relay publisher did not stop within timeout");
                    return Err(BrokerError::Internal("relay publisher stop timed out".into()));
                }
            }
        }

        info!("Relay publisher stopped");
        Ok(())
    }

    /// Returns true when the worker task is active.
    pub fn is_running(&self) -> bool {
        self.task_handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    async fn rebuild_loop(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.rebuild_interval_seconds.max(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("relay rebuild loop cancelled");
                    break;
                }
                _ = self.stale.notify.notified() => {
                    if let Err(err) = self.rebuild().await {
                        error!(error = %err, "stale-triggered rebuild failed");
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(err) = self.rebuild().await {
                        error!(error = %err, "periodic rebuild failed");
                    }
                }
            }
        }
    }

    async fn trigger_reload(&self) -> Result<()> {
        let Some((program, args)) = self.config.reload_command.split_first() else {
            debug!("no reload command configured");
            return Ok(());
        };

        let timeout = Duration::from_secs(self.config.reload_timeout_seconds.max(1));
        let status = tokio::time::timeout(
            timeout,
            Command::new(program).args(args).status(),
        )
        .await
        .map_err(|_| BrokerError::UpstreamSync("relay reload timed out".into()))?
        .map_err(|err| BrokerError::UpstreamSync(format!("relay reload failed to spawn: {err}")))?;

        if !status.success() {
            return Err(BrokerError::UpstreamSync(format!(
                "relay reload exited with {status}"
            )));
        }
        Ok(())
    }
}

impl Drop for RelayPublisher {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("RelayPublisher dropped while running; cancelling");
            self.cancellation.cancel();
        }
    }
}

async fn read_current(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok()
}

/// Write to a temp file in the target directory and rename into place, so
/// the relay never observes a partially written artifact.
async fn publish_atomically(path: &Path, artifact: &str) -> Result<()> {
    let tmp_path = match path.file_name() {
        Some(name) => {
            let mut tmp_name = name.to_os_string();
            tmp_name.push(".tmp");
            path.with_file_name(tmp_name)
        }
        None => return Err(BrokerError::Config(format!("bad artifact path {}", path.display()))),
    };

    tokio::fs::write(&tmp_path, artifact)
        .await
        .map_err(|err| BrokerError::Internal(format!("artifact write failed: {err}")))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|err| BrokerError::Internal(format!("artifact rename failed: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use portbroker_core::lease::ports::ReleaseOutcome;
    use portbroker_domain::{
        Lease, ProxyCredential, RelayPortBlock, RelaySnapshot, UpstreamAddr,
    };
    use tempfile::TempDir;

    use super::*;

    struct FixedSnapshotStore {
        snapshot: RelaySnapshot,
    }

    #[async_trait]
    impl LeaseStore for FixedSnapshotStore {
        async fn insert_active(&self, _lease: &Lease) -> Result<()> {
            unreachable!("not used")
        }

        async fn get(&self, _lease_id: &str) -> Result<Option<Lease>> {
            Ok(None)
        }

        async fn release(
            &self,
            _lease_id: &str,
            _released_at: DateTime<Utc>,
        ) -> Result<ReleaseOutcome> {
            Ok(ReleaseOutcome::AlreadyExpired)
        }

        async fn update_credential(
            &self,
            _lease_id: &str,
            _credential: &ProxyCredential,
            _rotated_at: DateTime<Utc>,
        ) -> Result<Lease> {
            unreachable!("not used")
        }

        async fn migrate(&self, _lease_id: &str, _new_region: &str) -> Result<Lease> {
            unreachable!("not used")
        }

        async fn active_by_owner(&self, _owner_id: &str) -> Result<Vec<Lease>> {
            Ok(Vec::new())
        }

        async fn has_active_for_owner(&self, _owner_id: &str, _port_id: &str) -> Result<bool> {
            Ok(false)
        }

        async fn active_usernames_on_port(&self, _port_id: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn due_lease_ids(&self, _now: DateTime<Utc>) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn relay_snapshot(&self) -> Result<RelaySnapshot> {
            Ok(self.snapshot.clone())
        }
    }

    fn snapshot() -> RelaySnapshot {
        RelaySnapshot {
            blocks: vec![RelayPortBlock {
                port_id: "p1".to_string(),
                bind_port: 3128,
                upstream: UpstreamAddr {
                    host: "10.0.0.8".to_string(),
                    port: 8000,
                    username: "up-user".to_string(),
                    password: "up-pass".to_string(),
                },
                credentials: vec![ProxyCredential {
                    username: "ua".to_string(),
                    password: "pa".to_string(),
                }],
            }],
        }
    }

    fn config(dir: &TempDir) -> RelayConfig {
        RelayConfig {
            config_path: dir.path().join("relay.cfg").to_string_lossy().into_owned(),
            bind_host: "0.0.0.0".to_string(),
            socks_port_offset: 1000,
            reload_command: Vec::new(),
            reload_timeout_seconds: 1,
            rebuild_interval_seconds: 300,
        }
    }

    #[tokio::test]
    async fn rebuild_publishes_then_reports_unchanged() {
        let dir = TempDir::new().expect("tempdir");
        let publisher = RelayPublisher::new(
            Arc::new(FixedSnapshotStore { snapshot: snapshot() }),
            config(&dir),
        );

        assert_eq!(publisher.rebuild().await.expect("first rebuild"), PublishOutcome::Published);
        assert_eq!(publisher.rebuild().await.expect("second rebuild"), PublishOutcome::Unchanged);

        let written = tokio::fs::read_to_string(dir.path().join("relay.cfg"))
            .await
            .expect("artifact readable");
        assert!(written.contains("proxy -n -a -p3128"));
        // No stray temp file survives the rename.
        assert!(!dir.path().join("relay.cfg.tmp").exists());
    }

    #[tokio::test]
    async fn worker_rebuilds_on_stale_mark() {
        let dir = TempDir::new().expect("tempdir");
        let mut publisher = RelayPublisher::new(
            Arc::new(FixedSnapshotStore { snapshot: snapshot() }),
            config(&dir),
        );
        let handle = publisher.stale_handle();

        publisher.start().expect("starts");
        handle.mark_stale();

        let path = dir.path().join("relay.cfg");
        let mut waited = 0;
        while !path.exists() && waited < 50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += 1;
        }
        assert!(path.exists(), "stale mark should trigger a publish");

        publisher.stop().await.expect("stops");
        assert!(!publisher.is_running());
    }
}
