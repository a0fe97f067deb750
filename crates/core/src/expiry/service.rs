//! Expiry sweep - the correctness backstop behind deferred expiry tasks
//!
//! Deferred tasks can be lost, duplicated, or fire after a crash. The sweep
//! tolerates all of that: it scans for every active lease past its expiry
//! and releases each one through the normal release path, so occupancy and
//! relay staleness stay consistent.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use portbroker_domain::Result;
use tracing::{info, warn};

use crate::lease::ports::LeaseStore;
use crate::lease::LeaseService;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub released: u32,
    pub failed: u32,
}

/// Releases every active lease whose expiry has passed.
pub struct ExpirySweeper {
    leases: Arc<dyn LeaseStore>,
    lease_service: Arc<LeaseService>,
}

impl ExpirySweeper {
    pub fn new(leases: Arc<dyn LeaseStore>, lease_service: Arc<LeaseService>) -> Self {
        Self { leases, lease_service }
    }

    /// One pass: after it returns, no active lease has `expires_at <= now`
    /// (modulo leases whose individual release failed, which the next pass
    /// retries).
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let due = self.leases.due_lease_ids(now).await?;
        if due.is_empty() {
            return Ok(SweepReport::default());
        }

        let mut report = SweepReport::default();
        for lease_id in due {
            match self.lease_service.release(&lease_id).await {
                Ok(()) => report.released += 1,
                Err(err) => {
                    warn!(lease_id = %lease_id, error = %err, "sweep release failed");
                    report.failed += 1;
                }
            }
        }

        info!(released = report.released, failed = report.failed, "expiry sweep completed");
        Ok(report)
    }
}
