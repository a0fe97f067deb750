//! Port interfaces for lease storage and external collaborators

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portbroker_domain::{Lease, ProxyCredential, RelaySnapshot, Result, UpstreamAddr};

/// Result of a release attempt. Releasing an already-expired lease is a
/// no-op success, never an error: the scheduler and manual paths race to
/// release the same lease by design.
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    /// The lease made its terminal transition in this call.
    Released(Lease),
    /// The lease was already terminal; nothing changed.
    AlreadyExpired,
}

/// Trait for the lease store
///
/// Implementations must make each mutating method atomic with respect to
/// the others: occupancy changes and lease row changes commit together or
/// not at all, and concurrent calls touching the same port are linearized.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Insert an active lease and increment its port's occupancy in one
    /// transaction. Fails with `CapacityExceeded` when the port is full,
    /// `NotFound`/`PortInactive` when the port cannot take leases.
    async fn insert_active(&self, lease: &Lease) -> Result<()>;

    /// Fetch a lease by id
    async fn get(&self, lease_id: &str) -> Result<Option<Lease>>;

    /// Terminal transition plus occupancy decrement, atomically and
    /// idempotently.
    async fn release(&self, lease_id: &str, released_at: DateTime<Utc>) -> Result<ReleaseOutcome>;

    /// Persist a regenerated credential pair. Port and expiry are untouched.
    async fn update_credential(
        &self,
        lease_id: &str,
        credential: &ProxyCredential,
        rotated_at: DateTime<Utc>,
    ) -> Result<Lease>;

    /// Re-point the lease at a same-tier port with free capacity in the new
    /// region, moving occupancy in the same transaction. All-or-nothing:
    /// `NoCapacity` leaves the lease untouched.
    async fn migrate(&self, lease_id: &str, new_region: &str) -> Result<Lease>;

    /// Active leases held by one owner
    async fn active_by_owner(&self, owner_id: &str) -> Result<Vec<Lease>>;

    /// True when the owner already holds an active lease on the port
    async fn has_active_for_owner(&self, owner_id: &str, port_id: &str) -> Result<bool>;

    /// Usernames of every active credential on the port, for
    /// verify-before-insert distinctness checks
    async fn active_usernames_on_port(&self, port_id: &str) -> Result<Vec<String>>;

    /// Ids of active leases whose expiry has passed
    async fn due_lease_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>>;

    /// One consistent snapshot of active shared-tier leases joined with
    /// their ports, for relay config synthesis
    async fn relay_snapshot(&self) -> Result<RelaySnapshot>;
}

/// Payment subsystem boundary. Debited before any lease row exists; a
/// refusal aborts the allocation.
#[async_trait]
pub trait BalanceGate: Send + Sync {
    async fn debit(&self, owner_id: &str, amount_cents: u64) -> Result<()>;
}

/// Remote provider boundary for dedicated-tier credential pushes.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn push_credential(
        &self,
        upstream: &UpstreamAddr,
        credential: &ProxyCredential,
    ) -> Result<()>;
}

/// Handle into the relay publisher. Marking stale is cheap and sync; the
/// publisher rebuilds asynchronously.
pub trait RelayHandle: Send + Sync {
    fn mark_stale(&self);
}
