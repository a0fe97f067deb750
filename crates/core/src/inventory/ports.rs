//! Port interfaces for inventory storage

use async_trait::async_trait;
use portbroker_domain::{PortEndpoint, PortFilter, Result, TierOccupancy};

/// What an upsert did to the inventory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New endpoint row created.
    Inserted,
    /// Existing row refreshed; sticky fields untouched.
    Refreshed,
}

/// Trait for the endpoint inventory store
///
/// Occupancy is never mutated through this trait; that happens exclusively
/// inside lease-store transactions.
#[async_trait]
pub trait PortStore: Send + Sync {
    /// Idempotent merge keyed by provider reference. New entries are
    /// inserted whole; existing rows only refresh upstream connectivity,
    /// region, and the refresh timestamp.
    async fn upsert(&self, endpoint: &PortEndpoint) -> Result<UpsertOutcome>;

    /// Fetch a single endpoint by id
    async fn get(&self, port_id: &str) -> Result<Option<PortEndpoint>>;

    /// Look up an endpoint by its sticky provider reference
    async fn get_by_provider_ref(&self, provider_ref: &str) -> Result<Option<PortEndpoint>>;

    /// List endpoints matching the filter
    async fn list(&self, filter: &PortFilter) -> Result<Vec<PortEndpoint>>;

    /// Occupancy read model grouped by (tier, region)
    async fn occupancy_summary(&self) -> Result<Vec<TierOccupancy>>;
}
