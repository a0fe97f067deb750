//! Egress endpoint inventory types

use serde::{Deserialize, Serialize};

use crate::constants::{DEDICATED_CAPACITY, SHARED_PREMIUM_CAPACITY, SHARED_STANDARD_CAPACITY};
use crate::impl_status_string_conversions;

/// Routing/capacity class of a port endpoint.
///
/// The tier is the one authoritative field allocate/rotate/migrate dispatch
/// on; routing behaviour is derived from it, never tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortTier {
    Dedicated,
    SharedStandard,
    SharedPremium,
}

impl_status_string_conversions!(PortTier {
    Dedicated => "dedicated",
    SharedStandard => "shared_standard",
    SharedPremium => "shared_premium",
});

/// How traffic for a lease on this tier reaches the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Lessee connects straight to the provider upstream.
    Direct,
    /// Lessee connects to the relay's local bind; the upstream credential
    /// stays behind the relay.
    Relayed,
}

impl PortTier {
    /// Canonical slot count for the tier.
    pub fn capacity(self) -> u32 {
        match self {
            Self::Dedicated => DEDICATED_CAPACITY,
            Self::SharedStandard => SHARED_STANDARD_CAPACITY,
            Self::SharedPremium => SHARED_PREMIUM_CAPACITY,
        }
    }

    pub fn routing(self) -> RoutingMode {
        match self {
            Self::Dedicated => RoutingMode::Direct,
            Self::SharedStandard | Self::SharedPremium => RoutingMode::Relayed,
        }
    }

    pub fn is_shared(self) -> bool {
        matches!(self.routing(), RoutingMode::Relayed)
    }
}

/// Provider-side address and credential behind a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamAddr {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

/// A registered egress endpoint with a capacity limit and tier.
///
/// `public_host`/`public_port` are the locally-assigned routing fields: set
/// once at first import and never overwritten by a later provider sync.
/// `occupancy` is denormalized from the count of active leases and is only
/// mutated inside lease-store transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortEndpoint {
    pub id: String,
    pub public_host: String,
    /// Base of the relay listener pair (HTTP here, SOCKS at a fixed offset).
    pub public_port: u16,
    pub upstream: Option<UpstreamAddr>,
    pub tier: PortTier,
    pub capacity: u32,
    pub occupancy: u32,
    pub region: String,
    pub active: bool,
    /// Remote catalog identity; sticky once imported.
    pub provider_ref: Option<String>,
    pub imported_at: i64,
    pub refreshed_at: Option<i64>,
}

impl PortEndpoint {
    pub fn capacity_remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.occupancy)
    }
}

/// Inventory listing filter.
#[derive(Debug, Clone, Default)]
pub struct PortFilter {
    pub tier: Option<PortTier>,
    pub region: Option<String>,
    pub active: Option<bool>,
}

/// Occupancy read model row: one (tier, region) bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierOccupancy {
    pub tier: PortTier,
    pub region: String,
    pub ports: u32,
    pub capacity: u32,
    pub occupancy: u32,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn tier_capacity_table_is_canonical() {
        assert_eq!(PortTier::Dedicated.capacity(), 1);
        assert_eq!(PortTier::SharedStandard.capacity(), 3);
        assert_eq!(PortTier::SharedPremium.capacity(), 5);
    }

    #[test]
    fn routing_mode_follows_tier() {
        assert_eq!(PortTier::Dedicated.routing(), RoutingMode::Direct);
        assert_eq!(PortTier::SharedStandard.routing(), RoutingMode::Relayed);
        assert!(PortTier::SharedPremium.is_shared());
        assert!(!PortTier::Dedicated.is_shared());
    }

    #[test]
    fn tier_parses_storage_form() {
        assert_eq!(PortTier::from_str("shared_premium").unwrap(), PortTier::SharedPremium);
        assert!(PortTier::from_str("gold").is_err());
    }
}
