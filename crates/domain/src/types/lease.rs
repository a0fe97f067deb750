//! Lease lifecycle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_status_string_conversions;
use crate::types::port::PortTier;

/// Lease status. Terminal and one-way: a lease is never resurrected after
/// it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    Active,
    Expired,
}

impl_status_string_conversions!(LeaseStatus {
    Active => "active",
    Expired => "expired",
});

/// Proxy credential pair a lessee authenticates with. Unlike upstream
/// credentials this pair is handed to the owning principal, so it
/// serializes in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCredential {
    pub username: String,
    pub password: String,
}

/// A time-bounded grant of one port endpoint to one owning principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub owner_id: String,
    pub port_id: String,
    /// Tier at purchase time; diverges from the port only via migrate.
    pub tier: PortTier,
    pub credential: ProxyCredential,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub rotation_interval_minutes: u32,
    pub status: LeaseStatus,
    pub released_at: Option<DateTime<Utc>>,
}

impl Lease {
    pub fn is_active(&self) -> bool {
        self.status == LeaseStatus::Active
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at <= now
    }
}

/// Allocation request as received from the bot/API front-ends.
#[derive(Debug, Clone)]
pub struct AllocateRequest {
    pub owner_id: String,
    pub port_id: String,
    pub duration_hours: u32,
    pub rotation_interval_minutes: u32,
    pub tier: PortTier,
    pub credential_override: Option<ProxyCredential>,
}

/// The address a lessee actually connects to, chosen by tier routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseAddress {
    pub host: String,
    pub port: u16,
}

/// Result of a successful allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseGrant {
    pub lease: Lease,
    pub address: LeaseAddress,
}
