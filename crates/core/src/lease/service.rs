//! Lease lifecycle service - core business logic
//!
//! All storage mutations go through the transactional [`LeaseStore`]; this
//! service owns validation, pricing, credential generation, tier routing,
//! and post-commit side-effect dispatch. Side effects (provider pushes,
//! relay rebuilds) never run inside the storage transaction and never roll
//! back committed lease state.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use portbroker_domain::constants::{
    DEDICATED_PRICE_CENTS_PER_HOUR, MAX_LEASE_DURATION_HOURS, MIN_LEASE_DURATION_HOURS,
    MIN_ROTATION_INTERVAL_MINUTES, SHARED_PREMIUM_PRICE_CENTS_PER_HOUR,
    SHARED_STANDARD_PRICE_CENTS_PER_HOUR,
};
use portbroker_domain::{
    AllocateRequest, BrokerError, Lease, LeaseAddress, LeaseGrant, LeaseStatus, PortEndpoint,
    PortTier, ProxyCredential, Result, RoutingMode,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::inventory::ports::PortStore;

use super::credentials;
use super::ports::{BalanceGate, LeaseStore, ProviderGateway, RelayHandle, ReleaseOutcome};

fn hourly_price_cents(tier: PortTier) -> u64 {
    match tier {
        PortTier::Dedicated => DEDICATED_PRICE_CENTS_PER_HOUR,
        PortTier::SharedStandard => SHARED_STANDARD_PRICE_CENTS_PER_HOUR,
        PortTier::SharedPremium => SHARED_PREMIUM_PRICE_CENTS_PER_HOUR,
    }
}

/// Lease lifecycle service
pub struct LeaseService {
    leases: Arc<dyn LeaseStore>,
    ports: Arc<dyn PortStore>,
    balance: Arc<dyn BalanceGate>,
    provider: Arc<dyn ProviderGateway>,
    relay: Arc<dyn RelayHandle>,
}

impl LeaseService {
    pub fn new(
        leases: Arc<dyn LeaseStore>,
        ports: Arc<dyn PortStore>,
        balance: Arc<dyn BalanceGate>,
        provider: Arc<dyn ProviderGateway>,
        relay: Arc<dyn RelayHandle>,
    ) -> Self {
        Self { leases, ports, balance, provider, relay }
    }

    /// Allocate a lease on a port.
    ///
    /// The balance gate is debited before any row exists; the occupancy
    /// increment and lease insert commit together inside the store. The
    /// returned address dispatches on tier routing: dedicated lessees get
    /// the upstream directly, shared lessees get the relay bind pair.
    pub async fn allocate(&self, request: AllocateRequest) -> Result<LeaseGrant> {
        validate_request(&request)?;

        let port = self
            .ports
            .get(&request.port_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("port {}", request.port_id)))?;
        if !port.active {
            return Err(BrokerError::PortInactive(port.id.clone()));
        }
        if port.tier != request.tier {
            return Err(BrokerError::Validation(format!(
                "port {} is tier {}, not {}",
                port.id, port.tier, request.tier
            )));
        }
        if self.leases.has_active_for_owner(&request.owner_id, &port.id).await? {
            return Err(BrokerError::Validation(format!(
                "owner {} already holds an active lease on port {}",
                request.owner_id, port.id
            )));
        }
        let address = address_for(&port)?;

        let price = hourly_price_cents(request.tier) * u64::from(request.duration_hours);
        self.balance.debit(&request.owner_id, price).await?;

        let credential = self.pick_credential(&port.id, request.credential_override).await?;
        let now = Utc::now();
        let lease = Lease {
            id: Uuid::new_v4().to_string(),
            owner_id: request.owner_id,
            port_id: port.id.clone(),
            tier: request.tier,
            credential,
            created_at: now,
            expires_at: now + Duration::hours(i64::from(request.duration_hours)),
            rotated_at: None,
            rotation_interval_minutes: request.rotation_interval_minutes,
            status: LeaseStatus::Active,
            released_at: None,
        };

        self.leases.insert_active(&lease).await?;

        info!(
            lease_id = %lease.id,
            port_id = %lease.port_id,
            tier = %lease.tier,
            expires_at = %lease.expires_at,
            "lease allocated"
        );

        if lease.tier.is_shared() {
            self.relay.mark_stale();
        }

        Ok(LeaseGrant { lease, address })
    }

    /// Release a lease. Idempotent: a second release of the same lease is a
    /// no-op success, so the expiry scheduler and manual paths can race.
    pub async fn release(&self, lease_id: &str) -> Result<()> {
        match self.leases.release(lease_id, Utc::now()).await? {
            ReleaseOutcome::Released(lease) => {
                info!(lease_id = %lease.id, port_id = %lease.port_id, "lease released");
                if lease.tier.is_shared() {
                    self.relay.mark_stale();
                }
            }
            ReleaseOutcome::AlreadyExpired => {
                debug!(lease_id = %lease_id, "release on expired lease ignored");
            }
        }
        Ok(())
    }

    /// Regenerate the credential pair on an active lease.
    ///
    /// Exactly one sync path runs afterwards: dedicated leases push the new
    /// pair to the provider (best-effort), shared leases mark the relay
    /// config stale. Port and expiry are unchanged.
    pub async fn rotate_credential(&self, lease_id: &str) -> Result<Lease> {
        let lease = self.require_active(lease_id).await?;

        let mut taken: HashSet<String> =
            self.leases.active_usernames_on_port(&lease.port_id).await?.into_iter().collect();
        taken.remove(&lease.credential.username);
        let credential = credentials::generate_distinct(&taken)?;

        let updated = self.leases.update_credential(lease_id, &credential, Utc::now()).await?;
        info!(lease_id = %updated.id, tier = %updated.tier, "credential rotated");

        match updated.tier.routing() {
            RoutingMode::Direct => self.push_to_provider(&updated).await,
            RoutingMode::Relayed => self.relay.mark_stale(),
        }

        Ok(updated)
    }

    /// Move a lease to a same-tier port with free capacity in another
    /// region. All-or-nothing: on `NoCapacity` the original lease and its
    /// occupancy are untouched.
    pub async fn migrate_region(&self, lease_id: &str, new_region: &str) -> Result<LeaseGrant> {
        if new_region.trim().is_empty() {
            return Err(BrokerError::Validation("target region is empty".into()));
        }

        let moved = self.leases.migrate(lease_id, new_region).await?;
        info!(
            lease_id = %moved.id,
            port_id = %moved.port_id,
            region = new_region,
            "lease migrated"
        );

        let port = self
            .ports
            .get(&moved.port_id)
            .await?
            .ok_or_else(|| BrokerError::Internal(format!("migrated port {} missing", moved.port_id)))?;
        let address = address_for(&port)?;

        match moved.tier.routing() {
            RoutingMode::Direct => self.push_to_provider(&moved).await,
            RoutingMode::Relayed => self.relay.mark_stale(),
        }

        Ok(LeaseGrant { lease: moved, address })
    }

    /// Read model: active leases held by one owner.
    pub async fn active_leases(&self, owner_id: &str) -> Result<Vec<Lease>> {
        self.leases.active_by_owner(owner_id).await
    }

    async fn require_active(&self, lease_id: &str) -> Result<Lease> {
        let lease = self
            .leases
            .get(lease_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("lease {lease_id}")))?;
        if !lease.is_active() {
            return Err(BrokerError::AlreadyTerminal(lease_id.to_string()));
        }
        Ok(lease)
    }

    async fn pick_credential(
        &self,
        port_id: &str,
        credential_override: Option<ProxyCredential>,
    ) -> Result<ProxyCredential> {
        let taken: HashSet<String> =
            self.leases.active_usernames_on_port(port_id).await?.into_iter().collect();

        match credential_override {
            Some(credential) => {
                if credential.username.is_empty() || credential.password.is_empty() {
                    return Err(BrokerError::Validation("credential override is empty".into()));
                }
                if taken.contains(&credential.username) {
                    return Err(BrokerError::Validation(format!(
                        "username {} is already active on port {port_id}",
                        credential.username
                    )));
                }
                Ok(credential)
            }
            None => credentials::generate_distinct(&taken),
        }
    }

    /// Dedicated-tier sync path. Local state stays authoritative: a failed
    /// push is logged and retried by the next reconciliation pass.
    async fn push_to_provider(&self, lease: &Lease) {
        let upstream = match self.ports.get(&lease.port_id).await {
            Ok(Some(port)) => port.upstream,
            Ok(None) => None,
            Err(err) => {
                warn!(lease_id = %lease.id, error = %err, "port lookup for credential push failed");
                return;
            }
        };
        let Some(upstream) = upstream else {
            warn!(lease_id = %lease.id, port_id = %lease.port_id, "dedicated port has no upstream");
            return;
        };

        if let Err(err) = self.provider.push_credential(&upstream, &lease.credential).await {
            warn!(
                lease_id = %lease.id,
                error = %err,
                "provider credential push failed; will retry on next reconciliation"
            );
        }
    }
}

fn validate_request(request: &AllocateRequest) -> Result<()> {
    if request.owner_id.trim().is_empty() {
        return Err(BrokerError::Validation("owner id is empty".into()));
    }
    if !(MIN_LEASE_DURATION_HOURS..=MAX_LEASE_DURATION_HOURS).contains(&request.duration_hours) {
        return Err(BrokerError::Validation(format!(
            "duration must be {MIN_LEASE_DURATION_HOURS}..={MAX_LEASE_DURATION_HOURS} hours"
        )));
    }
    if request.rotation_interval_minutes < MIN_ROTATION_INTERVAL_MINUTES {
        return Err(BrokerError::Validation(format!(
            "rotation interval must be at least {MIN_ROTATION_INTERVAL_MINUTES} minutes"
        )));
    }
    Ok(())
}

/// The address handed to the lessee, chosen by tier routing.
fn address_for(port: &PortEndpoint) -> Result<LeaseAddress> {
    match port.tier.routing() {
        RoutingMode::Direct => {
            let upstream = port.upstream.as_ref().ok_or_else(|| {
                BrokerError::Internal(format!("dedicated port {} has no upstream", port.id))
            })?;
            Ok(LeaseAddress { host: upstream.host.clone(), port: upstream.port })
        }
        RoutingMode::Relayed => {
            Ok(LeaseAddress { host: port.public_host.clone(), port: port.public_port })
        }
    }
}
