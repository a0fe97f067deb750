//! Inventory service - endpoint registry business logic

use std::sync::Arc;

use portbroker_domain::{
    BrokerError, PortEndpoint, PortFilter, Result, TierOccupancy,
};
use tracing::info;

use super::ports::{PortStore, UpsertOutcome};

/// Registry of egress endpoints.
pub struct InventoryService {
    ports: Arc<dyn PortStore>,
}

impl InventoryService {
    pub fn new(ports: Arc<dyn PortStore>) -> Self {
        Self { ports }
    }

    /// Register or refresh an endpoint.
    ///
    /// Validates shape before handing off to the store: the store itself
    /// decides insert-vs-refresh and keeps locally-assigned routing fields
    /// sticky.
    pub async fn upsert(&self, endpoint: &PortEndpoint) -> Result<UpsertOutcome> {
        if endpoint.public_host.is_empty() {
            return Err(BrokerError::Validation("endpoint public host is empty".into()));
        }
        if endpoint.capacity == 0 {
            return Err(BrokerError::Validation("endpoint capacity must be at least 1".into()));
        }
        if endpoint.tier.is_shared() && endpoint.upstream.is_none() {
            return Err(BrokerError::Validation(
                "shared-tier endpoint requires an upstream to chain through".into(),
            ));
        }

        let outcome = self.ports.upsert(endpoint).await?;
        info!(port_id = %endpoint.id, outcome = ?outcome, "endpoint upserted");
        Ok(outcome)
    }

    /// List endpoints by tier/region/active flag.
    pub async fn list(&self, filter: &PortFilter) -> Result<Vec<PortEndpoint>> {
        self.ports.list(filter).await
    }

    /// Free slots on an endpoint.
    pub async fn capacity_remaining(&self, port_id: &str) -> Result<u32> {
        let port = self
            .ports
            .get(port_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("port {port_id}")))?;
        Ok(port.capacity_remaining())
    }

    /// Occupancy by tier and region, for dashboards and admin surfaces.
    pub async fn occupancy_summary(&self) -> Result<Vec<TierOccupancy>> {
        self.ports.occupancy_summary().await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use portbroker_domain::{PortTier, UpstreamAddr};
    use tokio::sync::Mutex as TokioMutex;

    use super::*;

    struct MockPortStore {
        rows: TokioMutex<Vec<PortEndpoint>>,
    }

    impl MockPortStore {
        fn new(rows: Vec<PortEndpoint>) -> Self {
            Self { rows: TokioMutex::new(rows) }
        }
    }

    #[async_trait]
    impl PortStore for MockPortStore {
        async fn upsert(&self, endpoint: &PortEndpoint) -> Result<UpsertOutcome> {
            let mut rows = self.rows.lock().await;
            if rows.iter().any(|r| r.id == endpoint.id) {
                return Ok(UpsertOutcome::Refreshed);
            }
            rows.push(endpoint.clone());
            Ok(UpsertOutcome::Inserted)
        }

        async fn get(&self, port_id: &str) -> Result<Option<PortEndpoint>> {
            Ok(self.rows.lock().await.iter().find(|r| r.id == port_id).cloned())
        }

        async fn get_by_provider_ref(&self, provider_ref: &str) -> Result<Option<PortEndpoint>> {
            Ok(self
                .rows
                .lock()
                .await
                .iter()
                .find(|r| r.provider_ref.as_deref() == Some(provider_ref))
                .cloned())
        }

        async fn list(&self, filter: &PortFilter) -> Result<Vec<PortEndpoint>> {
            Ok(self
                .rows
                .lock()
                .await
                .iter()
                .filter(|r| filter.tier.map_or(true, |t| r.tier == t))
                .filter(|r| filter.region.as_deref().map_or(true, |reg| r.region == reg))
                .filter(|r| filter.active.map_or(true, |a| r.active == a))
                .cloned()
                .collect())
        }

        async fn occupancy_summary(&self) -> Result<Vec<TierOccupancy>> {
            Ok(Vec::new())
        }
    }

    fn sample_port(id: &str, tier: PortTier, occupancy: u32) -> PortEndpoint {
        PortEndpoint {
            id: id.to_string(),
            public_host: "relay.example.net".to_string(),
            public_port: 3128,
            upstream: Some(UpstreamAddr {
                host: "10.0.0.8".to_string(),
                port: 8000,
                username: "up-user".to_string(),
                password: "up-pass".to_string(),
            }),
            tier,
            capacity: tier.capacity(),
            occupancy,
            region: "eu-west".to_string(),
            active: true,
            provider_ref: Some(format!("prov-{id}")),
            imported_at: 1_700_000_000,
            refreshed_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_rejects_shared_endpoint_without_upstream() {
        let service = InventoryService::new(Arc::new(MockPortStore::new(Vec::new())));
        let mut port = sample_port("p1", PortTier::SharedStandard, 0);
        port.upstream = None;

        let err = service.upsert(&port).await.expect_err("missing upstream should fail");
        assert!(matches!(err, BrokerError::Validation(_)));
    }

    #[tokio::test]
    async fn capacity_remaining_subtracts_occupancy() {
        let store = MockPortStore::new(vec![sample_port("p1", PortTier::SharedPremium, 2)]);
        let service = InventoryService::new(Arc::new(store));

        assert_eq!(service.capacity_remaining("p1").await.expect("port exists"), 3);
    }

    #[tokio::test]
    async fn capacity_remaining_unknown_port_is_not_found() {
        let service = InventoryService::new(Arc::new(MockPortStore::new(Vec::new())));

        let err = service.capacity_remaining("nope").await.expect_err("unknown port");
        assert!(matches!(err, BrokerError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_applies_tier_filter() {
        let store = MockPortStore::new(vec![
            sample_port("p1", PortTier::Dedicated, 0),
            sample_port("p2", PortTier::SharedStandard, 1),
        ]);
        let service = InventoryService::new(Arc::new(store));

        let filter =
            PortFilter { tier: Some(PortTier::SharedStandard), ..PortFilter::default() };
        let listed = service.list(&filter).await.expect("list succeeds");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "p2");
    }
}
