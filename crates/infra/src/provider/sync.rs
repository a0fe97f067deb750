//! Provider catalog sync into the local inventory.
//!
//! Import is a two-step operator flow: `preview` is a dry run annotating
//! each catalog entry with its local import state, `import` commits a
//! selected subset. Already-imported entries only ever receive
//! connectivity/region refreshes; tier, capacity, and bind assignment are
//! sticky operator decisions made at first import.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use portbroker_core::inventory::ports::UpsertOutcome;
use portbroker_core::InventoryService;
use portbroker_domain::{
    BrokerError, CatalogEntry, CatalogPreview, ImportReport, PortEndpoint, PortFilter, PortTier,
    Result, UpstreamAddr,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::client::ProviderClient;

/// Operator choices applied to every endpoint created by one import pass.
#[derive(Debug, Clone)]
pub struct ImportSpec {
    pub tier: PortTier,
    /// Relay bind host assigned to new endpoints.
    pub bind_host: String,
    /// Lowest bind port the assigner may hand out.
    pub first_bind_port: u16,
}

/// Imports and refreshes provider catalog entries.
pub struct ProviderSyncService {
    client: Arc<ProviderClient>,
    inventory: Arc<InventoryService>,
}

impl ProviderSyncService {
    pub fn new(client: Arc<ProviderClient>, inventory: Arc<InventoryService>) -> Self {
        Self { client, inventory }
    }

    /// Dry-run: the current catalog annotated with local import state.
    /// Commits nothing.
    #[instrument(skip(self))]
    pub async fn preview(&self) -> Result<Vec<CatalogPreview>> {
        let catalog = self.client.fetch_catalog().await?;
        let imported = self.imported_refs().await?;

        Ok(catalog
            .into_iter()
            .map(|entry| {
                let already_imported = imported.contains(&entry.id);
                CatalogPreview { entry, already_imported }
            })
            .collect())
    }

    /// Import the selected catalog entries.
    ///
    /// New entries become endpoint rows with the operator-chosen tier and a
    /// locally assigned bind port; existing entries are refreshed through
    /// the same sticky-field upsert.
    #[instrument(skip(self, selection))]
    pub async fn import(&self, selection: &[String], spec: &ImportSpec) -> Result<ImportReport> {
        if selection.is_empty() {
            return Err(BrokerError::Validation("import selection is empty".into()));
        }

        let catalog = self.client.fetch_catalog().await?;
        let selected: HashSet<&str> = selection.iter().map(String::as_str).collect();
        let imported = self.imported_refs().await?;
        let mut bind_ports = self.used_bind_ports().await?;
        let mut next_bind_port = spec.first_bind_port;

        let mut report = ImportReport::default();
        for entry in catalog.iter().filter(|e| selected.contains(e.id.as_str())) {
            // Refresh paths ignore routing fields, so a bind port is only
            // drawn for entries that will actually insert.
            let bind_port = if imported.contains(&entry.id) {
                spec.first_bind_port
            } else {
                next_free_port(&mut bind_ports, &mut next_bind_port)?
            };
            let endpoint = endpoint_from_entry(entry, spec, bind_port);
            match self.inventory.upsert(&endpoint).await? {
                UpsertOutcome::Inserted => report.imported += 1,
                UpsertOutcome::Refreshed => report.refreshed += 1,
            }
        }

        let matched = (report.imported + report.refreshed) as usize;
        if matched < selection.len() {
            report.skipped = (selection.len() - matched) as u32;
            warn!(skipped = report.skipped, "selected entries missing from catalog");
        }

        info!(
            imported = report.imported,
            refreshed = report.refreshed,
            skipped = report.skipped,
            "catalog import completed"
        );
        Ok(report)
    }

    async fn imported_refs(&self) -> Result<HashSet<String>> {
        let ports = self.inventory.list(&PortFilter::default()).await?;
        Ok(ports.into_iter().filter_map(|p| p.provider_ref).collect())
    }

    async fn used_bind_ports(&self) -> Result<HashSet<u16>> {
        let ports = self.inventory.list(&PortFilter::default()).await?;
        Ok(ports.into_iter().map(|p| p.public_port).collect())
    }
}

fn next_free_port(used: &mut HashSet<u16>, next: &mut u16) -> Result<u16> {
    while used.contains(next) {
        *next = next
            .checked_add(1)
            .ok_or_else(|| BrokerError::Internal("bind port space exhausted".into()))?;
    }
    let assigned = *next;
    used.insert(assigned);
    *next = next
        .checked_add(1)
        .ok_or_else(|| BrokerError::Internal("bind port space exhausted".into()))?;
    Ok(assigned)
}

fn endpoint_from_entry(entry: &CatalogEntry, spec: &ImportSpec, bind_port: u16) -> PortEndpoint {
    PortEndpoint {
        id: Uuid::new_v4().to_string(),
        public_host: spec.bind_host.clone(),
        public_port: bind_port,
        upstream: Some(UpstreamAddr {
            host: entry.host.clone(),
            port: entry.port,
            username: entry.username.clone(),
            password: entry.password.clone(),
        }),
        tier: spec.tier,
        capacity: spec.tier.capacity(),
        occupancy: 0,
        region: entry.region.clone(),
        active: true,
        provider_ref: Some(entry.id.clone()),
        imported_at: Utc::now().timestamp(),
        refreshed_at: None,
    }
}
