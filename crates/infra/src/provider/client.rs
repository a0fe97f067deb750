//! HTTP client for the remote provider's endpoint catalog.
//!
//! All calls carry a bounded timeout; a timeout or failure surfaces as
//! `UpstreamSync` and never blocks a local state transition. The catalog is
//! paginated; `fetch_catalog` walks every page.

use std::time::Duration;

use async_trait::async_trait;
use portbroker_core::lease::ports::ProviderGateway;
use portbroker_domain::constants::DEFAULT_PROVIDER_TIMEOUT_SECS;
use portbroker_domain::{BrokerError, CatalogEntry, ProxyCredential, Result, UpstreamAddr};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::errors::InfraError;

/// Configuration for the provider client
#[derive(Debug, Clone)]
pub struct ProviderClientConfig {
    /// Base URL for the provider API (e.g. "https://api.proxyline.net/v1")
    pub base_url: String,
    /// API key sent on every request
    pub api_key: String,
    /// Timeout for API requests
    pub timeout: Duration,
    /// Catalog page size
    pub page_size: u32,
}

impl Default for ProviderClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.proxyline.net/v1".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            page_size: 100,
        }
    }
}

/// Provider API client
pub struct ProviderClient {
    http: reqwest::Client,
    config: ProviderClientConfig,
}

#[derive(Debug, Deserialize)]
struct CatalogPage {
    items: Vec<CatalogEntry>,
    total: u64,
}

#[derive(Debug, Serialize)]
struct CredentialUpdateRequest<'a> {
    host: &'a str,
    port: u16,
    username: &'a str,
    password: &'a str,
}

impl ProviderClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ProviderClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| BrokerError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self { http, config })
    }

    /// Fetch the complete endpoint catalog, walking all pages.
    #[instrument(skip(self))]
    pub async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>> {
        let mut entries = Vec::new();
        let mut page = 1_u32;

        loop {
            let url = format!("{}/proxies", self.config.base_url);
            let response = self
                .http
                .get(&url)
                .header("X-Api-Key", &self.config.api_key)
                .query(&[("page", page.to_string()), ("page_size", self.config.page_size.to_string())])
                .send()
                .await
                .map_err(|err| BrokerError::from(InfraError::from(err)))?
                .error_for_status()
                .map_err(|err| BrokerError::from(InfraError::from(err)))?;

            let body: CatalogPage = response
                .json()
                .await
                .map_err(|err| BrokerError::UpstreamSync(format!("malformed catalog page: {err}")))?;

            let fetched = body.items.len();
            entries.extend(body.items);
            debug!(page = page, fetched = fetched, total = body.total, "catalog page fetched");

            if fetched == 0 || entries.len() as u64 >= body.total {
                break;
            }
            page += 1;
        }

        Ok(entries)
    }

    /// Push a replacement credential for one upstream to the provider.
    #[instrument(skip(self, credential))]
    pub async fn update_credential(
        &self,
        upstream: &UpstreamAddr,
        credential: &ProxyCredential,
    ) -> Result<()> {
        let url = format!("{}/proxies/credentials", self.config.base_url);
        let request = CredentialUpdateRequest {
            host: &upstream.host,
            port: upstream.port,
            username: &credential.username,
            password: &credential.password,
        };

        self.http
            .put(&url)
            .header("X-Api-Key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| BrokerError::from(InfraError::from(err)))?
            .error_for_status()
            .map_err(|err| BrokerError::from(InfraError::from(err)))?;

        debug!(host = %upstream.host, port = upstream.port, "credential pushed to provider");
        Ok(())
    }
}

#[async_trait]
impl ProviderGateway for ProviderClient {
    async fn push_credential(
        &self,
        upstream: &UpstreamAddr,
        credential: &ProxyCredential,
    ) -> Result<()> {
        self.update_credential(upstream, credential).await
    }
}
