//! Configuration management

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_PROVIDER_TIMEOUT_SECS, DEFAULT_RELAY_REBUILD_INTERVAL_SECS,
    DEFAULT_RELOAD_TIMEOUT_SECS, DEFAULT_SWEEP_INTERVAL_SECS, RELAY_SOCKS_PORT_OFFSET,
};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub relay: RelayConfig,
    pub expiry: ExpiryConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
}

/// Remote provider API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub timeout_seconds: u64,
    pub page_size: u32,
}

/// Relay artifact and reload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Final artifact location; writes go through a temp file + rename.
    pub config_path: String,
    /// Address the relay binds its per-port listeners on.
    pub bind_host: String,
    /// SOCKS listener offset above each port's HTTP listener.
    pub socks_port_offset: u16,
    /// Command invoked after publishing (empty disables the trigger).
    pub reload_command: Vec<String>,
    pub reload_timeout_seconds: u64,
    /// Periodic reconciliation rebuild, independent of staleness marks.
    pub rebuild_interval_seconds: u64,
}

/// Expiry scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryConfig {
    pub sweep_interval_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig { path: "portbroker.db".to_string(), pool_size: 8 },
            provider: ProviderConfig {
                base_url: "https://api.proxyline.net/v1".to_string(),
                api_key: String::new(),
                timeout_seconds: DEFAULT_PROVIDER_TIMEOUT_SECS,
                page_size: 100,
            },
            relay: RelayConfig {
                config_path: "/etc/3proxy/3proxy.cfg".to_string(),
                bind_host: "0.0.0.0".to_string(),
                socks_port_offset: RELAY_SOCKS_PORT_OFFSET,
                reload_command: vec![
                    "systemctl".to_string(),
                    "reload".to_string(),
                    "3proxy".to_string(),
                ],
                reload_timeout_seconds: DEFAULT_RELOAD_TIMEOUT_SECS,
                rebuild_interval_seconds: DEFAULT_RELAY_REBUILD_INTERVAL_SECS,
            },
            expiry: ExpiryConfig { sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECS },
        }
    }
}
