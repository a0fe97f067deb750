//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `PORTBROKER_DB_PATH`: Database file path
//! - `PORTBROKER_DB_POOL_SIZE`: Connection pool size
//! - `PORTBROKER_PROVIDER_BASE_URL`: Provider API base URL
//! - `PORTBROKER_PROVIDER_API_KEY`: Provider API key
//! - `PORTBROKER_PROVIDER_TIMEOUT`: Provider request timeout in seconds
//! - `PORTBROKER_RELAY_CONFIG_PATH`: Relay artifact path
//! - `PORTBROKER_RELAY_BIND_HOST`: Relay listener bind host
//! - `PORTBROKER_RELAY_RELOAD_CMD`: Reload command (whitespace-separated)
//! - `PORTBROKER_SWEEP_INTERVAL`: Expiry sweep interval in seconds
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./config.toml` or `./config.json` (current working directory)
//! 2. `./portbroker.toml` or `./portbroker.json` (current working directory)
//! 3. `../config.toml` or `../config.json` (parent directory)

use std::path::{Path, PathBuf};

use portbroker_domain::{
    BrokerConfig, BrokerError, DatabaseConfig, ExpiryConfig, ProviderConfig, RelayConfig, Result,
};

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file.
///
/// # Errors
/// Returns `BrokerError::Config` if configuration cannot be loaded from
/// either source.
pub fn load() -> Result<BrokerConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// All required environment variables must be present; optional knobs fall
/// back to the defaults in [`BrokerConfig::default`].
///
/// # Errors
/// Returns `BrokerError::Config` if required variables are missing or have
/// invalid values.
pub fn load_from_env() -> Result<BrokerConfig> {
    let defaults = BrokerConfig::default();

    let db_path = env_var("PORTBROKER_DB_PATH")?;
    let db_pool_size = env_parse("PORTBROKER_DB_POOL_SIZE", defaults.database.pool_size)?;

    let provider_base_url = env_var("PORTBROKER_PROVIDER_BASE_URL")?;
    let provider_api_key = env_var("PORTBROKER_PROVIDER_API_KEY")?;
    let provider_timeout =
        env_parse("PORTBROKER_PROVIDER_TIMEOUT", defaults.provider.timeout_seconds)?;
    let provider_page_size = env_parse("PORTBROKER_PROVIDER_PAGE_SIZE", defaults.provider.page_size)?;

    let relay_config_path = env_var("PORTBROKER_RELAY_CONFIG_PATH")?;
    let relay_bind_host =
        std::env::var("PORTBROKER_RELAY_BIND_HOST").unwrap_or(defaults.relay.bind_host);
    let relay_reload_cmd = std::env::var("PORTBROKER_RELAY_RELOAD_CMD")
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or(defaults.relay.reload_command);
    let relay_socks_offset =
        env_parse("PORTBROKER_RELAY_SOCKS_OFFSET", defaults.relay.socks_port_offset)?;
    let relay_reload_timeout =
        env_parse("PORTBROKER_RELAY_RELOAD_TIMEOUT", defaults.relay.reload_timeout_seconds)?;
    let relay_rebuild_interval =
        env_parse("PORTBROKER_RELAY_REBUILD_INTERVAL", defaults.relay.rebuild_interval_seconds)?;

    let sweep_interval = env_parse("PORTBROKER_SWEEP_INTERVAL", defaults.expiry.sweep_interval_seconds)?;

    Ok(BrokerConfig {
        database: DatabaseConfig { path: db_path, pool_size: db_pool_size },
        provider: ProviderConfig {
            base_url: provider_base_url,
            api_key: provider_api_key,
            timeout_seconds: provider_timeout,
            page_size: provider_page_size,
        },
        relay: RelayConfig {
            config_path: relay_config_path,
            bind_host: relay_bind_host,
            socks_port_offset: relay_socks_offset,
            reload_command: relay_reload_cmd,
            reload_timeout_seconds: relay_reload_timeout,
            rebuild_interval_seconds: relay_rebuild_interval,
        },
        expiry: ExpiryConfig { sweep_interval_seconds: sweep_interval },
    })
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `BrokerError::Config` if the file is missing or malformed.
pub fn load_from_file(path: Option<&Path>) -> Result<BrokerConfig> {
    let path = match path {
        Some(path) => {
            if !path.exists() {
                return Err(BrokerError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => probe_config_paths()
            .ok_or_else(|| BrokerError::Config("no config file found".into()))?,
    };

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| BrokerError::Config(format!("failed to read {}: {e}", path.display())))?;

    let config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&raw)
            .map_err(|e| BrokerError::Config(format!("invalid TOML in {}: {e}", path.display())))?,
        Some("json") => serde_json::from_str(&raw)
            .map_err(|e| BrokerError::Config(format!("invalid JSON in {}: {e}", path.display())))?,
        _ => {
            return Err(BrokerError::Config(format!(
                "unsupported config format: {}",
                path.display()
            )))
        }
    };

    tracing::info!(path = %path.display(), "Configuration loaded from file");
    Ok(config)
}

fn probe_config_paths() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "config.toml",
        "config.json",
        "portbroker.toml",
        "portbroker.json",
        "../config.toml",
        "../config.json",
    ];

    CANDIDATES.iter().map(PathBuf::from).find(|p| p.exists())
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| BrokerError::Config(format!("missing env var {name}")))
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| BrokerError::Config(format!("invalid value for {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
