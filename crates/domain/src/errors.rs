//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Portbroker
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum BrokerError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("No capacity: {0}")]
    NoCapacity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Port inactive: {0}")]
    PortInactive(String),

    #[error("Lease already terminal: {0}")]
    AlreadyTerminal(String),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Upstream sync failure: {0}")]
    UpstreamSync(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Portbroker operations
pub type Result<T> = std::result::Result<T, BrokerError>;
