//! # Portbroker Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Lease lifecycle services and business rules
//! - Port/adapter interfaces (traits)
//! - The relay configuration synthesizer
//!
//! ## Architecture Principles
//! - Only depends on `portbroker-domain`
//! - No database, HTTP, or process code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod expiry;
pub mod inventory;
pub mod lease;
pub mod relaycfg;

// Re-export specific items to avoid ambiguity
pub use expiry::{ExpirySweeper, SweepReport};
pub use inventory::ports::{PortStore, UpsertOutcome};
pub use inventory::InventoryService;
pub use lease::ports::{BalanceGate, LeaseStore, ProviderGateway, RelayHandle, ReleaseOutcome};
pub use lease::LeaseService;
pub use relaycfg::{synthesize, RelaySettings};
