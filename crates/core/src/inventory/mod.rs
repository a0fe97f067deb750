//! Port inventory: registry of egress endpoints

pub mod ports;
pub mod service;

pub use service::InventoryService;
