//! Lease expiry sweeping

pub mod service;

pub use service::{ExpirySweeper, SweepReport};
