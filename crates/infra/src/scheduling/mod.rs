//! Scheduling infrastructure for background lease maintenance
//!
//! The expiry scheduler follows the workspace runtime rules:
//! - Explicit lifecycle management (start/stop)
//! - Join handles for spawned tasks
//! - Cancellation token support
//! - Structured tracing

pub mod error;
pub mod expiry_scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use expiry_scheduler::{ExpiryScheduler, ExpirySchedulerConfig};
