//! Relay artifact publishing and reload triggering

pub mod publisher;

pub use publisher::{PublishOutcome, RelayPublisher, RelayStaleHandle};
