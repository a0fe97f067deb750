//! Relay configuration synthesis

pub mod synthesizer;

pub use synthesizer::{synthesize, RelaySettings};
