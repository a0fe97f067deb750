//! Relay configuration snapshot types
//!
//! One `RelaySnapshot` is a single consistent read of every active
//! shared-tier lease joined with its port. The synthesizer consumes nothing
//! else, which is what makes the artifact a pure function of lease state.

use serde::{Deserialize, Serialize};

use crate::types::lease::ProxyCredential;
use crate::types::port::UpstreamAddr;

/// One port block: one upstream chain wired to one local bind pair, plus
/// the credentials of every active lease bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPortBlock {
    pub port_id: String,
    pub bind_port: u16,
    pub upstream: UpstreamAddr,
    pub credentials: Vec<ProxyCredential>,
}

/// Consistent snapshot of relay-relevant lease state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySnapshot {
    pub blocks: Vec<RelayPortBlock>,
}

impl RelaySnapshot {
    /// Stable ordering: blocks by port id, credentials by username. Applied
    /// before synthesis so equal state yields byte-identical artifacts.
    pub fn normalize(&mut self) {
        for block in &mut self.blocks {
            block.credentials.sort_by(|a, b| a.username.cmp(&b.username));
        }
        self.blocks.sort_by(|a, b| a.port_id.cmp(&b.port_id));
    }
}
