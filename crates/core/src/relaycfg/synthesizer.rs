//! Relay configuration synthesizer
//!
//! Builds the full relay artifact from one consistent snapshot. Always a
//! complete rebuild, never an incremental diff, so the artifact cannot
//! drift from lease state. Output is deterministic: stable ordering, no
//! timestamps, byte-identical for an unchanged snapshot.

use portbroker_domain::constants::RELAY_SOCKS_PORT_OFFSET;
use portbroker_domain::{RelayPortBlock, RelaySnapshot};

/// Knobs the artifact depends on besides the snapshot itself.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Address the per-port listeners bind on.
    pub bind_host: String,
    /// SOCKS listener offset above each block's HTTP listener.
    pub socks_port_offset: u16,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self { bind_host: "0.0.0.0".to_string(), socks_port_offset: RELAY_SOCKS_PORT_OFFSET }
    }
}

/// Render the complete relay artifact.
///
/// One flat credential registry up front (the relay authenticates by
/// credential, not bind port), then one block per port wiring its upstream
/// chain to an HTTP + SOCKS listener pair.
pub fn synthesize(snapshot: &RelaySnapshot, settings: &RelaySettings) -> String {
    let mut normalized = snapshot.clone();
    normalized.normalize();

    let mut out = String::new();
    out.push_str("nscache 65536\n");
    out.push_str("timeouts 1 5 30 60 180 1800 15 60\n");
    out.push_str("auth strong\n");

    let users: Vec<String> = normalized
        .blocks
        .iter()
        .flat_map(|block| block.credentials.iter())
        .map(|c| format!("{}:CL:{}", c.username, c.password))
        .collect();
    if !users.is_empty() {
        out.push('\n');
        out.push_str(&format!("users {}\n", users.join(" ")));
    }

    for block in &normalized.blocks {
        out.push('\n');
        render_block(&mut out, block, settings);
    }

    out
}

fn render_block(out: &mut String, block: &RelayPortBlock, settings: &RelaySettings) {
    let allow: Vec<&str> = block.credentials.iter().map(|c| c.username.as_str()).collect();
    let socks_port = block.bind_port.saturating_add(settings.socks_port_offset);

    out.push_str(&format!("# port {}\n", block.port_id));
    out.push_str("flush\n");
    out.push_str(&format!("allow {}\n", allow.join(" ")));
    out.push_str(&format!(
        "parent 1000 http {} {} {} {}\n",
        block.upstream.host, block.upstream.port, block.upstream.username, block.upstream.password
    ));
    out.push_str(&format!("proxy -n -a -p{} -i{}\n", block.bind_port, settings.bind_host));
    out.push_str(&format!("socks -n -a -p{} -i{}\n", socks_port, settings.bind_host));
}
