//! Domain types and models

pub mod lease;
pub mod port;
pub mod provider;
pub mod relay;

pub use lease::{AllocateRequest, Lease, LeaseAddress, LeaseGrant, LeaseStatus, ProxyCredential};
pub use port::{PortEndpoint, PortFilter, PortTier, RoutingMode, TierOccupancy, UpstreamAddr};
pub use provider::{CatalogEntry, CatalogPreview, ImportReport};
pub use relay::{RelayPortBlock, RelaySnapshot};
