//! `PeerDescriptor`: everything the registry knows about a peer between
//! connections.

use crate::addr::{OperationalAddress, PeerAddress};
use crate::session_parameters::DiscoveryData;

/// An opaque reference to a host application's per-peer data cache (e.g.
/// cluster attribute snapshots), not interpreted by this crate. Handed to
/// whatever store implements the purge side of this, keyed by peer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PeerDataHandle(pub u64);

/// Everything persisted about a known peer.
///
/// `address` is immutable; `operational_address` and `discovery_data` are
/// monotonically refined as better information arrives, never cleared by a
/// failed attempt (a failed attempt only moves the peer's connection state,
/// tracked separately by the peer set). `data_handle` is set by the host
/// application, not by anything in this crate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerDescriptor {
    address: PeerAddress,
    pub operational_address: Option<OperationalAddress>,
    pub discovery_data: Option<DiscoveryData>,
    pub data_handle: Option<PeerDataHandle>,
}

impl PeerDescriptor {
    pub fn new(address: PeerAddress) -> Self {
        PeerDescriptor {
            address,
            operational_address: None,
            discovery_data: None,
            data_handle: None,
        }
    }

    pub fn address(&self) -> PeerAddress {
        self.address
    }

    /// Refine the cached operational address. Always accepts the newest
    /// value: the caller is responsible for only calling this with an
    /// address learned from a successful interaction.
    pub fn refine_operational_address(&mut self, addr: OperationalAddress) {
        self.operational_address = Some(addr);
    }

    pub fn refine_discovery_data(&mut self, data: DiscoveryData) {
        self.discovery_data = Some(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn refinement_overwrites_but_does_not_clear() {
        let mut d = PeerDescriptor::new(PeerAddress::new(1, 2));
        assert!(d.operational_address.is_none());
        let addr = OperationalAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5540);
        d.refine_operational_address(addr);
        assert_eq!(d.operational_address, Some(addr));
    }
}
