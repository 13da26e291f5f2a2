//! The fabric provider boundary: resolving a fabric index to an
//! operational identity and root of trust. The certificate authority data
//! model itself lives outside this crate.

use peer_fabric::{FabricIndex, PeerAddress};

use crate::error::Result;

/// The operational identity this node holds on one fabric.
#[derive(Clone, Debug)]
pub struct Fabric {
    pub index: FabricIndex,
    pub local_node_id: u64,
    pub root_public_key: Vec<u8>,
}

pub trait FabricProvider: Send + Sync {
    /// Resolve the fabric that owns `address`.
    fn fabric_for(&self, address: PeerAddress) -> Result<Fabric>;
}
