//! A single-fabric `FabricProvider` stub for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use peer_fabric::{FabricIndex, PeerAddress};

use crate::error::{Error, Result};
use crate::fabric::{Fabric, FabricProvider};

pub struct MockFabricProvider {
    fabrics: Mutex<HashMap<FabricIndex, Fabric>>,
}

impl MockFabricProvider {
    pub fn new() -> Self {
        MockFabricProvider {
            fabrics: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fabric(self, fabric: Fabric) -> Self {
        self.fabrics.lock().unwrap().insert(fabric.index, fabric);
        self
    }
}

impl Default for MockFabricProvider {
    fn default() -> Self {
        MockFabricProvider::new()
    }
}

impl FabricProvider for MockFabricProvider {
    fn fabric_for(&self, address: PeerAddress) -> Result<Fabric> {
        self.fabrics
            .lock()
            .unwrap()
            .get(&address.fabric_index)
            .cloned()
            .ok_or(Error::UnknownNode(address))
    }
}
