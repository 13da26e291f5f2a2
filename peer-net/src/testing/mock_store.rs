//! An in-memory `PeerStore`, keyed by `PeerAddress`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use peer_fabric::{PeerAddress, PeerDescriptor};

use crate::error::Result;
use crate::store::PeerStore;

#[derive(Default)]
pub struct InMemoryPeerStore {
    descriptors: Mutex<HashMap<PeerAddress, PeerDescriptor>>,
}

impl InMemoryPeerStore {
    pub fn new() -> Self {
        InMemoryPeerStore::default()
    }
}

#[async_trait]
impl PeerStore for InMemoryPeerStore {
    async fn get(&self, address: PeerAddress) -> Result<Option<PeerDescriptor>> {
        Ok(self.descriptors.lock().unwrap().get(&address).cloned())
    }

    async fn put(&self, descriptor: PeerDescriptor) -> Result<()> {
        self.descriptors
            .lock()
            .unwrap()
            .insert(descriptor.address(), descriptor);
        Ok(())
    }

    async fn delete(&self, address: PeerAddress) -> Result<()> {
        self.descriptors.lock().unwrap().remove(&address);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PeerDescriptor>> {
        Ok(self.descriptors.lock().unwrap().values().cloned().collect())
    }
}
