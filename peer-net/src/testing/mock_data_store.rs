//! An in-memory `PeerDataStore` that just records which handles were purged.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use peer_fabric::PeerDataHandle;

use crate::error::Result;
use crate::store::PeerDataStore;

#[derive(Default)]
pub struct InMemoryPeerDataStore {
    purged: Mutex<HashSet<PeerDataHandle>>,
}

impl InMemoryPeerDataStore {
    pub fn new() -> Self {
        InMemoryPeerDataStore::default()
    }

    pub fn was_purged(&self, handle: PeerDataHandle) -> bool {
        self.purged.lock().unwrap().contains(&handle)
    }
}

#[async_trait]
impl PeerDataStore for InMemoryPeerDataStore {
    async fn purge(&self, handle: PeerDataHandle) -> Result<()> {
        self.purged.lock().unwrap().insert(handle);
        Ok(())
    }
}
