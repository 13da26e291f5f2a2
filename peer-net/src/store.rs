//! The persisted peer store boundary.
//!
//! §4.1 requires every peer mutation to be persisted via an injected store;
//! §6 fixes the on-disk record shape. The concrete persistence back-end is
//! out of scope (§1); this trait is the seam, with an in-memory reference
//! implementation for tests in `testing`.

use async_trait::async_trait;

use peer_fabric::{PeerAddress, PeerDataHandle, PeerDescriptor};

use crate::error::Result;

#[async_trait]
pub trait PeerStore: Send + Sync {
    async fn get(&self, address: PeerAddress) -> Result<Option<PeerDescriptor>>;

    async fn put(&self, descriptor: PeerDescriptor) -> Result<()>;

    async fn delete(&self, address: PeerAddress) -> Result<()>;

    async fn list(&self) -> Result<Vec<PeerDescriptor>>;
}

/// The host application's per-peer data cache (§3 Data Model: `PeerDescriptor`'s
/// optional data store handle). Purged whenever CASE establishes a fresh,
/// non-resumed session for a peer, since the peer's operational state may
/// have changed entirely since the cache was filled (§4.3 step 5).
#[async_trait]
pub trait PeerDataStore: Send + Sync {
    async fn purge(&self, handle: PeerDataHandle) -> Result<()>;
}
