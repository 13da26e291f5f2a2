//! The mDNS scanner boundary: operational-node discovery and cancellation.
//! The query/response parser itself is out of scope; this module only
//! names the interface the discovery engine drives.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use peer_fabric::{OperationalAddress, PeerAddress};

/// A handle to one running mDNS query, used to cancel it later.
///
/// `id` is opaque to the caller; the scanner set assigns and tracks it
/// internally so `cancel_discovery` can find the right query.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DiscoveryToken(pub u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

pub fn next_discovery_token() -> DiscoveryToken {
    DiscoveryToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
}

/// The mDNS scanner set is shared process-wide: every call tags whether
/// cancellation should resolve the waiting receiver (a successful path
/// racing another discoverer) or drop it unresolved (a hard `close()`).
pub trait ScannerSet: Send + Sync {
    /// Start an operational-device query for `address`. Discovered
    /// addresses are pushed to the returned receiver as they arrive.
    fn start_discovery(&self, address: PeerAddress) -> (DiscoveryToken, mpsc::UnboundedReceiver<OperationalAddress>);

    /// Cancel a running discovery identified by `token`.
    ///
    /// `resolve = true` lets any still-pending attempt resolve normally (a
    /// successful path completing after racing the same target via another
    /// route). `resolve = false` drops the query without resolving waiters,
    /// used by a hard `close()` so shutting-down peers never observe a
    /// spurious connect.
    fn cancel_discovery(&self, token: DiscoveryToken, resolve: bool);
}
