//! A single tracked peer: just its descriptor. The "at most one reconnection
//! future, at most one discovery record" invariant from §8 property 4 is
//! enforced above this type, by `PeerSet::pending_connects` (every
//! reconnection attempt is itself a `connect` call) and `DiscoveryRegistry`
//! for the discovery half.

use std::sync::Mutex;

use peer_fabric::PeerDescriptor;

/// One entry in the peer set's registry.
pub struct Peer {
    descriptor: Mutex<PeerDescriptor>,
}

impl Peer {
    pub fn new(descriptor: PeerDescriptor) -> Self {
        Peer {
            descriptor: Mutex::new(descriptor),
        }
    }

    pub fn descriptor(&self) -> PeerDescriptor {
        self.descriptor.lock().unwrap().clone()
    }

    pub fn update_descriptor(&self, f: impl FnOnce(&mut PeerDescriptor)) -> PeerDescriptor {
        let mut guard = self.descriptor.lock().unwrap();
        f(&mut guard);
        guard.clone()
    }
}
