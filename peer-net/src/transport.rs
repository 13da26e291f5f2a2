//! The transport boundary: obtaining a datagram channel for a remote
//! operational address. UDP/BLE/TCP socket implementations live outside
//! this crate; this module only names the interface the rest of the core
//! depends on.

use async_trait::async_trait;

use peer_fabric::OperationalAddress;

use crate::error::Result;

/// A send/receive channel to one remote address.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, bytes: &[u8]) -> Result<()>;

    async fn recv(&self) -> Result<Vec<u8>>;

    fn remote_address(&self) -> OperationalAddress;
}

/// The set of transports this node has listeners open on. §5 requires an
/// IPv6 listener on `::` and an IPv4 listener on `0.0.0.0` at startup so
/// outbound pairing always has a local socket to send from; opening those
/// sockets is the transport set's job, not this crate's.
#[async_trait]
pub trait TransportSet: Send + Sync {
    /// Obtain (opening if necessary) a channel to `address`.
    async fn channel_for(&self, address: OperationalAddress) -> Result<Box<dyn Channel>>;

    /// Obtain a channel to a group's multicast address, as used by
    /// `group_session_for_address`.
    async fn group_channel_for(&self, address: OperationalAddress) -> Result<Box<dyn Channel>>;
}
