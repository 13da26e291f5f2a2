//! An operational peer connectivity core for a Matter-style fabric node:
//! discovery, CASE pairing, secure session lifecycle, and the peer
//! registry that ties them together (§1).
//!
//! The wire/address/parameter vocabulary lives in `peer-fabric`; this
//! crate is all behavior, built against injected boundaries for crypto,
//! transport, mDNS discovery, fabric resolution, and persistence so that
//! none of those concerns need a concrete implementation to test against
//! (see `testing` for in-memory stand-ins).

pub mod case;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod events;
pub mod exchange_provider;
pub mod fabric;
pub mod peer;
pub mod peer_set;
pub mod scanner;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use case::{CaseClient, LocalIdentity};
pub use config::PeerSetConfig;
pub use crypto::{AeadKey, CryptoProvider, Nonce};
pub use discovery::{DiscoveryKind, DiscoveryOutcome, DiscoveryRegistry};
pub use error::{Error, Result};
pub use events::{EventBus, PeerSetEvent, SessionEvent};
pub use exchange_provider::{ChannelUpdated, DedicatedExchangeProvider, ExchangeProvider, ExchangeProviderRequest, ReconnectableExchangeProvider};
pub use fabric::{Fabric, FabricProvider};
pub use peer::Peer;
pub use peer_set::{ConnectOptions, DiscoveryOptions, PeerSet};
pub use scanner::{DiscoveryToken, ScannerSet};
pub use session::{InMemorySessionManager, SecureSession, SessionId, SessionManager, SessionType, SharedSession};
pub use store::{PeerDataStore, PeerStore};
pub use transport::{Channel, TransportSet};
