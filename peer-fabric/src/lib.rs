//! Shared address, parameter, and wire types for the operational peer
//! connectivity core.
//!
//! This crate plays the role the chain-serialization crate plays for a
//! blockchain networking stack: the types here have no behavior of their
//! own, they just give the peer-net crate a shared vocabulary for
//! addresses, session parameters, and the wire format.

pub mod addr;
pub mod descriptor;
pub mod record;
pub mod session_parameters;
pub mod wire;

pub use addr::{FabricIndex, OperationalAddress, PeerAddress, GROUP_NODE_ID_FLOOR, UNSPECIFIED_NODE_ID};
pub use descriptor::{PeerDataHandle, PeerDescriptor};
pub use session_parameters::{CaseAuthenticatedTag, DiscoveryData, SessionParameters, SupportedTransports};
pub use wire::{PacketHeader, SecurityFlags, WireDecode, WireEncode};
