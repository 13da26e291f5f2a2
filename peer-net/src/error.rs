//! The error taxonomy of the operational peer connectivity core.
//!
//! Every public fallible operation returns `Result<T, Error>`. Errors are
//! typed, not stringly, so that callers (and the peer set's own recovery
//! logic) can match on `kind` rather than parse messages.

use peer_fabric::PeerAddress;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested peer is not registered and `allow_unknown_peer` was false.
    #[error("unknown node {0}")]
    UnknownNode(PeerAddress),

    /// No operational route to the peer could be found.
    #[error("no route to {address}: {reason}")]
    Discovery {
        address: PeerAddress,
        reason: &'static str,
    },

    /// Channel-level retransmission was exhausted; recovered locally once,
    /// converted to `PairRetransmissionLimitReached` on persistent failure.
    #[error("no response from {0}")]
    NoResponseTimeout(PeerAddress),

    /// CASE/PASE pairing could not complete within the retransmission
    /// budget.
    #[error("pairing retransmission limit reached for {0}")]
    PairRetransmissionLimitReached(PeerAddress),

    /// The peer reported it shares no trust root with us.
    #[error("no shared trust roots with {0}")]
    NoSharedTrustRoots(PeerAddress),

    /// A caller violated an API contract (e.g. a `timeout` without
    /// `DiscoveryKind::Timed`, or a write to a group address that expects a
    /// response).
    #[error("implementation error: {0}")]
    ImplementationError(&'static str),

    /// An invariant internal to this crate was violated.
    #[error("internal error: {0}")]
    InternalError(&'static str),

    /// The session backing this operation has already closed.
    #[error("session closed")]
    SessionClosed,

    /// A AEAD decode failed: bad counter, bad tag, or truncated payload.
    #[error("failed to decode secure message: {0}")]
    DecodeFailed(&'static str),

    /// An external collaborator (transport, scanner, fabric provider)
    /// reported a failure; the boxed error is preserved for logging.
    #[error("transport error")]
    Transport(#[source] BoxError),

    #[error("scanner error")]
    Scanner(#[source] BoxError),

    #[error("crypto error")]
    Crypto(#[source] BoxError),

    #[error("fabric error")]
    Fabric(#[source] BoxError),
}

impl Error {
    /// Errors that, per §7, trigger a session purge for the peer once they
    /// reach the peer set.
    pub fn triggers_session_purge(&self) -> bool {
        matches!(
            self,
            Error::Discovery { .. } | Error::NoResponseTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
