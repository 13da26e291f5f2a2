//! The secure session runtime: AEAD encode/decode, nonce derivation,
//! exchange accounting, activity tracking, and the close state machine.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use peer_fabric::{CaseAuthenticatedTag, PacketHeader, UNSPECIFIED_NODE_ID};

use crate::crypto::{derive_nonce, AeadKey, CryptoProvider};
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::fabric::Fabric;
use crate::session::counter::MessageCounter;
use crate::session::reception::MessageReceptionState;

/// This node's locally-assigned session id.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SessionId(pub u16);

/// An opaque handle to a live `MessageExchange`. The exchange type itself
/// lives above this crate; the session only needs to track membership.
pub type ExchangeId = u64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionType {
    Unicast,
    Group,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Lifecycle {
    Open,
    Closing,
    DeferredClose,
    Closed,
}

/// Key material and runtime state for one secure session.
///
/// Keys are immutable for the session's lifetime; `fabric` is settable
/// exactly once; `is_closing` is monotonically true once set; once
/// `is_closed` the session's channel is gone and any further use surfaces
/// `Error::SessionClosed`.
pub struct SecureSession {
    id: SessionId,
    peer_session_id: u16,
    peer_node_id: u64,
    fabric: Option<Fabric>,
    case_authenticated_tags: Vec<CaseAuthenticatedTag>,
    decrypt_key: AeadKey,
    encrypt_key: AeadKey,
    attestation_key: AeadKey,
    is_initiator: bool,
    supports_mrp: bool,
    session_type: SessionType,
    counter: MessageCounter,
    reception: MessageReceptionState,
    timestamp: Instant,
    active_timestamp: Instant,
    active_threshold: Duration,
    live_exchanges: HashSet<ExchangeId>,
    lifecycle: Lifecycle,
    is_peer_lost: bool,
    graceful_close_emitted: bool,
    events: EventBus<SessionEvent>,
}

/// The three keys split out of the 48-byte HKDF output: decrypt, encrypt,
/// attestation, already swapped for this node's role.
pub struct DerivedKeys {
    pub decrypt_key: AeadKey,
    pub encrypt_key: AeadKey,
    pub attestation_key: AeadKey,
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeys")
            .field("decrypt_key", &hex::encode(self.decrypt_key))
            .field("encrypt_key", &hex::encode(self.encrypt_key))
            .field("attestation_key", &hex::encode(self.attestation_key))
            .finish()
    }
}

pub struct EncodedMessage {
    pub header: PacketHeader,
    pub application_payload: Vec<u8>,
}

impl SecureSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        peer_session_id: u16,
        peer_node_id: u64,
        keys: DerivedKeys,
        is_initiator: bool,
        supports_mrp: bool,
        session_type: SessionType,
        case_authenticated_tags: Vec<CaseAuthenticatedTag>,
        active_threshold: Duration,
        now: Instant,
        events: EventBus<SessionEvent>,
        reception_window_size: u32,
    ) -> Self {
        SecureSession {
            id,
            peer_session_id,
            peer_node_id,
            fabric: None,
            case_authenticated_tags,
            decrypt_key: keys.decrypt_key,
            encrypt_key: keys.encrypt_key,
            attestation_key: keys.attestation_key,
            is_initiator,
            supports_mrp,
            session_type,
            counter: MessageCounter::new(),
            reception: MessageReceptionState::with_window_size(reception_window_size),
            timestamp: now,
            active_timestamp: now,
            active_threshold,
            live_exchanges: HashSet::new(),
            lifecycle: Lifecycle::Open,
            is_peer_lost: false,
            graceful_close_emitted: false,
            events,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_node_id(&self) -> u64 {
        self.peer_node_id
    }

    pub fn case_authenticated_tags(&self) -> &[CaseAuthenticatedTag] {
        &self.case_authenticated_tags
    }

    pub fn attestation_key(&self) -> &AeadKey {
        &self.attestation_key
    }

    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    pub fn supports_mrp(&self) -> bool {
        self.supports_mrp
    }

    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    pub fn fabric(&self) -> Option<&Fabric> {
        self.fabric.as_ref()
    }

    /// Set the fabric this session belongs to. Settable exactly once.
    pub fn set_fabric(&mut self, fabric: Fabric) -> Result<()> {
        if self.fabric.is_some() {
            return Err(Error::InternalError("session fabric is already set"));
        }
        self.fabric = Some(fabric);
        Ok(())
    }

    pub fn is_closing(&self) -> bool {
        !matches!(self.lifecycle, Lifecycle::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Closed)
    }

    pub fn is_peer_lost(&self) -> bool {
        self.is_peer_lost
    }

    /// True iff a message has been received within `active_threshold`.
    pub fn is_peer_active(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.active_timestamp) < self.active_threshold
    }

    pub fn last_activity(&self) -> Instant {
        self.timestamp
    }

    /// Register a live exchange. Rejected once the session has started
    /// closing.
    pub fn add_exchange(&mut self, exchange: ExchangeId) -> Result<()> {
        if self.is_closing() {
            return Err(Error::SessionClosed);
        }
        self.live_exchanges.insert(exchange);
        Ok(())
    }

    pub fn live_exchange_count(&self) -> usize {
        self.live_exchanges.len()
    }

    /// Remove `exchange` from the live set. If the session is in
    /// `DeferredClose` and this was the last exchange, completes the
    /// close.
    pub fn remove_exchange(&mut self, exchange: ExchangeId) {
        self.live_exchanges.remove(&exchange);
        if self.lifecycle == Lifecycle::DeferredClose && self.live_exchanges.is_empty() {
            self.finalize_close(true);
        }
    }

    /// Begin a graceful close. Idempotent: only the first call has any
    /// effect or emits `closing`. If `deferred` and exchanges are still
    /// live, the session parks in `DeferredClose` until the last exchange
    /// closes (see `remove_exchange`).
    pub fn initiate_close(&mut self, deferred: bool) {
        if self.is_closing() {
            return;
        }
        self.lifecycle = Lifecycle::Closing;
        self.events.emit(SessionEvent::Closing(self.id));
        if deferred && !self.live_exchanges.is_empty() {
            self.lifecycle = Lifecycle::DeferredClose;
            return;
        }
        self.finalize_close(true);
    }

    /// Close immediately, closing every live exchange except `except` (if
    /// any are reserved by the caller) and marking the peer as lost.
    /// Never emits `graceful_close`: a forced close is not a clean
    /// handshake-ending exchange with the peer.
    pub fn initiate_force_close(&mut self, except: Option<ExchangeId>) {
        if self.is_closed() {
            return;
        }
        self.is_peer_lost = true;
        if self.lifecycle == Lifecycle::Open {
            self.events.emit(SessionEvent::Closing(self.id));
        }
        self.lifecycle = Lifecycle::Closing;
        let to_drop: Vec<ExchangeId> = self
            .live_exchanges
            .iter()
            .copied()
            .filter(|id| Some(*id) != except)
            .collect();
        for id in to_drop {
            self.live_exchanges.remove(&id);
        }
        self.finalize_close(false);
    }

    /// The peer closed its side of the session first: mark it lost, fire
    /// `closed_by_peer`, and force-close without sending a close
    /// notification back to a peer that has already gone.
    pub fn handle_peer_close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.is_peer_lost = true;
        self.events.emit(SessionEvent::ClosedByPeer(self.id));
        self.initiate_force_close(None);
    }

    fn finalize_close(&mut self, graceful: bool) {
        self.lifecycle = Lifecycle::Closed;
        if graceful && !self.graceful_close_emitted {
            self.graceful_close_emitted = true;
            self.events.emit(SessionEvent::GracefulClose(self.id));
        }
    }

    fn local_node_id(&self) -> u64 {
        self.fabric
            .as_ref()
            .map(|f| f.local_node_id)
            .unwrap_or(UNSPECIFIED_NODE_ID)
    }

    /// Hand out the counter for the next outgoing message, updating
    /// activity tracking. If the counter has reached its pre-rollover
    /// threshold, the session initiates a deferred graceful close instead
    /// of minting a value that would require wraparound: the caller must
    /// not send.
    fn record_send(&mut self, now: Instant) -> Result<u32> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        if self.counter.is_at_rollover_threshold() {
            warn!(session = ?self.id, "send counter at rollover threshold, closing session");
            self.initiate_close(true);
            return Err(Error::SessionClosed);
        }
        let value = self.counter.get_incremented_counter();
        self.timestamp = now;
        Ok(value)
    }

    fn record_receive(&mut self, now: Instant, counter: u32) -> Result<()> {
        self.timestamp = now;
        self.active_timestamp = now;
        if !self.reception.accept(counter) {
            return Err(Error::DecodeFailed("replayed or out-of-window counter"));
        }
        Ok(())
    }

    /// Encode a plaintext application payload into an encrypted message.
    /// Sets `header.session_id` to the peer's session id and
    /// `header.message_id` to the freshly issued send counter.
    pub async fn encode(
        &mut self,
        crypto: &dyn CryptoProvider,
        mut header: PacketHeader,
        plaintext_payload: &[u8],
        now: Instant,
    ) -> Result<EncodedMessage> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        header.session_id = self.peer_session_id;
        let message_id = self.record_send(now)?;
        header.message_id = message_id;

        let header_bytes = peer_fabric::wire::header_bytes(&header);
        let security_flags = peer_fabric::wire::security_flags_byte(&header_bytes);
        let source_node_id = self.local_node_id();
        let nonce = derive_nonce(security_flags, header.message_id, source_node_id);

        trace!(session = ?self.id, message_id, "encoding secure message");
        let application_payload = crypto
            .aead_encrypt(&self.encrypt_key, &nonce, &header_bytes, plaintext_payload)
            .await?;

        Ok(EncodedMessage {
            header,
            application_payload,
        })
    }

    /// Decode a received packet. `header_bytes` is the raw header used as
    /// AAD; unknown message-extension flags are tolerated by the wire
    /// layer's `from_bits_truncate` and never abort the session.
    pub async fn decode(
        &mut self,
        crypto: &dyn CryptoProvider,
        header: &PacketHeader,
        header_bytes: &[u8],
        application_payload: &[u8],
        now: Instant,
    ) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let security_flags = peer_fabric::wire::security_flags_byte(header_bytes);
        let nonce = derive_nonce(security_flags, header.message_id, self.peer_node_id);

        let plaintext = crypto
            .aead_decrypt(&self.decrypt_key, &nonce, header_bytes, application_payload)
            .await?;

        self.record_receive(now, header.message_id)?;
        debug!(session = ?self.id, message_id = header.message_id, "decoded secure message");
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::RECEPTION_WINDOW_SIZE;
    use crate::testing::mock_crypto::MockCrypto;

    fn test_keys() -> DerivedKeys {
        DerivedKeys {
            decrypt_key: [1; 16],
            encrypt_key: [2; 16],
            attestation_key: [3; 16],
        }
    }

    fn test_session(events: EventBus<SessionEvent>) -> SecureSession {
        SecureSession::new(
            SessionId(1),
            2,
            0xBEEF,
            test_keys(),
            true,
            true,
            SessionType::Unicast,
            vec![],
            Duration::from_secs(4),
            Instant::now(),
            events,
            RECEPTION_WINDOW_SIZE,
        )
    }

    #[test]
    fn fabric_is_settable_exactly_once() {
        let mut session = test_session(EventBus::default());
        let fabric = Fabric {
            index: 1,
            local_node_id: 7,
            root_public_key: vec![],
        };
        assert!(session.set_fabric(fabric.clone()).is_ok());
        assert!(session.set_fabric(fabric).is_err());
    }

    #[test]
    fn deferred_close_waits_for_every_exchange() {
        let bus: EventBus<SessionEvent> = EventBus::default();
        let mut rx = bus.subscribe();
        let mut session = test_session(bus);
        session.add_exchange(1).unwrap();
        session.add_exchange(2).unwrap();

        session.initiate_close(true);
        assert!(!session.is_closed());

        session.remove_exchange(1);
        assert!(!session.is_closed());

        session.remove_exchange(2);
        assert!(session.is_closed());

        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Closing(_)));
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::GracefulClose(_)));
    }

    #[test]
    fn close_is_idempotent_and_fires_graceful_close_once() {
        let bus: EventBus<SessionEvent> = EventBus::default();
        let mut rx = bus.subscribe();
        let mut session = test_session(bus);

        session.initiate_close(false);
        session.initiate_close(false);
        session.initiate_close(false);

        let mut graceful_closes = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::GracefulClose(_)) {
                graceful_closes += 1;
            }
        }
        assert_eq!(graceful_closes, 1);
    }

    #[test]
    fn new_exchanges_are_rejected_once_closing() {
        let mut session = test_session(EventBus::default());
        session.initiate_close(false);
        assert!(matches!(session.add_exchange(1), Err(Error::SessionClosed)));
    }

    #[test]
    fn peer_close_does_not_emit_graceful_close() {
        let bus: EventBus<SessionEvent> = EventBus::default();
        let mut rx = bus.subscribe();
        let mut session = test_session(bus);
        session.handle_peer_close();

        assert!(session.is_closed());
        assert!(session.is_peer_lost());
        let mut saw_graceful_close = false;
        let mut saw_closed_by_peer = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                SessionEvent::GracefulClose(_) => saw_graceful_close = true,
                SessionEvent::ClosedByPeer(_) => saw_closed_by_peer = true,
                SessionEvent::Closing(_) => {}
            }
        }
        assert!(saw_closed_by_peer);
        assert!(!saw_graceful_close);
    }

    #[test]
    fn force_close_reserves_the_excepted_exchange_from_closure_but_still_closes() {
        let mut session = test_session(EventBus::default());
        session.add_exchange(1).unwrap();
        session.add_exchange(2).unwrap();
        session.initiate_force_close(Some(1));
        assert!(session.is_closed());
        // The session itself is fully closed regardless of `except`; the
        // parameter only tells the caller which exchange it must finish
        // tearing down itself, since the session no longer will.
        assert_eq!(session.live_exchange_count(), 0);
    }

    #[tokio::test]
    async fn encode_then_decode_round_trips() {
        let mut initiator = test_session(EventBus::default());
        let mut responder = SecureSession::new(
            SessionId(2),
            1,
            0,
            DerivedKeys {
                decrypt_key: [2; 16],
                encrypt_key: [1; 16],
                attestation_key: [3; 16],
            },
            false,
            true,
            SessionType::Unicast,
            vec![],
            Duration::from_secs(4),
            Instant::now(),
            EventBus::default(),
            RECEPTION_WINDOW_SIZE,
        );

        let crypto = MockCrypto::new();
        let header = PacketHeader::new(0, 0);
        let encoded = initiator
            .encode(&crypto, header, b"hello", Instant::now())
            .await
            .unwrap();

        let header_bytes = peer_fabric::wire::header_bytes(&encoded.header);
        let decoded = responder
            .decode(
                &crypto,
                &encoded.header,
                &header_bytes,
                &encoded.application_payload,
                Instant::now(),
            )
            .await
            .unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[tokio::test]
    async fn a_replayed_counter_fails_decode_without_closing_the_session() {
        let mut initiator = test_session(EventBus::default());
        let mut responder = SecureSession::new(
            SessionId(2),
            1,
            0,
            DerivedKeys {
                decrypt_key: [2; 16],
                encrypt_key: [1; 16],
                attestation_key: [3; 16],
            },
            false,
            true,
            SessionType::Unicast,
            vec![],
            Duration::from_secs(4),
            Instant::now(),
            EventBus::default(),
            RECEPTION_WINDOW_SIZE,
        );
        let crypto = MockCrypto::new();

        let encoded = initiator
            .encode(&crypto, PacketHeader::new(0, 0), b"one", Instant::now())
            .await
            .unwrap();
        let header_bytes = peer_fabric::wire::header_bytes(&encoded.header);
        responder
            .decode(&crypto, &encoded.header, &header_bytes, &encoded.application_payload, Instant::now())
            .await
            .unwrap();

        let replayed = responder
            .decode(&crypto, &encoded.header, &header_bytes, &encoded.application_payload, Instant::now())
            .await;
        assert!(matches!(replayed, Err(Error::DecodeFailed(_))));
        assert!(!responder.is_closed());
    }
}
