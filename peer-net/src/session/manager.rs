//! The session manager boundary (§4.6): the interface the rest of the core
//! consumes, plus an in-memory reference implementation so the CASE client
//! and peer set have something concrete to run against in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use peer_fabric::{PeerAddress, SessionParameters};

use crate::crypto::CryptoProvider;
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::fabric::{Fabric, FabricProvider};
use crate::session::secure_session::{DerivedKeys, SecureSession, SessionId, SessionType};
use crate::transport::{Channel, TransportSet};

const GROUP_KEY_INFO: &[u8] = b"GroupKeys";

/// A pre-CASE channel plus the parameters negotiated for it, handed to the
/// CASE client to drive the exchange over.
pub struct UnsecuredSession {
    pub channel: Box<dyn Channel>,
    pub session_parameters: SessionParameters,
    pub is_initiator: bool,
}

/// Cached CASE state enabling the resumption HKDF path and a shorter
/// handshake. Bound to an address; deleted on `NoSharedTrustRoots`.
#[derive(Clone)]
pub struct ResumptionRecord {
    pub peer_address: PeerAddress,
    pub session_parameters: SessionParameters,
    pub shared_secret: Vec<u8>,
}

/// One emission of the `retry` observable: `(session, attempt_count)`,
/// with the owning address threaded through so the peer set can act on it
/// without a second lookup.
#[derive(Clone, Debug)]
pub struct RetryEvent {
    pub address: PeerAddress,
    pub session_id: SessionId,
    pub attempt: u32,
}

pub type SharedSession = Arc<Mutex<SecureSession>>;

/// The interface the peer set, CASE client, and exchange providers consume.
/// A concrete implementation owns the live sessions, the resumption
/// records, and the retry signal.
#[async_trait::async_trait]
pub trait SessionManager: Send + Sync {
    fn fabric_for(&self, address: PeerAddress) -> Result<Fabric>;

    /// Wrap a freshly opened channel and its negotiated parameters for the
    /// CASE client to drive the exchange over. Used by CASE pairing.
    fn create_unsecured_session(
        &self,
        channel: Box<dyn Channel>,
        session_parameters: SessionParameters,
        is_initiator: bool,
    ) -> UnsecuredSession;

    /// Open the group's multicast channel and install (or return the
    /// existing) group session for `address`.
    async fn group_session_for_address(
        &self,
        address: PeerAddress,
        transports: &dyn TransportSet,
        crypto: &dyn CryptoProvider,
    ) -> Result<SharedSession>;

    /// Install a freshly derived session for `address`, replacing any
    /// previous one.
    fn add_session(&self, address: PeerAddress, session: SecureSession) -> SharedSession;

    fn maybe_session_for(&self, address: PeerAddress) -> Option<SharedSession>;

    /// Remove every session for `address`. Idempotent. `since` is accepted
    /// for API parity with the source (removing only sessions active since
    /// a given instant); this implementation purges unconditionally, which
    /// is always a valid (if coarser) interpretation of "since".
    fn handle_peer_loss(&self, address: PeerAddress, since: Option<Instant>);

    fn delete_resumption_record(&self, address: PeerAddress) -> bool;

    fn find_resumption_record_by_address(&self, address: PeerAddress) -> Option<ResumptionRecord>;

    fn store_resumption_record(&self, record: ResumptionRecord);

    fn report_retry(&self, address: PeerAddress, session_id: SessionId, attempt: u32);

    fn subscribe_retry(&self) -> tokio::sync::broadcast::Receiver<RetryEvent>;

    /// Allocate the next locally-unique session id this manager will hand
    /// to a newly derived `SecureSession`.
    fn next_session_id(&self) -> SessionId;
}

pub struct InMemorySessionManager {
    fabrics: Arc<dyn FabricProvider>,
    sessions: Mutex<HashMap<PeerAddress, SharedSession>>,
    group_sessions: Mutex<HashMap<PeerAddress, SharedSession>>,
    resumption: Mutex<HashMap<PeerAddress, ResumptionRecord>>,
    retry_bus: EventBus<RetryEvent>,
    session_events: EventBus<SessionEvent>,
    next_session_id: std::sync::atomic::AtomicU16,
    reception_window_size: u32,
}

impl InMemorySessionManager {
    pub fn new(fabrics: Arc<dyn FabricProvider>) -> Self {
        InMemorySessionManager {
            fabrics,
            sessions: Mutex::new(HashMap::new()),
            group_sessions: Mutex::new(HashMap::new()),
            resumption: Mutex::new(HashMap::new()),
            retry_bus: EventBus::default(),
            session_events: EventBus::default(),
            next_session_id: std::sync::atomic::AtomicU16::new(1),
            reception_window_size: crate::constants::RECEPTION_WINDOW_SIZE,
        }
    }

    /// Override the reception window width group sessions are built with
    /// (`PeerSetConfig::reception_window_size`). Must not exceed 32.
    pub fn with_reception_window_size(mut self, reception_window_size: u32) -> Self {
        self.reception_window_size = reception_window_size;
        self
    }

    /// The bus new sessions should be constructed with, so their
    /// `closing`/`graceful_close`/`closed_by_peer` events reach this
    /// manager's subscribers.
    pub fn session_event_bus(&self) -> EventBus<SessionEvent> {
        self.session_events.clone()
    }

    pub fn subscribe_session_events(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.session_events.subscribe()
    }

    /// Remove every session whose manager-known address is `address`,
    /// regardless of a requested `since` timestamp semantics (see
    /// `handle_peer_loss` doc comment).
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl SessionManager for InMemorySessionManager {
    fn fabric_for(&self, address: PeerAddress) -> Result<Fabric> {
        self.fabrics.fabric_for(address)
    }

    fn create_unsecured_session(
        &self,
        channel: Box<dyn Channel>,
        session_parameters: SessionParameters,
        is_initiator: bool,
    ) -> UnsecuredSession {
        UnsecuredSession {
            channel,
            session_parameters,
            is_initiator,
        }
    }

    /// Groups have no per-pair CASE handshake: every member derives the
    /// same keys from the fabric's root key material, so a second caller
    /// for the same address reuses the first caller's session instead of
    /// re-deriving it.
    async fn group_session_for_address(
        &self,
        address: PeerAddress,
        transports: &dyn TransportSet,
        crypto: &dyn CryptoProvider,
    ) -> Result<SharedSession> {
        if let Some(existing) = self.group_sessions.lock().unwrap().get(&address).cloned() {
            return Ok(existing);
        }

        let fabric = self.fabrics.fabric_for(address)?;
        let channel = transports
            .group_channel_for(peer_fabric::OperationalAddress::new(
                std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
                5540,
            ))
            .await?;
        let _ = channel; // retained for parity with a future multicast send path

        let derived = crypto
            .hkdf(
                &fabric.root_public_key,
                &address.node_id.to_le_bytes(),
                GROUP_KEY_INFO,
                crate::constants::SESSION_KEY_DERIVATION_LENGTH,
            )
            .await?;
        let keys = DerivedKeys {
            decrypt_key: derived[0..16].try_into().unwrap(),
            encrypt_key: derived[16..32].try_into().unwrap(),
            attestation_key: derived[32..48].try_into().unwrap(),
        };

        let session = SecureSession::new(
            self.next_session_id(),
            0,
            address.node_id,
            keys,
            true,
            false,
            SessionType::Group,
            vec![],
            Duration::from_millis(4000),
            Instant::now(),
            self.session_events.clone(),
            self.reception_window_size,
        );
        let shared = Arc::new(Mutex::new(session));
        self.group_sessions
            .lock()
            .unwrap()
            .insert(address, shared.clone());
        Ok(shared)
    }

    fn add_session(&self, address: PeerAddress, session: SecureSession) -> SharedSession {
        let shared = Arc::new(Mutex::new(session));
        self.sessions.lock().unwrap().insert(address, shared.clone());
        shared
    }

    fn maybe_session_for(&self, address: PeerAddress) -> Option<SharedSession> {
        self.sessions.lock().unwrap().get(&address).cloned()
    }

    fn handle_peer_loss(&self, address: PeerAddress, _since: Option<Instant>) {
        self.sessions.lock().unwrap().remove(&address);
    }

    fn delete_resumption_record(&self, address: PeerAddress) -> bool {
        self.resumption.lock().unwrap().remove(&address).is_some()
    }

    fn find_resumption_record_by_address(&self, address: PeerAddress) -> Option<ResumptionRecord> {
        self.resumption.lock().unwrap().get(&address).cloned()
    }

    fn store_resumption_record(&self, record: ResumptionRecord) {
        self.resumption
            .lock()
            .unwrap()
            .insert(record.peer_address, record);
    }

    fn report_retry(&self, address: PeerAddress, session_id: SessionId, attempt: u32) {
        self.retry_bus.emit(RetryEvent {
            address,
            session_id,
            attempt,
        });
    }

    fn subscribe_retry(&self) -> tokio::sync::broadcast::Receiver<RetryEvent> {
        self.retry_bus.subscribe()
    }

    fn next_session_id(&self) -> SessionId {
        SessionId(
            self.next_session_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFabricProvider;

    fn manager() -> InMemorySessionManager {
        InMemorySessionManager::new(Arc::new(MockFabricProvider::new()))
    }

    #[test]
    fn handle_peer_loss_is_idempotent() {
        let manager = manager();
        let address = PeerAddress::new(1, 2);
        manager.handle_peer_loss(address, None);
        manager.handle_peer_loss(address, None);
        assert!(manager.maybe_session_for(address).is_none());
    }

    #[test]
    fn resumption_records_round_trip() {
        let manager = manager();
        let address = PeerAddress::new(1, 2);
        assert!(manager.find_resumption_record_by_address(address).is_none());
        manager.store_resumption_record(ResumptionRecord {
            peer_address: address,
            session_parameters: SessionParameters::default(),
            shared_secret: vec![1, 2, 3],
        });
        assert!(manager.find_resumption_record_by_address(address).is_some());
        assert!(manager.delete_resumption_record(address));
        assert!(manager.find_resumption_record_by_address(address).is_none());
    }

    #[tokio::test]
    async fn retry_events_reach_subscribers() {
        let manager = manager();
        let mut rx = manager.subscribe_retry();
        manager.report_retry(PeerAddress::new(1, 2), SessionId(5), 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.attempt, 1);
    }
}
