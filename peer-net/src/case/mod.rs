//! The CASE client: drives certificate-authenticated session establishment
//! on an unsecured channel and returns a `SecureSession` (§4.3).
//!
//! The signed-public-key exchange itself is out of this crate's scope (the
//! certificate and attestation data model lives with the fabric provider);
//! this module only handles the shape of that exchange needed to get to the
//! HKDF split, plus the resumption/trust-root retry policy.

use tracing::{debug, trace, Instrument};

use peer_fabric::{CaseAuthenticatedTag, PeerDataHandle, SessionParameters, SupportedTransports};

use crate::crypto::CryptoProvider;
use crate::error::{Error, Result};
use crate::fabric::Fabric;
use crate::session::manager::{ResumptionRecord, SessionManager, SharedSession};
use crate::session::secure_session::{DerivedKeys, SecureSession, SessionId, SessionType};
use crate::store::PeerDataStore;
use crate::transport::Channel;

struct Hello {
    session_id: u16,
    public_key: Vec<u8>,
    fabric_root_public_key: Vec<u8>,
    signature: Vec<u8>,
    session_parameters: SessionParameters,
}

fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_u16(buf, bytes.len() as u16);
    buf.extend_from_slice(bytes);
}

fn read_u16(bytes: &[u8], pos: &mut usize) -> Result<u16> {
    let slice = bytes
        .get(*pos..*pos + 2)
        .ok_or(Error::DecodeFailed("truncated CASE hello"))?;
    *pos += 2;
    Ok(u16::from_le_bytes([slice[0], slice[1]]))
}
fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let slice = bytes
        .get(*pos..*pos + 4)
        .ok_or(Error::DecodeFailed("truncated CASE hello"))?;
    *pos += 4;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}
fn read_bytes(bytes: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = read_u16(bytes, pos)? as usize;
    let slice = bytes
        .get(*pos..*pos + len)
        .ok_or(Error::DecodeFailed("truncated CASE hello"))?;
    *pos += len;
    Ok(slice.to_vec())
}

impl Hello {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u16(&mut buf, self.session_id);
        write_bytes(&mut buf, &self.public_key);
        write_bytes(&mut buf, &self.fabric_root_public_key);
        write_bytes(&mut buf, &self.signature);
        let p = &self.session_parameters;
        write_u32(&mut buf, p.idle_interval.as_millis() as u32);
        write_u32(&mut buf, p.active_interval.as_millis() as u32);
        write_u32(&mut buf, p.active_threshold.as_millis() as u32);
        write_u16(&mut buf, p.data_model_revision);
        write_u16(&mut buf, p.interaction_model_revision);
        write_u32(&mut buf, p.specification_version);
        write_u16(&mut buf, p.max_paths_per_invoke);
        buf.push(p.supported_transports.bits());
        write_u32(&mut buf, p.max_tcp_message_size);
        buf
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let session_id = read_u16(bytes, &mut pos)?;
        let public_key = read_bytes(bytes, &mut pos)?;
        let fabric_root_public_key = read_bytes(bytes, &mut pos)?;
        let signature = read_bytes(bytes, &mut pos)?;
        let idle_interval = std::time::Duration::from_millis(read_u32(bytes, &mut pos)? as u64);
        let active_interval = std::time::Duration::from_millis(read_u32(bytes, &mut pos)? as u64);
        let active_threshold = std::time::Duration::from_millis(read_u32(bytes, &mut pos)? as u64);
        let data_model_revision = read_u16(bytes, &mut pos)?;
        let interaction_model_revision = read_u16(bytes, &mut pos)?;
        let specification_version = read_u32(bytes, &mut pos)?;
        let max_paths_per_invoke = read_u16(bytes, &mut pos)?;
        let supported_transports = SupportedTransports::from_bits_truncate(
            *bytes.get(pos).ok_or(Error::DecodeFailed("truncated CASE hello"))?,
        );
        pos += 1;
        let max_tcp_message_size = read_u32(bytes, &mut pos)?;
        Ok(Hello {
            session_id,
            public_key,
            fabric_root_public_key,
            signature,
            session_parameters: SessionParameters {
                idle_interval,
                active_interval,
                active_threshold,
                data_model_revision,
                interaction_model_revision,
                specification_version,
                max_paths_per_invoke,
                supported_transports,
                max_tcp_message_size,
            },
        })
    }
}

/// A local ECDH key pair and the certified public key bytes a peer will
/// verify a signature against.
pub struct LocalIdentity<'a> {
    pub private_key: &'a [u8],
    pub public_key: &'a [u8],
}

pub struct CaseClient<'a> {
    crypto: &'a dyn CryptoProvider,
    reception_window_size: u32,
}

impl<'a> CaseClient<'a> {
    pub fn new(crypto: &'a dyn CryptoProvider) -> Self {
        CaseClient {
            crypto,
            reception_window_size: crate::constants::RECEPTION_WINDOW_SIZE,
        }
    }

    /// Override the reception window width sessions this client derives
    /// are built with (`PeerSetConfig::reception_window_size`).
    pub fn with_reception_window_size(mut self, reception_window_size: u32) -> Self {
        self.reception_window_size = reception_window_size;
        self
    }

    /// Drive the CASE exchange for `address` over `channel` and install the
    /// resulting session with `manager`. On `NoSharedTrustRoots`, deletes
    /// any resumption record and retries exactly once without resumption.
    #[allow(clippy::too_many_arguments)]
    pub async fn establish(
        &self,
        address: peer_fabric::PeerAddress,
        channel: &dyn Channel,
        fabric: &Fabric,
        identity: &LocalIdentity<'_>,
        is_initiator: bool,
        session_parameters: SessionParameters,
        case_authenticated_tags: Vec<CaseAuthenticatedTag>,
        manager: &dyn SessionManager,
        data_store: Option<&dyn PeerDataStore>,
        data_handle: Option<PeerDataHandle>,
    ) -> Result<SharedSession> {
        let span = tracing::debug_span!("case", %address, %is_initiator);
        let resumption = manager.find_resumption_record_by_address(address);
        trace!(parent: &span, resuming = resumption.is_some(), "starting CASE handshake");
        let first = self
            .attempt(
                address,
                channel,
                fabric,
                identity,
                is_initiator,
                &session_parameters,
                &case_authenticated_tags,
                manager,
                resumption.clone(),
                data_store,
                data_handle,
            )
            .instrument(span.clone())
            .await;

        match first {
            Err(Error::NoSharedTrustRoots(_)) => {
                debug!(parent: &span, "trust root mismatch, dropping resumption and retrying once");
                manager.delete_resumption_record(address);
                self.attempt(
                    address,
                    channel,
                    fabric,
                    identity,
                    is_initiator,
                    &session_parameters,
                    &case_authenticated_tags,
                    manager,
                    None,
                    data_store,
                    data_handle,
                )
                .instrument(span.clone())
                .await
            }
            other => other,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        address: peer_fabric::PeerAddress,
        channel: &dyn Channel,
        fabric: &Fabric,
        identity: &LocalIdentity<'_>,
        is_initiator: bool,
        session_parameters: &SessionParameters,
        case_authenticated_tags: &[CaseAuthenticatedTag],
        manager: &dyn SessionManager,
        resumption: Option<ResumptionRecord>,
        data_store: Option<&dyn PeerDataStore>,
        data_handle: Option<PeerDataHandle>,
    ) -> Result<SharedSession> {
        let own_session_id = manager.next_session_id();
        let hello = Hello {
            session_id: own_session_id.0,
            public_key: identity.public_key.to_vec(),
            fabric_root_public_key: fabric.root_public_key.clone(),
            signature: b"hello-signature".to_vec(),
            session_parameters: *session_parameters,
        };
        channel
            .send(&hello.encode())
            .await
            .map_err(|e| Error::Transport(Box::new(e)))?;

        let peer_bytes = channel.recv().await?;
        let peer_hello = Hello::decode(&peer_bytes)?;

        self.crypto
            .verify_signature(
                &peer_hello.fabric_root_public_key,
                &peer_bytes[..peer_bytes.len() - peer_hello.signature.len()],
                &peer_hello.signature,
            )
            .await
            .map_err(|_| Error::NoSharedTrustRoots(address))?;

        if peer_hello.fabric_root_public_key != fabric.root_public_key {
            return Err(Error::NoSharedTrustRoots(address));
        }

        let (shared_secret, salt, info): (Vec<u8>, Vec<u8>, &[u8]) = match &resumption {
            Some(record) => (
                record.shared_secret.clone(),
                peer_hello.session_id.to_le_bytes().to_vec(),
                crate::constants::SESSION_RESUMPTION_KEYS_INFO,
            ),
            None => {
                let secret = self
                    .crypto
                    .ecdh(identity.private_key, &peer_hello.public_key)
                    .await?;
                let mut salt = own_session_id.0.to_le_bytes().to_vec();
                salt.extend_from_slice(&peer_hello.session_id.to_le_bytes());
                (secret, salt, crate::constants::SESSION_KEYS_INFO)
            }
        };

        let derived = self
            .crypto
            .hkdf(&shared_secret, &salt, info, crate::constants::SESSION_KEY_DERIVATION_LENGTH)
            .await?;

        let (encrypt_key, decrypt_key) = if is_initiator {
            (derived[0..16].try_into().unwrap(), derived[16..32].try_into().unwrap())
        } else {
            (derived[16..32].try_into().unwrap(), derived[0..16].try_into().unwrap())
        };
        let keys = DerivedKeys {
            decrypt_key,
            encrypt_key,
            attestation_key: derived[32..48].try_into().unwrap(),
        };

        let merged_parameters = session_parameters.merge_monotonic(peer_hello.session_parameters);
        let mut session = SecureSession::new(
            own_session_id,
            peer_hello.session_id,
            fabric.local_node_id,
            keys,
            is_initiator,
            merged_parameters
                .supported_transports
                .contains(SupportedTransports::MRP),
            SessionType::Unicast,
            case_authenticated_tags.to_vec(),
            merged_parameters.active_threshold,
            std::time::Instant::now(),
            crate::events::EventBus::default(),
            self.reception_window_size,
        );
        session.set_fabric(fabric.clone())?;
        debug!(%address, session_id = own_session_id.0, resumed = resumption.is_some(), "CASE session derived");

        let installed = manager.add_session(address, session);

        if resumption.is_none() {
            manager.store_resumption_record(ResumptionRecord {
                peer_address: address,
                session_parameters: merged_parameters,
                shared_secret,
            });

            if let (Some(store), Some(handle)) = (data_store, data_handle) {
                if let Err(error) = store.purge(handle).await {
                    tracing::warn!(%address, %error, "failed to purge per-peer data cache after a fresh CASE session");
                }
            }
        }

        Ok(installed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::manager::InMemorySessionManager;
    use crate::testing::{MockCrypto, MockFabricProvider, MockNetwork};
    use crate::transport::TransportSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    fn addr(port: u16) -> peer_fabric::OperationalAddress {
        peer_fabric::OperationalAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), port)
    }

    fn test_fabric() -> Fabric {
        Fabric {
            index: 1,
            local_node_id: 0xDEAD,
            root_public_key: vec![9, 9, 9],
        }
    }

    #[tokio::test]
    async fn initiator_and_responder_derive_matching_keys() {
        let network = MockNetwork::new();
        let initiator_transport = network.transport(addr(1));
        let responder_transport = network.transport(addr(2));
        let initiator_channel = initiator_transport.channel_for(addr(2)).await.unwrap();
        let responder_channel = responder_transport.channel_for(addr(1)).await.unwrap();

        let crypto = MockCrypto::new();
        let fabric = test_fabric();
        let fabric_provider = MockFabricProvider::new().with_fabric(fabric.clone());

        let initiator_manager = InMemorySessionManager::new(Arc::new(
            MockFabricProvider::new().with_fabric(fabric.clone()),
        ));
        let responder_manager = InMemorySessionManager::new(Arc::new(fabric_provider));

        let initiator_identity = LocalIdentity {
            private_key: b"initiator-priv",
            public_key: b"initiator-pub",
        };
        let responder_identity = LocalIdentity {
            private_key: b"responder-priv",
            public_key: b"responder-pub",
        };

        let initiator_client = CaseClient::new(&crypto);
        let responder_client = CaseClient::new(&crypto);

        let responder_address = peer_fabric::PeerAddress::new(1, 0xDEAD);
        let initiator_address = peer_fabric::PeerAddress::new(1, 0xBEEF);

        let data_store = crate::testing::InMemoryPeerDataStore::new();
        let data_handle = peer_fabric::PeerDataHandle(42);

        let (initiator_result, responder_result) = tokio::join!(
            initiator_client.establish(
                responder_address,
                initiator_channel.as_ref(),
                &fabric,
                &initiator_identity,
                true,
                SessionParameters::default(),
                vec![],
                &initiator_manager,
                Some(&data_store as &dyn crate::store::PeerDataStore),
                Some(data_handle),
            ),
            responder_client.establish(
                initiator_address,
                responder_channel.as_ref(),
                &fabric,
                &responder_identity,
                false,
                SessionParameters::default(),
                vec![],
                &responder_manager,
                None,
                None,
            )
        );

        let initiator_session = initiator_result.unwrap();
        let responder_session = responder_result.unwrap();

        assert_eq!(
            initiator_session.lock().unwrap().attestation_key(),
            responder_session.lock().unwrap().attestation_key()
        );
        assert!(
            data_store.was_purged(data_handle),
            "a fresh, non-resumed session must purge any stale per-peer data cache"
        );
    }

    /// A channel with no live peer on the other end: `send` is a no-op,
    /// `recv` hands back pre-scripted bytes in order. Lets a trust-root
    /// retry be driven deterministically without two synchronized
    /// endpoints.
    struct ScriptedChannel {
        remote: peer_fabric::OperationalAddress,
        inbound: std::sync::Mutex<std::collections::VecDeque<Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl crate::transport::Channel for ScriptedChannel {
        async fn send(&self, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn recv(&self) -> Result<Vec<u8>> {
            self.inbound
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Transport("scripted channel exhausted".into()))
        }

        fn remote_address(&self) -> peer_fabric::OperationalAddress {
            self.remote
        }
    }

    fn hello_bytes(root_key: Vec<u8>, session_id: u16) -> Vec<u8> {
        Hello {
            session_id,
            public_key: b"peer-pub".to_vec(),
            fabric_root_public_key: root_key,
            signature: b"valid".to_vec(),
            session_parameters: SessionParameters::default(),
        }
        .encode()
    }

    #[tokio::test]
    async fn a_trust_root_mismatch_drops_resumption_and_retries_once() {
        let crypto = MockCrypto::new();
        let fabric = test_fabric();
        let manager = InMemorySessionManager::new(Arc::new(
            MockFabricProvider::new().with_fabric(fabric.clone()),
        ));
        let address = peer_fabric::PeerAddress::new(1, 0xBEEF);

        manager.store_resumption_record(ResumptionRecord {
            peer_address: address,
            session_parameters: SessionParameters::default(),
            shared_secret: vec![1, 2, 3, 4],
        });

        let channel = ScriptedChannel {
            remote: addr(2),
            inbound: std::sync::Mutex::new(std::collections::VecDeque::from(vec![
                hello_bytes(vec![0xFF, 0xFF, 0xFF], 10),
                hello_bytes(fabric.root_public_key.clone(), 11),
            ])),
        };
        let identity = LocalIdentity {
            private_key: b"initiator-priv",
            public_key: b"initiator-pub",
        };

        let result = CaseClient::new(&crypto)
            .establish(
                address,
                &channel,
                &fabric,
                &identity,
                true,
                SessionParameters::default(),
                vec![],
                &manager,
                None,
                None,
            )
            .await;

        assert!(result.is_ok(), "retry without resumption should succeed: {result:?}");
        assert!(manager.find_resumption_record_by_address(address).is_some());
    }
}
