//! The peer registry (§4.1): `connect`/`get`/`has`/`iter`/`disconnect`/
//! `forget`/`close`, wired to the discovery engine, the CASE client, the
//! session manager, and the persisted store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn, Instrument};

use peer_fabric::{
    CaseAuthenticatedTag, DiscoveryData, OperationalAddress, PeerAddress, PeerDataHandle,
    PeerDescriptor, SessionParameters,
};

use crate::case::{CaseClient, LocalIdentity};
use crate::config::PeerSetConfig;
use crate::crypto::CryptoProvider;
use crate::discovery::{
    polling_interval, retransmission_discovery_duration, DiscoveryKind, DiscoveryOutcome,
    DiscoveryOutcomeError, DiscoveryRegistry,
};
use crate::error::{Error, Result};
use crate::events::{EventBus, PeerSetEvent};
use crate::fabric::Fabric;
use crate::peer::Peer;
use crate::scanner::ScannerSet;
use crate::session::manager::{SessionManager, SharedSession};
use crate::store::{PeerDataStore, PeerStore};
use crate::transport::TransportSet;

/// What kind of discovery a `connect` call should run, plus any mDNS data
/// the caller already has in hand (e.g. from a commissioning flow).
pub struct DiscoveryOptions {
    pub kind: DiscoveryKind,
    pub data: Option<DiscoveryData>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        DiscoveryOptions {
            kind: DiscoveryKind::Full,
            data: None,
        }
    }
}

#[derive(Default)]
pub struct ConnectOptions {
    pub discovery: DiscoveryOptions,
    pub case_authenticated_tags: Vec<CaseAuthenticatedTag>,
    pub operational_address: Option<OperationalAddress>,
    pub allow_unknown_peer: bool,
}

/// Session parameters to offer during pairing: caller-supplied discovery
/// data seeds them (e.g. from a prior mDNS TXT lookup), falling back to
/// defaults otherwise. CASE negotiation still merges in whatever the peer
/// sends back (`merge_monotonic`).
fn session_parameters_for(options: &ConnectOptions) -> SessionParameters {
    match &options.discovery.data {
        Some(data) => SessionParameters::from_discovery_data(data),
        None => SessionParameters::default(),
    }
}

/// The registry of known peers plus the machinery to connect, discover, and
/// tear them down. One `PeerSet` is process-wide; construct with `Arc` if
/// retry-driven opportunistic discovery (`spawn_retry_listener`) is needed.
pub struct PeerSet {
    store: Arc<dyn PeerStore>,
    manager: Arc<dyn SessionManager>,
    transports: Arc<dyn TransportSet>,
    scanners: Arc<dyn ScannerSet>,
    crypto: Arc<dyn CryptoProvider>,
    local_private_key: Vec<u8>,
    local_public_key: Vec<u8>,
    peers: Mutex<HashMap<PeerAddress, Arc<Peer>>>,
    pending_connects: Mutex<HashMap<PeerAddress, broadcast::Sender<()>>>,
    discovery: DiscoveryRegistry,
    events: EventBus<PeerSetEvent>,
    data_store: Option<Arc<dyn PeerDataStore>>,
    config: PeerSetConfig,
}

impl PeerSet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PeerStore>,
        manager: Arc<dyn SessionManager>,
        transports: Arc<dyn TransportSet>,
        scanners: Arc<dyn ScannerSet>,
        crypto: Arc<dyn CryptoProvider>,
        local_private_key: Vec<u8>,
        local_public_key: Vec<u8>,
    ) -> Self {
        PeerSet {
            store,
            manager,
            transports,
            scanners,
            crypto,
            local_private_key,
            local_public_key,
            peers: Mutex::new(HashMap::new()),
            pending_connects: Mutex::new(HashMap::new()),
            discovery: DiscoveryRegistry::new(),
            events: EventBus::default(),
            data_store: None,
            config: PeerSetConfig::default(),
        }
    }

    /// Attach the host application's per-peer data cache, purged on every
    /// fresh (non-resumed) CASE session (§4.3 step 5). Optional: a peer set
    /// with none configured simply never purges.
    pub fn with_data_store(mut self, data_store: Arc<dyn PeerDataStore>) -> Self {
        self.data_store = Some(data_store);
        self
    }

    /// Override the default tuning (§10.3): polling interval, default
    /// discovery timeout, reception window size.
    pub fn with_config(mut self, config: PeerSetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PeerSetEvent> {
        self.events.subscribe()
    }

    /// Populate the in-memory registry from persisted records. Call once at
    /// startup, before serving any `connect` calls.
    pub async fn load_from_store(&self) -> Result<()> {
        for descriptor in self.store.list().await? {
            let address = descriptor.address();
            self.peers
                .lock()
                .unwrap()
                .entry(address)
                .or_insert_with(|| Arc::new(Peer::new(descriptor)));
        }
        Ok(())
    }

    pub fn has(&self, address: PeerAddress) -> bool {
        self.peers.lock().unwrap().contains_key(&address)
    }

    pub fn get(&self, address: PeerAddress) -> Option<PeerDescriptor> {
        self.peers
            .lock()
            .unwrap()
            .get(&address)
            .map(|peer| peer.descriptor())
    }

    pub fn iter(&self) -> Vec<PeerDescriptor> {
        self.peers
            .lock()
            .unwrap()
            .values()
            .map(|peer| peer.descriptor())
            .collect()
    }

    pub fn session_for(&self, address: PeerAddress) -> Option<SharedSession> {
        self.manager.maybe_session_for(address)
    }

    pub fn has_operational_address(&self, address: PeerAddress) -> bool {
        self.peers
            .lock()
            .unwrap()
            .get(&address)
            .map(|peer| peer.descriptor().operational_address.is_some())
            .unwrap_or(false)
    }

    pub fn purge_sessions(&self, address: PeerAddress) {
        self.manager.handle_peer_loss(address, None);
    }

    /// Direct reconnect on the cached address, bounded by
    /// `expected_processing_time` (§4.5 step 2).
    pub async fn reconnect_known_address(
        &self,
        address: PeerAddress,
        expected_processing_time: std::time::Duration,
    ) -> Result<SharedSession> {
        let attempt = self.connect(
            address,
            ConnectOptions {
                discovery: DiscoveryOptions {
                    kind: DiscoveryKind::None,
                    data: None,
                },
                ..ConnectOptions::default()
            },
        );
        tokio::time::timeout(expected_processing_time, attempt)
            .await
            .unwrap_or(Err(Error::NoResponseTimeout(address)))
    }

    /// Resolve an exchange provider per §4.1: a concrete session is always
    /// `Dedicated`; a group address opens (or reuses) the group session and
    /// is also `Dedicated`, since a group has no reconnect protocol of its
    /// own; anything else is `Reconnectable`.
    pub async fn exchange_provider_for(
        self: &Arc<Self>,
        request: crate::exchange_provider::ExchangeProviderRequest,
    ) -> Result<crate::exchange_provider::ExchangeProvider> {
        use crate::exchange_provider::{DedicatedExchangeProvider, ExchangeProvider, ExchangeProviderRequest, ReconnectableExchangeProvider};

        match request {
            ExchangeProviderRequest::ForSession(session) => {
                let address = {
                    let guard = session.lock().unwrap();
                    let fabric_index = guard.fabric().map(|f| f.index).unwrap_or(0);
                    PeerAddress::new(fabric_index, guard.peer_node_id())
                };
                Ok(ExchangeProvider::Dedicated(DedicatedExchangeProvider::new(address, session)))
            }
            ExchangeProviderRequest::ForAddress(address) if address.is_group() => {
                let session = self
                    .manager
                    .group_session_for_address(address, self.transports.as_ref(), self.crypto.as_ref())
                    .await?;
                Ok(ExchangeProvider::Dedicated(DedicatedExchangeProvider::new(address, session)))
            }
            ExchangeProviderRequest::ForAddress(address) => {
                Ok(ExchangeProvider::Reconnectable(ReconnectableExchangeProvider::new(address, self.clone())))
            }
        }
    }

    /// Ensure there is an active secure session to `address`, discovering
    /// and pairing as needed. Two concurrent calls for the same address
    /// share one pending attempt and resolve with the same session (§8
    /// property 9).
    pub async fn connect(&self, address: PeerAddress, options: ConnectOptions) -> Result<SharedSession> {
        let span = tracing::info_span!("connect", %address);

        if matches!(options.discovery.kind, DiscoveryKind::Retransmission) {
            return Err(Error::ImplementationError(
                "Retransmission discovery may only be induced internally",
            ));
        }

        if let Some(session) = self.manager.maybe_session_for(address) {
            debug!(%address, "connect short-circuited on an already-live session");
            return Ok(session);
        }

        let join_rx = {
            let mut pending = self.pending_connects.lock().unwrap();
            if let Some(sender) = pending.get(&address) {
                Some(sender.subscribe())
            } else {
                let (tx, _rx) = broadcast::channel(1);
                pending.insert(address, tx);
                None
            }
        };

        if let Some(mut rx) = join_rx {
            debug!(%address, "joining an in-flight connect attempt");
            let _ = rx.recv().await;
            return self.manager.maybe_session_for(address).ok_or(Error::Discovery {
                address,
                reason: "a shared connect attempt did not produce a session",
            });
        }

        let result = self.connect_inner(address, options).instrument(span.clone()).await;

        if let Some(sender) = self.pending_connects.lock().unwrap().remove(&address) {
            let _ = sender.send(());
        }

        match &result {
            Ok(_) => info!(%address, "connect succeeded"),
            Err(error) => warn!(%address, %error, "connect failed"),
        }
        result
    }

    async fn connect_inner(&self, address: PeerAddress, options: ConnectOptions) -> Result<SharedSession> {
        let fabric = self.manager.fabric_for(address)?;
        let peer = self.peer_for(address, options.allow_unknown_peer)?;
        let session_parameters = session_parameters_for(&options);
        let data_handle = peer.descriptor().data_handle;

        let cached = peer.descriptor().operational_address;
        let direct_candidate = DiscoveryRegistry::select_candidate(
            options.operational_address,
            &options.discovery.kind,
            cached,
            None,
            None,
        );

        let higher_discovery_already_running = self
            .discovery
            .current_kind(address)
            .map(|running| running > options.discovery.kind)
            .unwrap_or(false);

        if let Some(candidate) = direct_candidate {
            if !higher_discovery_already_running {
                match self
                    .pair(
                        address,
                        candidate,
                        &fabric,
                        options.case_authenticated_tags.clone(),
                        session_parameters,
                        data_handle,
                    )
                    .await
                {
                    Ok(()) => {
                        debug!(%address, %candidate, "direct pairing succeeded");
                        return self
                            .finish_successful_connect(&peer, address, candidate, options.discovery.data.clone())
                            .await
                    }
                    Err(e) if matches!(options.discovery.kind, DiscoveryKind::None) => return Err(e),
                    Err(error) => {
                        debug!(%address, %candidate, %error, "direct pairing failed, falling back to discovery");
                    }
                }
            }
        } else if matches!(options.discovery.kind, DiscoveryKind::None) {
            return Err(Error::Discovery {
                address,
                reason: "unreachable",
            });
        }

        self.discover_and_pair(peer, address, fabric, options, direct_candidate).await
    }

    fn peer_for(&self, address: PeerAddress, allow_unknown_peer: bool) -> Result<Arc<Peer>> {
        let mut peers = self.peers.lock().unwrap();
        if let Some(peer) = peers.get(&address) {
            return Ok(peer.clone());
        }
        if !allow_unknown_peer {
            return Err(Error::UnknownNode(address));
        }
        let peer = Arc::new(Peer::new(PeerDescriptor::new(address)));
        peers.insert(address, peer.clone());
        Ok(peer)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pair(
        &self,
        address: PeerAddress,
        candidate: OperationalAddress,
        fabric: &Fabric,
        cats: Vec<CaseAuthenticatedTag>,
        session_parameters: SessionParameters,
        data_handle: Option<PeerDataHandle>,
    ) -> Result<()> {
        trace!(%address, %candidate, "dialing candidate");
        let channel = self.transports.channel_for(candidate).await?;
        let client = CaseClient::new(self.crypto.as_ref())
            .with_reception_window_size(self.config.reception_window_size);
        let identity = LocalIdentity {
            private_key: &self.local_private_key,
            public_key: &self.local_public_key,
        };
        client
            .establish(
                address,
                channel.as_ref(),
                fabric,
                &identity,
                true,
                session_parameters,
                cats,
                self.manager.as_ref(),
                self.data_store.as_deref(),
                data_handle,
            )
            .await?;
        Ok(())
    }

    /// Record the address, refresh `discovery_data` if the caller supplied
    /// any, persist, and return the now-live session (§4.2 step 2).
    async fn finish_successful_connect(
        &self,
        peer: &Arc<Peer>,
        address: PeerAddress,
        candidate: OperationalAddress,
        discovery_data: Option<DiscoveryData>,
    ) -> Result<SharedSession> {
        let descriptor = peer.update_descriptor(|d| {
            d.refine_operational_address(candidate);
            if let Some(data) = discovery_data.clone() {
                d.refine_discovery_data(data);
            }
        });
        self.store.put(descriptor).await?;
        self.events.emit(PeerSetEvent::Added(address));
        info!(%address, %candidate, "peer session established");
        self.manager.maybe_session_for(address).ok_or(Error::InternalError(
            "CASE pairing succeeded without installing a session",
        ))
    }

    async fn discover_and_pair(
        &self,
        peer: Arc<Peer>,
        address: PeerAddress,
        fabric: Fabric,
        options: ConnectOptions,
        just_failed: Option<OperationalAddress>,
    ) -> Result<SharedSession> {
        match self.discovery.start_or_join(address, options.discovery.kind) {
            Ok(mut rx) => match rx.recv().await {
                Ok(Ok(_resolved)) => self.manager.maybe_session_for(address).ok_or(Error::Discovery {
                    address,
                    reason: "a shared discovery resolved without a session installed",
                }),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(Error::Discovery {
                    address,
                    reason: "discovery was cancelled",
                }),
            },
            Err(()) => self.run_discovery(peer, address, fabric, options, just_failed).await,
        }
    }

    /// The primary discoverer for `address`: launches mDNS search plus (for
    /// `Full`) last-address polling, races them, pairs on first success, and
    /// resolves the shared `DiscoveryRegistry` entry for any joiners.
    async fn run_discovery(
        &self,
        peer: Arc<Peer>,
        address: PeerAddress,
        fabric: Fabric,
        options: ConnectOptions,
        just_failed: Option<OperationalAddress>,
    ) -> Result<SharedSession> {
        let kind = options.discovery.kind;
        debug!(%address, ?kind, "starting discovery");
        let (token, mut mdns_rx) = self.scanners.start_discovery(address);
        self.discovery.attach_token(address, token);

        let cached = peer.descriptor().operational_address;
        let data_handle = peer.descriptor().data_handle;
        let poll_enabled = matches!(kind, DiscoveryKind::Full) && cached.is_some();

        let (combined_tx, mut combined_rx) = tokio::sync::mpsc::unbounded_channel::<OperationalAddress>();

        let mdns_forward_tx = combined_tx.clone();
        let mdns_task = tokio::spawn(async move {
            while let Some(addr) = mdns_rx.recv().await {
                if mdns_forward_tx.send(addr).is_err() {
                    break;
                }
            }
        });

        let poll_task = poll_enabled.then(|| {
            let poll_tx = combined_tx.clone();
            let cached_addr = cached.expect("poll_enabled implies a cached address");
            let polling_interval = self.config.polling_interval;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(polling_interval).await;
                    if poll_tx.send(cached_addr).is_err() {
                        break;
                    }
                }
            })
        });
        drop(combined_tx);

        let cats = options.case_authenticated_tags.clone();
        let session_parameters = session_parameters_for(&options);
        let body = async {
            let mut skip_once = just_failed;
            while let Some(candidate) = combined_rx.recv().await {
                if skip_once == Some(candidate) {
                    skip_once = None;
                    continue;
                }
                match self
                    .pair(address, candidate, &fabric, cats.clone(), session_parameters, data_handle)
                    .await
                {
                    Ok(()) => return Ok(candidate),
                    Err(_) => continue,
                }
            }
            Err(Error::Discovery {
                address,
                reason: "discovery exhausted with no successful pairing",
            })
        };

        let outcome: Result<OperationalAddress> = match kind {
            DiscoveryKind::Timed(d) => tokio::time::timeout(d, body).await.unwrap_or(Err(Error::Discovery {
                address,
                reason: "discovery timed out",
            })),
            DiscoveryKind::Retransmission => tokio::time::timeout(retransmission_discovery_duration(), body)
                .await
                .unwrap_or(Err(Error::Discovery {
                    address,
                    reason: "discovery timed out",
                })),
            DiscoveryKind::Full => tokio::time::timeout(self.config.default_discovery_timeout, body)
                .await
                .unwrap_or(Err(Error::Discovery {
                    address,
                    reason: "discovery timed out",
                })),
            DiscoveryKind::None => body.await,
        };

        if let Some(handle) = poll_task {
            handle.abort();
        }
        mdns_task.abort();
        self.scanners.cancel_discovery(token, outcome.is_ok());

        match &outcome {
            Ok(resolved) => debug!(%address, %resolved, "discovery resolved"),
            Err(error) => warn!(%address, %error, "discovery exhausted with no successful pairing"),
        }

        let registry_outcome: DiscoveryOutcome = match &outcome {
            Ok(resolved) => Ok(*resolved),
            Err(_) => Err(DiscoveryOutcomeError {
                address,
                reason: "discovery exhausted with no successful pairing",
            }),
        };
        self.discovery.resolve(address, registry_outcome);

        match outcome {
            Ok(resolved) => {
                self.finish_successful_connect(&peer, address, resolved, options.discovery.data.clone())
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Opportunistically re-find `address` without disturbing an existing
    /// session unless the re-pairing actually succeeds (§4.2 step 6, §8
    /// scenario S6). Used by `spawn_retry_listener`, not by ordinary
    /// `connect` callers.
    async fn opportunistic_rediscover(&self, address: PeerAddress) {
        let fabric = match self.manager.fabric_for(address) {
            Ok(fabric) => fabric,
            Err(_) => return,
        };
        let peer = match self.peer_for(address, true) {
            Ok(peer) => peer,
            Err(_) => return,
        };
        let _ = self
            .discover_and_pair(
                peer,
                address,
                fabric,
                ConnectOptions {
                    discovery: DiscoveryOptions {
                        kind: DiscoveryKind::Retransmission,
                        data: None,
                    },
                    ..ConnectOptions::default()
                },
                None,
            )
            .await;
    }

    pub async fn disconnect(&self, address: PeerAddress, send_close: bool) -> Result<()> {
        if address.is_group() {
            return Err(Error::ImplementationError("disconnect does not accept a group address"));
        }
        if let Some(session) = self.manager.maybe_session_for(address) {
            let mut session = session.lock().unwrap();
            if send_close {
                session.initiate_close(false);
            } else {
                session.initiate_force_close(None);
            }
        }
        self.manager.handle_peer_loss(address, None);
        self.events.emit(PeerSetEvent::Disconnected(address));
        Ok(())
    }

    pub async fn forget(&self, address: PeerAddress) -> Result<()> {
        self.disconnect(address, false).await?;
        self.peers.lock().unwrap().remove(&address);
        self.manager.delete_resumption_record(address);
        self.store.delete(address).await?;
        self.events.emit(PeerSetEvent::Deleted(address));
        Ok(())
    }

    /// Cancel every pending discovery without resolving its waiters, then
    /// force-close every live session. A peer shutting down must never
    /// observe a spurious connect completing afterward (§4.2 step 5, §5).
    pub async fn close(&self) {
        for (_, token) in self.discovery.cancel_all() {
            if let Some(token) = token {
                self.scanners.cancel_discovery(token, false);
            }
        }
        self.pending_connects.lock().unwrap().clear();

        let addresses: Vec<PeerAddress> = self.peers.lock().unwrap().keys().copied().collect();
        for address in addresses {
            if let Some(session) = self.manager.maybe_session_for(address) {
                session.lock().unwrap().initiate_force_close(None);
            }
        }
    }

    /// Spawn a background task that opportunistically starts a short
    /// `Retransmission` discovery whenever a session reports its first
    /// message retransmission (§4.2 step 6, §4.6). Requires the set be
    /// shared as `Arc<PeerSet>` since the task outlives any single call.
    pub fn spawn_retry_listener(self: &Arc<Self>) {
        let this = self.clone();
        let mut retry_rx = self.manager.subscribe_retry();
        tokio::spawn(async move {
            while let Ok(event) = retry_rx.recv().await {
                if event.attempt != 1 {
                    continue;
                }
                let this = this.clone();
                tokio::spawn(async move {
                    this.opportunistic_rediscover(event.address).await;
                });
            }
        });
    }
}
