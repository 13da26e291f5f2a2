//! The discovery and resume engine (§4.2): candidate address selection,
//! direct pairing, parallel polling + mDNS search, and discovery precedence.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, trace};

use peer_fabric::{OperationalAddress, PeerAddress};

use crate::constants::{POLLING_INTERVAL, RETRANSMISSION_DISCOVERY_DURATION};
use crate::error::Error;
use crate::scanner::DiscoveryToken;

/// A `Clone`-able stand-in for `Error::Discovery`, since the outcome travels
/// over a `broadcast` channel (which requires `T: Clone`) to every waiter
/// sharing one discovery. Converted back to a real `Error::Discovery` at the
/// call site.
#[derive(Clone, Debug)]
pub struct DiscoveryOutcomeError {
    pub address: PeerAddress,
    pub reason: &'static str,
}

impl From<DiscoveryOutcomeError> for Error {
    fn from(e: DiscoveryOutcomeError) -> Error {
        Error::Discovery {
            address: e.address,
            reason: e.reason,
        }
    }
}

pub type DiscoveryOutcome = std::result::Result<OperationalAddress, DiscoveryOutcomeError>;

/// The kind of discovery in flight for a peer, ranked for precedence:
/// `None < Retransmission < Timed(_) < Full`.
///
/// Mirrors the reconnection-order ranking a connection state enum gets in
/// the source: comparisons only ever look at rank, never at a `Timed`
/// duration's value, exactly as `PeerAddrState`'s `Ord` ignores liveness
/// data and looks only at the state tag.
#[derive(Copy, Clone, Debug)]
pub enum DiscoveryKind {
    None,
    Retransmission,
    Timed(Duration),
    Full,
}

impl DiscoveryKind {
    fn rank(&self) -> u8 {
        match self {
            DiscoveryKind::None => 0,
            DiscoveryKind::Retransmission => 1,
            DiscoveryKind::Timed(_) => 2,
            DiscoveryKind::Full => 3,
        }
    }
}

impl PartialEq for DiscoveryKind {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}
impl Eq for DiscoveryKind {}

impl Ord for DiscoveryKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}
impl PartialOrd for DiscoveryKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A discovery in progress for one peer: its rank, and a broadcast of the
/// eventual outcome so a lower-ranked or equal-ranked caller can share the
/// same result instead of starting a second one (§8 property 9).
struct RunningDiscovery {
    kind: DiscoveryKind,
    token: Option<DiscoveryToken>,
    outcome: broadcast::Sender<DiscoveryOutcome>,
}

/// Tracks at most one running discovery per peer (§8 property 4).
#[derive(Default)]
pub struct DiscoveryRegistry {
    running: Mutex<HashMap<PeerAddress, RunningDiscovery>>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        DiscoveryRegistry::default()
    }

    /// Candidate operational address per the rule in §4.2 step 1: the
    /// caller-supplied address if any; else, for `None`, only the cached
    /// address; else the cached address or the first mDNS result, with
    /// mDNS suppressed if it repeats the address that just failed.
    pub fn select_candidate(
        requested: Option<OperationalAddress>,
        kind: &DiscoveryKind,
        cached: Option<OperationalAddress>,
        mdns_result: Option<OperationalAddress>,
        just_failed: Option<OperationalAddress>,
    ) -> Option<OperationalAddress> {
        if requested.is_some() {
            return requested;
        }
        if matches!(kind, DiscoveryKind::None) {
            return cached;
        }
        if let Some(candidate) = cached {
            return Some(candidate);
        }
        match (mdns_result, just_failed) {
            (Some(m), Some(failed)) if m == failed => None,
            (m, _) => m,
        }
    }

    /// Register `kind` as the running discovery for `address`, honoring
    /// precedence: a higher-ranked request replaces (and the caller must
    /// cancel) a lower one; an equal-or-lower request instead returns the
    /// existing subscription to share its result. Returns `None` when the
    /// caller should start a fresh discovery (and must call this again once
    /// it has the resulting `DiscoveryToken` via `attach_token`), or
    /// `Some(receiver)` when an existing discovery's outcome should be
    /// awaited instead.
    pub fn start_or_join(
        &self,
        address: PeerAddress,
        kind: DiscoveryKind,
    ) -> std::result::Result<broadcast::Receiver<DiscoveryOutcome>, ()> {
        let mut running = self.running.lock().unwrap();
        if let Some(existing) = running.get(&address) {
            if kind > existing.kind {
                debug!(%address, ?kind, superseded = ?existing.kind, "discovery request supersedes a running lower-ranked one");
                let _ = existing.outcome.send(Err(DiscoveryOutcomeError {
                    address,
                    reason: "superseded by a higher-ranked discovery request",
                }));
                running.remove(&address);
            } else {
                trace!(%address, ?kind, running = ?existing.kind, "joining an equal-or-lower-ranked discovery already running");
                return Ok(existing.outcome.subscribe());
            }
        }
        let (tx, rx) = broadcast::channel(1);
        running.insert(
            address,
            RunningDiscovery {
                kind,
                token: None,
                outcome: tx,
            },
        );
        let _ = rx;
        Err(())
    }

    pub fn attach_token(&self, address: PeerAddress, token: DiscoveryToken) {
        if let Some(entry) = self.running.lock().unwrap().get_mut(&address) {
            entry.token = Some(token);
        }
    }

    pub fn running_token(&self, address: PeerAddress) -> Option<DiscoveryToken> {
        self.running.lock().unwrap().get(&address).and_then(|e| e.token)
    }

    /// Resolve and remove the running discovery for `address`, notifying
    /// every waiter that shared it.
    pub fn resolve(&self, address: PeerAddress, outcome: DiscoveryOutcome) {
        trace!(%address, ok = outcome.is_ok(), "resolving running discovery");
        if let Some(entry) = self.running.lock().unwrap().remove(&address) {
            let _ = entry.outcome.send(outcome);
        }
    }

    /// Drain every running discovery without resolving its waiters (a hard
    /// `close()`; see §4.2 step 5). Returns each address's scanner token, if
    /// one had been attached yet, so the caller can cancel the query too.
    pub fn cancel_all(&self) -> Vec<(PeerAddress, Option<DiscoveryToken>)> {
        self.running
            .lock()
            .unwrap()
            .drain()
            .map(|(address, entry)| (address, entry.token))
            .collect()
    }

    pub fn is_running(&self, address: PeerAddress) -> bool {
        self.running.lock().unwrap().contains_key(&address)
    }

    pub fn current_kind(&self, address: PeerAddress) -> Option<DiscoveryKind> {
        self.running.lock().unwrap().get(&address).map(|e| e.kind)
    }
}

/// The fixed durations discovery timers use, named so the engine never
/// hardcodes a literal duration at a call site.
pub fn polling_interval() -> Duration {
    POLLING_INTERVAL
}

pub fn retransmission_discovery_duration() -> Duration {
    RETRANSMISSION_DISCOVERY_DURATION
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> OperationalAddress {
        OperationalAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), port)
    }

    #[test]
    fn precedence_ranks_in_the_documented_order() {
        assert!(DiscoveryKind::None < DiscoveryKind::Retransmission);
        assert!(DiscoveryKind::Retransmission < DiscoveryKind::Timed(Duration::from_secs(1)));
        assert!(DiscoveryKind::Timed(Duration::from_secs(1)) < DiscoveryKind::Full);
    }

    #[test]
    fn timed_durations_do_not_affect_rank() {
        assert_eq!(
            DiscoveryKind::Timed(Duration::from_secs(1)),
            DiscoveryKind::Timed(Duration::from_secs(99))
        );
    }

    #[test]
    fn caller_supplied_address_always_wins() {
        let candidate = DiscoveryRegistry::select_candidate(
            Some(addr(1)),
            &DiscoveryKind::Full,
            Some(addr(2)),
            Some(addr(3)),
            None,
        );
        assert_eq!(candidate, Some(addr(1)));
    }

    #[test]
    fn none_discovery_only_considers_the_cached_address() {
        let candidate = DiscoveryRegistry::select_candidate(
            None,
            &DiscoveryKind::None,
            Some(addr(2)),
            Some(addr(3)),
            None,
        );
        assert_eq!(candidate, Some(addr(2)));

        let candidate = DiscoveryRegistry::select_candidate(
            None,
            &DiscoveryKind::None,
            None,
            Some(addr(3)),
            None,
        );
        assert_eq!(candidate, None);
    }

    #[test]
    fn mdns_repeating_the_just_failed_address_is_treated_as_empty() {
        let candidate = DiscoveryRegistry::select_candidate(
            None,
            &DiscoveryKind::Full,
            None,
            Some(addr(3)),
            Some(addr(3)),
        );
        assert_eq!(candidate, None);
    }

    #[test]
    fn a_higher_ranked_request_supersedes_a_running_lower_one() {
        let registry = DiscoveryRegistry::new();
        let address = PeerAddress::new(1, 2);
        let _ = registry.start_or_join(address, DiscoveryKind::Retransmission);
        assert_eq!(registry.current_kind(address).unwrap(), DiscoveryKind::Retransmission);

        let joined = registry.start_or_join(address, DiscoveryKind::Full);
        assert!(joined.is_err());
        assert_eq!(registry.current_kind(address).unwrap(), DiscoveryKind::Full);
    }

    #[test]
    fn an_equal_or_lower_request_joins_the_existing_one() {
        let registry = DiscoveryRegistry::new();
        let address = PeerAddress::new(1, 2);
        let _ = registry.start_or_join(address, DiscoveryKind::Full);
        let joined = registry.start_or_join(address, DiscoveryKind::Retransmission);
        assert!(joined.is_ok());
        assert_eq!(registry.current_kind(address).unwrap(), DiscoveryKind::Full);
    }
}
