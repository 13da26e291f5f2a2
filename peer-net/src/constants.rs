//! Definitions of constants.

use std::time::Duration;

/// The duration of an internally-induced `Retransmission` discovery,
/// started when a session reports its first message retransmission.
///
/// This is short on purpose: roaming devices should be re-found well before
/// the pairing retransmission limit is hit, not after.
pub const RETRANSMISSION_DISCOVERY_DURATION: Duration = Duration::from_secs(5);

/// The interval between `Full`-discovery polling attempts on a peer's last
/// known address, while no other discovery has found it yet.
pub const POLLING_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Upper bound on a `Full` discovery that the caller did not themselves
/// bound with a `Timed` duration. Without this, a peer that is never found
/// would poll and scan forever.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default `expected_processing_time` for a direct reconnect attempt when
/// the caller does not specify one.
pub const DEFAULT_RECONNECT_PROCESSING_TIME: Duration = Duration::from_secs(2);

/// `expected_processing_time` used for fail-safe commands, which are
/// allowed to take much longer than an ordinary reconnect.
pub const FAIL_SAFE_RECONNECT_PROCESSING_TIME: Duration = Duration::from_secs(30);

/// The minimum time between successive direct-reconnect attempts made by
/// the candidate discovery engine for a single peer.
///
/// ## Security
///
/// This resists denial of service from a peer that keeps failing pairing:
/// without a floor, a tight retry loop could flood the network or the CPU.
pub const MIN_PEER_CONNECTION_INTERVAL: Duration = Duration::from_millis(100);

/// The number of recently accepted peer counters tracked by a session's
/// reception window, used to detect replay without requiring strictly
/// sequential delivery.
pub const RECEPTION_WINDOW_SIZE: u32 = 32;

/// The 32-bit send counter value at which a session must initiate graceful
/// closure rather than risk wrapping and reusing a counter value.
pub const COUNTER_ROLLOVER_THRESHOLD: u32 = u32::MAX;

/// HKDF output length for CASE session key derivation: 16 bytes each of
/// decrypt key, encrypt key, and attestation challenge key.
pub const SESSION_KEY_DERIVATION_LENGTH: usize = 48;

/// `info` parameter for a fresh (non-resumed) CASE session key derivation.
pub const SESSION_KEYS_INFO: &[u8] = b"SessionKeys";

/// `info` parameter for a resumed CASE session key derivation.
pub const SESSION_RESUMPTION_KEYS_INFO: &[u8] = b"SessionResumptionKeys";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_processing_times_are_ordered() {
        assert!(DEFAULT_RECONNECT_PROCESSING_TIME < FAIL_SAFE_RECONNECT_PROCESSING_TIME);
    }

    #[test]
    fn retransmission_discovery_is_shorter_than_polling() {
        assert!(RETRANSMISSION_DISCOVERY_DURATION < POLLING_INTERVAL);
    }

    #[test]
    fn default_discovery_timeout_is_shorter_than_polling_but_longer_than_retransmission() {
        assert!(DEFAULT_DISCOVERY_TIMEOUT < POLLING_INTERVAL);
        assert!(DEFAULT_DISCOVERY_TIMEOUT > RETRANSMISSION_DISCOVERY_DURATION);
    }
}
