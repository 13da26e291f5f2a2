//! The deployer-overridable configuration surface (§10.3). Most tuning
//! knobs live in `constants` as plain `const`s documented with their
//! rationale; these three are the ones a deployment's network conditions
//! plausibly call for a different value on, so they're exposed as fields
//! a `PeerSet` can be built with instead.

use std::time::Duration;

use crate::constants::{DEFAULT_DISCOVERY_TIMEOUT, POLLING_INTERVAL, RECEPTION_WINDOW_SIZE};

/// Runtime-overridable tuning for a `PeerSet`. `Default` matches the
/// `constants` module.
#[derive(Clone, Copy, Debug)]
pub struct PeerSetConfig {
    /// How often `Full` discovery polls a peer's last known address while
    /// mDNS search has not yet found it.
    pub polling_interval: Duration,
    /// Upper bound on a `Full` discovery when the caller did not ask for a
    /// specific `Timed` duration.
    pub default_discovery_timeout: Duration,
    /// Width of the reception replay-protection window, applied to
    /// sessions this `PeerSet` pairs (the CASE path). Must not exceed 32:
    /// `MessageReceptionState` tracks acceptance in a `u32` bitmask. A
    /// group session's window is governed separately by whatever
    /// `SessionManager` it was built with, since `PeerSet` itself never
    /// constructs group sessions.
    pub reception_window_size: u32,
}

impl Default for PeerSetConfig {
    fn default() -> Self {
        PeerSetConfig {
            polling_interval: POLLING_INTERVAL,
            default_discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            reception_window_size: RECEPTION_WINDOW_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_the_constants_module() {
        let config = PeerSetConfig::default();
        assert_eq!(config.polling_interval, POLLING_INTERVAL);
        assert_eq!(config.default_discovery_timeout, DEFAULT_DISCOVERY_TIMEOUT);
        assert_eq!(config.reception_window_size, RECEPTION_WINDOW_SIZE);
    }
}
