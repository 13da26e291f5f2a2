//! Session parameters negotiated during CASE, or filled from mDNS discovery
//! data when no session exists yet.

use std::time::Duration;

use crate::addr::OperationalAddress;

/// A CASE Authenticated Tag: an authorization group attached to an
/// authenticated peer identity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CaseAuthenticatedTag(pub u32);

bitflags::bitflags! {
    /// Transports a peer has advertised support for, beyond plain UDP.
    pub struct SupportedTransports: u8 {
        const TCP   = 0b0000_0001;
        const MRP   = 0b0000_0010;
        const BTP   = 0b0000_0100;
    }
}

/// mDNS TXT-derived discovery data for a peer: `SII`/`SAI`/`SAT` intervals,
/// the advertised device name, and any additional operational addresses.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiscoveryData {
    /// `SII`
    pub idle_interval: Option<Duration>,
    /// `SAI`
    pub active_interval: Option<Duration>,
    /// `SAT`
    pub active_threshold: Option<Duration>,
    /// `DN`
    pub device_name: Option<String>,
    pub additional_addresses: Vec<OperationalAddress>,
}

/// Negotiated or fallback session parameters.
///
/// All durations are strictly positive; `Default` yields the fallback
/// values used when neither mDNS TXT data nor a CASE negotiation supplied
/// them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionParameters {
    pub idle_interval: Duration,
    pub active_interval: Duration,
    pub active_threshold: Duration,
    pub data_model_revision: u16,
    pub interaction_model_revision: u16,
    pub specification_version: u32,
    pub max_paths_per_invoke: u16,
    pub supported_transports: SupportedTransports,
    pub max_tcp_message_size: u32,
}

impl Default for SessionParameters {
    fn default() -> Self {
        SessionParameters {
            idle_interval: Duration::from_millis(5000),
            active_interval: Duration::from_millis(300),
            active_threshold: Duration::from_millis(4000),
            data_model_revision: 1,
            interaction_model_revision: 1,
            specification_version: 1,
            max_paths_per_invoke: 1,
            supported_transports: SupportedTransports::MRP,
            max_tcp_message_size: 0,
        }
    }
}

impl SessionParameters {
    /// Fill from mDNS discovery data, falling back to defaults for any
    /// field the TXT record left unset.
    pub fn from_discovery_data(data: &DiscoveryData) -> Self {
        let defaults = SessionParameters::default();
        SessionParameters {
            idle_interval: data.idle_interval.unwrap_or(defaults.idle_interval),
            active_interval: data.active_interval.unwrap_or(defaults.active_interval),
            active_threshold: data.active_threshold.unwrap_or(defaults.active_threshold),
            ..defaults
        }
    }

    /// Merge a freshly negotiated set of parameters into the previous ones,
    /// keeping revisions monotone non-decreasing as required across
    /// renegotiation.
    pub fn merge_monotonic(&self, fresh: SessionParameters) -> SessionParameters {
        SessionParameters {
            data_model_revision: self.data_model_revision.max(fresh.data_model_revision),
            interaction_model_revision: self
                .interaction_model_revision
                .max(fresh.interaction_model_revision),
            specification_version: self.specification_version.max(fresh.specification_version),
            ..fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_txt_fields_fall_back_to_defaults() {
        let data = DiscoveryData {
            idle_interval: Some(Duration::from_millis(9000)),
            ..Default::default()
        };
        let params = SessionParameters::from_discovery_data(&data);
        assert_eq!(params.idle_interval, Duration::from_millis(9000));
        assert_eq!(params.active_interval, SessionParameters::default().active_interval);
    }

    #[test]
    fn renegotiation_never_decreases_revisions() {
        let old = SessionParameters {
            data_model_revision: 5,
            ..SessionParameters::default()
        };
        let fresh = SessionParameters {
            data_model_revision: 3,
            ..SessionParameters::default()
        };
        let merged = old.merge_monotonic(fresh);
        assert_eq!(merged.data_model_revision, 5);
    }
}
