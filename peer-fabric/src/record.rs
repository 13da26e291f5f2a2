//! The stable, on-disk peer record format.
//!
//! `[node_id, { operational_server_address?, discovery_data?, device_data? }]`
//! under the `"commissionedNodes"` key in the node store. Implementations
//! must migrate this record unchanged, so the field names here are part of
//! the wire contract, not an implementation detail: do not rename them.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::addr::{OperationalAddress, PeerAddress};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedServerAddress {
    pub ip: IpAddr,
    pub port: u16,
    #[serde(rename = "type")]
    pub kind: PersistedTransportKind,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersistedTransportKind {
    Udp,
}

impl From<OperationalAddress> for PersistedServerAddress {
    fn from(addr: OperationalAddress) -> Self {
        PersistedServerAddress {
            ip: addr.ip,
            port: addr.port,
            kind: PersistedTransportKind::Udp,
        }
    }
}

impl From<PersistedServerAddress> for OperationalAddress {
    fn from(addr: PersistedServerAddress) -> Self {
        OperationalAddress::new(addr.ip, addr.port)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPeerEntry {
    pub operational_server_address: Option<PersistedServerAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_data: Option<serde_json::Value>,
}

/// One `[node_id, entry]` pair as stored under `"commissionedNodes"`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedPeerRecord(pub u64, pub PersistedPeerEntry);

impl PersistedPeerRecord {
    pub fn node_id(&self) -> u64 {
        self.0
    }

    pub fn entry(&self) -> &PersistedPeerEntry {
        &self.1
    }
}

/// Build the record key for a peer address: the fabric index is carried by
/// the enclosing fabric's own store, so only the node id is persisted here,
/// matching the stable format.
pub fn record_for(_address: PeerAddress, entry: PersistedPeerEntry, node_id: u64) -> PersistedPeerRecord {
    PersistedPeerRecord(node_id, entry)
}
