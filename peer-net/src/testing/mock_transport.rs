//! An in-memory transport: channels are simple in-process queues. Used only
//! in tests. A `MockNetwork` hub lets two independently-dialed endpoints
//! actually exchange bytes, which a bare `MockTransportSet` cannot do on its
//! own (its channels are one-way stubs good for dial-recording only).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use peer_fabric::OperationalAddress;

use crate::error::{Error, Result};
use crate::transport::{Channel, TransportSet};

pub struct MockChannel {
    remote: OperationalAddress,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait]
impl Channel for MockChannel {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.outbound
            .send(bytes.to_vec())
            .map_err(|e| Error::Transport(Box::new(e)))
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut inbound = self.inbound.lock().expect("mock channel mutex poisoned");
        inbound
            .recv()
            .await
            .ok_or_else(|| Error::Transport("channel closed".into()))
    }

    fn remote_address(&self) -> OperationalAddress {
        self.remote
    }
}

/// A bare transport set. Always successfully opens a channel and records
/// which addresses were dialed so tests can assert on dialing behavior, but
/// each channel's peer is unclaimed: two separately-dialed `MockChannel`s
/// from two bare `MockTransportSet`s do not talk to each other. Use
/// `MockNetwork` when a test needs two endpoints to actually converse.
#[derive(Default)]
pub struct MockTransportSet {
    dialed: Mutex<Vec<OperationalAddress>>,
}

impl MockTransportSet {
    pub fn new() -> Self {
        MockTransportSet::default()
    }

    pub fn dialed_addresses(&self) -> Vec<OperationalAddress> {
        self.dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportSet for MockTransportSet {
    async fn channel_for(&self, address: OperationalAddress) -> Result<Box<dyn Channel>> {
        self.dialed.lock().unwrap().push(address);
        let (outbound, _unused) = mpsc::unbounded_channel();
        let (_unused_tx, inbound) = mpsc::unbounded_channel();
        Ok(Box::new(MockChannel {
            remote: address,
            outbound,
            inbound: Mutex::new(inbound),
        }))
    }

    async fn group_channel_for(&self, address: OperationalAddress) -> Result<Box<dyn Channel>> {
        self.channel_for(address).await
    }
}

struct Duplex {
    a_to_b_tx: mpsc::UnboundedSender<Vec<u8>>,
    b_to_a_tx: mpsc::UnboundedSender<Vec<u8>>,
    a_to_b_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    b_to_a_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

fn canonical_key(a: OperationalAddress, b: OperationalAddress) -> (String, String) {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A shared hub of loopback pipes, so two `MockTransportSet`s bound to
/// different local addresses can dial each other and actually exchange
/// bytes, the way two real UDP sockets on a LAN would.
#[derive(Default)]
pub struct MockNetwork {
    pipes: Mutex<HashMap<(String, String), Duplex>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(MockNetwork::default())
    }

    /// A transport set representing the endpoint at `local`. Dialing
    /// `remote` through the returned set is answered by dialing `local`
    /// through the endpoint transport set for `remote`.
    pub fn transport(self: &Arc<Self>, local: OperationalAddress) -> NetworkTransport {
        NetworkTransport {
            network: self.clone(),
            local,
            dialed: Mutex::new(Vec::new()),
        }
    }
}

pub struct NetworkTransport {
    network: Arc<MockNetwork>,
    local: OperationalAddress,
    dialed: Mutex<Vec<OperationalAddress>>,
}

impl NetworkTransport {
    pub fn dialed_addresses(&self) -> Vec<OperationalAddress> {
        self.dialed.lock().unwrap().clone()
    }

    fn claim_channel(&self, remote: OperationalAddress) -> Box<dyn Channel> {
        let key = canonical_key(self.local, remote);
        let mut pipes = self.network.pipes.lock().unwrap();
        let duplex = pipes.entry(key).or_insert_with(|| {
            let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
            let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();
            Duplex {
                a_to_b_tx,
                b_to_a_tx,
                a_to_b_rx: Some(a_to_b_rx),
                b_to_a_rx: Some(b_to_a_rx),
            }
        });

        // `a` is whichever address sorts first in the canonical key; route
        // this endpoint's outbound/inbound ends accordingly.
        let is_a = self.local.to_string() <= remote.to_string();
        let (outbound, inbound) = if is_a {
            (
                duplex.a_to_b_tx.clone(),
                duplex
                    .b_to_a_rx
                    .take()
                    .expect("each side of a mock duplex is claimed at most once"),
            )
        } else {
            (
                duplex.b_to_a_tx.clone(),
                duplex
                    .a_to_b_rx
                    .take()
                    .expect("each side of a mock duplex is claimed at most once"),
            )
        };

        Box::new(MockChannel {
            remote,
            outbound,
            inbound: Mutex::new(inbound),
        })
    }
}

#[async_trait]
impl TransportSet for NetworkTransport {
    async fn channel_for(&self, address: OperationalAddress) -> Result<Box<dyn Channel>> {
        self.dialed.lock().unwrap().push(address);
        Ok(self.claim_channel(address))
    }

    async fn group_channel_for(&self, address: OperationalAddress) -> Result<Box<dyn Channel>> {
        self.channel_for(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> OperationalAddress {
        OperationalAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), port)
    }

    #[tokio::test]
    async fn two_endpoints_on_a_network_can_talk_to_each_other() {
        let network = MockNetwork::new();
        let a = network.transport(addr(1));
        let b = network.transport(addr(2));

        let a_channel = a.channel_for(addr(2)).await.unwrap();
        let b_channel = b.channel_for(addr(1)).await.unwrap();

        a_channel.send(b"hello from a").await.unwrap();
        let received = b_channel.recv().await.unwrap();
        assert_eq!(received, b"hello from a");

        b_channel.send(b"hello from b").await.unwrap();
        let received = a_channel.recv().await.unwrap();
        assert_eq!(received, b"hello from b");
    }

    #[tokio::test]
    async fn a_bare_mock_transport_set_does_not_wire_channels_together() {
        let transport = MockTransportSet::new();
        let channel = transport.channel_for(addr(2)).await.unwrap();
        channel.send(b"into the void").await.unwrap();
        assert_eq!(transport.dialed_addresses(), vec![addr(2)]);
    }
}
