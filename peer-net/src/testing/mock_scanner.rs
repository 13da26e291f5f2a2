//! A scripted mDNS scanner for tests: each `PeerAddress` can be configured
//! to eventually yield a fixed sequence of addresses, optionally after a
//! delay, with cancellations recorded for assertions.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use peer_fabric::{OperationalAddress, PeerAddress};

use crate::scanner::{next_discovery_token, DiscoveryToken, ScannerSet};

pub struct ScriptedScanner {
    scripts: Mutex<HashMap<PeerAddress, (Vec<OperationalAddress>, Duration)>>,
    cancellations: Mutex<Vec<(DiscoveryToken, bool)>>,
    started: Mutex<Vec<PeerAddress>>,
}

impl ScriptedScanner {
    pub fn new() -> Self {
        ScriptedScanner {
            scripts: Mutex::new(HashMap::new()),
            cancellations: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Arrange for `address` to be discovered at `results`, each delivered
    /// after `delay`.
    pub fn script(&self, address: PeerAddress, results: Vec<OperationalAddress>, delay: Duration) {
        self.scripts.lock().unwrap().insert(address, (results, delay));
    }

    pub fn cancellations(&self) -> Vec<(DiscoveryToken, bool)> {
        self.cancellations.lock().unwrap().clone()
    }

    pub fn started_queries(&self) -> Vec<PeerAddress> {
        self.started.lock().unwrap().clone()
    }
}

impl Default for ScriptedScanner {
    fn default() -> Self {
        ScriptedScanner::new()
    }
}

impl ScannerSet for ScriptedScanner {
    fn start_discovery(&self, address: PeerAddress) -> (DiscoveryToken, mpsc::UnboundedReceiver<OperationalAddress>) {
        self.started.lock().unwrap().push(address);
        let token = next_discovery_token();
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some((results, delay)) = self.scripts.lock().unwrap().get(&address).cloned() {
            let delay = delay;
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                for addr in results {
                    if tx.send(addr).is_err() {
                        break;
                    }
                }
            });
        }
        (token, rx)
    }

    fn cancel_discovery(&self, token: DiscoveryToken, resolve: bool) {
        self.cancellations.lock().unwrap().push((token, resolve));
    }
}
