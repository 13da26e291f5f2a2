//! Mock implementations of the four external-boundary traits (crypto,
//! transport, scanner, fabric) plus in-memory peer and peer-data stores,
//! gated behind `cfg(test)` / the `test-util` feature so production builds
//! never carry them.

pub mod mock_crypto;
pub mod mock_data_store;
pub mod mock_fabric;
pub mod mock_scanner;
pub mod mock_store;
pub mod mock_transport;

pub use mock_crypto::MockCrypto;
pub use mock_data_store::InMemoryPeerDataStore;
pub use mock_fabric::MockFabricProvider;
pub use mock_scanner::ScriptedScanner;
pub use mock_store::InMemoryPeerStore;
pub use mock_transport::{MockNetwork, MockTransportSet, NetworkTransport};

/// Install a `fmt` tracing subscriber for the current test binary, so
/// `trace!`/`debug!` calls in the code under test are visible with
/// `cargo test -- --nocapture`. Mirrors `zebra_test::init()`: safe to call
/// from every test, since `try_init` ignores the "already installed" error
/// instead of panicking when multiple tests in the same binary call it.
///
/// `cfg(test)`-only (not just `test-util`): `tracing-subscriber` is a
/// dev-dependency, unavailable to a downstream crate that merely enables
/// the `test-util` feature to reuse the mocks above.
#[cfg(test)]
pub fn init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
