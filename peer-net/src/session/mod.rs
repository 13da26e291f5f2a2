//! Session-level state: message counters, replay protection, the secure
//! session runtime, and the session manager boundary.

pub mod counter;
pub mod manager;
pub mod reception;
pub mod secure_session;

pub use manager::{InMemorySessionManager, ResumptionRecord, RetryEvent, SessionManager, SharedSession, UnsecuredSession};
pub use secure_session::{DerivedKeys, EncodedMessage, SecureSession, SessionId, SessionType};
