//! Observable events, modeled as broadcast channels with at-most-once
//! delivery per subscriber.
//!
//! The source models these as ad hoc event emitters; here they are a closed
//! set of tagged variants delivered over `tokio::sync::broadcast`, so a
//! dropped subscriber just misses events instead of blocking the emitter.

use peer_fabric::PeerAddress;

use crate::session::secure_session::SessionId;

#[derive(Clone, Debug)]
pub enum PeerSetEvent {
    Added(PeerAddress),
    Deleted(PeerAddress),
    Disconnected(PeerAddress),
}

#[derive(Clone, Debug)]
pub enum SessionEvent {
    Closing(SessionId),
    GracefulClose(SessionId),
    ClosedByPeer(SessionId),
}

/// A broadcast hub for one event type. Cloning the hub shares the
/// underlying channel; `subscribe` hands out an independent receiver per
/// listener.
#[derive(Clone)]
pub struct EventBus<T: Clone> {
    sender: tokio::sync::broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        EventBus { sender }
    }

    /// Emit an event. Silently drops it if there are no subscribers, which
    /// is the normal case for a headless peer set in tests.
    pub fn emit(&self, event: T) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        EventBus::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus: EventBus<PeerSetEvent> = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(PeerSetEvent::Added(PeerAddress::new(1, 2)));
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, PeerSetEvent::Added(addr) if addr == PeerAddress::new(1, 2)));
    }

    #[tokio::test]
    async fn a_dropped_subscriber_does_not_block_emission() {
        let bus: EventBus<PeerSetEvent> = EventBus::default();
        {
            let _rx = bus.subscribe();
        }
        // No subscriber left; emit must not panic or block.
        bus.emit(PeerSetEvent::Deleted(PeerAddress::new(1, 2)));
    }
}
