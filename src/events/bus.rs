//! # Event bus for broadcasting registry events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking publishing from many sources (reaper, broker, mesh listener,
//! component runtimes).
//!
//! ## Architecture
//! ```text
//! Publishers (many):                   Subscriber (one per consumer):
//!   Reaper     ──┐
//!   Broker     ──┼──────► Bus ───────► subscriber_listener ────► SubscriberSet
//!   Mesh       ──┤  (broadcast chan)     (in Registry)
//!   Runtimes   ──┘                 └──► Registry::subscribe() receivers (tests, tools)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: one ring buffer shared by every receiver.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if nobody listens at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for registry events.
///
/// Cheap to clone (internally an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers; dropped if there are none.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_see_events_published_after_subscribe() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::PeerJoined).with_peer("lost"));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::PeerJoined).with_peer("r2"));

        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.peer.as_deref(), Some("r2"));
    }
}
