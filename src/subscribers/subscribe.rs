//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging event handlers into a
//! registry. Each subscriber is driven by a dedicated worker loop fed by a
//! bounded queue owned by the [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow; they never block the publisher nor other subscribers.
//! - Each subscriber declares its queue capacity via [`Subscribe::queue_capacity`].
//!   On overflow, events for that subscriber are **dropped** (warn).
//! - [`Subscribe::interested`] filters by [`EventKind`] before queueing, so a
//!   subscriber that only watches liveness does not fill up on mesh chatter.

use crate::events::{Event, EventKind};
use async_trait::async_trait;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event for this subscriber.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Kinds this subscriber wants; others are never queued for it.
    fn interested(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
