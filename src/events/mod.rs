//! Registry events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by registries, the reaper, the mesh
//! listener and component runtimes.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Registry` (registration, brokering, admin), the reaper,
//!   the mesh listener, `ComponentRuntime` (notifications, exits).
//! - **Consumers**: the registry's subscriber listener (fans out to
//!   [`SubscriberSet`](crate::SubscriberSet)) and anything that calls
//!   [`Registry::subscribe`](crate::Registry::subscribe).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
