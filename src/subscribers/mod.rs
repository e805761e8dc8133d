//! # Event subscribers for registries.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and an optional built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//! Reaper / Broker / Mesh ── publish(Event) ──► Bus ──► subscriber_listener
//!                                                           │
//!                                                  SubscriberSet::emit(&Event)
//!                                                 ┌─────────┼─────────┐
//!                                                 ▼         ▼         ▼
//!                                             LogWriter   Audit     Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use meshvisor::{Subscribe, Event, EventKind};
//! use async_trait::async_trait;
//!
//! struct DeadAlarm;
//!
//! #[async_trait]
//! impl Subscribe for DeadAlarm {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::ComponentDead {
//!             // page someone
//!         }
//!     }
//!     fn name(&self) -> &'static str { "dead-alarm" }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
