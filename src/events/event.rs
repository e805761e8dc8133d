//! # Events emitted by registries and component runtimes.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Registration**: components joining, leaving or being replicated from peers
//! - **Liveness**: state transitions driven by heartbeats, the reaper and admins
//! - **Brokering & access**: connections granted, calls rejected, notifications fired
//! - **Mesh & shutdown**: peer joins, propagation failures, administrative shutdown
//!
//! The [`Event`] struct carries optional metadata such as the component id,
//! peer registry, lifecycle state and a free-form reason.
//!
//! ## Ordering guarantees
//! Each event has a process-wide sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use meshvisor::{ComponentState, Event, EventKind};
//!
//! let ev = Event::new(EventKind::StateChanged)
//!     .with_component("Vision$cam1")
//!     .with_state(ComponentState::Recovering)
//!     .with_reason("heartbeat age 3.1s");
//!
//! assert_eq!(ev.kind, EventKind::StateChanged);
//! assert_eq!(ev.component.as_deref(), Some("Vision$cam1"));
//! assert_eq!(ev.state, Some(ComponentState::Recovering));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::identity::ComponentState;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of registry events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Registration ===
    /// A component registered with this registry.
    ///
    /// Sets: `component`, `peer` (this registry)
    ComponentRegistered,

    /// A component registered elsewhere was advertised by a peer.
    ///
    /// Sets: `component`, `peer` (origin registry)
    ComponentReplicated,

    /// A component record was removed (deregistration, admin shutdown, peer withdraw).
    ///
    /// Sets: `component`, `reason`
    ComponentDeregistered,

    /// A registration attempt was refused.
    ///
    /// Sets: `component`, `reason`
    RegistrationRejected,

    // === Liveness ===
    /// A record changed lifecycle state.
    ///
    /// Sets: `component`, `state` (new state), `reason`
    StateChanged,

    /// The reaper demoted a component and started recovery.
    ///
    /// Sets: `component`, `reason` (heartbeat age)
    RecoveryStarted,

    /// A recovery liveness probe failed.
    ///
    /// Sets: `component`, `attempt`, `delay_ms` (before next probe)
    ProbeFailed,

    /// The launcher was asked to restart a component.
    ///
    /// Sets: `component`, `reason` (host)
    ComponentRelaunched,

    /// A recovering component heartbeated again.
    ///
    /// Sets: `component`
    ComponentRecovered,

    /// Recovery failed; the record is now `Dead`.
    ///
    /// Sets: `component`, `reason`
    ComponentDead,

    /// A component was hard-killed (no cleanup).
    ///
    /// Sets: `component`
    ComponentKilled,

    /// A component runtime left its main loop.
    ///
    /// Sets: `component`, `reason` (exit reason)
    ComponentExited,

    // === Brokering & access ===
    /// A connection was brokered.
    ///
    /// Sets: `component` (target), `reason` (requester)
    ConnectionGranted,

    /// A call or a privileged registry operation was rejected.
    ///
    /// Sets: `component` (target), `reason` (error label and method)
    AccessRejected,

    /// A notification callback fired.
    ///
    /// Sets: `component` (provider), `reason` (requester and callback)
    NotificationFired,

    /// A component snapshot was stored.
    ///
    /// Sets: `component`
    SnapshotStored,

    // === Mesh ===
    /// A peer registry joined the mesh view of this registry.
    ///
    /// Sets: `peer`
    PeerJoined,

    /// A peer registry left.
    ///
    /// Sets: `peer`
    PeerLeft,

    /// A mesh message to a peer failed or timed out.
    ///
    /// Sets: `peer`, `reason`
    PropagationFailed,

    // === Shutdown ===
    /// Administrative shutdown requested (OS signal or explicit call).
    ShutdownRequested,

    /// All local components acknowledged shutdown within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some components did not acknowledge shutdown.
    GraceExceeded,
}

/// Registry event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Component id (`type$name`), if applicable.
    pub component: Option<Arc<str>>,
    /// Peer registry name, if applicable.
    pub peer: Option<Arc<str>>,
    /// Lifecycle state after the event.
    pub state: Option<ComponentState>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Delay before the next attempt in milliseconds.
    pub delay_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            component: None,
            peer: None,
            state: None,
            reason: None,
            attempt: None,
            delay_ms: None,
        }
    }

    /// Attaches a component id.
    #[inline]
    pub fn with_component(mut self, id: impl ToString) -> Self {
        self.component = Some(Arc::from(id.to_string()));
        self
    }

    /// Attaches a peer registry name.
    #[inline]
    pub fn with_peer(mut self, peer: impl Into<Arc<str>>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Attaches the resulting lifecycle state.
    #[inline]
    pub fn with_state(mut self, state: ComponentState) -> Self {
        self.state = Some(state);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    /// True if the event is about the given component.
    pub fn is_for(&self, id: &str) -> bool {
        self.component.as_deref() == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::PeerJoined);
        let b = Event::new(EventKind::PeerJoined);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_is_saturated() {
        let ev = Event::new(EventKind::ProbeFailed).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
