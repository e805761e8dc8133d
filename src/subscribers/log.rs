//! # LogWriter: render registry events through `tracing`
//!
//! A subscriber that turns bus events into structured `tracing` records.
//! Liveness failures log at `warn`, mesh and brokering traffic at `debug`,
//! everything else at `info`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  meshvisor: registered component="Vision$cam1" registry="r1"
//! WARN  meshvisor: recovery started component="Vision$cam1" reason="heartbeat age 3.0s"
//! WARN  meshvisor: probe failed component="Vision$cam1" attempt=1 delay_ms=200
//! WARN  meshvisor: component dead component="Vision$cam1" reason="probes exhausted"
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let component = e.component.as_deref().unwrap_or("-");
        let peer = e.peer.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::ComponentRegistered => {
                info!(component, registry = peer, "registered");
            }
            EventKind::ComponentReplicated => {
                debug!(component, origin = peer, "replicated from peer");
            }
            EventKind::ComponentDeregistered => {
                info!(component, reason, "deregistered");
            }
            EventKind::RegistrationRejected => {
                warn!(component, reason, "registration rejected");
            }
            EventKind::StateChanged => {
                info!(component, state = ?e.state, reason, "state changed");
            }
            EventKind::RecoveryStarted => {
                warn!(component, reason, "recovery started");
            }
            EventKind::ProbeFailed => {
                warn!(component, attempt = ?e.attempt, delay_ms = ?e.delay_ms, "probe failed");
            }
            EventKind::ComponentRelaunched => {
                info!(component, host = reason, "relaunch requested");
            }
            EventKind::ComponentRecovered => {
                info!(component, "recovered");
            }
            EventKind::ComponentDead => {
                warn!(component, reason, "component dead");
            }
            EventKind::ComponentKilled => {
                warn!(component, "component killed");
            }
            EventKind::ComponentExited => {
                info!(component, reason, "component runtime exited");
            }
            EventKind::ConnectionGranted => {
                debug!(component, requester = reason, "connection granted");
            }
            EventKind::AccessRejected => {
                warn!(component, reason, "access rejected");
            }
            EventKind::NotificationFired => {
                debug!(component, reason, "notification fired");
            }
            EventKind::SnapshotStored => {
                debug!(component, "snapshot stored");
            }
            EventKind::PeerJoined => {
                info!(peer, "peer joined");
            }
            EventKind::PeerLeft => {
                info!(peer, "peer left");
            }
            EventKind::PropagationFailed => {
                warn!(peer, reason, "propagation failed");
            }
            EventKind::ShutdownRequested => {
                info!("shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                info!("all components stopped within grace");
            }
            EventKind::GraceExceeded => {
                warn!(reason, "grace exceeded");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
