//! # Lifecycle and recovery states.
//!
//! ```text
//! Init ──heartbeat──► Running ──reaper──► Recovering ──heartbeat──► Running
//!                        │   ▲                  │
//!                 suspend│   │resume            └──probes/relaunch failed──► Dead
//!                        ▼   │
//!                      Suspended   (never reaped)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a component record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    /// Registered, no heartbeat received yet.
    Init,
    /// Heartbeating normally.
    Running,
    /// Missed its heartbeat window; recovery in progress.
    Recovering,
    /// Paused by an administrator; exempt from the reaper.
    Suspended,
    /// Recovery failed. Terminal; the id may be registered again.
    Dead,
}

impl ComponentState {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentState::Init => "init",
            ComponentState::Running => "running",
            ComponentState::Recovering => "recovering",
            ComponentState::Suspended => "suspended",
            ComponentState::Dead => "dead",
        }
    }

    /// States the broker may hand out.
    pub fn is_brokerable(&self) -> bool {
        matches!(self, ComponentState::Init | ComponentState::Running)
    }

    /// States the reaper watches for missed heartbeats.
    pub fn is_watched(&self) -> bool {
        matches!(self, ComponentState::Init | ComponentState::Running)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of recovery for a record in (or past) `Recovering`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    /// No recovery in progress.
    #[default]
    Idle,
    /// Liveness probes are running.
    Probing,
    /// Probe answered; waiting for the next heartbeat.
    AwaitingHeartbeat,
    /// The launcher was asked to restart the component.
    Relaunched,
    /// Recovery gave up.
    Failed,
}
