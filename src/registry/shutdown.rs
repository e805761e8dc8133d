//! # Administrative shutdown.
//!
//! ```text
//! serve():  wait_for_shutdown_signal() ──► shutdown()
//!
//! shutdown():
//!   ├─► publish ShutdownRequested
//!   ├─► `shutdown` built-in to every live local component
//!   ├─► wait up to cfg.grace for their records to disappear
//!   │      ├─ all gone  ─► publish AllStoppedWithin
//!   │      └─ timeout   ─► publish GraceExceeded, report the stuck ids
//!   ├─► tell peers we are leaving
//!   └─► cancel the runtime token (reaper, mesh and subscriber listeners stop)
//! ```

use std::time::Duration;

use serde_json::Value;
use tokio::time;
use tracing::{debug, info};

use crate::access::methods;
use crate::error::{MeshError, MeshResult};
use crate::events::{Event, EventKind};
use crate::identity::ComponentState;
use crate::registry::Registry;
use crate::registry::mesh::MeshMessage;

const POLL: Duration = Duration::from_millis(10);

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => r?,
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
///
/// Returns `Ok(())` when Ctrl-C is received, or `Err` if registration fails.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

impl Registry {
    /// Runs until a termination signal, then shuts down gracefully.
    pub async fn serve(&self) -> MeshResult<()> {
        tokio::select! {
            r = wait_for_shutdown_signal() => {
                if let Err(e) = r {
                    debug!(error = %e, "signal listener failed; shutting down");
                }
            }
            _ = self.token.cancelled() => return Ok(()),
        }
        self.shutdown().await
    }

    /// Stops every local component, leaves the mesh and stops background tasks.
    ///
    /// Returns [`MeshError::GraceExceeded`] if some components were still
    /// registered when `cfg.grace` ran out; the registry stops regardless.
    pub async fn shutdown(&self) -> MeshResult<()> {
        if self.token.is_cancelled() {
            return Ok(());
        }
        self.publish(Event::new(EventKind::ShutdownRequested));

        let timeout = self.cfg.rpc_timeout_clamped();
        for (id, rec) in self.table.snapshot().await {
            let endpoint = {
                let r = rec.lock().await;
                if !r.is_local() || r.state == ComponentState::Dead {
                    continue;
                }
                r.endpoint.clone()
            };
            let call = endpoint.call(self.name(), Some(&self.capability), methods::SHUTDOWN, Value::Null);
            match time::timeout(timeout, call).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(component = %id, error = %e, "shutdown request failed"),
                Err(_) => debug!(component = %id, "shutdown request timed out"),
            }
        }

        let grace = self.cfg.grace;
        let res = match time::timeout(grace, self.wait_local_gone()).await {
            Ok(()) => {
                self.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck = self.live_local_ids().await;
                self.publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")));
                Err(MeshError::GraceExceeded { grace, stuck })
            }
        };

        self.mesh
            .broadcast(MeshMessage::Leave {
                from: self.name().to_string(),
            })
            .await;
        self.token.cancel();
        info!(registry = self.name(), "registry stopped");
        res
    }

    async fn wait_local_gone(&self) {
        while !self.live_local_ids().await.is_empty() {
            time::sleep(POLL).await;
        }
    }

    async fn live_local_ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (id, rec) in self.table.snapshot().await {
            let r = rec.lock().await;
            if r.is_local() && r.state != ComponentState::Dead {
                out.push(id.to_string());
            }
        }
        out
    }
}
