//! # Reaper: missed-heartbeat detection and recovery.
//!
//! Every `base_pulse` the reaper scans local records:
//!
//! ```text
//! Init/Running, heartbeat age >= base_pulse × multiplier
//!   └─► Recovering (Probing) ─► spawn recovery
//!         ├─► dependencyImpaired to every client
//!         ├─► is_up probe × recovery_probes (probe_backoff between)
//!         │     └─ answered ─► AwaitingHeartbeat
//!         └─► all failed
//!               ├─ recoverable + launcher ─► Relaunched (pre-issued password)
//!               └─ otherwise ───────────► Dead
//!
//! Recovering, not Probing, one window after recovery started ─► Dead
//! ```
//!
//! Replicated records are never reaped here; their origin registry owns them.
//! Suspended records are exempt.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::access::methods;
use crate::capability::Secret;
use crate::events::{Event, EventKind};
use crate::host::LaunchRequest;
use crate::identity::{ComponentId, ComponentState, RecoveryState};
use crate::registry::table::RecordRef;
use crate::registry::{Pending, Registry};

impl Registry {
    pub(crate) fn spawn_reaper(self: &Arc<Self>) {
        let me = Arc::clone(self);
        let token = self.token.clone();
        let pulse = self.cfg.base_pulse.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = time::interval(pulse);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => me.reap().await,
                }
            }
        });
    }

    /// One scan over the local records.
    pub(crate) async fn reap(self: &Arc<Self>) {
        let now = Instant::now();
        for (id, rec) in self.table.snapshot().await {
            let mut r = rec.lock().await;
            if !r.is_local() {
                continue;
            }
            let window = self.cfg.recovery_window(r.recovery_multiplier);
            let age = now.saturating_duration_since(r.last_heartbeat);

            if r.state.is_watched() && age >= window {
                r.state = ComponentState::Recovering;
                r.recovery = RecoveryState::Probing;
                r.recovery_started = Some(now);
                drop(r);

                self.publish(
                    Event::new(EventKind::RecoveryStarted)
                        .with_component(&id)
                        .with_reason(format!("heartbeat age {:.1}s", age.as_secs_f64())),
                );
                self.publish(
                    Event::new(EventKind::StateChanged)
                        .with_component(&id)
                        .with_state(ComponentState::Recovering)
                        .with_reason("heartbeat timeout"),
                );
                self.propagate_state(&id, ComponentState::Recovering).await;

                let me = Arc::clone(self);
                tokio::spawn(async move { me.recover(id, rec).await });
                continue;
            }

            let overdue = r
                .recovery_started
                .is_some_and(|t| now.saturating_duration_since(t) >= window);
            if r.state == ComponentState::Recovering && r.recovery != RecoveryState::Probing && overdue {
                drop(r);
                self.declare_dead(&id, &rec, "no heartbeat after recovery").await;
            }
        }
    }

    async fn recover(self: Arc<Self>, id: ComponentId, rec: RecordRef) {
        let timeout = self.cfg.rpc_timeout_clamped();
        let (clients, endpoint) = {
            let r = rec.lock().await;
            (r.clients.clone(), r.endpoint.clone())
        };

        for client in clients {
            let Some(target) = self.resolve(&client).await else {
                continue;
            };
            let call = target.call(
                self.name(),
                Some(&self.capability),
                methods::DEPENDENCY_IMPAIRED,
                json!({ "component": id.to_string() }),
            );
            match time::timeout(timeout, call).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(component = %id, %client, error = %e, "dependencyImpaired failed"),
                Err(_) => debug!(component = %id, %client, "dependencyImpaired timed out"),
            }
        }

        let probes = self.cfg.recovery_probes;
        for attempt in 0..probes {
            if !self.still_recovering(&id, &rec).await {
                return;
            }
            let up = time::timeout(timeout, endpoint.is_up()).await.unwrap_or(false);
            if up {
                let mut r = rec.lock().await;
                if r.state == ComponentState::Recovering {
                    r.recovery = RecoveryState::AwaitingHeartbeat;
                    r.recovery_started = Some(Instant::now());
                }
                debug!(component = %id, attempt = attempt + 1, "probe answered");
                return;
            }

            let mut ev = Event::new(EventKind::ProbeFailed)
                .with_component(&id)
                .with_attempt(attempt + 1);
            if attempt + 1 < probes {
                let delay = self.cfg.probe_backoff.next(attempt);
                ev = ev.with_delay(delay);
                self.publish(ev);
                tokio::select! {
                    _ = time::sleep(delay) => {}
                    _ = self.token.cancelled() => return,
                }
            } else {
                self.publish(ev);
            }
        }

        if !self.still_recovering(&id, &rec).await {
            return;
        }
        if self.relaunch(&id, &rec).await {
            return;
        }
        self.declare_dead(&id, &rec, "probes exhausted").await;
    }

    /// Hands a recoverable component to the launcher. `false` if it could not be.
    async fn relaunch(&self, id: &ComponentId, rec: &RecordRef) -> bool {
        let Some(launcher) = self.launcher.clone() else {
            return false;
        };
        let password = Secret::generate();
        let (info, clients, dependencies) = {
            let mut r = rec.lock().await;
            if !r.info.recoverable {
                return false;
            }
            r.recovery = RecoveryState::Relaunched;
            r.recovery_started = Some(Instant::now());
            (r.info.clone(), r.clients.clone(), r.dependencies.clone())
        };
        self.pending.lock().await.insert(
            id.clone(),
            Pending {
                password: password.clone(),
                clients,
                dependencies,
            },
        );

        let host = info.host.clone();
        let req = LaunchRequest {
            id: id.clone(),
            info,
            password,
            registry: self.name().to_string(),
            relaunch: true,
        };
        match launcher.launch(req).await {
            Ok(()) => {
                self.publish(
                    Event::new(EventKind::ComponentRelaunched)
                        .with_component(id)
                        .with_reason(host),
                );
                true
            }
            Err(e) => {
                warn!(component = %id, error = %e, "relaunch failed");
                self.pending.lock().await.remove(id);
                false
            }
        }
    }

    /// True while `rec` is still the table's record for `id` and still recovering.
    async fn still_recovering(&self, id: &ComponentId, rec: &RecordRef) -> bool {
        let current = match self.table.get(id).await {
            Some(cur) => Arc::ptr_eq(&cur, rec),
            None => false,
        };
        current && rec.lock().await.state == ComponentState::Recovering
    }

    async fn declare_dead(&self, id: &ComponentId, rec: &RecordRef, why: &str) {
        {
            let mut r = rec.lock().await;
            if r.state != ComponentState::Recovering {
                return;
            }
            r.state = ComponentState::Dead;
            r.recovery = RecoveryState::Failed;
            r.recovery_started = None;
        }
        self.pending.lock().await.remove(id);

        self.publish(Event::new(EventKind::ComponentDead).with_component(id).with_reason(why));
        self.publish(
            Event::new(EventKind::StateChanged)
                .with_component(id)
                .with_state(ComponentState::Dead)
                .with_reason(why),
        );
        self.propagate_state(id, ComponentState::Dead).await;
    }
}
