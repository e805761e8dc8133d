//! # ComponentRuntime: drives one component's main loop.
//!
//! Registers the component, restores its snapshot if one is stored, then runs:
//!
//! ```text
//! loop {
//!   ├─► wait for tick (or kill / shutdown)
//!   ├─► heartbeat ─► registry.update_connection(id)
//!   │       ├─ Err ──► retry with BackoffPolicy while the loop period allows
//!   │       ├─ Dead ─► exit
//!   │       ├─ Suspended ─► pause, any other state ─► unpause
//!   │       └─ NotFound / rejected ─► exit (record is gone)
//!   ├─► suspended? ─► skip the rest of this tick
//!   ├─► component.cycle(ctx)   (Fatal ─► exit, Fail ─► warn and go on)
//!   └─► evaluate notifications ─► call back requesters
//! }
//! ```
//!
//! ## Rules
//! - Kill exits immediately: no cleanup, no deregistration.
//! - Every other exit runs [`Component::cleanup`], drops notification
//!   subscriptions and deregisters (unless the record is already gone).
//! - Heartbeat retries never overrun the loop period.

use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::capability::{Capability, Secret};
use crate::component::endpoint::ComponentEndpoint;
use crate::component::{Component, ComponentContext, ComponentRef};
use crate::config::ComponentConfig;
use crate::credentials::Login;
use crate::error::{MeshError, MeshResult};
use crate::events::{Event, EventKind};
use crate::host::{HostStatusProvider, LocalHost, LogSource};
use crate::identity::{ComponentId, ComponentInfo, ComponentState};
use crate::registry::Registry;

/// Why a runtime left its loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Graceful shutdown requested.
    Shutdown,
    /// Hard kill.
    Killed,
    /// The registry declared the component dead.
    Dead,
    /// The registry no longer knows the component.
    Deregistered,
    /// `cycle` returned a fatal error.
    Fatal(String),
    /// The runtime task panicked.
    Panicked,
}

impl ExitReason {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Shutdown => "shutdown",
            ExitReason::Killed => "killed",
            ExitReason::Dead => "dead",
            ExitReason::Deregistered => "deregistered",
            ExitReason::Fatal(_) => "fatal",
            ExitReason::Panicked => "panicked",
        }
    }
}

enum Beat {
    State(ComponentState),
    Gone,
    Missed,
    Interrupted,
}

/// Starts components against a registry.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use meshvisor::{
///     AccessPolicy, Component, ComponentId, ComponentInfo, ComponentRuntime, KillAuthorization,
///     Login, ReadinessCheck, Registry, RegistryConfig, User,
/// };
///
/// struct Idle;
/// impl AccessPolicy for Idle {}
/// impl ReadinessCheck for Idle {}
/// impl KillAuthorization for Idle {}
/// impl Component for Idle {}
///
/// # async fn demo() -> Result<(), meshvisor::MeshError> {
/// let registry = Registry::builder(RegistryConfig::named("r1"))
///     .with_user(User::component("worker", "pw", ["all"]))
///     .build();
///
/// let info = ComponentInfo::new(ComponentId::new("Idle", "one")?).with_access(["all"]);
/// let handle = ComponentRuntime::new(registry, Login::new("worker", "pw"))
///     .start(info, Arc::new(Idle))
///     .await?;
///
/// handle.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct ComponentRuntime {
    registry: Arc<Registry>,
    login: Login,
    cfg: ComponentConfig,
    host: Arc<dyn HostStatusProvider>,
    logs: Option<Arc<dyn LogSource>>,
    issued: Option<Secret>,
}

impl ComponentRuntime {
    /// Runtime registering with `registry` as `login`.
    pub fn new(registry: Arc<Registry>, login: Login) -> Self {
        Self {
            registry,
            login,
            cfg: ComponentConfig::default(),
            host: Arc::new(LocalHost::default()),
            logs: None,
            issued: None,
        }
    }

    /// Overrides the component configuration.
    pub fn with_config(mut self, cfg: ComponentConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Host statistics for `requestHostInfo`.
    pub fn with_host(mut self, host: Arc<dyn HostStatusProvider>) -> Self {
        self.host = host;
        self
    }

    /// Log source for `tailLog`.
    pub fn with_logs(mut self, logs: Arc<dyn LogSource>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Registers with a password pre-issued by the registry (relaunch).
    pub fn with_password(mut self, password: Secret) -> Self {
        self.issued = Some(password);
        self
    }

    /// Registers `component` and spawns its main loop.
    pub async fn start(
        self,
        info: ComponentInfo,
        component: Arc<dyn Component>,
    ) -> MeshResult<ComponentHandle> {
        let endpoint = ComponentEndpoint::new(
            info.clone(),
            component.clone(),
            self.registry.verifier(),
            &self.cfg,
            self.host.clone(),
            self.logs.clone(),
        );
        let remote: ComponentRef = endpoint.clone();
        let reg = self
            .registry
            .register_component(&self.login.uid, &self.login.password, info, remote, self.issued)
            .await?;

        match self.registry.get_component_state(&reg.id, &reg.password).await {
            Ok(snapshot) => {
                debug!(component = %reg.id, "restoring snapshot");
                component.restore(snapshot.into_entries()).await;
            }
            Err(MeshError::StaleState { .. }) => {}
            Err(e) => return Err(e),
        }

        let ctx = ComponentContext {
            id: reg.id.clone(),
            login: self.login,
            password: reg.password.clone(),
            capability: reg.capability.clone(),
            registry: self.registry,
            token: endpoint.control.shutdown.clone(),
        };
        let driver = Driver {
            component,
            endpoint: endpoint.clone(),
            cfg: self.cfg,
            ctx,
        };
        let join = tokio::spawn(driver.run());

        Ok(ComponentHandle {
            id: reg.id,
            capability: reg.capability,
            password: reg.password,
            endpoint,
            join,
        })
    }
}

/// Handle to a running component.
pub struct ComponentHandle {
    id: ComponentId,
    capability: Capability,
    password: Secret,
    endpoint: Arc<ComponentEndpoint>,
    join: JoinHandle<ExitReason>,
}

impl ComponentHandle {
    /// Registered id.
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// The component's own capability.
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Registry-issued password.
    pub fn password(&self) -> &Secret {
        &self.password
    }

    /// The component as a remote reference.
    pub fn endpoint(&self) -> ComponentRef {
        self.endpoint.clone()
    }

    /// True while the main loop is paused.
    pub fn is_suspended(&self) -> bool {
        self.endpoint.is_suspended()
    }

    /// True once the main loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Requests a graceful stop.
    pub fn shutdown(&self) {
        self.endpoint.control.shutdown.cancel();
    }

    /// Stops immediately without cleanup.
    pub fn kill(&self) {
        self.endpoint.control.kill.cancel();
    }

    /// Waits for the main loop to exit.
    pub async fn join(self) -> ExitReason {
        self.join.await.unwrap_or(ExitReason::Panicked)
    }

    /// Graceful stop, then wait.
    pub async fn stop(self) -> ExitReason {
        self.shutdown();
        self.join().await
    }
}

struct Driver {
    component: Arc<dyn Component>,
    endpoint: Arc<ComponentEndpoint>,
    cfg: ComponentConfig,
    ctx: ComponentContext,
}

impl Driver {
    async fn run(self) -> ExitReason {
        let control = &self.endpoint.control;
        let mut ticker = time::interval(self.cfg.loop_period.max(time::Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                biased;
                _ = control.kill.cancelled() => break ExitReason::Killed,
                _ = control.shutdown.cancelled() => break ExitReason::Shutdown,
                _ = ticker.tick() => {}
            }

            match self.heartbeat().await {
                Beat::State(ComponentState::Dead) => break ExitReason::Dead,
                Beat::State(state) => {
                    let paused = state == ComponentState::Suspended;
                    control.suspended.send_if_modified(|s| {
                        let changed = *s != paused;
                        *s = paused;
                        changed
                    });
                }
                Beat::Gone => break ExitReason::Deregistered,
                Beat::Missed => {
                    warn!(component = %self.ctx.id, "heartbeat missed for this period");
                }
                Beat::Interrupted => continue,
            }

            if control.is_suspended() {
                continue;
            }

            let res = tokio::select! {
                biased;
                _ = control.kill.cancelled() => break ExitReason::Killed,
                r = self.component.cycle(&self.ctx) => r,
            };
            match res {
                Ok(()) => {}
                Err(e) if e.is_fatal() => break ExitReason::Fatal(e.as_message()),
                Err(e) => warn!(component = %self.ctx.id, error = %e, "cycle failed"),
            }

            self.fire_notifications().await;
        };

        if reason != ExitReason::Killed {
            self.component.cleanup().await;
            self.endpoint.notify.clear().await;
            if reason != ExitReason::Deregistered {
                if let Err(e) = self
                    .ctx
                    .registry
                    .deregister_component(&self.ctx.id, &self.ctx.password)
                    .await
                {
                    debug!(component = %self.ctx.id, error = %e, "deregistration on exit failed");
                }
            }
        }

        control.exited.cancel();
        self.ctx.registry.publish(
            Event::new(EventKind::ComponentExited)
                .with_component(&self.ctx.id)
                .with_reason(reason.as_str()),
        );
        reason
    }

    /// One heartbeat, retried inside the current loop period.
    async fn heartbeat(&self) -> Beat {
        let control = &self.endpoint.control;
        let started = Instant::now();
        let timeout = self.cfg.rpc_timeout_clamped();
        let mut attempt = 0u32;

        loop {
            let res = time::timeout(
                timeout,
                self.ctx.registry.update_connection(None, &self.ctx.id),
            )
            .await;
            match res {
                Ok(Ok(state)) => return Beat::State(state),
                Ok(Err(MeshError::NotFound { .. })) => return Beat::Gone,
                Ok(Err(e)) if e.is_access_failure() => return Beat::Gone,
                Ok(Err(e)) => debug!(component = %self.ctx.id, error = %e, attempt, "heartbeat failed"),
                Err(_elapsed) => debug!(component = %self.ctx.id, attempt, "heartbeat timed out"),
            }

            let remaining = self.cfg.loop_period.saturating_sub(started.elapsed());
            let Some(delay) = self.cfg.heartbeat_backoff.within_budget(attempt, remaining) else {
                return Beat::Missed;
            };
            attempt += 1;

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = control.shutdown.cancelled() => return Beat::Interrupted,
            }
        }
    }

    /// Evaluates subscriptions and calls back requesters whose conditions just became true.
    async fn fire_notifications(&self) {
        let component = &self.component;
        let due = self
            .endpoint
            .notify
            .evaluate(|expr| component.value(expr))
            .await;

        for fired in due {
            let Some(target) = self.ctx.registry.resolve(&fired.requester).await else {
                self.drop_requester(&fired.requester, "requester unknown").await;
                continue;
            };
            let args = json!({
                "provider": self.ctx.id.to_string(),
                "values": fired.values,
            });
            let res = time::timeout(
                self.cfg.rpc_timeout_clamped(),
                target.call(
                    &self.ctx.login.uid,
                    Some(&self.ctx.capability),
                    &fired.callback,
                    args,
                ),
            )
            .await;

            match res {
                Ok(Ok(_)) => self.ctx.registry.publish(
                    Event::new(EventKind::NotificationFired)
                        .with_component(&self.ctx.id)
                        .with_reason(format!("{} {}", fired.requester, fired.callback)),
                ),
                Ok(Err(MeshError::RemoteUnavailable { .. })) | Err(_) => {
                    self.drop_requester(&fired.requester, "requester unreachable").await;
                }
                Ok(Err(e)) => {
                    warn!(component = %self.ctx.id, requester = %fired.requester, error = %e, "notification callback failed");
                }
            }
        }
    }

    async fn drop_requester(&self, requester: &ComponentId, why: &str) {
        let n = self.endpoint.notify.drop_requester(requester).await;
        warn!(component = %self.ctx.id, %requester, dropped = n, why, "dropping subscriptions");
    }
}
