//! # Administrative operations.
//!
//! Every operation here takes an administrator's uid and password and
//! answers `Ok(bool)`: `true` if something changed, `false` if the request
//! was valid but had nothing to act on. Credential failures are errors.
//!
//! Component control goes through the component's endpoint with this
//! registry's own capability, which the default policies treat as
//! all-powerful.

use std::collections::BTreeSet;

use serde_json::Value;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::access::methods;
use crate::capability::Secret;
use crate::component::ComponentRef;
use crate::credentials::{User, UserUpdate};
use crate::error::{MeshError, MeshResult};
use crate::events::{Event, EventKind};
use crate::host::LaunchRequest;
use crate::identity::{ComponentId, ComponentInfo, ComponentState, RecoveryState};
use crate::registry::broker::Constraints;
use crate::registry::table::RecordRef;
use crate::registry::{Pending, Registry};

impl Registry {
    async fn admin(&self, uid: &str, password: &str) -> MeshResult<()> {
        self.users
            .validate_admin(uid, password)
            .await
            .map(|_| ())
            .inspect_err(|e| self.reject(None, e))
    }

    async fn local_record(&self, id: &ComponentId) -> MeshResult<RecordRef> {
        let rec = self.table.get(id).await.ok_or_else(|| MeshError::not_found(id))?;
        if !rec.lock().await.is_local() {
            return Err(MeshError::denied(format!("{id} is owned by another registry")));
        }
        Ok(rec)
    }

    /// Calls a built-in on a component endpoint as this registry.
    async fn control(&self, endpoint: &ComponentRef, method: &str) -> MeshResult<Value> {
        let timeout = self.cfg.rpc_timeout_clamped();
        time::timeout(
            timeout,
            endpoint.call(self.name(), Some(&self.capability), method, Value::Null),
        )
        .await
        .map_err(|_| MeshError::unavailable(endpoint.id(), timeout))?
    }

    /// Asks the launcher to start a component.
    ///
    /// The launched process may register with the pre-issued password in
    /// [`LaunchRequest::password`]. `false` without a launcher.
    pub async fn start_component(&self, uid: &str, password: &str, info: ComponentInfo) -> MeshResult<bool> {
        self.admin(uid, password).await?;
        let Some(launcher) = self.launcher.clone() else {
            return Ok(false);
        };
        if !info.host_allowed() {
            return Err(MeshError::invalid(format!("{} may not run on host {}", info.id, info.host)));
        }
        if let Some(rec) = self.table.get(&info.id).await {
            if rec.lock().await.state != ComponentState::Dead {
                return Err(MeshError::Conflict {
                    id: info.id.to_string(),
                });
            }
        }

        let id = info.id.clone();
        let secret = Secret::generate();
        self.pending.lock().await.insert(
            id.clone(),
            Pending {
                password: secret.clone(),
                clients: BTreeSet::new(),
                dependencies: BTreeSet::new(),
            },
        );
        let req = LaunchRequest {
            id: id.clone(),
            info,
            password: secret,
            registry: self.name().to_string(),
            relaunch: false,
        };
        if let Err(e) = launcher.launch(req).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }
        info!(component = %id, "launch requested");
        Ok(true)
    }

    /// Gracefully stops every component matching `constraints`.
    ///
    /// `false` if nothing matched.
    pub async fn shutdown_components(
        &self,
        uid: &str,
        password: &str,
        constraints: &Constraints,
    ) -> MeshResult<bool> {
        self.admin(uid, password).await?;
        let mut targets = Vec::new();
        for (_, rec) in self.table.snapshot().await {
            let r = rec.lock().await;
            if r.state != ComponentState::Dead
                && constraints.matches(&r.info, r.origin.registry(self.name()))
            {
                targets.push(r.endpoint.clone());
            }
        }
        if targets.is_empty() {
            return Ok(false);
        }
        for endpoint in targets {
            if let Err(e) = self.control(&endpoint, methods::SHUTDOWN).await {
                debug!(component = %endpoint.id(), error = %e, "shutdown request failed");
            }
        }
        Ok(true)
    }

    /// Pauses a local component. Suspended components are never reaped.
    pub async fn suspend_component(&self, uid: &str, password: &str, id: &ComponentId) -> MeshResult<bool> {
        self.admin(uid, password).await?;
        let rec = self.local_record(id).await?;
        let endpoint = {
            let mut r = rec.lock().await;
            if matches!(r.state, ComponentState::Suspended | ComponentState::Dead) {
                return Ok(false);
            }
            r.state = ComponentState::Suspended;
            r.recovery = RecoveryState::Idle;
            r.recovery_started = None;
            r.endpoint.clone()
        };
        if let Err(e) = self.control(&endpoint, methods::SUSPEND).await {
            warn!(component = %id, error = %e, "suspend not acknowledged; next heartbeat pauses the loop");
        }
        self.state_changed(id, ComponentState::Suspended, "suspended by admin").await;
        Ok(true)
    }

    /// Resumes a suspended local component.
    pub async fn resume_component(&self, uid: &str, password: &str, id: &ComponentId) -> MeshResult<bool> {
        self.admin(uid, password).await?;
        let rec = self.local_record(id).await?;
        let endpoint = {
            let mut r = rec.lock().await;
            if r.state != ComponentState::Suspended {
                return Ok(false);
            }
            r.state = ComponentState::Running;
            r.stamp(Instant::now());
            r.endpoint.clone()
        };
        if let Err(e) = self.control(&endpoint, methods::RESUME).await {
            warn!(component = %id, error = %e, "resume not acknowledged; next heartbeat resumes the loop");
        }
        self.state_changed(id, ComponentState::Running, "resumed by admin").await;
        Ok(true)
    }

    /// Hard-kills a component. The record stays; the reaper takes it from there.
    pub async fn kill_component(&self, uid: &str, password: &str, id: &ComponentId) -> MeshResult<bool> {
        self.admin(uid, password).await?;
        let endpoint = self.resolve(id).await.ok_or_else(|| MeshError::not_found(id))?;
        let killed = self
            .control(&endpoint, methods::KILL)
            .await?
            .as_bool()
            .unwrap_or(false);
        if killed {
            self.publish(Event::new(EventKind::ComponentKilled).with_component(id));
        }
        Ok(killed)
    }

    /// Changes how many pulses a local component may miss before recovery.
    pub async fn set_recovery_multiplier(
        &self,
        uid: &str,
        password: &str,
        id: &ComponentId,
        multiplier: u32,
    ) -> MeshResult<bool> {
        self.admin(uid, password).await?;
        if multiplier == 0 {
            return Err(MeshError::invalid("recovery multiplier must be at least 1"));
        }
        let rec = self.local_record(id).await?;
        let mut r = rec.lock().await;
        if r.recovery_multiplier == multiplier {
            return Ok(false);
        }
        r.recovery_multiplier = multiplier;
        Ok(true)
    }

    /// Adds a user. `false` if the uid exists.
    pub async fn add_user(&self, uid: &str, password: &str, user: User) -> MeshResult<bool> {
        self.admin(uid, password).await?;
        Ok(self.users.add_user(user).await)
    }

    /// Removes a non-admin user.
    pub async fn del_user(&self, uid: &str, password: &str, target: &str) -> MeshResult<bool> {
        self.admin(uid, password).await?;
        Ok(self.users.del_user(target).await)
    }

    /// Adds an administrator or promotes an existing user.
    pub async fn add_admin(&self, uid: &str, password: &str, user: User) -> MeshResult<bool> {
        self.admin(uid, password).await?;
        Ok(self.users.add_admin(user).await)
    }

    /// Removes an administrator; the last one stays.
    pub async fn del_admin(&self, uid: &str, password: &str, target: &str) -> MeshResult<bool> {
        self.admin(uid, password).await?;
        Ok(self.users.del_admin(target).await)
    }

    /// Changes a user's password or access types.
    pub async fn mod_user(
        &self,
        uid: &str,
        password: &str,
        target: &str,
        update: UserUpdate,
    ) -> MeshResult<bool> {
        self.admin(uid, password).await?;
        Ok(self.users.mod_user(target, update).await)
    }

    async fn state_changed(&self, id: &ComponentId, state: ComponentState, why: &str) {
        self.publish(
            Event::new(EventKind::StateChanged)
                .with_component(id)
                .with_state(state)
                .with_reason(why),
        );
        self.propagate_state(id, state).await;
    }
}

