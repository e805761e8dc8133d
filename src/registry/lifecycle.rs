//! # Registration, deregistration and heartbeats.
//!
//! ## Registration rules
//! - any valid user may register a component; the registry issues its password
//! - a live id is a [`MeshError::Conflict`]; a `Dead` record is replaced
//! - a relaunched instance presents the password pre-issued for it and takes
//!   over the old record together with its clients and dependencies
//!
//! ## Heartbeats
//! `update_connection` stamps the record (never backwards) and returns its
//! state. `Init` and `Recovering` become `Running`; `Suspended` and `Dead`
//! stay as they are.

use tokio::time::Instant;

use crate::access::methods;
use crate::capability::{Capability, CapabilityKind, Secret};
use crate::component::ComponentRef;
use crate::error::{MeshError, MeshResult};
use crate::events::{Event, EventKind};
use crate::identity::{ComponentId, ComponentInfo, ComponentState, RecoveryState};
use crate::registry::Registry;
use crate::registry::mesh::{Advert, MeshMessage};
use crate::registry::table::{ComponentRecord, Origin};

/// What a component receives on successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Registered id.
    pub id: ComponentId,
    /// The component's own capability.
    pub capability: Capability,
    /// Password for deregistration and the snapshot store.
    pub password: Secret,
}

impl Registry {
    /// Registers a component served by `endpoint`.
    ///
    /// `issued` is the password pre-issued for a relaunch; pass `None` for a
    /// fresh start.
    pub async fn register_component(
        &self,
        uid: &str,
        password: &str,
        info: ComponentInfo,
        endpoint: ComponentRef,
        issued: Option<Secret>,
    ) -> MeshResult<Registration> {
        self.ensure_up()?;
        let id = info.id.clone();
        self.users
            .validate(uid, password)
            .await
            .inspect_err(|e| self.registration_rejected(&id, e))?;

        if endpoint.id() != &id {
            let err = MeshError::invalid(format!("endpoint {} serves another id", endpoint.id()));
            self.registration_rejected(&id, &err);
            return Err(err);
        }
        if !info.host_allowed() {
            let err = MeshError::invalid(format!("{id} may not run on host {}", info.host));
            self.registration_rejected(&id, &err);
            return Err(err);
        }

        let relaunch = match &issued {
            Some(given) => {
                let pending = self.pending.lock().await;
                match pending.get(&id) {
                    Some(p) if p.password.matches(given) => true,
                    _ => {
                        let err = MeshError::auth(id.to_string());
                        drop(pending);
                        self.registration_rejected(&id, &err);
                        return Err(err);
                    }
                }
            }
            None => false,
        };

        let secret = issued.unwrap_or_else(Secret::generate);
        let multiplier = match info.recovery_multiplier {
            0 => self.cfg.default_recovery_multiplier.max(1),
            m => m,
        };
        let mut record = ComponentRecord::new(
            info.clone(),
            multiplier,
            Origin::Local,
            endpoint.clone(),
            Some(secret.clone()),
        );
        record.registered_by = Some(uid.to_string());
        if relaunch {
            if let Some(p) = self.pending.lock().await.get(&id) {
                record.clients = p.clients.clone();
                record.dependencies = p.dependencies.clone();
            }
        }

        let inserted = self
            .table
            .insert_unless(record, |existing| {
                let replaceable =
                    existing.state == ComponentState::Dead || (relaunch && existing.is_local());
                !replaceable
            })
            .await;
        if inserted.is_none() {
            let err = MeshError::Conflict { id: id.to_string() };
            self.registration_rejected(&id, &err);
            return Err(err);
        }
        if relaunch {
            self.pending.lock().await.remove(&id);
        }
        if info.state_store {
            self.snapshots.enable(&id).await;
        }

        self.publish(
            Event::new(EventKind::ComponentRegistered)
                .with_component(&id)
                .with_peer(self.name()),
        );
        self.mesh
            .broadcast(MeshMessage::Advertise {
                from: self.name().to_string(),
                advert: Advert {
                    info,
                    state: ComponentState::Init,
                    recovery_multiplier: multiplier,
                    endpoint,
                },
            })
            .await;

        Ok(Registration {
            capability: self.key.issue(CapabilityKind::Component(id.clone())),
            id,
            password: secret,
        })
    }

    /// Removes a local component. Requires the password issued at registration.
    pub async fn deregister_component(&self, id: &ComponentId, password: &Secret) -> MeshResult<()> {
        let rec = self.authenticate_owner(id, password).await?;
        if self.table.remove_if_same(id, &rec).await {
            self.forget_references(id).await;
            self.publish(
                Event::new(EventKind::ComponentDeregistered)
                    .with_component(id)
                    .with_reason("deregistered"),
            );
            self.mesh
                .broadcast(MeshMessage::Withdraw {
                    from: self.name().to_string(),
                    id: id.clone(),
                })
                .await;
        }
        Ok(())
    }

    /// Heartbeat from a local component. Returns the record's state afterwards.
    pub async fn update_connection(
        &self,
        creds: Option<&Capability>,
        id: &ComponentId,
    ) -> MeshResult<ComponentState> {
        self.ensure_up()?;
        self.guard(creds, methods::UPDATE_CONNECTION)?;
        let rec = self.table.get(id).await.ok_or_else(|| MeshError::not_found(id))?;

        let (before, after) = {
            let mut r = rec.lock().await;
            if !r.is_local() {
                return Err(MeshError::denied(format!(
                    "{id} heartbeats to {}",
                    r.origin.registry(self.name())
                )));
            }
            r.stamp(Instant::now());
            let before = r.state;
            match r.state {
                ComponentState::Init => r.state = ComponentState::Running,
                ComponentState::Recovering => {
                    r.state = ComponentState::Running;
                    r.recovery = RecoveryState::Idle;
                    r.recovery_started = None;
                }
                ComponentState::Running | ComponentState::Suspended | ComponentState::Dead => {}
            }
            (before, r.state)
        };

        if before != after {
            if before == ComponentState::Recovering {
                self.publish(Event::new(EventKind::ComponentRecovered).with_component(id));
            }
            self.publish(
                Event::new(EventKind::StateChanged)
                    .with_component(id)
                    .with_state(after)
                    .with_reason("heartbeat"),
            );
            self.propagate_state(id, after).await;
        }
        Ok(after)
    }

    fn registration_rejected(&self, id: &ComponentId, err: &MeshError) {
        self.publish(
            Event::new(EventKind::RegistrationRejected)
                .with_component(id)
                .with_reason(err.to_string()),
        );
    }
}
