//! # Registry: naming, brokering, liveness and mesh membership.
//!
//! A [`Registry`] owns the component records of one naming domain and runs
//! three background tasks, all stopped by its runtime token:
//!
//! ```text
//! Registry::builder(cfg).build()
//!   ├─► subscriber listener : Bus ──► SubscriberSet::emit(&Event)
//!   ├─► reaper              : every base_pulse, demote silent components, recover
//!   └─► mesh listener       : drain the mesh inbox (joins, adverts, withdrawals)
//! ```
//!
//! ## Operation groups
//! - lifecycle: [`register_component`](Registry::register_component),
//!   [`deregister_component`](Registry::deregister_component),
//!   [`update_connection`](Registry::update_connection)
//! - brokering: [`request_connection`](Registry::request_connection),
//!   [`request_connections`](Registry::request_connections)
//! - snapshots: [`enable_state_store`](Registry::enable_state_store),
//!   [`set_component_state`](Registry::set_component_state),
//!   [`get_component_state`](Registry::get_component_state)
//! - administration (credential-gated, `bool` result): start, shutdown,
//!   suspend, resume, kill, recovery multiplier, user management
//! - mesh: [`register_with_registry`](Registry::register_with_registry)
//! - status: [`status_view`](Registry::status_view), [`host_status`](Registry::host_status)

mod admin;
mod broker;
mod builder;
mod lifecycle;
mod mesh;
mod reaper;
mod shutdown;
mod snapshot;
mod status;
mod table;

#[cfg(test)]
mod scenarios;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use broker::{Connection, Constraints};
pub use builder::RegistryBuilder;
pub use lifecycle::Registration;
pub use mesh::PeerLink;
pub use shutdown::wait_for_shutdown_signal;
pub use snapshot::StateSnapshot;
pub use status::{HostStatus, StatusView};

use crate::access::{AccessFacade, MethodSet, RegistryPolicy};
use crate::capability::{Capability, MeshKey, Secret, Verifier};
use crate::component::ComponentRef;
use crate::config::RegistryConfig;
use crate::credentials::UserStore;
use crate::error::{MeshError, MeshResult};
use crate::events::{Bus, Event, EventKind};
use crate::host::{ComponentLauncher, HostStatusProvider};
use crate::identity::ComponentId;

use mesh::Mesh;
use snapshot::SnapshotStore;
use table::{RecordRef, RecordTable};

/// Relaunch in flight: the password handed to the launcher and the
/// back-references the new instance inherits.
struct Pending {
    password: Secret,
    clients: BTreeSet<ComponentId>,
    dependencies: BTreeSet<ComponentId>,
}

/// A component registry.
pub struct Registry {
    cfg: RegistryConfig,
    key: MeshKey,
    capability: Capability,
    facade: AccessFacade,
    methods: MethodSet,
    users: UserStore,
    table: RecordTable,
    snapshots: SnapshotStore,
    pending: Mutex<HashMap<ComponentId, Pending>>,
    mesh: Mesh,
    bus: Bus,
    launcher: Option<Arc<dyn ComponentLauncher>>,
    host: Arc<dyn HostStatusProvider>,
    token: CancellationToken,
}

impl Registry {
    /// Starts building a registry.
    pub fn builder(cfg: RegistryConfig) -> RegistryBuilder {
        RegistryBuilder::new(cfg)
    }

    /// Registry name.
    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// Active configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.cfg
    }

    /// This registry's own capability (used to join peers).
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Verify-only handle on the mesh key.
    pub fn verifier(&self) -> Verifier {
        self.key.verifier()
    }

    /// The credential store.
    pub fn users(&self) -> &UserStore {
        &self.users
    }

    /// Receives events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// True until the registry is shut down.
    pub fn is_up(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub(crate) fn publish(&self, ev: Event) {
        self.bus.publish(ev);
    }

    pub(crate) fn reject(&self, id: Option<&ComponentId>, err: &MeshError) {
        let mut ev = Event::new(EventKind::AccessRejected).with_reason(err.to_string());
        if let Some(id) = id {
            ev = ev.with_component(id);
        }
        self.publish(ev);
    }

    /// Checks a capability-guarded registry operation.
    pub(crate) fn guard(&self, creds: Option<&Capability>, method: &str) -> MeshResult<()> {
        let caller = self.facade.classify("", creds);
        self.facade
            .authorize(&RegistryPolicy, &self.methods, caller.kind, method)
            .inspect_err(|e| self.reject(None, e))
    }

    fn ensure_up(&self) -> MeshResult<()> {
        if self.token.is_cancelled() {
            return Err(MeshError::unavailable(self.name(), self.cfg.rpc_timeout_clamped()));
        }
        Ok(())
    }

    /// Local record of `id` whose password matches.
    pub(crate) async fn authenticate_owner(
        &self,
        id: &ComponentId,
        password: &Secret,
    ) -> MeshResult<RecordRef> {
        let rec = self.table.get(id).await.ok_or_else(|| MeshError::not_found(id))?;
        let r = rec.lock().await;
        if !r.is_local() {
            return Err(MeshError::denied(format!("{id} is owned by another registry")));
        }
        match &r.password {
            Some(p) if p.matches(password) => {}
            _ => {
                let err = MeshError::auth(id.to_string());
                drop(r);
                self.reject(Some(id), &err);
                return Err(err);
            }
        }
        drop(r);
        Ok(rec)
    }

    /// Live reference to a known component.
    pub(crate) async fn resolve(&self, id: &ComponentId) -> Option<ComponentRef> {
        let rec = self.table.get(id).await?;
        let endpoint = rec.lock().await.endpoint.clone();
        Some(endpoint)
    }

    /// Removes `id` from every record's client and dependency sets.
    pub(crate) async fn forget_references(&self, id: &ComponentId) {
        for (_, rec) in self.table.snapshot().await {
            let mut r = rec.lock().await;
            r.clients.remove(id);
            r.dependencies.remove(id);
        }
        debug!(component = %id, "references dropped");
    }
}
