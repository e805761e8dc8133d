use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast::error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::access::{AccessFacade, AccessTarget, MethodSet};
use crate::capability::{CapabilityKind, MeshKey};
use crate::config::RegistryConfig;
use crate::credentials::{User, UserStore};
use crate::events::Bus;
use crate::host::{ComponentLauncher, HostStatusProvider, LocalHost};
use crate::subscribers::{Subscribe, SubscriberSet};

use super::Registry;
use super::mesh::Mesh;
use super::snapshot::SnapshotStore;
use super::table::RecordTable;

/// Builder for a [`Registry`].
pub struct RegistryBuilder {
    cfg: RegistryConfig,
    key: Option<MeshKey>,
    users: Vec<User>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    launcher: Option<Arc<dyn ComponentLauncher>>,
    host: Option<Arc<dyn HostStatusProvider>>,
}

impl RegistryBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: RegistryConfig) -> Self {
        Self {
            cfg,
            key: None,
            users: Vec::new(),
            subscribers: Vec::new(),
            launcher: None,
            host: None,
        }
    }

    /// Mesh key shared with peer registries. A random key is used otherwise,
    /// which only works for a registry without peers.
    pub fn with_key(mut self, key: MeshKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Adds a user (or administrator) to the credential store.
    pub fn with_user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    /// Adds several users.
    pub fn with_users(mut self, users: impl IntoIterator<Item = User>) -> Self {
        self.users.extend(users);
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive registry events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Launcher used by `start_component` and by recovery relaunches.
    pub fn with_launcher(mut self, launcher: Arc<dyn ComponentLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Host statistics for `host_status`.
    pub fn with_host_status(mut self, host: Arc<dyn HostStatusProvider>) -> Self {
        self.host = Some(host);
        self
    }

    /// Builds the registry and spawns its background tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Arc<Registry> {
        let key = self.key.unwrap_or_else(MeshKey::generate);
        let name = self.cfg.name.clone();
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let token = CancellationToken::new();
        let (mesh, inbox) = Mesh::new(
            &name,
            self.cfg.mesh_inbox_clamped(),
            self.cfg.rpc_timeout_clamped(),
            bus.clone(),
        );

        spawn_subscriber_listener(&bus, self.subscribers, token.clone());

        let registry = Arc::new(Registry {
            capability: key.issue(CapabilityKind::Registry(name.clone())),
            facade: AccessFacade::new(key.verifier(), AccessTarget::Registry(name)),
            methods: MethodSet::registry(),
            users: UserStore::with_users(self.users),
            table: RecordTable::default(),
            snapshots: SnapshotStore::default(),
            pending: Mutex::new(HashMap::new()),
            mesh,
            bus,
            launcher: self.launcher,
            host: self.host.unwrap_or_else(|| Arc::new(LocalHost::default())),
            token,
            key,
            cfg: self.cfg,
        });

        registry.spawn_mesh_listener(inbox);
        registry.spawn_reaper();
        registry
    }
}

/// Forwards bus events to the subscriber set until the registry stops.
fn spawn_subscriber_listener(bus: &Bus, subscribers: Vec<Arc<dyn Subscribe>>, token: CancellationToken) {
    if subscribers.is_empty() {
        return;
    }
    let mut rx = bus.subscribe();
    let set = SubscriberSet::new(subscribers);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        // deliver whatever was already published before the token fired
        while let Ok(ev) = rx.try_recv() {
            set.emit(&ev);
        }
        set.shutdown().await;
    });
}
