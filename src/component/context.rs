//! # Per-component context handed to every main-loop cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::capability::{Capability, Secret};
use crate::credentials::Login;
use crate::error::MeshResult;
use crate::identity::ComponentId;
use crate::registry::{Connection, Constraints, Registry, StateSnapshot};

/// What a running component may use to reach the rest of the mesh.
///
/// The token is cancelled on shutdown and on kill; long cycles should check it.
#[derive(Clone)]
pub struct ComponentContext {
    pub(crate) id: ComponentId,
    pub(crate) login: Login,
    pub(crate) password: Secret,
    pub(crate) capability: Capability,
    pub(crate) registry: Arc<Registry>,
    pub(crate) token: CancellationToken,
}

impl ComponentContext {
    /// This component's id.
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// This component's own capability.
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Cancelled when the component is asked to stop.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Shorthand for `token().is_cancelled()`.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Brokers a connection to the first component matching `constraints`.
    pub async fn connect(&self, constraints: &Constraints) -> MeshResult<Connection> {
        self.registry
            .request_connection(&self.login.uid, &self.login.password, &self.id, constraints)
            .await
    }

    /// Brokers connections to every matching component except this one.
    pub async fn connect_all(&self, constraints: &Constraints) -> MeshResult<Vec<Connection>> {
        self.registry
            .request_connections(&self.login.uid, &self.login.password, &self.id, constraints)
            .await
    }

    /// Turns on the registry snapshot store for this component.
    pub async fn enable_state_store(&self) -> MeshResult<()> {
        self.registry
            .enable_state_store(&self.id, &self.password)
            .await
    }

    /// Stores a snapshot (last write wins).
    pub async fn save_state(&self, entries: BTreeMap<String, Value>) -> MeshResult<()> {
        let snapshot = StateSnapshot::new(entries)?;
        self.registry
            .set_component_state(&self.id, &self.password, snapshot)
            .await
    }

    /// Reads back the stored snapshot.
    pub async fn load_state(&self) -> MeshResult<StateSnapshot> {
        self.registry
            .get_component_state(&self.id, &self.password)
            .await
    }
}
