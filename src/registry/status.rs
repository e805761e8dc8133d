//! # Read-only status projections for monitoring consumers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::access::{RegistryPolicy, methods};
use crate::capability::Capability;
use crate::error::MeshResult;
use crate::host::{HostInfo, HostLoad};
use crate::identity::{ComponentId, MiniComponentInfo};
use crate::registry::Registry;
use crate::registry::table::now_ms;

/// Everything a registry knows, as plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusView {
    /// Registry that produced the view.
    pub registry: String,
    /// Wall-clock time of the projection.
    pub generated_at_ms: u64,
    /// Local and replicated records, sorted by id.
    pub components: Vec<MiniComponentInfo>,
    /// Peer registries and the ids each advertised.
    pub peers: BTreeMap<String, BTreeSet<ComponentId>>,
}

impl StatusView {
    /// Projection of one component, if present.
    pub fn component(&self, id: &ComponentId) -> Option<&MiniComponentInfo> {
        self.components.iter().find(|c| &c.id == id)
    }
}

/// Host description plus current load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStatus {
    /// Static description.
    pub info: HostInfo,
    /// Load at query time.
    pub load: HostLoad,
}

impl Registry {
    /// Snapshot of every record and the peer table.
    pub async fn status_view(&self, creds: Option<&Capability>) -> MeshResult<StatusView> {
        self.guard(creds, methods::STATUS_VIEW)?;
        let mut components = Vec::new();
        for (_, rec) in self.table.snapshot().await {
            components.push(rec.lock().await.project(self.name()));
        }
        Ok(StatusView {
            registry: self.name().to_string(),
            generated_at_ms: now_ms(),
            components,
            peers: self.mesh.view().await,
        })
    }

    /// Host statistics of the machine this registry runs on.
    pub async fn host_status(&self, creds: Option<&Capability>) -> MeshResult<HostStatus> {
        self.guard(creds, methods::HOST_STATUS)?;
        Ok(HostStatus {
            info: self.host.probe().await?,
            load: self.host.poll().await?,
        })
    }

    /// Registry operations the presented credentials may invoke.
    pub fn request_methods(&self, creds: Option<&Capability>) -> Vec<String> {
        let caller = self.facade.classify("", creds);
        self.facade.permitted_for(&RegistryPolicy, &self.methods, caller.kind)
    }
}
