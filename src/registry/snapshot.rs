//! # State snapshot store.
//!
//! Opt-in per component. Once enabled, a component (authenticated by its
//! registry-issued password) may store one snapshot; each write replaces the
//! previous one. Snapshots outlive deregistration so a relaunched instance can
//! pick up where the old one stopped.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::capability::Secret;
use crate::error::{MeshError, MeshResult};
use crate::events::{Event, EventKind};
use crate::identity::ComponentId;
use crate::registry::Registry;
use crate::registry::table::now_ms;

/// Timestamped key/value state of a component.
///
/// # Example
/// ```rust
/// use std::collections::BTreeMap;
/// use serde_json::json;
/// use meshvisor::StateSnapshot;
///
/// let snap = StateSnapshot::new(BTreeMap::from([("pos".to_string(), json!([1, 2]))])).unwrap();
/// assert_eq!(snap.get("pos"), Some(&json!([1, 2])));
///
/// assert!(StateSnapshot::new(BTreeMap::from([(String::new(), json!(1))])).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    taken_at_ms: u64,
    entries: BTreeMap<String, Value>,
}

impl StateSnapshot {
    /// Snapshot taken now. Keys must be non-empty and values non-null.
    pub fn new(entries: BTreeMap<String, Value>) -> MeshResult<Self> {
        if let Some(bad) = entries
            .iter()
            .find(|(k, v)| k.is_empty() || v.is_null())
            .map(|(k, _)| k)
        {
            return Err(MeshError::invalid(format!(
                "snapshot entry {bad:?} needs a non-empty key and a non-null value"
            )));
        }
        Ok(Self {
            taken_at_ms: now_ms(),
            entries,
        })
    }

    /// Milliseconds since the Unix epoch when the snapshot was taken.
    pub fn taken_at_ms(&self) -> u64 {
        self.taken_at_ms
    }

    /// One entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// All entries.
    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    /// Consumes the snapshot.
    pub fn into_entries(self) -> BTreeMap<String, Value> {
        self.entries
    }
}

#[derive(Default)]
struct Inner {
    enabled: HashSet<ComponentId>,
    snapshots: HashMap<ComponentId, StateSnapshot>,
}

/// Enabled flags and stored snapshots, keyed by component id.
#[derive(Default)]
pub(crate) struct SnapshotStore {
    inner: RwLock<Inner>,
}

impl SnapshotStore {
    pub(crate) async fn enable(&self, id: &ComponentId) {
        self.inner.write().await.enabled.insert(id.clone());
    }

    pub(crate) async fn put(&self, id: &ComponentId, snapshot: StateSnapshot) -> MeshResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.enabled.contains(id) {
            return Err(stale(id, "disabled"));
        }
        inner.snapshots.insert(id.clone(), snapshot);
        Ok(())
    }

    pub(crate) async fn get(&self, id: &ComponentId) -> MeshResult<StateSnapshot> {
        let inner = self.inner.read().await;
        if !inner.enabled.contains(id) {
            return Err(stale(id, "disabled"));
        }
        inner
            .snapshots
            .get(id)
            .cloned()
            .ok_or_else(|| stale(id, "no snapshot"))
    }
}

fn stale(id: &ComponentId, reason: &str) -> MeshError {
    MeshError::StaleState {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

impl Registry {
    /// Turns on the snapshot store for a local component.
    pub async fn enable_state_store(&self, id: &ComponentId, password: &Secret) -> MeshResult<()> {
        self.authenticate_owner(id, password).await?;
        self.snapshots.enable(id).await;
        Ok(())
    }

    /// Stores `snapshot`, replacing any previous one.
    ///
    /// [`MeshError::StaleState`] if the store is not enabled for `id`.
    pub async fn set_component_state(
        &self,
        id: &ComponentId,
        password: &Secret,
        snapshot: StateSnapshot,
    ) -> MeshResult<()> {
        self.authenticate_owner(id, password).await?;
        self.snapshots.put(id, snapshot).await?;
        self.publish(Event::new(EventKind::SnapshotStored).with_component(id));
        Ok(())
    }

    /// Returns the stored snapshot.
    ///
    /// [`MeshError::StaleState`] if the store is disabled or nothing was stored yet.
    pub async fn get_component_state(
        &self,
        id: &ComponentId,
        password: &Secret,
    ) -> MeshResult<StateSnapshot> {
        self.authenticate_owner(id, password).await?;
        self.snapshots.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cam() -> ComponentId {
        ComponentId::new("Vision", "cam1").expect("id")
    }

    #[tokio::test]
    async fn disabled_until_enabled_then_last_write_wins() {
        let store = SnapshotStore::default();
        let snap = |v: i64| StateSnapshot::new(BTreeMap::from([("n".to_string(), json!(v))])).expect("snap");

        assert_eq!(store.get(&cam()).await.unwrap_err().as_label(), "mesh_stale_state");
        assert!(store.put(&cam(), snap(1)).await.is_err());

        store.enable(&cam()).await;
        match store.get(&cam()).await {
            Err(MeshError::StaleState { reason, .. }) => assert_eq!(reason, "no snapshot"),
            other => panic!("unexpected {other:?}"),
        }

        store.put(&cam(), snap(1)).await.expect("put");
        store.put(&cam(), snap(2)).await.expect("put");
        assert_eq!(store.get(&cam()).await.expect("get").get("n"), Some(&json!(2)));
    }

    #[test]
    fn null_values_are_rejected() {
        let err = StateSnapshot::new(BTreeMap::from([("k".to_string(), Value::Null)])).unwrap_err();
        assert_eq!(err.as_label(), "mesh_invalid_argument");
    }
}
