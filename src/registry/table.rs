//! # Record arena.
//!
//! `RwLock<HashMap<id, Arc<Mutex<ComponentRecord>>>>`: the table lock is held
//! only to look up, insert or remove; all mutation happens under the
//! per-record mutex. Scans clone the `Arc`s under a brief read lock and then
//! visit records one at a time.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::capability::Secret;
use crate::component::ComponentRef;
use crate::identity::{ComponentId, ComponentInfo, ComponentState, MiniComponentInfo, RecoveryState};

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Registered with this registry.
    Local,
    /// Advertised by the named peer.
    Peer(String),
}

impl Origin {
    pub(crate) fn registry<'a>(&'a self, local: &'a str) -> &'a str {
        match self {
            Origin::Local => local,
            Origin::Peer(name) => name,
        }
    }
}

/// Registry-side state of one component.
pub(crate) struct ComponentRecord {
    pub(crate) info: ComponentInfo,
    pub(crate) recovery_multiplier: u32,
    pub(crate) state: ComponentState,
    pub(crate) recovery: RecoveryState,
    pub(crate) clients: BTreeSet<ComponentId>,
    pub(crate) dependencies: BTreeSet<ComponentId>,
    pub(crate) last_heartbeat: Instant,
    pub(crate) recovery_started: Option<Instant>,
    pub(crate) password: Option<Secret>,
    pub(crate) origin: Origin,
    pub(crate) endpoint: ComponentRef,
    pub(crate) registered_at_ms: u64,
    /// User that registered a local record; `None` on replicas.
    pub(crate) registered_by: Option<String>,
}

impl ComponentRecord {
    pub(crate) fn new(
        info: ComponentInfo,
        recovery_multiplier: u32,
        origin: Origin,
        endpoint: ComponentRef,
        password: Option<Secret>,
    ) -> Self {
        Self {
            info,
            recovery_multiplier,
            state: ComponentState::Init,
            recovery: RecoveryState::Idle,
            clients: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            last_heartbeat: Instant::now(),
            recovery_started: None,
            password,
            origin,
            endpoint,
            registered_at_ms: now_ms(),
            registered_by: None,
        }
    }

    pub(crate) fn id(&self) -> &ComponentId {
        &self.info.id
    }

    pub(crate) fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }

    /// Stamps a heartbeat; the stamp never moves backwards.
    pub(crate) fn stamp(&mut self, now: Instant) {
        self.last_heartbeat = self.last_heartbeat.max(now);
    }

    pub(crate) fn project(&self, local_registry: &str) -> MiniComponentInfo {
        MiniComponentInfo {
            id: self.info.id.clone(),
            host: self.info.host.clone(),
            registry: self.origin.registry(local_registry).to_string(),
            state: self.state,
            recovery: self.recovery,
            user_access: self.info.user_access.clone(),
            recovery_multiplier: self.recovery_multiplier,
            clients: self.clients.clone(),
            dependencies: self.dependencies.clone(),
            heartbeat_age_ms: Instant::now()
                .saturating_duration_since(self.last_heartbeat)
                .as_millis() as u64,
        }
    }
}

pub(crate) type RecordRef = Arc<Mutex<ComponentRecord>>;

/// Component records keyed by id.
#[derive(Default)]
pub(crate) struct RecordTable {
    records: RwLock<HashMap<ComponentId, RecordRef>>,
}

impl RecordTable {
    pub(crate) async fn get(&self, id: &ComponentId) -> Option<RecordRef> {
        self.records.read().await.get(id).cloned()
    }

    pub(crate) async fn insert(&self, record: ComponentRecord) -> RecordRef {
        let id = record.id().clone();
        let rec = Arc::new(Mutex::new(record));
        self.records.write().await.insert(id, rec.clone());
        rec
    }

    /// Inserts `record` unless a record with the same id exists and `keep`
    /// says it must stay. The check and the insert happen under one write lock.
    pub(crate) async fn insert_unless<F>(&self, record: ComponentRecord, keep: F) -> Option<RecordRef>
    where
        F: FnOnce(&ComponentRecord) -> bool,
    {
        let id = record.id().clone();
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&id) {
            if keep(&*existing.lock().await) {
                return None;
            }
        }
        let rec = Arc::new(Mutex::new(record));
        records.insert(id, rec.clone());
        Some(rec)
    }

    /// Removes `id` only if it is still the given record instance.
    pub(crate) async fn remove_if_same(&self, id: &ComponentId, rec: &RecordRef) -> bool {
        let mut records = self.records.write().await;
        match records.get(id) {
            Some(current) if Arc::ptr_eq(current, rec) => {
                records.remove(id);
                true
            }
            _ => false,
        }
    }

    /// All records, sorted by id.
    pub(crate) async fn snapshot(&self) -> Vec<(ComponentId, RecordRef)> {
        let mut all: Vec<_> = self
            .records
            .read()
            .await
            .iter()
            .map(|(id, rec)| (id.clone(), rec.clone()))
            .collect();
        all.sort_by_cached_key(|(id, _)| id.to_string());
        all
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::RemoteComponent;
    use crate::error::MeshResult;
    use crate::Capability;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Null(ComponentId);

    #[async_trait]
    impl RemoteComponent for Null {
        fn id(&self) -> &ComponentId {
            &self.0
        }
        async fn is_up(&self) -> bool {
            true
        }
        async fn call(&self, _: &str, _: Option<&Capability>, _: &str, _: Value) -> MeshResult<Value> {
            Ok(Value::Null)
        }
    }

    fn record(kind: &str, name: &str) -> ComponentRecord {
        let id = ComponentId::new(kind, name).expect("id");
        ComponentRecord::new(ComponentInfo::new(id.clone()), 1, Origin::Local, Arc::new(Null(id)), None)
    }

    #[tokio::test]
    async fn snapshot_follows_id_string_order() {
        let table = RecordTable::default();
        for (kind, name) in [("Vision", "b"), ("Pather", "z"), ("Vision", "a"), ("Vision2", "a")] {
            table.insert(record(kind, name)).await;
        }
        let ids: Vec<String> = table
            .snapshot()
            .await
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(ids, ["Pather$z", "Vision$a", "Vision$b", "Vision2$a"]);
    }
}
