//! # Connection broker.
//!
//! ```text
//! request_connection(uid, password, requester, constraints)
//!     ├─► validate (uid, password)            → Auth
//!     ├─► a locally registered requester must belong to uid
//!     │                                         → AccessDenied
//!     ├─► candidates: Init/Running, host affinity ok, constraints match
//!     │     (plural form also skips the requester itself)
//!     │                                         → NoMatch if none
//!     ├─► keep those whose user_access has "all" or one of the user's types
//!     │                                         → NotAuthorized if none
//!     ├─► order by id string; singular form takes the first
//!     └─► record client/dependency back-references, issue a grant
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::access::methods;
use crate::capability::{Capability, CapabilityKind};
use crate::component::{ComponentRef, Condition};
use crate::credentials::User;
use crate::error::{MeshError, MeshResult};
use crate::events::{Event, EventKind};
use crate::identity::{ALL_ACCESS, ComponentId, ComponentInfo, MiniComponentInfo};
use crate::registry::Registry;
use crate::registry::mesh::MeshMessage;
use crate::registry::table::{Origin, RecordRef};

/// Conjunctive `(key, value)` filter over component metadata.
///
/// Keys: `type`, `name`, `id`, `host` (alias `onHost`), `registry` (alias
/// `origin`). Any other key matches nothing.
///
/// # Example
/// ```rust
/// use meshvisor::Constraints;
///
/// let c = Constraints::new().with("type", "Vision").with("host", "lab-3");
/// assert_eq!(c.to_string(), "[[type, Vision], [host, lab-3]]");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints(Vec<(String, String)>);

impl Constraints {
    /// Matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pair.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    /// Shorthand for `new().with("type", kind)`.
    pub fn of_type(kind: impl Into<String>) -> Self {
        Self::new().with("type", kind)
    }

    /// The pairs.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub(crate) fn matches(&self, info: &ComponentInfo, registry: &str) -> bool {
        self.0.iter().all(|(k, v)| match k.as_str() {
            "type" => info.id.kind() == v,
            "name" => info.id.name() == v,
            "id" => info.id.to_string() == *v,
            "host" | "onHost" => info.host == *v,
            "registry" | "origin" => registry == v,
            _ => false,
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Constraints {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Constraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "[{k}, {v}]")?;
        }
        f.write_str("]")
    }
}

/// A brokered connection: target metadata, a live reference and a client grant.
#[derive(Clone)]
pub struct Connection {
    info: MiniComponentInfo,
    endpoint: ComponentRef,
    grant: Capability,
    timeout: Duration,
}

impl Connection {
    /// Target metadata at brokering time.
    pub fn info(&self) -> &MiniComponentInfo {
        &self.info
    }

    /// Target id.
    pub fn id(&self) -> &ComponentId {
        &self.info.id
    }

    /// Client grant presented on every call.
    pub fn grant(&self) -> &Capability {
        &self.grant
    }

    /// The raw remote reference.
    pub fn endpoint(&self) -> &ComponentRef {
        &self.endpoint
    }

    /// Calls `method` with the client grant; bounded by the registry RPC timeout.
    pub async fn call(&self, uid: &str, method: &str, args: Value) -> MeshResult<Value> {
        tokio::time::timeout(
            self.timeout,
            self.endpoint.call(uid, Some(&self.grant), method, args),
        )
        .await
        .map_err(|_| MeshError::unavailable(&self.info.id, self.timeout))?
    }

    /// Subscribes to value conditions on the target.
    ///
    /// Returns `true` if an existing subscription with the same callback and
    /// value expressions was replaced.
    pub async fn request_notification(
        &self,
        uid: &str,
        values: &[&str],
        conditions: Vec<Condition>,
        callback: &str,
    ) -> MeshResult<bool> {
        let res = self
            .call(
                uid,
                methods::REQUEST_NOTIFICATION,
                json!({ "values": values, "conditions": conditions, "callback": callback }),
            )
            .await?;
        Ok(res.get("replaced").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Cancels a subscription. `false` if there was none.
    pub async fn cancel_notification(&self, uid: &str, values: &[&str], callback: &str) -> MeshResult<bool> {
        let res = self
            .call(
                uid,
                methods::CANCEL_NOTIFICATION,
                json!({ "values": values, "callback": callback }),
            )
            .await?;
        Ok(res.as_bool().unwrap_or(false))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

fn user_may_access(user: &User, info: &ComponentInfo) -> bool {
    user.is_admin()
        || info.user_access.contains(ALL_ACCESS)
        || info
            .user_access
            .iter()
            .any(|a| user.access_types().contains(a))
}

impl Registry {
    /// Brokers a connection to the first matching component (by id order).
    pub async fn request_connection(
        &self,
        uid: &str,
        password: &str,
        requester: &ComponentId,
        constraints: &Constraints,
    ) -> MeshResult<Connection> {
        let mut found = self.broker(uid, password, requester, constraints, false).await?;
        found
            .pop()
            .ok_or_else(|| MeshError::NoMatch {
                constraints: constraints.to_string(),
            })
    }

    /// Brokers connections to every matching component except the requester.
    pub async fn request_connections(
        &self,
        uid: &str,
        password: &str,
        requester: &ComponentId,
        constraints: &Constraints,
    ) -> MeshResult<Vec<Connection>> {
        self.broker(uid, password, requester, constraints, true).await
    }

    async fn broker(
        &self,
        uid: &str,
        password: &str,
        requester: &ComponentId,
        constraints: &Constraints,
        all: bool,
    ) -> MeshResult<Vec<Connection>> {
        let user = match self.users.validate(uid, password).await {
            Ok(u) => u,
            Err(e) => {
                self.reject(None, &e);
                return Err(e);
            }
        };
        if let Some(rec) = self.table.get(requester).await {
            let owner = rec.lock().await.registered_by.clone();
            if let Some(owner) = owner.filter(|o| o != uid && !user.is_admin()) {
                let err = MeshError::denied(format!("{uid} may not act for {requester} of {owner}"));
                self.reject(Some(requester), &err);
                return Err(err);
            }
        }

        let mut matched: Vec<(RecordRef, bool)> = Vec::new();
        for (id, rec) in self.table.snapshot().await {
            if all && &id == requester {
                continue;
            }
            let r = rec.lock().await;
            if !r.state.is_brokerable() || !r.info.host_allowed() {
                continue;
            }
            if !constraints.matches(&r.info, r.origin.registry(self.name())) {
                continue;
            }
            let allowed = user_may_access(&user, &r.info);
            drop(r);
            matched.push((rec, allowed));
        }

        if matched.is_empty() {
            return Err(MeshError::NoMatch {
                constraints: constraints.to_string(),
            });
        }
        let candidates = matched.len();
        let permitted: Vec<RecordRef> = matched
            .into_iter()
            .filter_map(|(rec, ok)| ok.then_some(rec))
            .take(if all { usize::MAX } else { 1 })
            .collect();
        if permitted.is_empty() {
            let err = MeshError::NotAuthorized {
                uid: uid.to_string(),
                candidates,
            };
            self.reject(None, &err);
            return Err(err);
        }

        let mut out = Vec::with_capacity(permitted.len());
        for rec in permitted {
            out.push(self.grant(&rec, requester).await);
        }
        Ok(out)
    }

    async fn grant(&self, rec: &RecordRef, requester: &ComponentId) -> Connection {
        let (info, endpoint, origin) = {
            let mut r = rec.lock().await;
            r.clients.insert(requester.clone());
            (r.project(self.name()), r.endpoint.clone(), r.origin.clone())
        };

        if let Some(req) = self.table.get(requester).await {
            req.lock().await.dependencies.insert(info.id.clone());
        }
        if let Origin::Peer(peer) = origin {
            self.mesh
                .send_to(
                    &peer,
                    MeshMessage::Connected {
                        target: info.id.clone(),
                        client: requester.clone(),
                    },
                )
                .await;
        }

        self.publish(
            Event::new(EventKind::ConnectionGranted)
                .with_component(&info.id)
                .with_reason(requester.to_string()),
        );
        let grant = self.key.issue(CapabilityKind::Grant {
            holder: requester.clone(),
            target: info.id.clone(),
        });
        Connection {
            info,
            endpoint,
            grant,
            timeout: self.cfg.rpc_timeout_clamped(),
        }
    }
}
