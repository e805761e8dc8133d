//! # Component metadata.
//!
//! [`ComponentInfo`] is what a component declares at registration: where it
//! runs, who may connect to it, and how patient the reaper should be.
//! [`MiniComponentInfo`] is the registry's read-only projection of a record.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{ComponentId, ComponentState, RecoveryState};

/// Wildcard access token: any authenticated user may connect.
pub const ALL_ACCESS: &str = "all";

/// Metadata a component supplies when registering.
///
/// # Example
/// ```rust
/// use meshvisor::{ComponentId, ComponentInfo};
///
/// let info = ComponentInfo::new(ComponentId::new("Vision", "cam1").unwrap())
///     .on_host("lab-3")
///     .with_access(["all"])
///     .with_recovery_multiplier(3)
///     .recoverable(true);
///
/// assert!(info.user_access.contains("all"));
/// assert_eq!(info.recovery_multiplier, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Component id; immutable once registered.
    pub id: ComponentId,
    /// Host the component runs on.
    pub host: String,
    /// Access types allowed to connect (`"all"` = everyone).
    pub user_access: BTreeSet<String>,
    /// Hosts this component may run on (empty = anywhere).
    pub only_on_hosts: BTreeSet<String>,
    /// Heartbeat timeout multiplier (`0` = registry default).
    pub recovery_multiplier: u32,
    /// Whether the registry may relaunch the component after probes fail.
    pub recoverable: bool,
    /// Ask the registry to accept state snapshots from the start.
    pub state_store: bool,
}

impl ComponentInfo {
    /// Info with host `localhost`, no access entries, registry default multiplier.
    pub fn new(id: ComponentId) -> Self {
        Self {
            id,
            host: "localhost".to_string(),
            user_access: BTreeSet::new(),
            only_on_hosts: BTreeSet::new(),
            recovery_multiplier: 0,
            recoverable: false,
            state_store: false,
        }
    }

    /// Sets the host.
    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Adds access types.
    pub fn with_access<I, S>(mut self, access: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_access.extend(access.into_iter().map(Into::into));
        self
    }

    /// Restricts the hosts this component may run on.
    pub fn only_on<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only_on_hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    /// Sets the heartbeat timeout multiplier.
    pub fn with_recovery_multiplier(mut self, m: u32) -> Self {
        self.recovery_multiplier = m;
        self
    }

    /// Allows relaunch after failed probes.
    pub fn recoverable(mut self, yes: bool) -> Self {
        self.recoverable = yes;
        self
    }

    /// Enables the snapshot store at registration.
    pub fn with_state_store(mut self, yes: bool) -> Self {
        self.state_store = yes;
        self
    }

    /// True if the host affinity allows running on `self.host`.
    pub fn host_allowed(&self) -> bool {
        self.only_on_hosts.is_empty() || self.only_on_hosts.contains(&self.host)
    }
}

/// Read-only projection of a registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniComponentInfo {
    /// Component id.
    pub id: ComponentId,
    /// Host the component runs on.
    pub host: String,
    /// Registry that owns the record.
    pub registry: String,
    /// Lifecycle state at projection time.
    pub state: ComponentState,
    /// Recovery progress at projection time.
    pub recovery: RecoveryState,
    /// Access types allowed to connect.
    pub user_access: BTreeSet<String>,
    /// Effective heartbeat timeout multiplier.
    pub recovery_multiplier: u32,
    /// Components connected to this one.
    pub clients: BTreeSet<ComponentId>,
    /// Components this one connected to.
    pub dependencies: BTreeSet<ComponentId>,
    /// Milliseconds since the last heartbeat.
    pub heartbeat_age_ms: u64,
}
