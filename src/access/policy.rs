//! # Access policies.
//!
//! Default component rules:
//!
//! | Caller | Built-ins | Component-specific |
//! |---|---|---|
//! | Anonymous, Component | `heartbeat`, `requestMethods`, `requestHostInfo`, `requestComponentInfo` | all |
//! | Client | the above + `requestNotification`, `cancelNotification` | all |
//! | Owner | all but `suspend`, `resume` | all |
//! | Registry | all | all |
//!
//! `kill` is decided by [`KillAuthorization`] rather than by the access policy.
//! Suspension belongs to the registry record: the runtime follows whatever
//! state its heartbeat reports, so only registries may flip it on the endpoint.

use std::collections::BTreeSet;

use crate::access::facade::{Caller, CallerKind};
use crate::access::methods;

/// Method names a target exposes.
#[derive(Debug, Clone, Default)]
pub struct MethodSet {
    builtins: BTreeSet<&'static str>,
    specific: BTreeSet<String>,
}

impl MethodSet {
    /// Component built-ins plus `specific`.
    pub fn component<I, S>(specific: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            builtins: methods::COMPONENT_BUILTINS.iter().copied().collect(),
            specific: specific
                .into_iter()
                .map(Into::into)
                .filter(|m: &String| !methods::COMPONENT_BUILTINS.contains(&m.as_str()))
                .collect(),
        }
    }

    /// The registry's capability-guarded operations.
    pub fn registry() -> Self {
        Self {
            builtins: methods::REGISTRY_GUARDED.iter().copied().collect(),
            specific: BTreeSet::new(),
        }
    }

    /// True if the target exposes `method`.
    pub fn contains(&self, method: &str) -> bool {
        self.builtins.contains(method) || self.specific.contains(method)
    }

    /// True for built-ins.
    pub fn is_builtin(&self, method: &str) -> bool {
        self.builtins.contains(method)
    }

    /// All names, built-ins first, each group sorted.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.builtins
            .iter()
            .copied()
            .chain(self.specific.iter().map(String::as_str))
    }
}

/// Decides which known methods a caller class may invoke.
pub trait AccessPolicy: Send + Sync {
    /// True if `caller` may invoke `method` (already known to exist).
    fn permits(&self, caller: CallerKind, method: &str, builtin: bool) -> bool {
        default_component_permits(caller, method, builtin)
    }
}

/// Gate on component-specific calls.
pub trait ReadinessCheck: Send + Sync {
    /// `false` rejects component-specific calls and makes `is_up` report not ready.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Decides who may hard-kill a component.
pub trait KillAuthorization: Send + Sync {
    /// Defaults to the component itself and registries.
    fn may_kill(&self, caller: &Caller) -> bool {
        matches!(caller.kind, CallerKind::Owner | CallerKind::Registry)
    }
}

pub(crate) fn default_component_permits(caller: CallerKind, method: &str, builtin: bool) -> bool {
    if !builtin {
        return true;
    }
    match caller {
        CallerKind::Registry => true,
        CallerKind::Owner => method != methods::SUSPEND && method != methods::RESUME,
        CallerKind::Client => {
            methods::COMPONENT_PUBLIC.contains(&method) || methods::COMPONENT_CLIENT.contains(&method)
        }
        CallerKind::Anonymous | CallerKind::Component => methods::COMPONENT_PUBLIC.contains(&method),
    }
}

/// Policy for the registry's own guarded operations.
///
/// Registries may do everything; components may do everything except joining
/// the mesh; everyone else only heartbeats and liveness checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryPolicy;

impl AccessPolicy for RegistryPolicy {
    fn permits(&self, caller: CallerKind, method: &str, _builtin: bool) -> bool {
        match caller {
            CallerKind::Registry => true,
            CallerKind::Component => method != methods::REGISTER_WITH_REGISTRY,
            CallerKind::Anonymous | CallerKind::Client | CallerKind::Owner => {
                method == methods::UPDATE_CONNECTION || method == methods::IS_UP
            }
        }
    }
}
