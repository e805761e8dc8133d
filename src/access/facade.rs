//! # Caller classification and authorization.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::access::policy::{AccessPolicy, MethodSet};
use crate::capability::{Capability, CapabilityKind, Verifier};
use crate::error::{MeshError, MeshResult};
use crate::identity::ComponentId;

/// Who is calling, as far as the target can tell from the presented capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerKind {
    /// No credentials, or credentials that do not verify.
    Anonymous,
    /// Some other component's own capability.
    Component,
    /// A broker grant for this target.
    Client,
    /// The target component's own capability.
    Owner,
    /// A registry capability.
    Registry,
}

impl CallerKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallerKind::Anonymous => "anonymous",
            CallerKind::Component => "component",
            CallerKind::Client => "client",
            CallerKind::Owner => "owner",
            CallerKind::Registry => "registry",
        }
    }
}

impl fmt::Display for CallerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Claimed user id (informational; rights come from `kind`).
    pub uid: String,
    /// Classification.
    pub kind: CallerKind,
    /// Component behind the capability, if any (grant holder or component cap).
    pub component: Option<ComponentId>,
}

/// What a façade protects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessTarget {
    /// A component endpoint.
    Component(ComponentId),
    /// A registry.
    Registry(String),
}

impl fmt::Display for AccessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessTarget::Component(id) => write!(f, "{id}"),
            AccessTarget::Registry(name) => write!(f, "registry {name}"),
        }
    }
}

/// Classifies callers of one target and enforces its policy.
///
/// # Example
/// ```rust
/// use meshvisor::{AccessFacade, AccessTarget, CallerKind, CapabilityKind, ComponentId, MeshKey};
///
/// let key = MeshKey::generate();
/// let cam = ComponentId::new("Vision", "cam1").unwrap();
/// let facade = AccessFacade::new(key.verifier(), AccessTarget::Component(cam.clone()));
///
/// let own = key.issue(CapabilityKind::Component(cam));
/// assert_eq!(facade.classify("cam1", Some(&own)).kind, CallerKind::Owner);
/// assert_eq!(facade.classify("eve", None).kind, CallerKind::Anonymous);
/// ```
#[derive(Debug, Clone)]
pub struct AccessFacade {
    verifier: Verifier,
    target: AccessTarget,
}

impl AccessFacade {
    /// Façade for `target`.
    pub fn new(verifier: Verifier, target: AccessTarget) -> Self {
        Self { verifier, target }
    }

    /// The protected target.
    pub fn target(&self) -> &AccessTarget {
        &self.target
    }

    /// Classifies a caller from the presented capability.
    pub fn classify(&self, uid: &str, creds: Option<&Capability>) -> Caller {
        let anonymous = Caller {
            uid: uid.to_string(),
            kind: CallerKind::Anonymous,
            component: None,
        };
        let Some(cap) = creds.filter(|c| self.verifier.verify(c)) else {
            return anonymous;
        };

        let (kind, component) = match (cap.kind(), &self.target) {
            (CapabilityKind::Registry(_), _) => (CallerKind::Registry, None),
            (CapabilityKind::Component(id), AccessTarget::Component(me)) if id == me => {
                (CallerKind::Owner, Some(id.clone()))
            }
            (CapabilityKind::Component(id), _) => (CallerKind::Component, Some(id.clone())),
            (CapabilityKind::Grant { holder, target }, AccessTarget::Component(me))
                if target == me =>
            {
                (CallerKind::Client, Some(holder.clone()))
            }
            (CapabilityKind::Grant { .. }, _) => return anonymous,
        };
        Caller {
            uid: uid.to_string(),
            kind,
            component,
        }
    }

    /// Checks that `method` exists and `caller` may invoke it.
    pub fn authorize<P: AccessPolicy + ?Sized>(
        &self,
        policy: &P,
        methods: &MethodSet,
        caller: CallerKind,
        method: &str,
    ) -> MeshResult<()> {
        if !methods.contains(method) {
            return Err(MeshError::NoSuchMethod {
                target: self.target.to_string(),
                method: method.to_string(),
            });
        }
        if !policy.permits(caller, method, methods.is_builtin(method)) {
            return Err(MeshError::MethodNotPermitted {
                target: self.target.to_string(),
                method: method.to_string(),
                caller: caller.to_string(),
            });
        }
        Ok(())
    }

    /// Methods `caller` may invoke, in [`MethodSet::iter`] order.
    pub fn permitted_for<P: AccessPolicy + ?Sized>(
        &self,
        policy: &P,
        methods: &MethodSet,
        caller: CallerKind,
    ) -> Vec<String> {
        methods
            .iter()
            .filter(|m| policy.permits(caller, m, methods.is_builtin(m)))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::methods;
    use crate::capability::MeshKey;

    struct Defaults;
    impl AccessPolicy for Defaults {}

    fn id(name: &str) -> ComponentId {
        ComponentId::new("Vision", name).expect("id")
    }

    #[test]
    fn grants_only_count_for_their_target() {
        let key = MeshKey::generate();
        let facade = AccessFacade::new(key.verifier(), AccessTarget::Component(id("cam1")));
        let alice = ComponentId::new("Client", "alice").expect("id");

        let grant = key.issue(CapabilityKind::Grant {
            holder: alice.clone(),
            target: id("cam1"),
        });
        let caller = facade.classify("alice", Some(&grant));
        assert_eq!(caller.kind, CallerKind::Client);
        assert_eq!(caller.component, Some(alice.clone()));

        let other = key.issue(CapabilityKind::Grant {
            holder: alice,
            target: id("cam2"),
        });
        assert_eq!(facade.classify("alice", Some(&other)).kind, CallerKind::Anonymous);
    }

    #[test]
    fn foreign_keys_are_anonymous() {
        let facade = AccessFacade::new(MeshKey::generate().verifier(), AccessTarget::Registry("r1".into()));
        let forged = MeshKey::generate().issue(CapabilityKind::Registry("r1".into()));
        assert_eq!(facade.classify("x", Some(&forged)).kind, CallerKind::Anonymous);
    }

    #[test]
    fn unknown_and_forbidden_methods_are_distinct() {
        let facade = AccessFacade::new(MeshKey::generate().verifier(), AccessTarget::Component(id("cam1")));
        let set = MethodSet::component(["capture"]);

        let err = facade
            .authorize(&Defaults, &set, CallerKind::Anonymous, "fly")
            .unwrap_err();
        assert_eq!(err.as_label(), "mesh_no_such_method");

        let err = facade
            .authorize(&Defaults, &set, CallerKind::Anonymous, methods::SHUTDOWN)
            .unwrap_err();
        assert_eq!(err.as_label(), "mesh_method_not_permitted");

        assert!(
            facade
                .authorize(&Defaults, &set, CallerKind::Anonymous, "capture")
                .is_ok()
        );
    }

    #[test]
    fn permitted_list_matches_authorize() {
        let facade = AccessFacade::new(MeshKey::generate().verifier(), AccessTarget::Component(id("cam1")));
        let set = MethodSet::component(["capture"]);
        let listed = facade.permitted_for(&Defaults, &set, CallerKind::Client);
        for m in set.iter() {
            let allowed = facade.authorize(&Defaults, &set, CallerKind::Client, m).is_ok();
            assert_eq!(allowed, listed.iter().any(|l| l == m), "{m}");
        }
    }
}
