//! # Capabilities and secrets.
//!
//! Privileged operations require presenting a [`Capability`]: an opaque token
//! naming *what* it stands for ([`CapabilityKind`]) and carrying a keyed
//! SHA-256 MAC computed with the mesh-wide [`MeshKey`]. Tokens are verified by
//! value, so they survive any transport; nothing depends on object identity.
//!
//! | Kind | Issued to | Grants |
//! |---|---|---|
//! | `Component(id)` | the component, at registration | owner rights on `id`, component rights on registries |
//! | `Registry(name)` | the registry itself | registry rights on every component |
//! | `Grant{holder, target}` | a requester, by the broker | client rights on `target` |
//!
//! [`Secret`] is the registry-issued password a component needs for
//! deregistration and the snapshot store.
//!
//! ```rust
//! use meshvisor::{Capability, CapabilityKind, ComponentId, MeshKey};
//!
//! let key = MeshKey::generate();
//! let cap = key.issue(CapabilityKind::Component(ComponentId::new("Vision", "cam1").unwrap()));
//! assert!(key.verify(&cap));
//! assert!(!MeshKey::generate().verify(&cap));
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::identity::ComponentId;

const BLOCK: usize = 64;

/// What a capability stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
    /// A registered component's own capability.
    Component(ComponentId),
    /// A registry's capability.
    Registry(String),
    /// Broker-issued client grant for `holder` on `target`.
    Grant {
        /// Requester that received the grant.
        holder: ComponentId,
        /// Component the grant applies to.
        target: ComponentId,
    },
}

impl CapabilityKind {
    fn canonical(&self) -> String {
        match self {
            CapabilityKind::Component(id) => format!("component:{id}"),
            CapabilityKind::Registry(name) => format!("registry:{name}"),
            CapabilityKind::Grant { holder, target } => format!("grant:{holder}>{target}"),
        }
    }
}

/// Unforgeable token presented as credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    kind: CapabilityKind,
    nonce: String,
    mac: String,
}

impl Capability {
    /// What this capability stands for.
    pub fn kind(&self) -> &CapabilityKind {
        &self.kind
    }

    /// Component id if this is a component capability.
    pub fn component(&self) -> Option<&ComponentId> {
        match &self.kind {
            CapabilityKind::Component(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Mesh-wide signing key shared by cooperating registries.
#[derive(Clone)]
pub struct MeshKey([u8; 32]);

impl MeshKey {
    /// Random key.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Key from raw bytes (e.g. loaded from deployment secrets).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Issues a capability of the given kind.
    pub fn issue(&self, kind: CapabilityKind) -> Capability {
        let nonce = hex::encode(rand::random::<[u8; 16]>());
        let mac = hex::encode(self.mac(&kind, &nonce));
        Capability { kind, nonce, mac }
    }

    /// Verify-only handle for component endpoints.
    pub fn verifier(&self) -> Verifier {
        Verifier(Arc::new(self.clone()))
    }

    /// True if `cap` was issued with this key and not altered.
    pub fn verify(&self, cap: &Capability) -> bool {
        let Ok(given) = hex::decode(&cap.mac) else {
            return false;
        };
        constant_time_eq(&given, &self.mac(&cap.kind, &cap.nonce))
    }

    /// HMAC-SHA256 over the canonical kind and nonce.
    fn mac(&self, kind: &CapabilityKind, nonce: &str) -> [u8; 32] {
        let mut ipad = [0x36u8; BLOCK];
        let mut opad = [0x5cu8; BLOCK];
        for (i, b) in self.0.iter().enumerate() {
            ipad[i] ^= b;
            opad[i] ^= b;
        }
        let inner = Sha256::new()
            .chain_update(ipad)
            .chain_update(kind.canonical().as_bytes())
            .chain_update(b"|")
            .chain_update(nonce.as_bytes())
            .finalize();
        let outer = Sha256::new()
            .chain_update(opad)
            .chain_update(inner)
            .finalize();

        let mut out = [0u8; 32];
        out.copy_from_slice(&outer);
        out
    }
}

impl fmt::Debug for MeshKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MeshKey(..)")
    }
}

/// Checks capabilities without being able to issue them.
#[derive(Clone, Debug)]
pub struct Verifier(Arc<MeshKey>);

impl Verifier {
    /// True if `cap` verifies under the mesh key.
    pub fn verify(&self, cap: &Capability) -> bool {
        self.0.verify(cap)
    }
}

/// Registry-issued component password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret(String);

impl Secret {
    /// Fresh random secret.
    pub fn generate() -> Self {
        Self(hex::encode(rand::random::<[u8; 24]>()))
    }

    /// The secret's text, for handing to a launched process.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison.
    pub fn matches(&self, other: &Secret) -> bool {
        constant_time_eq(self.0.as_bytes(), other.0.as_bytes())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
