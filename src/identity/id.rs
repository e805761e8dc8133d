//! # Component identifiers.
//!
//! An id is `type$name`. The type is fixed at registration; the name is
//! generated (8 hex characters) when a component does not pick one.
//!
//! ```rust
//! use meshvisor::ComponentId;
//!
//! let id: ComponentId = "Vision$cam1".parse().unwrap();
//! assert_eq!(id.kind(), "Vision");
//! assert_eq!(id.name(), "cam1");
//! assert_eq!(id.to_string(), "Vision$cam1");
//!
//! let anon = ComponentId::generated("Pather").unwrap();
//! assert_eq!(anon.kind(), "Pather");
//! assert_eq!(anon.name().len(), 8);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, MeshResult};

/// Composite component key `type$name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentId {
    kind: String,
    name: String,
}

impl ComponentId {
    /// Separator between type and name.
    pub const SEPARATOR: char = '$';

    /// Builds an id from its parts.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> MeshResult<Self> {
        let kind = kind.into();
        let name = name.into();
        if kind.is_empty() || kind.contains(Self::SEPARATOR) {
            return Err(MeshError::invalid(format!("bad component type {kind:?}")));
        }
        if name.is_empty() {
            return Err(MeshError::invalid(format!("empty name for type {kind}")));
        }
        Ok(Self { kind, name })
    }

    /// Builds an id with a random name.
    pub fn generated(kind: impl Into<String>) -> MeshResult<Self> {
        let suffix: [u8; 4] = rand::random();
        Self::new(kind, hex::encode(suffix))
    }

    /// Component type (fixed at registration).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Component name within its type.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.kind, Self::SEPARATOR, self.name)
    }
}

impl FromStr for ComponentId {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(Self::SEPARATOR) {
            Some((kind, name)) => Self::new(kind, name),
            None => Err(MeshError::invalid(format!("{s:?} is not of the form type$name"))),
        }
    }
}

impl TryFrom<String> for ComponentId {
    type Error = MeshError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ComponentId> for String {
    fn from(id: ComponentId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_ids() {
        assert!("Vision".parse::<ComponentId>().is_err());
        assert!("$cam".parse::<ComponentId>().is_err());
        assert!("Vision$".parse::<ComponentId>().is_err());
        assert!(ComponentId::new("Vi$ion", "cam").is_err());
    }

    #[test]
    fn name_may_contain_separator() {
        let id: ComponentId = "Log$a$b".parse().expect("id");
        assert_eq!(id.kind(), "Log");
        assert_eq!(id.name(), "a$b");
    }

    #[test]
    fn serializes_as_string() {
        let id = ComponentId::new("Pather", "nav").expect("id");
        let json = serde_json::to_string(&id).expect("json");
        assert_eq!(json, "\"Pather$nav\"");
        let back: ComponentId = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, id);
    }
}
