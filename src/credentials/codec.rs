//! # Line-oriented user persistence.
//!
//! The on-disk layout belongs to the codec; the store only deals in one
//! encoded line per user. [`JsonLineCodec`] is the built-in choice.

use crate::credentials::User;
use crate::error::{MeshError, MeshResult};

/// Encodes a user as one logical line and back.
pub trait UserCodec: Send + Sync {
    /// One line, no trailing newline.
    fn encode(&self, user: &User) -> MeshResult<String>;

    /// Parses one line produced by [`UserCodec::encode`].
    fn decode(&self, line: &str) -> MeshResult<User>;
}

/// JSON object per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLineCodec;

impl UserCodec for JsonLineCodec {
    fn encode(&self, user: &User) -> MeshResult<String> {
        serde_json::to_string(user).map_err(|e| MeshError::Persistence {
            reason: e.to_string(),
        })
    }

    fn decode(&self, line: &str) -> MeshResult<User> {
        serde_json::from_str(line).map_err(|e| MeshError::Persistence {
            reason: e.to_string(),
        })
    }
}
