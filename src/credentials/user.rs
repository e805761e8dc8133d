//! # Users and password hashes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::capability::constant_time_eq;

/// Salted SHA-256 password hash. The plaintext is never stored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    salt: String,
    digest: String,
}

impl PasswordHash {
    /// Hashes `password` with a fresh random salt.
    pub fn new(password: &str) -> Self {
        let salt = hex::encode(rand::random::<[u8; 16]>());
        let digest = Self::digest(&salt, password);
        Self { salt, digest }
    }

    /// True if `password` hashes to the stored digest.
    pub fn verify(&self, password: &str) -> bool {
        let candidate = Self::digest(&self.salt, password);
        constant_time_eq(candidate.as_bytes(), self.digest.as_bytes())
    }

    fn digest(salt: &str, password: &str) -> String {
        hex::encode(
            Sha256::new()
                .chain_update(salt.as_bytes())
                .chain_update(password.as_bytes())
                .finalize(),
        )
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

/// A user or administrator.
///
/// `is_component` is fixed at construction: there is no setter and
/// [`UserUpdate`] has no field for it.
///
/// # Example
/// ```rust
/// use meshvisor::User;
///
/// let alice = User::new("alice", "s3cret", ["all"]);
/// assert!(alice.password().verify("s3cret"));
/// assert!(!alice.is_admin());
///
/// let root = User::new("root", "pw", Vec::<String>::new()).admin();
/// assert!(root.is_admin());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    uid: String,
    password: PasswordHash,
    access_types: BTreeSet<String>,
    is_admin: bool,
    is_component: bool,
}

impl User {
    /// Regular user with the given access types.
    pub fn new<I, S>(uid: impl Into<String>, password: &str, access_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            uid: uid.into(),
            password: PasswordHash::new(password),
            access_types: access_types.into_iter().map(Into::into).collect(),
            is_admin: false,
            is_component: false,
        }
    }

    /// Identity under which a component process runs.
    pub fn component<I, S>(uid: impl Into<String>, password: &str, access_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            is_component: true,
            ..Self::new(uid, password, access_types)
        }
    }

    /// Marks the user as administrator.
    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    /// User id.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Password hash.
    pub fn password(&self) -> &PasswordHash {
        &self.password
    }

    /// Granted access types.
    pub fn access_types(&self) -> &BTreeSet<String> {
        &self.access_types
    }

    /// Administrator flag.
    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    /// Component identity flag (immutable).
    pub fn is_component(&self) -> bool {
        self.is_component
    }

    pub(crate) fn set_admin(&mut self, yes: bool) {
        self.is_admin = yes;
    }

    pub(crate) fn apply(&mut self, update: UserUpdate) {
        if let Some(pw) = update.password {
            self.password = PasswordHash::new(&pw);
        }
        if let Some(access) = update.access_types {
            self.access_types = access;
        }
    }
}

/// Partial modification for [`UserStore::mod_user`](crate::UserStore::mod_user).
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    /// New plaintext password (hashed on apply).
    pub password: Option<String>,
    /// Replacement access-type set.
    pub access_types: Option<BTreeSet<String>>,
}

/// Plaintext user credentials a component runtime presents to its registry.
#[derive(Clone, PartialEq, Eq)]
pub struct Login {
    /// User id.
    pub uid: String,
    /// Plaintext password.
    pub password: String,
}

impl Login {
    /// Builds a login.
    pub fn new(uid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("uid", &self.uid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_salted() {
        let a = PasswordHash::new("pw");
        let b = PasswordHash::new("pw");
        assert_ne!(a, b);
        assert!(a.verify("pw") && b.verify("pw"));
        assert!(!a.verify("PW"));
    }

    #[test]
    fn update_rehashes_and_keeps_component_flag() {
        let mut u = User::component("cam-proc", "old", ["vision"]);
        u.apply(UserUpdate {
            password: Some("new".into()),
            access_types: Some(["all".to_string()].into()),
        });
        assert!(u.password().verify("new"));
        assert!(!u.password().verify("old"));
        assert!(u.access_types().contains("all"));
        assert!(u.is_component());
    }
}
