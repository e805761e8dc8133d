//! # Concurrent user store.
//!
//! Validation is a read-locked lookup plus a hash comparison. Mutations are
//! administrative: callers authenticate through [`UserStore::validate_admin`]
//! first (the registry does this) and then apply the change.
//!
//! Mutations return `bool` for substantive rejections (duplicate uid, unknown
//! uid, removing the last admin) so batch tooling can tell "rejected" apart
//! from "failed".

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::credentials::{User, UserCodec, UserUpdate};
use crate::error::{MeshError, MeshResult};

/// Users and administrators keyed by uid.
#[derive(Default)]
pub struct UserStore {
    users: RwLock<HashMap<String, User>>,
}

impl UserStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `users` (later duplicates win).
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let map = users
            .into_iter()
            .map(|u| (u.uid().to_string(), u))
            .collect();
        Self {
            users: RwLock::new(map),
        }
    }

    /// Returns the user if `password` matches, [`MeshError::Auth`] otherwise.
    pub async fn validate(&self, uid: &str, password: &str) -> MeshResult<User> {
        let users = self.users.read().await;
        match users.get(uid) {
            Some(u) if u.password().verify(password) => Ok(u.clone()),
            _ => Err(MeshError::auth(uid)),
        }
    }

    /// Like [`validate`](Self::validate) but also requires the admin flag.
    pub async fn validate_admin(&self, uid: &str, password: &str) -> MeshResult<User> {
        let user = self.validate(uid, password).await?;
        if !user.is_admin() {
            return Err(MeshError::denied(format!("{uid} is not an administrator")));
        }
        Ok(user)
    }

    /// Looks up a user without checking credentials.
    pub async fn get(&self, uid: &str) -> Option<User> {
        self.users.read().await.get(uid).cloned()
    }

    /// Number of users (admins included).
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// True if the store has no users.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    /// Adds a user. `false` if the uid is taken.
    pub async fn add_user(&self, user: User) -> bool {
        let mut users = self.users.write().await;
        if users.contains_key(user.uid()) {
            return false;
        }
        users.insert(user.uid().to_string(), user);
        true
    }

    /// Removes a non-admin user. `false` if unknown or an administrator.
    pub async fn del_user(&self, uid: &str) -> bool {
        let mut users = self.users.write().await;
        match users.get(uid) {
            Some(u) if !u.is_admin() => {
                users.remove(uid);
                true
            }
            _ => false,
        }
    }

    /// Adds `user` as an administrator, or promotes an existing user with the same uid.
    ///
    /// `false` if the uid already belongs to an administrator.
    pub async fn add_admin(&self, user: User) -> bool {
        let mut users = self.users.write().await;
        match users.get_mut(user.uid()) {
            Some(existing) if existing.is_admin() => false,
            Some(existing) => {
                existing.set_admin(true);
                true
            }
            None => {
                users.insert(user.uid().to_string(), user.admin());
                true
            }
        }
    }

    /// Removes an administrator. Refuses to remove the last one.
    pub async fn del_admin(&self, uid: &str) -> bool {
        let mut users = self.users.write().await;
        let admins = users.values().filter(|u| u.is_admin()).count();
        match users.get(uid) {
            Some(u) if u.is_admin() && admins > 1 => {
                users.remove(uid);
                true
            }
            _ => false,
        }
    }

    /// Applies a partial update. `false` if the uid is unknown.
    pub async fn mod_user(&self, uid: &str, update: UserUpdate) -> bool {
        let mut users = self.users.write().await;
        match users.get_mut(uid) {
            Some(u) => {
                u.apply(update);
                true
            }
            None => false,
        }
    }

    /// Encodes every user, one line each, sorted by uid.
    pub async fn dump(&self, codec: &dyn UserCodec) -> MeshResult<String> {
        let users = self.users.read().await;
        let mut sorted: Vec<&User> = users.values().collect();
        sorted.sort_unstable_by(|a, b| a.uid().cmp(b.uid()));

        let mut out = String::new();
        for user in sorted {
            out.push_str(&codec.encode(user)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Decodes users from `text` (blank lines skipped) and inserts or replaces them.
    ///
    /// Nothing is applied if any line fails to decode. Returns the number of users loaded.
    pub async fn load(&self, codec: &dyn UserCodec, text: &str) -> MeshResult<usize> {
        let parsed = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| codec.decode(l))
            .collect::<MeshResult<Vec<User>>>()?;

        let n = parsed.len();
        let mut users = self.users.write().await;
        for user in parsed {
            users.insert(user.uid().to_string(), user);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::JsonLineCodec;

    fn store() -> UserStore {
        UserStore::with_users([
            User::new("root", "rootpw", Vec::<String>::new()).admin(),
            User::new("alice", "alicepw", ["all"]),
        ])
    }

    #[tokio::test]
    async fn validate_checks_password() {
        let s = store();
        assert_eq!(s.validate("alice", "alicepw").await.expect("ok").uid(), "alice");
        assert_eq!(
            s.validate("alice", "nope").await.unwrap_err().as_label(),
            "mesh_auth"
        );
        assert!(s.validate("mallory", "x").await.is_err());
    }

    #[tokio::test]
    async fn admin_gate_separates_auth_from_rights() {
        let s = store();
        assert!(s.validate_admin("root", "rootpw").await.is_ok());
        let err = s.validate_admin("alice", "alicepw").await.unwrap_err();
        assert_eq!(err.as_label(), "mesh_access_denied");
    }

    #[tokio::test]
    async fn last_admin_cannot_be_removed() {
        let s = store();
        assert!(!s.del_admin("root").await);
        assert!(s.add_admin(User::new("ops", "opspw", ["all"])).await);
        assert!(s.del_admin("root").await);
        assert!(!s.del_admin("ops").await);
    }

    #[tokio::test]
    async fn del_user_leaves_admins_alone() {
        let s = store();
        assert!(!s.del_user("root").await);
        assert!(s.del_user("alice").await);
        assert!(!s.del_user("alice").await);
    }

    #[tokio::test]
    async fn add_admin_promotes_existing_user() {
        let s = store();
        assert!(s.add_admin(User::new("alice", "ignored", ["x"])).await);
        let alice = s.validate_admin("alice", "alicepw").await.expect("promoted");
        assert!(alice.access_types().contains("all"));
        assert!(!s.add_admin(User::new("alice", "again", ["x"])).await);
    }

    #[tokio::test]
    async fn dump_and_load_preserve_hashes() {
        let s = store();
        let text = s.dump(&JsonLineCodec).await.expect("dump");
        assert_eq!(text.lines().count(), 2);

        let restored = UserStore::new();
        assert_eq!(restored.load(&JsonLineCodec, &text).await.expect("load"), 2);
        assert!(restored.validate_admin("root", "rootpw").await.is_ok());
    }

    #[tokio::test]
    async fn load_is_all_or_nothing() {
        let s = UserStore::new();
        let good = JsonLineCodec
            .encode(&User::new("bob", "pw", ["all"]))
            .expect("encode");
        let text = format!("{good}\nnot json\n");
        let err = s.load(&JsonLineCodec, &text).await.unwrap_err();
        assert_eq!(err.as_label(), "mesh_persistence");
        assert!(s.is_empty().await);
    }
}
