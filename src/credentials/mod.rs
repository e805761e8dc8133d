//! Credential / user store.
//!
//! Holds users and administrators with salted password hashes and per-user
//! access-type grants. Readers run concurrently; mutations take a short write lock.
//!
//! - [`User`], [`UserUpdate`]: records and partial modifications
//! - [`UserStore`]: validation and mutation
//! - [`UserCodec`], [`JsonLineCodec`]: one-user-per-line persistence

mod codec;
mod store;
mod user;

pub use codec::{JsonLineCodec, UserCodec};
pub use store::UserStore;
pub use user::{Login, PasswordHash, User, UserUpdate};
