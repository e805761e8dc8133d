//! Component identity and the registry-visible metadata of a component.
//!
//! - [`ComponentId`]: composite `type$name` key, unique within a registry namespace;
//! - [`ComponentInfo`]: what a component declares when it registers;
//! - [`MiniComponentInfo`]: read-only projection handed to brokers' callers and status views;
//! - [`ComponentState`] / [`RecoveryState`]: lifecycle and recovery progress.

mod id;
mod info;
mod state;

pub use id::ComponentId;
pub use info::{ALL_ACCESS, ComponentInfo, MiniComponentInfo};
pub use state::{ComponentState, RecoveryState};
