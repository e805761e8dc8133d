//! Components: the application side of the mesh.
//!
//! - [`Component`]: what application code implements;
//! - [`ComponentRuntime`] / [`ComponentHandle`]: register, run the main loop, stop;
//! - [`ComponentEndpoint`]: the access façade every remote call goes through;
//! - [`NotificationEngine`]: edge-triggered value subscriptions;
//! - [`ComponentContext`]: what a running cycle can do (connect, snapshot).

mod context;
mod endpoint;
mod notify;
mod runtime;
mod traits;

pub use context::ComponentContext;
pub use endpoint::ComponentEndpoint;
pub use notify::{Condition, Fired, Notification, NotificationEngine, Op};
pub use runtime::{ComponentHandle, ComponentRuntime, ExitReason};
pub use traits::{Component, ComponentRef, RemoteComponent};
