//! # meshvisor
//!
//! **Meshvisor** is a component registry mesh for long-lived async services.
//!
//! Components register with a [`Registry`], heartbeat to it, find each other
//! through constraint-based brokering, and call each other through an
//! access-controlled façade. Registries detect silent components, probe and
//! relaunch them, keep state snapshots for restarts, and replicate their
//! records to peer registries.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ┌──────────────┐  register / heartbeat   ┌────────────────────────────────────┐
//!   │ ComponentRt  │ ───────────────────────►│ Registry "r1"                      │
//!   │  (Driver)    │◄─── Connection ─────────│  - UserStore (credentials)         │
//!   └──────┬───────┘   (grant capability)    │  - RecordTable (per-record locks)  │
//!          │                                 │  - SnapshotStore                   │
//!          ▼                                 │  - Reaper (pulse, probes, relaunch)│
//!   ┌──────────────┐   call(uid, cap, m)     │  - Mesh (peer inboxes)             │
//!   │ Endpoint     │◄─────── other ──────────│  - Bus ─► SubscriberSet            │
//!   │ AccessFacade │         components      └───────────────┬────────────────────┘
//!   │ CallLog      │                                         │ Join / Advertise /
//!   │ Notifications│                                         │ Withdraw / StateChanged
//!   └──────────────┘                                         ▼
//!                                                 ┌────────────────────┐
//!                                                 │ Registry "r2" ...  │
//!                                                 └────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! register ──► Init ──heartbeat──► Running ──silent for pulse × multiplier──► Recovering
//!                                    ▲                                          │
//!                                    └──────────── heartbeat ───────────────────┤
//!                                                                               ├─ probe ok ─► await heartbeat
//!                                                                               ├─ relaunch (recoverable)
//!                                                                               └─ Dead
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                         |
//! |-------------------|--------------------------------------------------------------|--------------------------------------------|
//! | **Registry**      | Naming, brokering, liveness, snapshots, administration       | [`Registry`], [`RegistryConfig`]           |
//! | **Components**    | Application logic and its runtime                            | [`Component`], [`ComponentRuntime`]        |
//! | **Access**        | Capability classification and method policies                | [`AccessPolicy`], [`Capability`]           |
//! | **Notifications** | Edge-triggered value subscriptions between components        | [`Condition`], [`Connection`]              |
//! | **Events**        | Lifecycle events for logging and monitoring                  | [`Subscribe`], [`Event`]                   |
//! | **Errors**        | Typed errors with stable labels                              | [`MeshError`], [`ComponentError`]          |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use serde_json::{json, Value};
//! use meshvisor::{
//!     AccessPolicy, Caller, Component, ComponentError, ComponentId, ComponentInfo, ComponentRuntime,
//!     Constraints, KillAuthorization, Login, ReadinessCheck, Registry, RegistryConfig, User,
//! };
//!
//! struct Echo;
//! impl AccessPolicy for Echo {}
//! impl ReadinessCheck for Echo {}
//! impl KillAuthorization for Echo {}
//!
//! #[async_trait::async_trait]
//! impl Component for Echo {
//!     fn methods(&self) -> Vec<String> {
//!         vec!["echo".into()]
//!     }
//!     async fn call(&self, _: &Caller, _: &str, args: Value) -> Result<Value, ComponentError> {
//!         Ok(args)
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), meshvisor::MeshError> {
//!     let registry = Registry::builder(RegistryConfig::named("r1"))
//!         .with_user(User::component("svc", "pw", ["all"]))
//!         .build();
//!
//!     let info = ComponentInfo::new(ComponentId::new("Echo", "one")?).with_access(["all"]);
//!     let echo = ComponentRuntime::new(registry.clone(), Login::new("svc", "pw"))
//!         .start(info, Arc::new(Echo))
//!         .await?;
//!
//!     let conn = registry
//!         .request_connection("svc", "pw", echo.id(), &Constraints::of_type("Echo"))
//!         .await?;
//!     assert_eq!(conn.call("svc", "echo", json!(7)).await?, json!(7));
//!
//!     echo.stop().await;
//!     registry.shutdown().await
//! }
//! ```

mod access;
mod capability;
mod component;
mod config;
mod credentials;
mod error;
mod events;
mod host;
mod identity;
mod policies;
mod registry;
mod subscribers;

// ---- Public re-exports ----

pub use access::methods;
pub use access::{
    AccessFacade, AccessPolicy, AccessTarget, CallLog, CallRecord, Caller, CallerKind,
    KillAuthorization, MethodSet, ReadinessCheck, RegistryPolicy,
};
pub use capability::{Capability, CapabilityKind, MeshKey, Secret, Verifier};
pub use component::{
    Component, ComponentContext, ComponentEndpoint, ComponentHandle, ComponentRef, ComponentRuntime,
    Condition, ExitReason, Fired, Notification, NotificationEngine, Op, RemoteComponent,
};
pub use config::{ComponentConfig, RegistryConfig};
pub use credentials::{JsonLineCodec, Login, PasswordHash, User, UserCodec, UserStore, UserUpdate};
pub use error::{ComponentError, MeshError, MeshResult};
pub use events::{Bus, Event, EventKind};
pub use host::{
    ComponentLauncher, HostInfo, HostLoad, HostStatusProvider, LaunchRequest, LocalHost, LogSource,
    MemoryLog,
};
pub use identity::{ALL_ACCESS, ComponentId, ComponentInfo, ComponentState, MiniComponentInfo, RecoveryState};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use registry::{
    Connection, Constraints, HostStatus, PeerLink, Registration, Registry, RegistryBuilder,
    StateSnapshot, StatusView, wait_for_shutdown_signal,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
