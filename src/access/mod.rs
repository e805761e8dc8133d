//! Access-controlled call façade.
//!
//! Every component endpoint, and the registry's own capability-guarded
//! operations, route incoming calls through an [`AccessFacade`]:
//!
//! ```text
//! call(uid, creds, method, args)
//!     │
//!     ├─► classify(creds)           → Anonymous | Component | Client | Owner | Registry
//!     ├─► method known?             → else NoSuchMethod
//!     ├─► policy.permits(kind, m)?  → else MethodNotPermitted
//!     └─► dispatch
//! ```
//!
//! Policies are plain traits ([`AccessPolicy`], [`ReadinessCheck`],
//! [`KillAuthorization`]) with default methods, so a component overrides only
//! what it needs.

mod call_log;
mod facade;
pub mod methods;
mod policy;

pub use call_log::{CallLog, CallRecord};
pub use facade::{AccessFacade, AccessTarget, Caller, CallerKind};
pub use policy::{AccessPolicy, KillAuthorization, MethodSet, ReadinessCheck, RegistryPolicy};
