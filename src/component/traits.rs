//! # Component contracts.
//!
//! [`Component`] is what application code implements: component-specific
//! methods, one main-loop cycle, value expressions for notifications, and
//! optional lifecycle hooks. Access rules come from its supertraits, all of
//! which have defaults:
//!
//! ```text
//! Component: AccessPolicy + ReadinessCheck + KillAuthorization
//! ```
//!
//! [`RemoteComponent`] is how everyone else sees a running component. The
//! registry, brokered connections and notification callbacks all go through it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::access::{AccessPolicy, Caller, KillAuthorization, ReadinessCheck};
use crate::capability::Capability;
use crate::component::ComponentContext;
use crate::error::{ComponentError, MeshResult};
use crate::identity::ComponentId;

/// Application logic of a component.
///
/// # Example
/// ```rust
/// use std::sync::atomic::{AtomicI64, Ordering};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
/// use meshvisor::{
///     AccessPolicy, Caller, Component, ComponentContext, ComponentError, KillAuthorization,
///     ReadinessCheck,
/// };
///
/// #[derive(Default)]
/// struct Thermometer {
///     temp: AtomicI64,
/// }
///
/// impl AccessPolicy for Thermometer {}
/// impl ReadinessCheck for Thermometer {}
/// impl KillAuthorization for Thermometer {}
///
/// #[async_trait]
/// impl Component for Thermometer {
///     fn methods(&self) -> Vec<String> {
///         vec!["read".into()]
///     }
///
///     async fn call(&self, _caller: &Caller, method: &str, _args: Value) -> Result<Value, ComponentError> {
///         match method {
///             "read" => Ok(json!(self.temp.load(Ordering::Relaxed))),
///             other => Err(ComponentError::fail(format!("unhandled {other}"))),
///         }
///     }
///
///     async fn cycle(&self, _ctx: &ComponentContext) -> Result<(), ComponentError> {
///         self.temp.fetch_add(1, Ordering::Relaxed);
///         Ok(())
///     }
///
///     fn value(&self, expr: &str) -> Option<Value> {
///         (expr == "temp").then(|| json!(self.temp.load(Ordering::Relaxed)))
///     }
/// }
/// ```
#[async_trait]
pub trait Component: AccessPolicy + ReadinessCheck + KillAuthorization + Send + Sync + 'static {
    /// Names of component-specific methods.
    fn methods(&self) -> Vec<String> {
        Vec::new()
    }

    /// Handles a component-specific method (already authorized).
    async fn call(&self, caller: &Caller, method: &str, args: Value) -> Result<Value, ComponentError> {
        let _ = (caller, args);
        Err(ComponentError::fail(format!("no handler for {method}")))
    }

    /// One main-loop iteration. `Fatal` stops the runtime.
    async fn cycle(&self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        let _ = ctx;
        Ok(())
    }

    /// Current value of a notification expression.
    fn value(&self, expr: &str) -> Option<Value> {
        let _ = expr;
        None
    }

    /// Called once at start with the stored snapshot, if any.
    async fn restore(&self, entries: BTreeMap<String, Value>) {
        let _ = entries;
    }

    /// A component this one depends on entered recovery.
    async fn dependency_impaired(&self, id: &ComponentId) {
        let _ = id;
    }

    /// Graceful-stop hook; skipped on kill.
    async fn cleanup(&self) {}
}

/// A running component as seen by callers.
#[async_trait]
pub trait RemoteComponent: Send + Sync + 'static {
    /// Component id.
    fn id(&self) -> &ComponentId;

    /// Liveness probe: the runtime is alive and the component reports ready.
    async fn is_up(&self) -> bool;

    /// Invokes `method` through the access façade.
    async fn call(
        &self,
        uid: &str,
        creds: Option<&Capability>,
        method: &str,
        args: Value,
    ) -> MeshResult<Value>;
}

/// Shared handle to a remote component.
pub type ComponentRef = Arc<dyn RemoteComponent>;
