//! # Component endpoint: the façade in front of a component.
//!
//! Built-ins are handled here; component-specific methods are forwarded to the
//! [`Component`] after authorization and a readiness check. Every call,
//! including rejected ones, goes into the rolling call log when it is enabled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::access::{
    AccessFacade, AccessTarget, CallLog, Caller, KillAuthorization, MethodSet, ReadinessCheck, methods,
};
use crate::capability::{Capability, Verifier};
use crate::component::notify::{Condition, NotificationEngine};
use crate::component::{Component, RemoteComponent};
use crate::config::ComponentConfig;
use crate::error::{ComponentError, MeshError, MeshResult};
use crate::host::{HostStatusProvider, LogSource};
use crate::identity::{ComponentId, ComponentInfo};

/// Stop and pause switches shared between an endpoint and its runtime loop.
///
/// `shutdown` is a child of `kill`, so a kill also stops anything waiting on
/// the shutdown token.
#[derive(Debug)]
pub(crate) struct Control {
    pub(crate) kill: CancellationToken,
    pub(crate) shutdown: CancellationToken,
    pub(crate) exited: CancellationToken,
    pub(crate) suspended: watch::Sender<bool>,
}

impl Control {
    fn new() -> Self {
        let kill = CancellationToken::new();
        let shutdown = kill.child_token();
        Self {
            kill,
            shutdown,
            exited: CancellationToken::new(),
            suspended: watch::Sender::new(false),
        }
    }

    pub(crate) fn is_suspended(&self) -> bool {
        *self.suspended.borrow()
    }
}

#[derive(Debug, Deserialize)]
struct NotificationArgs {
    #[serde(default)]
    values: Vec<String>,
    #[serde(default)]
    conditions: Vec<Condition>,
    callback: String,
}

#[derive(Debug, Deserialize)]
struct CancelArgs {
    #[serde(default)]
    values: Vec<String>,
    callback: String,
}

#[derive(Debug, Deserialize)]
struct TailArgs {
    #[serde(default = "default_tail")]
    lines: usize,
    offset: Option<usize>,
}

fn default_tail() -> usize {
    50
}

/// Local endpoint of a running component.
pub struct ComponentEndpoint {
    info: ComponentInfo,
    component: Arc<dyn Component>,
    facade: AccessFacade,
    methods: MethodSet,
    call_log: Mutex<CallLog>,
    pub(crate) notify: NotificationEngine,
    pub(crate) control: Control,
    host: Arc<dyn HostStatusProvider>,
    logs: Option<Arc<dyn LogSource>>,
}

impl ComponentEndpoint {
    pub(crate) fn new(
        info: ComponentInfo,
        component: Arc<dyn Component>,
        verifier: Verifier,
        cfg: &ComponentConfig,
        host: Arc<dyn HostStatusProvider>,
        logs: Option<Arc<dyn LogSource>>,
    ) -> Arc<Self> {
        let methods = MethodSet::component(component.methods());
        let facade = AccessFacade::new(verifier, AccessTarget::Component(info.id.clone()));
        Arc::new(Self {
            info,
            component,
            facade,
            methods,
            call_log: Mutex::new(CallLog::new(cfg.call_log_capacity, cfg.call_logging)),
            notify: NotificationEngine::new(),
            control: Control::new(),
            host,
            logs,
        })
    }

    /// Declared metadata.
    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    /// True while the main loop is paused.
    pub fn is_suspended(&self) -> bool {
        self.control.is_suspended()
    }

    async fn dispatch(&self, caller: &Caller, method: &str, args: Value) -> MeshResult<Value> {
        if method == methods::KILL {
            if !self.component.may_kill(caller) {
                return Err(MeshError::MethodNotPermitted {
                    target: self.info.id.to_string(),
                    method: method.to_string(),
                    caller: caller.kind.to_string(),
                });
            }
            self.control.kill.cancel();
            return Ok(json!(true));
        }

        self.facade
            .authorize(self.component.as_ref(), &self.methods, caller.kind, method)?;

        if !self.methods.is_builtin(method) {
            if !self.component.is_ready() {
                return Err(ComponentError::fail(format!("{} is not ready", self.info.id)).into());
            }
            return Ok(self.component.call(caller, method, args).await?);
        }

        match method {
            methods::HEARTBEAT => Ok(json!({
                "alive": true,
                "ready": self.component.is_ready(),
            })),
            methods::REQUEST_METHODS => Ok(json!(self.facade.permitted_for(
                self.component.as_ref(),
                &self.methods,
                caller.kind
            ))),
            methods::REQUEST_HOST_INFO => {
                let info = self.host.probe().await?;
                let load = self.host.poll().await?;
                Ok(json!({ "info": to_json(&info)?, "load": to_json(&load)? }))
            }
            methods::REQUEST_COMPONENT_INFO => Ok(json!({
                "info": to_json(&self.info)?,
                "suspended": self.is_suspended(),
                "ready": self.component.is_ready(),
            })),
            methods::REQUEST_NOTIFICATION => {
                let requester = requester_of(caller)?;
                let req: NotificationArgs = from_json(args)?;
                let replaced = self
                    .notify
                    .request(requester, req.values, req.conditions, req.callback)
                    .await?;
                Ok(json!({ "replaced": replaced }))
            }
            methods::CANCEL_NOTIFICATION => {
                let requester = requester_of(caller)?;
                let req: CancelArgs = from_json(args)?;
                let removed = self.notify.cancel(&requester, &req.values, &req.callback).await;
                Ok(json!(removed))
            }
            methods::SUSPEND => {
                self.control.suspended.send_replace(true);
                Ok(json!(true))
            }
            methods::RESUME => {
                self.control.suspended.send_replace(false);
                Ok(json!(true))
            }
            methods::SHUTDOWN => {
                self.control.shutdown.cancel();
                Ok(json!(true))
            }
            methods::SET_LOGGING => {
                let enabled = args
                    .as_bool()
                    .or_else(|| args.get("enabled").and_then(Value::as_bool))
                    .ok_or_else(|| MeshError::invalid("setLogging expects a boolean"))?;
                Ok(json!(self.call_log.lock().await.set_enabled(enabled)))
            }
            methods::GET_CALL_LOG => to_json(&self.call_log.lock().await.entries()),
            methods::TAIL_LOG => {
                let Some(logs) = &self.logs else {
                    return Err(ComponentError::fail("no log source configured").into());
                };
                let req: TailArgs = if args.is_null() {
                    TailArgs {
                        lines: default_tail(),
                        offset: None,
                    }
                } else {
                    from_json(args)?
                };
                let lines = match req.offset {
                    Some(offset) => logs.seek(offset, req.lines).await?,
                    None => logs.tail(req.lines).await?,
                };
                Ok(json!(lines))
            }
            methods::DEPENDENCY_IMPAIRED => {
                let id: ComponentId = args
                    .get("component")
                    .and_then(Value::as_str)
                    .ok_or_else(|| MeshError::invalid("dependencyImpaired expects a component id"))?
                    .parse()?;
                self.component.dependency_impaired(&id).await;
                Ok(json!(true))
            }
            other => Err(MeshError::NoSuchMethod {
                target: self.info.id.to_string(),
                method: other.to_string(),
            }),
        }
    }
}

#[async_trait]
impl RemoteComponent for ComponentEndpoint {
    fn id(&self) -> &ComponentId {
        &self.info.id
    }

    async fn is_up(&self) -> bool {
        !self.control.exited.is_cancelled()
            && !self.control.kill.is_cancelled()
            && self.component.is_ready()
    }

    async fn call(
        &self,
        uid: &str,
        creds: Option<&Capability>,
        method: &str,
        args: Value,
    ) -> MeshResult<Value> {
        if self.control.exited.is_cancelled() || self.control.kill.is_cancelled() {
            return Err(MeshError::unavailable(&self.info.id, Duration::ZERO));
        }
        let caller = self.facade.classify(uid, creds);
        let res = self.dispatch(&caller, method, args).await;
        self.call_log.lock().await.record(
            uid,
            caller.kind,
            method,
            res.as_ref().err().map(MeshError::as_label),
        );
        res
    }
}

fn requester_of(caller: &Caller) -> MeshResult<ComponentId> {
    caller
        .component
        .clone()
        .ok_or_else(|| MeshError::denied("notifications need a component caller"))
}

fn to_json<T: Serialize>(value: &T) -> MeshResult<Value> {
    serde_json::to_value(value).map_err(|e| MeshError::invalid(e.to_string()))
}

fn from_json<T: for<'de> Deserialize<'de>>(value: Value) -> MeshResult<T> {
    serde_json::from_value(value).map_err(|e| MeshError::invalid(e.to_string()))
}
