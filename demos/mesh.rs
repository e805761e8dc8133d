//! # Example: two-registry mesh
//!
//! A thermometer registers with `r1`; a monitor registers with `r2`, finds the
//! thermometer through `r2` alone, and subscribes to `temp > 25`. Both
//! registries log their events through `LogWriter`.
//!
//! Run with: `RUST_LOG=info cargo run --example mesh`

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use meshvisor::{
    AccessPolicy, Caller, Component, ComponentContext, ComponentError, ComponentId, ComponentInfo,
    ComponentRuntime, Condition, Constraints, KillAuthorization, Login, MeshKey, Op, ReadinessCheck,
    Registry, RegistryConfig, Subscribe, User,
};

/// Drifts up by one degree per cycle.
struct Thermometer {
    temp: AtomicI64,
}

impl AccessPolicy for Thermometer {}
impl ReadinessCheck for Thermometer {}
impl KillAuthorization for Thermometer {}

#[async_trait]
impl Component for Thermometer {
    fn methods(&self) -> Vec<String> {
        vec!["read".into()]
    }

    async fn call(&self, _: &Caller, _: &str, _: Value) -> Result<Value, ComponentError> {
        Ok(json!(self.temp.load(Ordering::Relaxed)))
    }

    async fn cycle(&self, _: &ComponentContext) -> Result<(), ComponentError> {
        self.temp.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn value(&self, expr: &str) -> Option<Value> {
        (expr == "temp").then(|| json!(self.temp.load(Ordering::Relaxed)))
    }
}

struct Monitor;

impl AccessPolicy for Monitor {}
impl ReadinessCheck for Monitor {}
impl KillAuthorization for Monitor {}

#[async_trait]
impl Component for Monitor {
    fn methods(&self) -> Vec<String> {
        vec!["onHot".into()]
    }

    async fn call(&self, caller: &Caller, _: &str, args: Value) -> Result<Value, ComponentError> {
        println!("[monitor] too hot from {:?}: {args}", caller.component);
        Ok(Value::Null)
    }
}

fn registry(name: &str, key: &MeshKey) -> Arc<Registry> {
    let mut cfg = RegistryConfig::named(name);
    cfg.base_pulse = Duration::from_millis(500);
    cfg.grace = Duration::from_secs(3);

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(meshvisor::LogWriter::new())];
    Registry::builder(cfg)
        .with_key(key.clone())
        .with_user(User::component("svc", "pw", ["lab"]))
        .with_subscribers(subs)
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let key = MeshKey::generate();
    let r1 = registry("r1", &key);
    let r2 = registry("r2", &key);
    r1.register_with_registry(r1.capability(), r2.link(), true).await?;

    let thermo = ComponentRuntime::new(r1.clone(), Login::new("svc", "pw"))
        .start(
            ComponentInfo::new(ComponentId::new("Thermometer", "lab")?).with_access(["lab"]),
            Arc::new(Thermometer {
                temp: AtomicI64::new(22),
            }),
        )
        .await?;
    let monitor_id = ComponentId::new("Monitor", "desk")?;
    let monitor = ComponentRuntime::new(r2.clone(), Login::new("svc", "pw"))
        .start(ComponentInfo::new(monitor_id.clone()), Arc::new(Monitor))
        .await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let conn = r2
        .request_connection("svc", "pw", &monitor_id, &Constraints::of_type("Thermometer"))
        .await?;
    println!("[main] brokered {} via r2 (owned by {})", conn.id(), conn.info().registry);
    println!("[main] reading: {}", conn.call("svc", "read", Value::Null).await?);
    conn.request_notification("svc", &["temp"], vec![Condition::new("temp", Op::Gt, 25)], "onHot")
        .await?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        r = meshvisor::wait_for_shutdown_signal() => r?,
    }

    thermo.stop().await;
    monitor.stop().await;
    r1.shutdown().await?;
    r2.shutdown().await?;
    Ok(())
}
