//! End-to-end behaviour of registries and component runtimes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio::time;

use crate::access::{AccessPolicy, Caller, KillAuthorization, ReadinessCheck, methods};
use crate::capability::{CapabilityKind, MeshKey};
use crate::component::{
    Component, ComponentContext, ComponentHandle, ComponentRuntime, Condition, ExitReason, Op,
    RemoteComponent,
};
use crate::config::{ComponentConfig, RegistryConfig};
use crate::credentials::{Login, User};
use crate::error::{ComponentError, MeshError, MeshResult};
use crate::events::{Event, EventKind};
use crate::host::{ComponentLauncher, LaunchRequest};
use crate::identity::{ComponentId, ComponentInfo, ComponentState, RecoveryState};
use crate::registry::{Constraints, PeerLink, Registry, StateSnapshot};

fn id(kind: &str, name: &str) -> ComponentId {
    ComponentId::new(kind, name).expect("valid id")
}

fn cfg(name: &str) -> RegistryConfig {
    let mut cfg = RegistryConfig::named(name);
    cfg.base_pulse = Duration::from_secs(1);
    cfg.grace = Duration::from_secs(2);
    cfg
}

fn fast_loop() -> ComponentConfig {
    ComponentConfig {
        loop_period: Duration::from_millis(100),
        ..ComponentConfig::default()
    }
}

fn registry(name: &str) -> Arc<Registry> {
    Registry::builder(cfg(name))
        .with_user(User::component("svc", "pw", ["all"]))
        .with_user(User::new("alice", "secret", ["all"]))
        .with_user(User::new("root", "toor", Vec::<String>::new()).admin())
        .build()
}

async fn wait_for(rx: &mut broadcast::Receiver<Event>, kind: EventKind, id: &ComponentId) -> Event {
    let id = id.to_string();
    time::timeout(Duration::from_secs(60), async {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.kind == kind && ev.is_for(&id) => return ev,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind:?} for {id}"))
}

async fn state_of(reg: &Registry, id: &ComponentId) -> Option<ComponentState> {
    let view = reg.status_view(Some(reg.capability())).await.expect("status");
    view.component(id).map(|c| c.state)
}

/// Remote reference with scripted liveness; never heartbeats on its own.
struct Silent {
    id: ComponentId,
    up: AtomicBool,
}

impl Silent {
    fn arc(id: ComponentId, up: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            up: AtomicBool::new(up),
        })
    }
}

#[async_trait]
impl RemoteComponent for Silent {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    async fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    async fn call(&self, _: &str, _: Option<&crate::Capability>, _: &str, _: Value) -> MeshResult<Value> {
        Ok(Value::Null)
    }
}

/// Exposes a settable `temp` value.
#[derive(Default)]
struct Thermo {
    temp: AtomicI64,
    restored: AtomicI64,
}

impl AccessPolicy for Thermo {}
impl ReadinessCheck for Thermo {}
impl KillAuthorization for Thermo {}

#[async_trait]
impl Component for Thermo {
    fn methods(&self) -> Vec<String> {
        vec!["set".into()]
    }

    async fn call(&self, _: &Caller, method: &str, args: Value) -> Result<Value, ComponentError> {
        match method {
            "set" => {
                let v = args.as_i64().ok_or_else(|| ComponentError::fail("set expects an integer"))?;
                self.temp.store(v, Ordering::SeqCst);
                Ok(json!(v))
            }
            other => Err(ComponentError::fail(format!("unexpected {other}"))),
        }
    }

    fn value(&self, expr: &str) -> Option<Value> {
        (expr == "temp").then(|| json!(self.temp.load(Ordering::SeqCst)))
    }

    async fn restore(&self, entries: BTreeMap<String, Value>) {
        if let Some(v) = entries.get("temp").and_then(Value::as_i64) {
            self.restored.store(v, Ordering::SeqCst);
        }
    }
}

/// Counts `onHot` callbacks and dependency warnings.
#[derive(Default)]
struct Listener {
    hot: AtomicUsize,
    impaired: AtomicUsize,
}

impl AccessPolicy for Listener {}
impl ReadinessCheck for Listener {}
impl KillAuthorization for Listener {}

#[async_trait]
impl Component for Listener {
    fn methods(&self) -> Vec<String> {
        vec!["onHot".into()]
    }

    async fn call(&self, _: &Caller, _: &str, _: Value) -> Result<Value, ComponentError> {
        self.hot.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }

    async fn dependency_impaired(&self, _: &ComponentId) {
        self.impaired.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fails its cycle fatally once told to.
#[derive(Default)]
struct Fragile {
    broken: AtomicBool,
    cleaned: AtomicBool,
}

impl AccessPolicy for Fragile {}
impl ReadinessCheck for Fragile {}
impl KillAuthorization for Fragile {}

#[async_trait]
impl Component for Fragile {
    async fn cycle(&self, _: &ComponentContext) -> Result<(), ComponentError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ComponentError::Fatal {
                error: "sensor gone".into(),
            });
        }
        Ok(())
    }

    async fn cleanup(&self) {
        self.cleaned.store(true, Ordering::SeqCst);
    }
}

async fn start<C: Component>(
    reg: &Arc<Registry>,
    info: ComponentInfo,
    component: Arc<C>,
) -> ComponentHandle {
    ComponentRuntime::new(reg.clone(), Login::new("svc", "pw"))
        .with_config(fast_loop())
        .start(info, component)
        .await
        .expect("start")
}

#[tokio::test(start_paused = true)]
async fn broker_hands_out_vision_camera_and_records_client() {
    let reg = registry("r1");
    let cam = id("Vision", "cam1");
    reg.register_component(
        "svc",
        "pw",
        ComponentInfo::new(cam.clone()).with_access(["all"]),
        Silent::arc(cam.clone(), true),
        None,
    )
    .await
    .expect("register");

    let alice = id("Client", "alice");
    let conn = reg
        .request_connection("alice", "secret", &alice, &Constraints::of_type("Vision"))
        .await
        .expect("broker");
    assert_eq!(conn.id(), &cam);

    let view = reg.status_view(Some(reg.capability())).await.expect("status");
    assert!(view.component(&cam).expect("cam").clients.contains(&alice));
}

#[tokio::test(start_paused = true)]
async fn broker_distinguishes_no_match_from_not_authorized() {
    let reg = registry("r1");
    let cam = id("Vision", "cam1");
    reg.register_component(
        "svc",
        "pw",
        ComponentInfo::new(cam.clone()).with_access(["operators"]),
        Silent::arc(cam.clone(), true),
        None,
    )
    .await
    .expect("register");

    let alice = id("Client", "alice");
    let err = reg
        .request_connection("alice", "secret", &alice, &Constraints::of_type("Pather"))
        .await
        .expect_err("no pather");
    assert!(matches!(err, MeshError::NoMatch { .. }));

    let err = reg
        .request_connection("alice", "secret", &alice, &Constraints::of_type("Vision"))
        .await
        .expect_err("alice lacks operators");
    assert!(matches!(err, MeshError::NotAuthorized { candidates: 1, .. }));

    let conn = reg
        .request_connection("root", "toor", &alice, &Constraints::of_type("Vision"))
        .await
        .expect("admins pass access checks");
    assert_eq!(conn.id(), &cam);

    let err = reg
        .request_connection("alice", "wrong", &alice, &Constraints::new())
        .await
        .expect_err("bad password");
    assert!(matches!(err, MeshError::Auth { .. }));
}

#[tokio::test(start_paused = true)]
async fn silent_component_is_demoted_only_after_its_window() {
    let reg = registry("r1");
    let cam = id("Vision", "cam1");
    reg.register_component(
        "svc",
        "pw",
        ComponentInfo::new(cam.clone()).with_recovery_multiplier(3),
        Silent::arc(cam.clone(), true),
        None,
    )
    .await
    .expect("register");
    reg.update_connection(None, &cam).await.expect("heartbeat");

    time::sleep(Duration::from_millis(2900)).await;
    assert_eq!(state_of(&reg, &cam).await, Some(ComponentState::Running));

    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state_of(&reg, &cam).await, Some(ComponentState::Recovering));
}

#[tokio::test(start_paused = true)]
async fn heartbeat_during_recovery_restores_running() {
    let reg = registry("r1");
    let mut rx = reg.subscribe();
    let cam = id("Vision", "cam1");
    reg.register_component(
        "svc",
        "pw",
        ComponentInfo::new(cam.clone()).with_recovery_multiplier(1),
        Silent::arc(cam.clone(), true),
        None,
    )
    .await
    .expect("register");

    wait_for(&mut rx, EventKind::RecoveryStarted, &cam).await;
    assert_eq!(
        reg.update_connection(None, &cam).await.expect("heartbeat"),
        ComponentState::Running
    );
    wait_for(&mut rx, EventKind::ComponentRecovered, &cam).await;
}

#[tokio::test(start_paused = true)]
async fn unanswered_probes_end_in_dead_and_id_can_be_reused() {
    let reg = registry("r1");
    let mut rx = reg.subscribe();
    let cam = id("Vision", "cam1");
    let info = ComponentInfo::new(cam.clone()).with_recovery_multiplier(1);
    reg.register_component("svc", "pw", info.clone(), Silent::arc(cam.clone(), false), None)
        .await
        .expect("register");

    let failed = wait_for(&mut rx, EventKind::ProbeFailed, &cam).await;
    assert_eq!(failed.attempt, Some(1));
    wait_for(&mut rx, EventKind::ComponentDead, &cam).await;
    assert_eq!(
        reg.update_connection(None, &cam).await.expect("heartbeat"),
        ComponentState::Dead
    );

    let err = reg
        .request_connection("alice", "secret", &id("Client", "a"), &Constraints::of_type("Vision"))
        .await
        .expect_err("dead components are not brokered");
    assert!(matches!(err, MeshError::NoMatch { .. }));

    reg.register_component("svc", "pw", info, Silent::arc(cam.clone(), true), None)
        .await
        .expect("dead record is replaced");
    assert_eq!(state_of(&reg, &cam).await, Some(ComponentState::Init));
}

#[tokio::test(start_paused = true)]
async fn live_id_conflicts_and_concurrent_registrations_leave_one_winner() {
    let reg = registry("r1");
    let cam = id("Vision", "cam1");

    let attempts = (0..8).map(|_| {
        let reg = reg.clone();
        let cam = cam.clone();
        tokio::spawn(async move {
            reg.register_component(
                "svc",
                "pw",
                ComponentInfo::new(cam.clone()),
                Silent::arc(cam, true),
                None,
            )
            .await
        })
    });
    let results = futures::future::join_all(attempts).await;
    let won = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(MeshError::Conflict { .. }))))
        .count();
    assert_eq!((won, conflicts), (1, 7));
}

#[tokio::test(start_paused = true)]
async fn registration_checks_user_and_host_affinity() {
    let reg = registry("r1");
    let cam = id("Vision", "cam1");

    let err = reg
        .register_component("svc", "nope", ComponentInfo::new(cam.clone()), Silent::arc(cam.clone(), true), None)
        .await
        .expect_err("bad password");
    assert!(matches!(err, MeshError::Auth { .. }));

    let pinned = ComponentInfo::new(cam.clone()).on_host("lab-1").only_on(["lab-2"]);
    let err = reg
        .register_component("svc", "pw", pinned, Silent::arc(cam.clone(), true), None)
        .await
        .expect_err("wrong host");
    assert!(matches!(err, MeshError::InvalidArgument { .. }));

    let err = reg
        .register_component(
            "svc",
            "pw",
            ComponentInfo::new(cam.clone()),
            Silent::arc(cam, true),
            Some(crate::Secret::generate()),
        )
        .await
        .expect_err("no relaunch pending");
    assert!(matches!(err, MeshError::Auth { .. }));
}

#[tokio::test(start_paused = true)]
async fn heartbeat_stamp_never_moves_backwards() {
    let reg = registry("r1");
    let cam = id("Vision", "cam1");
    reg.register_component("svc", "pw", ComponentInfo::new(cam.clone()), Silent::arc(cam.clone(), true), None)
        .await
        .expect("register");

    let rec = reg.table.get(&cam).await.expect("record");
    let later = time::Instant::now() + Duration::from_secs(5);
    rec.lock().await.stamp(later);
    rec.lock().await.stamp(time::Instant::now());
    assert_eq!(rec.lock().await.last_heartbeat, later);
}

#[tokio::test(start_paused = true)]
async fn snapshot_round_trips_through_the_registry() {
    let reg = registry("r1");
    let cam = id("Vision", "cam1");
    let registration = reg
        .register_component(
            "svc",
            "pw",
            ComponentInfo::new(cam.clone()).with_state_store(true),
            Silent::arc(cam.clone(), true),
            None,
        )
        .await
        .expect("register");

    let entries = BTreeMap::from([
        ("pose".to_string(), json!({"x": 1.5, "y": -2})),
        ("mode".to_string(), json!("scan")),
    ]);
    reg.set_component_state(&cam, &registration.password, StateSnapshot::new(entries.clone()).expect("snapshot"))
        .await
        .expect("store");
    let back = reg
        .get_component_state(&cam, &registration.password)
        .await
        .expect("load");
    assert_eq!(back.entries(), &entries);

    let err = reg
        .get_component_state(&cam, &crate::Secret::generate())
        .await
        .expect_err("wrong password");
    assert!(matches!(err, MeshError::Auth { .. }));
}

#[tokio::test(start_paused = true)]
async fn runtime_restores_snapshot_on_start() {
    let reg = registry("r1");
    let cam = id("Thermo", "t1");
    let info = ComponentInfo::new(cam.clone()).with_state_store(true);

    let first = start(&reg, info.clone(), Arc::new(Thermo::default())).await;
    reg.set_component_state(
        &cam,
        first.password(),
        StateSnapshot::new(BTreeMap::from([("temp".to_string(), json!(21))])).expect("snapshot"),
    )
    .await
    .expect("store");
    assert_eq!(first.stop().await, ExitReason::Shutdown);

    let thermo = Arc::new(Thermo::default());
    let second = start(&reg, info, thermo.clone()).await;
    assert_eq!(thermo.restored.load(Ordering::SeqCst), 21);
    second.stop().await;
}

#[tokio::test(start_paused = true)]
async fn endpoint_enforces_access_without_side_effects() {
    let reg = registry("r1");
    let cam = id("Thermo", "t1");
    let handle = start(&reg, ComponentInfo::new(cam.clone()).with_access(["all"]), Arc::new(Thermo::default())).await;
    let endpoint = handle.endpoint();

    let err = endpoint
        .call("mallory", None, methods::SHUTDOWN, Value::Null)
        .await
        .expect_err("anonymous shutdown");
    assert!(matches!(err, MeshError::MethodNotPermitted { .. }));
    let err = endpoint
        .call("mallory", None, "selfDestruct", Value::Null)
        .await
        .expect_err("unknown method");
    assert!(matches!(err, MeshError::NoSuchMethod { .. }));
    let err = endpoint
        .call("mallory", None, methods::KILL, Value::Null)
        .await
        .expect_err("anonymous kill");
    assert!(matches!(err, MeshError::MethodNotPermitted { .. }));

    time::sleep(Duration::from_millis(300)).await;
    assert!(!handle.is_finished());
    assert!(endpoint.is_up().await);

    let listed = endpoint
        .call("mallory", None, methods::REQUEST_METHODS, Value::Null)
        .await
        .expect("public");
    let listed: Vec<String> = serde_json::from_value(listed).expect("names");
    assert!(listed.contains(&"set".to_string()));
    assert!(!listed.contains(&methods::SHUTDOWN.to_string()));

    // a grant for another target is worth nothing here
    let foreign = reg.key.issue(CapabilityKind::Grant {
        holder: id("Client", "a"),
        target: id("Thermo", "other"),
    });
    let err = endpoint
        .call("a", Some(&foreign), methods::REQUEST_NOTIFICATION, json!({"callback": "x"}))
        .await
        .expect_err("foreign grant");
    assert!(matches!(err, MeshError::MethodNotPermitted { .. }));

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn notifications_fire_on_rising_edges_only() {
    let reg = registry("r1");
    let thermo_id = id("Thermo", "t1");
    let listener_id = id("Listener", "l1");
    let thermo = start(&reg, ComponentInfo::new(thermo_id.clone()).with_access(["all"]), Arc::new(Thermo::default())).await;
    let listener = Arc::new(Listener::default());
    let lh = start(&reg, ComponentInfo::new(listener_id.clone()).with_access(["all"]), listener.clone()).await;

    let conn = reg
        .request_connection("svc", "pw", &listener_id, &Constraints::of_type("Thermo"))
        .await
        .expect("broker");
    conn.call("svc", "set", json!(35)).await.expect("set");
    let replaced = conn
        .request_notification("svc", &["temp"], vec![Condition::new("temp", Op::Gt, 30)], "onHot")
        .await
        .expect("subscribe");
    assert!(!replaced);

    time::sleep(Duration::from_millis(500)).await;
    assert_eq!(listener.hot.load(Ordering::SeqCst), 1);

    conn.call("svc", "set", json!(20)).await.expect("cool");
    time::sleep(Duration::from_millis(300)).await;
    conn.call("svc", "set", json!(40)).await.expect("heat");
    time::sleep(Duration::from_millis(300)).await;
    assert_eq!(listener.hot.load(Ordering::SeqCst), 2);

    assert!(conn.cancel_notification("svc", &["temp"], "onHot").await.expect("cancel"));
    assert!(!conn.cancel_notification("svc", &["temp"], "onHot").await.expect("cancel again"));

    thermo.stop().await;
    lh.stop().await;
}

#[tokio::test(start_paused = true)]
async fn killed_component_is_recovered_to_dead_and_clients_are_warned() {
    let mut c = cfg("r1");
    c.default_recovery_multiplier = 1;
    let reg = Registry::builder(c)
        .with_user(User::component("svc", "pw", ["all"]))
        .with_user(User::new("root", "toor", Vec::<String>::new()).admin())
        .build();
    let mut rx = reg.subscribe();

    let cam = id("Thermo", "t1");
    let watcher_id = id("Listener", "w");
    let handle = start(&reg, ComponentInfo::new(cam.clone()).with_access(["all"]), Arc::new(Thermo::default())).await;
    let watcher = Arc::new(Listener::default());
    let wh = start(&reg, ComponentInfo::new(watcher_id.clone()), watcher.clone()).await;
    reg.request_connection("svc", "pw", &watcher_id, &Constraints::of_type("Thermo"))
        .await
        .expect("broker");
    time::sleep(Duration::from_millis(150)).await;

    assert!(reg.kill_component("root", "toor", &cam).await.expect("kill"));
    assert_eq!(handle.join().await, ExitReason::Killed);
    assert_eq!(state_of(&reg, &cam).await, Some(ComponentState::Running));

    wait_for(&mut rx, EventKind::RecoveryStarted, &cam).await;
    wait_for(&mut rx, EventKind::ComponentDead, &cam).await;
    assert_eq!(watcher.impaired.load(Ordering::SeqCst), 1);

    let err = reg.kill_component("svc", "pw", &cam).await.expect_err("not admin");
    assert!(matches!(err, MeshError::AccessDenied { .. }));
    wh.stop().await;
}

struct ChannelLauncher(mpsc::UnboundedSender<LaunchRequest>);

#[async_trait]
impl ComponentLauncher for ChannelLauncher {
    async fn launch(&self, req: LaunchRequest) -> MeshResult<()> {
        self.0
            .send(req)
            .map_err(|_| MeshError::unavailable("launcher", Duration::ZERO))
    }
}

#[tokio::test(start_paused = true)]
async fn recoverable_component_is_relaunched_with_its_clients() {
    let (tx, mut launches) = mpsc::unbounded_channel();
    let mut c = cfg("r1");
    c.default_recovery_multiplier = 1;
    let reg = Registry::builder(c)
        .with_user(User::component("svc", "pw", ["all"]))
        .with_launcher(Arc::new(ChannelLauncher(tx)))
        .build();
    let mut rx = reg.subscribe();

    let cam = id("Thermo", "t1");
    let info = ComponentInfo::new(cam.clone()).with_access(["all"]).recoverable(true);
    let first = start(&reg, info, Arc::new(Thermo::default())).await;
    let client = id("Listener", "l1");
    reg.request_connection("svc", "pw", &client, &Constraints::of_type("Thermo"))
        .await
        .expect("broker");

    first.kill();
    let req = time::timeout(Duration::from_secs(30), launches.recv())
        .await
        .expect("launch in time")
        .expect("launcher request");
    assert!(req.relaunch);
    assert_eq!(req.id, cam);
    wait_for(&mut rx, EventKind::ComponentRelaunched, &cam).await;

    let view = reg.status_view(Some(reg.capability())).await.expect("status");
    assert_eq!(view.component(&cam).expect("cam").recovery, RecoveryState::Relaunched);

    let second = ComponentRuntime::new(reg.clone(), Login::new("svc", "pw"))
        .with_config(fast_loop())
        .with_password(req.password)
        .start(req.info, Arc::new(Thermo::default()))
        .await
        .expect("relaunched instance registers");
    time::sleep(Duration::from_millis(300)).await;

    let view = reg.status_view(Some(reg.capability())).await.expect("status");
    let rec = view.component(&cam).expect("cam");
    assert_eq!(rec.state, ComponentState::Running);
    assert!(rec.clients.contains(&client));
    second.stop().await;
}

#[tokio::test(start_paused = true)]
async fn suspended_component_is_never_reaped() {
    let reg = registry("r1");
    let cam = id("Thermo", "t1");
    let handle = start(&reg, ComponentInfo::new(cam.clone()).with_recovery_multiplier(1), Arc::new(Thermo::default())).await;
    time::sleep(Duration::from_millis(150)).await;

    assert!(reg.suspend_component("root", "toor", &cam).await.expect("suspend"));
    assert!(!reg.suspend_component("root", "toor", &cam).await.expect("again"));
    time::sleep(Duration::from_millis(50)).await;
    assert!(handle.is_suspended());

    time::sleep(Duration::from_secs(5)).await;
    assert_eq!(state_of(&reg, &cam).await, Some(ComponentState::Suspended));

    assert!(reg.resume_component("root", "toor", &cam).await.expect("resume"));
    time::sleep(Duration::from_millis(150)).await;
    assert!(!handle.is_suspended());
    assert_eq!(state_of(&reg, &cam).await, Some(ComponentState::Running));
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn fatal_cycle_runs_cleanup_and_deregisters() {
    let reg = registry("r1");
    let cam = id("Fragile", "f1");
    let fragile = Arc::new(Fragile::default());
    let handle = start(&reg, ComponentInfo::new(cam.clone()), fragile.clone()).await;

    fragile.broken.store(true, Ordering::SeqCst);
    assert!(matches!(handle.join().await, ExitReason::Fatal(_)));
    assert!(fragile.cleaned.load(Ordering::SeqCst));
    assert_eq!(state_of(&reg, &cam).await, None);
}

#[tokio::test(start_paused = true)]
async fn admin_operations_answer_false_when_nothing_changes() {
    let reg = registry("r1");
    let cam = id("Thermo", "t1");
    let handle = start(&reg, ComponentInfo::new(cam.clone()), Arc::new(Thermo::default())).await;

    assert!(!reg
        .start_component("root", "toor", ComponentInfo::new(id("Thermo", "t2")))
        .await
        .expect("no launcher"));
    assert!(!reg
        .shutdown_components("root", "toor", &Constraints::of_type("Pather"))
        .await
        .expect("nothing matched"));
    assert!(matches!(
        reg.set_recovery_multiplier("root", "toor", &cam, 0).await,
        Err(MeshError::InvalidArgument { .. })
    ));
    assert!(reg.set_recovery_multiplier("root", "toor", &cam, 7).await.expect("set"));

    assert!(reg.add_user("root", "toor", User::new("bob", "pw", ["all"])).await.expect("add"));
    assert!(!reg.add_user("root", "toor", User::new("bob", "pw", ["all"])).await.expect("dup"));
    assert!(!reg.del_admin("root", "toor", "root").await.expect("last admin stays"));
    assert!(matches!(
        reg.del_user("bob", "pw", "alice").await,
        Err(MeshError::AccessDenied { .. })
    ));

    assert!(reg
        .shutdown_components("root", "toor", &Constraints::of_type("Thermo"))
        .await
        .expect("matched"));
    assert_eq!(handle.join().await, ExitReason::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn registry_guard_follows_caller_class() {
    let reg = registry("r1");
    let cam = id("Vision", "cam1");
    let registration = reg
        .register_component("svc", "pw", ComponentInfo::new(cam.clone()), Silent::arc(cam, true), None)
        .await
        .expect("register");

    let err = reg.status_view(None).await.expect_err("anonymous");
    assert!(matches!(err, MeshError::MethodNotPermitted { .. }));
    reg.status_view(Some(&registration.capability))
        .await
        .expect("components may look");

    let other = registry("r2");
    let err = reg
        .register_with_registry(&registration.capability, other.link(), true)
        .await
        .expect_err("components may not join registries");
    assert!(matches!(err, MeshError::MethodNotPermitted { .. }));

    let anon = reg.request_methods(None);
    assert_eq!(anon, vec![methods::IS_UP.to_string(), methods::UPDATE_CONNECTION.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn peers_resolve_components_registered_elsewhere() {
    let key = MeshKey::generate();
    let build = |name: &str| {
        Registry::builder(cfg(name))
            .with_key(key.clone())
            .with_user(User::component("svc", "pw", ["all"]))
            .build()
    };
    let r1 = build("r1");
    let r2 = build("r2");
    let mut rx2 = r2.subscribe();

    r1.register_with_registry(r2.capability(), r2.link(), true)
        .await
        .expect("join");
    let nav = id("Pather", "nav");
    let handle = start(&r1, ComponentInfo::new(nav.clone()).with_access(["all"]), Arc::new(Thermo::default())).await;

    let replicated = wait_for(&mut rx2, EventKind::ComponentReplicated, &nav).await;
    assert_eq!(replicated.peer.as_deref(), Some("r1"));

    let requester = id("Client", "c");
    let conn = r2
        .request_connection("svc", "pw", &requester, &Constraints::of_type("Pather"))
        .await
        .expect("r2 brokers r1's component");
    assert_eq!(conn.id(), &nav);
    assert_eq!(conn.info().registry, "r1");
    conn.call("svc", "set", json!(3)).await.expect("call through r2's grant");

    time::sleep(Duration::from_millis(50)).await;
    let view = r1.status_view(Some(r1.capability())).await.expect("status");
    assert!(view.component(&nav).expect("nav").clients.contains(&requester));
    assert!(view.peers.contains_key("r2"));

    assert_eq!(handle.stop().await, ExitReason::Shutdown);
    wait_for(&mut rx2, EventKind::ComponentDeregistered, &nav).await;
}

#[tokio::test(start_paused = true)]
async fn forwarded_join_introduces_newcomer_to_existing_peers() {
    let key = MeshKey::generate();
    let build = |name: &str| Registry::builder(cfg(name)).with_key(key.clone()).build();
    let (r1, r2, r3) = (build("r1"), build("r2"), build("r3"));

    r1.register_with_registry(r1.capability(), r2.link(), true)
        .await
        .expect("r2 joins");
    time::sleep(Duration::from_millis(50)).await;
    r1.register_with_registry(r1.capability(), r3.link(), true)
        .await
        .expect("r3 joins");
    time::sleep(Duration::from_millis(50)).await;

    let names = |v: crate::StatusView| v.peers.keys().cloned().collect::<Vec<_>>();
    assert_eq!(names(r1.status_view(Some(r1.capability())).await.expect("r1")), ["r2", "r3"]);
    assert_eq!(names(r2.status_view(Some(r2.capability())).await.expect("r2")), ["r1", "r3"]);
    assert_eq!(names(r3.status_view(Some(r3.capability())).await.expect("r3")), ["r1", "r2"]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_components_then_the_registry() {
    let reg = registry("r1");
    let mut rx = reg.subscribe();
    let a = start(&reg, ComponentInfo::new(id("Thermo", "a")), Arc::new(Thermo::default())).await;
    let b = start(&reg, ComponentInfo::new(id("Thermo", "b")), Arc::new(Thermo::default())).await;

    reg.shutdown().await.expect("all stopped within grace");
    assert!(!reg.is_up());
    assert_eq!(a.join().await, ExitReason::Shutdown);
    assert_eq!(b.join().await, ExitReason::Shutdown);

    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(ev.kind);
    }
    assert!(kinds.contains(&EventKind::ShutdownRequested));
    assert!(kinds.contains(&EventKind::AllStoppedWithin));

    let cam = id("Vision", "late");
    let err = reg
        .register_component("svc", "pw", ComponentInfo::new(cam.clone()), Silent::arc(cam, true), None)
        .await
        .expect_err("registry is down");
    assert!(matches!(err, MeshError::RemoteUnavailable { .. }));
}

#[tokio::test(start_paused = true)]
async fn shutdown_reports_components_that_never_leave() {
    let reg = registry("r1");
    let cam = id("Vision", "stuck");
    reg.register_component("svc", "pw", ComponentInfo::new(cam.clone()), Silent::arc(cam, true), None)
        .await
        .expect("register");

    match reg.shutdown().await {
        Err(MeshError::GraceExceeded { stuck, .. }) => assert_eq!(stuck, ["Vision$stuck"]),
        other => panic!("expected GraceExceeded, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn peers_follow_a_relaunched_component_to_its_new_endpoint() {
    let key = MeshKey::generate();
    let (tx, mut launches) = mpsc::unbounded_channel();
    let mut c = cfg("r1");
    c.default_recovery_multiplier = 1;
    let r1 = Registry::builder(c)
        .with_key(key.clone())
        .with_user(User::component("svc", "pw", ["all"]))
        .with_launcher(Arc::new(ChannelLauncher(tx)))
        .build();
    let r2 = Registry::builder(cfg("r2"))
        .with_key(key)
        .with_user(User::component("svc", "pw", ["all"]))
        .build();
    let mut rx2 = r2.subscribe();
    r1.register_with_registry(r1.capability(), r2.link(), true)
        .await
        .expect("join");

    let t1 = id("Thermo", "t1");
    let info = ComponentInfo::new(t1.clone()).with_access(["all"]).recoverable(true);
    let first = start(&r1, info, Arc::new(Thermo::default())).await;
    wait_for(&mut rx2, EventKind::ComponentReplicated, &t1).await;
    time::sleep(Duration::from_millis(150)).await;

    first.kill();
    let req = time::timeout(Duration::from_secs(30), launches.recv())
        .await
        .expect("launch in time")
        .expect("launcher request");
    let second = ComponentRuntime::new(r1.clone(), Login::new("svc", "pw"))
        .with_config(fast_loop())
        .with_password(req.password)
        .start(req.info, Arc::new(Thermo::default()))
        .await
        .expect("relaunched instance registers");
    time::sleep(Duration::from_millis(300)).await;
    assert_eq!(state_of(&r2, &t1).await, Some(ComponentState::Running));

    let conn = r2
        .request_connection("svc", "pw", &id("Client", "c"), &Constraints::of_type("Thermo"))
        .await
        .expect("r2 brokers the relaunched instance");
    assert_eq!(conn.call("svc", "set", json!(7)).await.expect("new endpoint answers"), json!(7));
    second.stop().await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_reply_decides_whether_the_loop_is_paused() {
    let reg = registry("r1");
    let t1 = id("Thermo", "t1");
    let handle = start(&reg, ComponentInfo::new(t1.clone()), Arc::new(Thermo::default())).await;
    let endpoint = handle.endpoint();
    time::sleep(Duration::from_millis(150)).await;

    let err = endpoint
        .call("svc", Some(handle.capability()), methods::SUSPEND, Value::Null)
        .await
        .expect_err("owners may not suspend themselves");
    assert!(matches!(err, MeshError::MethodNotPermitted { .. }));

    // a pause the registry record does not know about is undone by the next heartbeat
    endpoint
        .call("r1", Some(reg.capability()), methods::SUSPEND, Value::Null)
        .await
        .expect("registry may suspend");
    assert!(handle.is_suspended());
    time::sleep(Duration::from_millis(150)).await;
    assert!(!handle.is_suspended());
    assert_eq!(state_of(&reg, &t1).await, Some(ComponentState::Running));
    assert!(!reg.resume_component("root", "toor", &t1).await.expect("nothing to resume"));

    // and a record that says suspended pauses the loop again after a stray resume
    assert!(reg.suspend_component("root", "toor", &t1).await.expect("suspend"));
    time::sleep(Duration::from_millis(150)).await;
    assert!(handle.is_suspended());
    endpoint
        .call("r1", Some(reg.capability()), methods::RESUME, Value::Null)
        .await
        .expect("registry may resume");
    time::sleep(Duration::from_millis(150)).await;
    assert!(handle.is_suspended());
    assert_eq!(state_of(&reg, &t1).await, Some(ComponentState::Suspended));

    assert!(reg.resume_component("root", "toor", &t1).await.expect("resume"));
    time::sleep(Duration::from_millis(150)).await;
    assert!(!handle.is_suspended());
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn plural_broker_skips_the_requester_but_singular_does_not() {
    let reg = registry("r1");
    let (cam1, cam2) = (id("Vision", "cam1"), id("Vision", "cam2"));
    for cam in [&cam1, &cam2] {
        reg.register_component(
            "svc",
            "pw",
            ComponentInfo::new(cam.clone()).with_access(["all"]),
            Silent::arc(cam.clone(), true),
            None,
        )
        .await
        .expect("register");
    }

    let conns = reg
        .request_connections("svc", "pw", &cam1, &Constraints::of_type("Vision"))
        .await
        .expect("broker");
    let ids: Vec<_> = conns.iter().map(|c| c.id().clone()).collect();
    assert_eq!(ids, [cam2.clone()]);

    let first = reg
        .request_connection("svc", "pw", &cam1, &Constraints::of_type("Vision"))
        .await
        .expect("broker");
    assert_eq!(first.id(), &cam1);

    let err = reg
        .request_connections("svc", "pw", &cam1, &Constraints::new().with("id", "Vision$cam1"))
        .await
        .expect_err("only the requester matched");
    assert!(matches!(err, MeshError::NoMatch { .. }));
}

#[tokio::test(start_paused = true)]
async fn registered_requester_must_belong_to_the_calling_user() {
    let reg = registry("r1");
    let mut rx = reg.subscribe();
    let (cam, nav) = (id("Vision", "cam1"), id("Pather", "nav"));
    for c in [&cam, &nav] {
        reg.register_component(
            "svc",
            "pw",
            ComponentInfo::new(c.clone()).with_access(["all"]),
            Silent::arc(c.clone(), true),
            None,
        )
        .await
        .expect("register");
    }

    let err = reg
        .request_connection("alice", "secret", &nav, &Constraints::of_type("Vision"))
        .await
        .expect_err("alice does not run nav");
    assert!(matches!(err, MeshError::AccessDenied { .. }));
    wait_for(&mut rx, EventKind::AccessRejected, &nav).await;
    let view = reg.status_view(Some(reg.capability())).await.expect("status");
    assert!(view.component(&cam).expect("cam").clients.is_empty());

    reg.request_connection("svc", "pw", &nav, &Constraints::of_type("Vision"))
        .await
        .expect("the registering user");
    reg.request_connection("root", "toor", &nav, &Constraints::of_type("Vision"))
        .await
        .expect("admins act for anyone");
    reg.request_connection("alice", "secret", &id("Client", "alice"), &Constraints::of_type("Vision"))
        .await
        .expect("unregistered requesters are free-form");
}

#[tokio::test(start_paused = true)]
async fn closed_peer_inbox_does_not_stop_propagation() {
    let r1 = registry("r1");
    let r2 = registry("r2");
    let mut rx1 = r1.subscribe();
    let mut rx2 = r2.subscribe();

    r1.register_with_registry(r1.capability(), r2.link(), true)
        .await
        .expect("r2 joins");
    // sorts before r2, so the broadcast meets it first
    r1.register_with_registry(r1.capability(), PeerLink::closed("gone"), false)
        .await
        .expect("gone joins");
    time::sleep(Duration::from_millis(50)).await;

    let cam = id("Vision", "cam1");
    r1.register_component("svc", "pw", ComponentInfo::new(cam.clone()), Silent::arc(cam.clone(), true), None)
        .await
        .expect("register");
    wait_for(&mut rx2, EventKind::ComponentReplicated, &cam).await;

    let mut failed = false;
    let mut left = false;
    time::timeout(Duration::from_secs(10), async {
        while !(failed && left) {
            match rx1.recv().await {
                Ok(ev) if ev.peer.as_deref() == Some("gone") => match ev.kind {
                    EventKind::PropagationFailed => failed = true,
                    EventKind::PeerLeft => left = true,
                    _ => {}
                },
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
            }
        }
    })
    .await
    .expect("failure reported and peer dropped");

    let view = r1.status_view(Some(r1.capability())).await.expect("status");
    assert_eq!(view.peers.keys().cloned().collect::<Vec<_>>(), ["r2"]);
}
