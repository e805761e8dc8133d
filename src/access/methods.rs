//! Wire names of built-in methods.

/// Liveness/readiness query answered by every component.
pub const HEARTBEAT: &str = "heartbeat";
/// Lists the methods the caller may invoke.
pub const REQUEST_METHODS: &str = "requestMethods";
/// Host description and load.
pub const REQUEST_HOST_INFO: &str = "requestHostInfo";
/// The component's registry projection.
pub const REQUEST_COMPONENT_INFO: &str = "requestComponentInfo";
/// Subscribe to value conditions.
pub const REQUEST_NOTIFICATION: &str = "requestNotification";
/// Drop a subscription.
pub const CANCEL_NOTIFICATION: &str = "cancelNotification";
/// Pause the main loop.
pub const SUSPEND: &str = "suspend";
/// Resume the main loop.
pub const RESUME: &str = "resume";
/// Graceful stop with cleanup.
pub const SHUTDOWN: &str = "shutdown";
/// Immediate stop, no cleanup.
pub const KILL: &str = "kill";
/// Toggle the rolling call log.
pub const SET_LOGGING: &str = "setLogging";
/// Read the rolling call log.
pub const GET_CALL_LOG: &str = "getCallLog";
/// Tail the process log.
pub const TAIL_LOG: &str = "tailLog";
/// Told by the registry that a dependency is recovering.
pub const DEPENDENCY_IMPAIRED: &str = "dependencyImpaired";

/// All component built-ins.
pub const COMPONENT_BUILTINS: &[&str] = &[
    HEARTBEAT,
    REQUEST_METHODS,
    REQUEST_HOST_INFO,
    REQUEST_COMPONENT_INFO,
    REQUEST_NOTIFICATION,
    CANCEL_NOTIFICATION,
    SUSPEND,
    RESUME,
    SHUTDOWN,
    KILL,
    SET_LOGGING,
    GET_CALL_LOG,
    TAIL_LOG,
    DEPENDENCY_IMPAIRED,
];

/// Built-ins open to every caller.
pub const COMPONENT_PUBLIC: &[&str] = &[
    HEARTBEAT,
    REQUEST_METHODS,
    REQUEST_HOST_INFO,
    REQUEST_COMPONENT_INFO,
];

/// Built-ins clients get in addition to [`COMPONENT_PUBLIC`].
pub const COMPONENT_CLIENT: &[&str] = &[REQUEST_NOTIFICATION, CANCEL_NOTIFICATION];

/// Registry: component heartbeat.
pub const UPDATE_CONNECTION: &str = "updateConnection";
/// Registry: liveness.
pub const IS_UP: &str = "isUp";
/// Registry: permitted operation names.
pub const REGISTRY_REQUEST_METHODS: &str = "requestMethods";
/// Registry: mesh join.
pub const REGISTER_WITH_REGISTRY: &str = "registerWithRegistry";
/// Registry: read-only status projection.
pub const STATUS_VIEW: &str = "statusView";
/// Registry: host status snapshot.
pub const HOST_STATUS: &str = "hostStatus";

/// Capability-guarded registry operations.
pub const REGISTRY_GUARDED: &[&str] = &[
    UPDATE_CONNECTION,
    IS_UP,
    REGISTRY_REQUEST_METHODS,
    REGISTER_WITH_REGISTRY,
    STATUS_VIEW,
    HOST_STATUS,
];
