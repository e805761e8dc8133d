//! # Runtime configuration.
//!
//! Two plain structs with public fields and documented defaults:
//! - [`RegistryConfig`]: registry pulse, recovery, mesh and bus settings;
//! - [`ComponentConfig`]: component main loop, heartbeat retries and call log.
//!
//! ## Sentinel values
//! - `call_log_capacity = 0` → call logging unavailable for the component
//! - `recovery_probes = 0` → no re-probe, go straight to relaunch/dead
//! - `rpc_timeout = 0s` → clamped to 1ms (remote waits are always bounded)
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use meshvisor::RegistryConfig;
//!
//! let mut cfg = RegistryConfig::named("r1");
//! cfg.base_pulse = Duration::from_millis(500);
//! cfg.default_recovery_multiplier = 4;
//!
//! assert_eq!(cfg.recovery_window(4), Duration::from_secs(2));
//! ```

use std::time::Duration;

use crate::policies::{BackoffPolicy, JitterPolicy};

/// Configuration of one registry.
///
/// ## Field semantics
/// - `name`: registry name, unique within the mesh
/// - `base_pulse`: reaper scan period and the unit of heartbeat timeouts
/// - `default_recovery_multiplier`: multiplier used when a component declares `0`
/// - `recovery_probes`: liveness re-probes before declaring a component dead
/// - `probe_backoff`: pacing between re-probes
/// - `rpc_timeout`: bound on every wait that depends on a peer
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `mesh_inbox_capacity`: per-registry mesh message queue (min 1)
/// - `grace`: how long administrative shutdown waits for components
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Registry name; appears in registry capabilities and peer tables.
    pub name: String,

    /// Reaper pulse.
    ///
    /// A component is demoted to `Recovering` once its heartbeat is older than
    /// `base_pulse × recovery_multiplier`.
    pub base_pulse: Duration,

    /// Multiplier applied to components registered with a multiplier of `0`.
    pub default_recovery_multiplier: u32,

    /// Number of `is_up` probes sent to a component that entered recovery.
    pub recovery_probes: u32,

    /// Delay policy between recovery probes.
    pub probe_backoff: BackoffPolicy,

    /// Upper bound for any wait on a peer registry or a component endpoint.
    pub rpc_timeout: Duration,

    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,

    /// Capacity of the mesh inbox (registry-to-registry messages).
    pub mesh_inbox_capacity: usize,

    /// Maximum wait for components to acknowledge administrative shutdown.
    pub grace: Duration,
}

impl RegistryConfig {
    /// Default configuration with the given registry name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Heartbeat age after which a component with `multiplier` is demoted.
    ///
    /// A multiplier of `0` falls back to `default_recovery_multiplier`.
    #[inline]
    pub fn recovery_window(&self, multiplier: u32) -> Duration {
        let m = if multiplier == 0 {
            self.default_recovery_multiplier.max(1)
        } else {
            multiplier
        };
        self.base_pulse.saturating_mul(m)
    }

    /// Returns the remote wait bound, never zero.
    #[inline]
    pub fn rpc_timeout_clamped(&self) -> Duration {
        self.rpc_timeout.max(Duration::from_millis(1))
    }

    /// Returns the bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the mesh inbox capacity clamped to a minimum of 1.
    #[inline]
    pub fn mesh_inbox_clamped(&self) -> usize {
        self.mesh_inbox_capacity.max(1)
    }
}

impl Default for RegistryConfig {
    /// Default configuration:
    ///
    /// - `name = "registry"`
    /// - `base_pulse = 1s`
    /// - `default_recovery_multiplier = 3`
    /// - `recovery_probes = 2`, probe backoff 200ms doubling up to 2s
    /// - `rpc_timeout = 2s`
    /// - `bus_capacity = 1024`, `mesh_inbox_capacity = 256`
    /// - `grace = 10s`
    fn default() -> Self {
        Self {
            name: "registry".to_string(),
            base_pulse: Duration::from_secs(1),
            default_recovery_multiplier: 3,
            recovery_probes: 2,
            probe_backoff: BackoffPolicy {
                first: Duration::from_millis(200),
                max: Duration::from_secs(2),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
            rpc_timeout: Duration::from_secs(2),
            bus_capacity: 1024,
            mesh_inbox_capacity: 256,
            grace: Duration::from_secs(10),
        }
    }
}

/// Configuration of one component runtime.
#[derive(Clone, Debug)]
pub struct ComponentConfig {
    /// Main loop period; one heartbeat and one cycle per period.
    pub loop_period: Duration,

    /// Retry pacing for failed heartbeats. Retries stop once the next delay
    /// would overrun the current loop period.
    pub heartbeat_backoff: BackoffPolicy,

    /// Bound on each heartbeat and notification callback.
    pub rpc_timeout: Duration,

    /// Rolling call log size (`0` = no call log).
    pub call_log_capacity: usize,

    /// Whether call logging starts enabled (can be toggled with `setLogging`).
    pub call_logging: bool,
}

impl ComponentConfig {
    /// Returns the remote wait bound, never zero.
    #[inline]
    pub fn rpc_timeout_clamped(&self) -> Duration {
        self.rpc_timeout.max(Duration::from_millis(1))
    }
}

impl Default for ComponentConfig {
    /// Default configuration:
    ///
    /// - `loop_period = 1s`
    /// - heartbeat backoff 50ms with jitter, doubling up to 500ms
    /// - `rpc_timeout = 500ms`
    /// - `call_log_capacity = 256`, logging off
    fn default() -> Self {
        Self {
            loop_period: Duration::from_secs(1),
            heartbeat_backoff: BackoffPolicy {
                first: Duration::from_millis(50),
                max: Duration::from_millis(500),
                factor: 2.0,
                jitter: JitterPolicy::Equal,
            },
            rpc_timeout: Duration::from_millis(500),
            call_log_capacity: 256,
            call_logging: false,
        }
    }
}
