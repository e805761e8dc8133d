//! Error types used by registries, component runtimes and component code.
//!
//! This module defines two enums:
//!
//! - [`MeshError`]: errors raised by the registry mesh and the access façade.
//! - [`ComponentError`]: errors raised by component-specific handlers and main loop cycles.
//!
//! Both types provide helper methods (`as_label`, `as_message`) for logging,
//! and [`MeshError::is_access_failure`] to separate "rejected" from "failed".

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type MeshResult<T> = Result<T, MeshError>;

/// # Errors produced by registries and component endpoints.
///
/// Authentication and access failures are always surfaced to the caller.
/// Heartbeat timeouts never show up here: the reaper handles them as state transitions.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// Unknown user or wrong password (or wrong component password).
    #[error("authentication failed for {uid:?}")]
    Auth {
        /// Identity that failed to authenticate.
        uid: String,
    },

    /// Valid identity, insufficient rights.
    #[error("access denied: {reason}")]
    AccessDenied {
        /// What was refused.
        reason: String,
    },

    /// Candidates matched the constraints, but none grants access to the user.
    #[error("user {uid:?} is not authorized for any of {candidates} matching components")]
    NotAuthorized {
        /// Requesting user.
        uid: String,
        /// Number of candidates that matched the constraints.
        candidates: usize,
    },

    /// No component satisfies the constraints.
    #[error("no component matches {constraints}")]
    NoMatch {
        /// Rendered constraint list.
        constraints: String,
    },

    /// The target does not expose a method with this name.
    #[error("no such method {method:?} on {target}")]
    NoSuchMethod {
        /// Component id or registry name.
        target: String,
        /// Requested method.
        method: String,
    },

    /// The method exists but is outside the permitted set for the caller.
    #[error("method {method:?} on {target} is not permitted for {caller}")]
    MethodNotPermitted {
        /// Component id or registry name.
        target: String,
        /// Requested method.
        method: String,
        /// Caller classification (e.g. `anonymous`, `client`).
        caller: String,
    },

    /// A peer registry or component did not answer within the bounded wait.
    #[error("{peer} unavailable (waited {timeout:?})")]
    RemoteUnavailable {
        /// Peer registry name or component id.
        peer: String,
        /// Wait bound that was exceeded.
        timeout: Duration,
    },

    /// Snapshot store disabled for the component, or no snapshot stored yet.
    #[error("state store for {id}: {reason}")]
    StaleState {
        /// Component id.
        id: String,
        /// `disabled` or `no snapshot`.
        reason: String,
    },

    /// The id is already held by a live component.
    #[error("component {id} is already registered")]
    Conflict {
        /// Conflicting component id.
        id: String,
    },

    /// The id is unknown to this registry.
    #[error("component {id} not found")]
    NotFound {
        /// Requested component id.
        id: String,
    },

    /// Malformed input (bad id, multiplier of 0, null snapshot value, ...).
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Description of the problem.
        reason: String,
    },

    /// Reading or writing the user database failed.
    #[error("persistence failure: {reason}")]
    Persistence {
        /// Underlying error message.
        reason: String,
    },

    /// Shutdown grace period was exceeded; listed components never confirmed.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Components that did not acknowledge shutdown in time.
        stuck: Vec<String>,
    },

    /// A component-specific handler failed.
    #[error(transparent)]
    Component(#[from] ComponentError),
}

impl MeshError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use meshvisor::MeshError;
    ///
    /// let err = MeshError::Conflict { id: "Vision$cam1".into() };
    /// assert_eq!(err.as_label(), "mesh_conflict");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            MeshError::Auth { .. } => "mesh_auth",
            MeshError::AccessDenied { .. } => "mesh_access_denied",
            MeshError::NotAuthorized { .. } => "mesh_not_authorized",
            MeshError::NoMatch { .. } => "mesh_no_match",
            MeshError::NoSuchMethod { .. } => "mesh_no_such_method",
            MeshError::MethodNotPermitted { .. } => "mesh_method_not_permitted",
            MeshError::RemoteUnavailable { .. } => "mesh_remote_unavailable",
            MeshError::StaleState { .. } => "mesh_stale_state",
            MeshError::Conflict { .. } => "mesh_conflict",
            MeshError::NotFound { .. } => "mesh_not_found",
            MeshError::InvalidArgument { .. } => "mesh_invalid_argument",
            MeshError::Persistence { .. } => "mesh_persistence",
            MeshError::GraceExceeded { .. } => "mesh_grace_exceeded",
            MeshError::Component(e) => e.as_label(),
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            MeshError::Component(e) => e.as_message(),
            other => other.to_string(),
        }
    }

    /// True for failures caused by identity or permissions rather than by the operation itself.
    pub fn is_access_failure(&self) -> bool {
        matches!(
            self,
            MeshError::Auth { .. }
                | MeshError::AccessDenied { .. }
                | MeshError::NotAuthorized { .. }
                | MeshError::NoSuchMethod { .. }
                | MeshError::MethodNotPermitted { .. }
        )
    }

    pub(crate) fn auth(uid: impl Into<String>) -> Self {
        MeshError::Auth { uid: uid.into() }
    }

    pub(crate) fn denied(reason: impl Into<String>) -> Self {
        MeshError::AccessDenied {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        MeshError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(id: impl ToString) -> Self {
        MeshError::NotFound { id: id.to_string() }
    }

    pub(crate) fn unavailable(peer: impl ToString, timeout: Duration) -> Self {
        MeshError::RemoteUnavailable {
            peer: peer.to_string(),
            timeout,
        }
    }
}

/// # Errors produced by component code.
///
/// Returned from [`Component::call`](crate::Component::call) and
/// [`Component::cycle`](crate::Component::cycle).
/// `Fatal` from a cycle stops the component runtime; `Fail` is logged and the loop continues.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// Non-recoverable error; the runtime stops and deregisters.
    #[error("fatal component error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// The operation failed; the component keeps running.
    #[error("component call failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The handler observed cancellation and gave up.
    #[error("component cancelled")]
    Canceled,
}

impl ComponentError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use meshvisor::ComponentError;
    ///
    /// let err = ComponentError::Fail { error: "camera busy".into() };
    /// assert_eq!(err.as_label(), "component_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ComponentError::Fatal { .. } => "component_fatal",
            ComponentError::Fail { .. } => "component_failed",
            ComponentError::Canceled => "component_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ComponentError::Fatal { error } => format!("fatal: {error}"),
            ComponentError::Fail { error } => format!("error: {error}"),
            ComponentError::Canceled => "cancelled".to_string(),
        }
    }

    /// Shorthand for a [`ComponentError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        ComponentError::Fail {
            error: error.into(),
        }
    }

    /// True if the component loop should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ComponentError::Fatal { .. })
    }
}
