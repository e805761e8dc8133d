//! Retry pacing policies.
//!
//! Two places in the crate wait between repeated attempts:
//! - component runtimes retrying a failed heartbeat inside one loop period;
//! - the reaper re-probing a component that entered recovery.
//!
//! ## Contents
//! - [`BackoffPolicy`] how delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization to avoid synchronized retries across components
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=100ms, factor=1.0 (constant), max=30s, jitter=None.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
