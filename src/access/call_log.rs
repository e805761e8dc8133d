//! # Rolling call log.
//!
//! Bounded ring of recent calls kept per component endpoint; toggled at
//! runtime with `setLogging`. A capacity of `0` disables it permanently.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::access::CallerKind;

/// One logged call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Milliseconds since the Unix epoch.
    pub at_ms: u64,
    /// Claimed caller uid.
    pub uid: String,
    /// Caller classification.
    pub caller: CallerKind,
    /// Invoked method.
    pub method: String,
    /// Error label if the call failed.
    pub error: Option<String>,
}

/// Bounded call log.
#[derive(Debug)]
pub struct CallLog {
    capacity: usize,
    enabled: bool,
    entries: VecDeque<CallRecord>,
}

impl CallLog {
    /// Log holding at most `capacity` records.
    pub fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            capacity,
            enabled: enabled && capacity > 0,
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Turns logging on or off. Returns the effective state.
    pub fn set_enabled(&mut self, yes: bool) -> bool {
        self.enabled = yes && self.capacity > 0;
        self.enabled
    }

    /// Whether calls are being recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records a call if enabled, evicting the oldest entry when full.
    pub fn record(&mut self, uid: &str, caller: CallerKind, method: &str, error: Option<&str>) {
        if !self.enabled {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.entries.push_back(CallRecord {
            at_ms,
            uid: uid.to_string(),
            caller,
            method: method.to_string(),
            error: error.map(str::to_string),
        });
    }

    /// Oldest-first copy of the log.
    pub fn entries(&self) -> Vec<CallRecord> {
        self.entries.iter().cloned().collect()
    }
}
