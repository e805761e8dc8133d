//! # External collaborators.
//!
//! Narrow seams to things outside the middleware core:
//! - [`HostStatusProvider`]: static host description and current load;
//! - [`LogSource`]: process log tailing for the `tailLog` built-in;
//! - [`ComponentLauncher`]: starts component processes for `start_component`
//!   and for recovery relaunches.
//!
//! [`LocalHost`] and [`MemoryLog`] are small in-process implementations used
//! when nothing else is configured.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::capability::Secret;
use crate::error::{MeshError, MeshResult};
use crate::identity::{ComponentId, ComponentInfo};

/// Static description of a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Host name.
    pub hostname: String,
    /// Operating system family.
    pub os: String,
    /// Logical CPUs.
    pub cpus: usize,
}

/// Point-in-time load figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostLoad {
    /// One-minute load average.
    pub load_avg: f64,
    /// Used memory in MiB.
    pub mem_used_mb: u64,
    /// Total memory in MiB.
    pub mem_total_mb: u64,
}

/// Host statistics collaborator.
#[async_trait]
pub trait HostStatusProvider: Send + Sync + 'static {
    /// Static host description.
    async fn probe(&self) -> MeshResult<HostInfo>;

    /// Current load.
    async fn poll(&self) -> MeshResult<HostLoad>;
}

/// Reports what the standard library knows about this host; load is always zero.
#[derive(Debug, Clone)]
pub struct LocalHost {
    hostname: String,
}

impl LocalHost {
    /// Provider reporting `hostname`.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new(std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()))
    }
}

#[async_trait]
impl HostStatusProvider for LocalHost {
    async fn probe(&self) -> MeshResult<HostInfo> {
        Ok(HostInfo {
            hostname: self.hostname.clone(),
            os: std::env::consts::OS.to_string(),
            cpus: std::thread::available_parallelism().map_or(1, |n| n.get()),
        })
    }

    async fn poll(&self) -> MeshResult<HostLoad> {
        Ok(HostLoad::default())
    }
}

/// Process log collaborator.
#[async_trait]
pub trait LogSource: Send + Sync + 'static {
    /// Last `lines` lines, oldest first.
    async fn tail(&self, lines: usize) -> MeshResult<Vec<String>>;

    /// Up to `lines` lines starting at line `offset`.
    async fn seek(&self, offset: usize, lines: usize) -> MeshResult<Vec<String>>;
}

/// Bounded in-memory log.
#[derive(Debug)]
pub struct MemoryLog {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl MemoryLog {
    /// Log keeping the newest `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a line.
    pub async fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().await;
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }
}

#[async_trait]
impl LogSource for MemoryLog {
    async fn tail(&self, lines: usize) -> MeshResult<Vec<String>> {
        let buf = self.lines.lock().await;
        let skip = buf.len().saturating_sub(lines);
        Ok(buf.iter().skip(skip).cloned().collect())
    }

    async fn seek(&self, offset: usize, lines: usize) -> MeshResult<Vec<String>> {
        let buf = self.lines.lock().await;
        if offset > buf.len() {
            return Err(MeshError::invalid(format!(
                "offset {offset} beyond {} lines",
                buf.len()
            )));
        }
        Ok(buf.iter().skip(offset).take(lines).cloned().collect())
    }
}

/// What a launcher needs to start (or restart) a component process.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Component to start; the process must register under this id.
    pub id: ComponentId,
    /// Declared metadata to register with.
    pub info: ComponentInfo,
    /// Pre-issued password the process presents at registration.
    pub password: Secret,
    /// Registry to register with.
    pub registry: String,
    /// True when replacing a failed instance.
    pub relaunch: bool,
}

/// Starts component processes.
#[async_trait]
pub trait ComponentLauncher: Send + Sync + 'static {
    /// Starts the component described by `req`. Returning `Ok` means the start
    /// was requested, not that the component registered.
    async fn launch(&self, req: LaunchRequest) -> MeshResult<()>;
}
