//! Container runtime access
//!
//! Everything DockScope needs from the container runtime goes through the
//! [`ContainerRuntime`] trait: listing, inspection, one stats reading, the
//! multiplexed log stream, and the two remediation commands. The production
//! implementation talks to the Docker Engine HTTP API.

mod docker;
mod stats;

pub use docker::{DockerClient, DEFAULT_STOP_GRACE};
pub use stats::{BlkioEntry, BlkioStats, CpuStats, CpuUsage, MemoryStats, NetworkStats, RawStats};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Errors surfaced by a container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container {0} not found")]
    NotFound(String),

    #[error("runtime returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("runtime request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid runtime url: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to decode runtime response: {0}")]
    Decode(String),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Raw multiplexed log byte stream
pub type LogReader = Pin<Box<dyn AsyncRead + Send>>;

/// Options for a log fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Keep the stream open and deliver new output as it is written
    pub follow: bool,
    /// Only return the last N lines (`None` = everything)
    pub tail: Option<u32>,
    /// Prefix every line with an RFC 3339 timestamp
    pub timestamps: bool,
}

impl LogOptions {
    pub fn tail(lines: u32) -> Self {
        Self {
            tail: Some(lines),
            ..Default::default()
        }
    }

    pub fn follow(mut self) -> Self {
        self.follow = true;
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }
}

/// Entry of a running-container listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Result of inspecting one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    pub restart_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Started with a TTY; its logs are raw output rather than frames
    #[serde(default)]
    pub tty: bool,
}

/// Trait for container runtime implementations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime is reachable
    async fn ping(&self) -> RuntimeResult<()>;

    /// List running containers
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerSummary>>;

    /// Inspect a single container
    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerDetails>;

    /// Fetch one stats reading (current and previous counters)
    async fn stats(&self, container_id: &str) -> RuntimeResult<RawStats>;

    /// Open the multiplexed stdout/stderr stream of a container
    async fn logs(&self, container_id: &str, options: LogOptions) -> RuntimeResult<LogReader>;

    /// Restart a container
    async fn restart(&self, container_id: &str) -> RuntimeResult<()>;

    /// Stop a container
    async fn stop(&self, container_id: &str) -> RuntimeResult<()>;
}
