//! Time-series storage for container samples
//!
//! Samples are written as they are produced (agent ingestion, live metric
//! sessions, the local sampling loop) and the alert engine reads windowed
//! means back. The production implementation is an InfluxDB client.

mod influx;

pub use influx::{mean_query, write_query, InfluxClient, InfluxConfig, MEASUREMENT};

use crate::models::{ContainerSample, MetricKind};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for time-series store implementations
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Check that the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Persist a batch of samples
    async fn write_samples(&self, samples: &[ContainerSample]) -> Result<()>;

    /// Mean of `kind` over the trailing `window` for one container
    ///
    /// Returns `Ok(None)` when the window holds no data. CPU is in percent,
    /// memory in MiB of used memory.
    async fn mean(
        &self,
        kind: MetricKind,
        host_id: &str,
        container_id: &str,
        window: Duration,
    ) -> Result<Option<f64>>;
}
