//! Host-wide sampling and the periodic sampling loop

use super::sample_stats;
use crate::models::ContainerSample;
use crate::runtime::{ContainerDetails, ContainerRuntime, ContainerSummary};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Destination for the samples produced by each sampling tick
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn deliver(&self, host_id: &str, samples: Vec<ContainerSample>) -> Result<()>;
}

/// Sample every running container of one host
///
/// A container whose stats cannot be fetched is skipped; one that cannot be
/// inspected is still sampled with the identity from the listing and a
/// restart count of zero. Only a failure to list containers is an error.
pub async fn collect_host(
    runtime: &dyn ContainerRuntime,
    host_id: &str,
) -> Result<Vec<ContainerSample>> {
    let containers = runtime
        .list_containers()
        .await
        .context("Failed to list containers")?;

    let mut samples = Vec::with_capacity(containers.len());
    for summary in containers {
        let stats = match runtime.stats(&summary.id).await {
            Ok(stats) => stats,
            Err(e) => {
                debug!(
                    host_id = %host_id,
                    container_id = %summary.id,
                    error = %e,
                    "Failed to fetch container stats"
                );
                continue;
            }
        };

        let details = match runtime.inspect(&summary.id).await {
            Ok(details) => details,
            Err(e) => {
                debug!(
                    container_id = %summary.id,
                    error = %e,
                    "Failed to inspect container, using listing"
                );
                details_from_summary(summary)
            }
        };

        samples.push(sample_stats(&stats).to_sample(host_id, &details));
    }

    Ok(samples)
}

fn details_from_summary(summary: ContainerSummary) -> ContainerDetails {
    ContainerDetails {
        id: summary.id,
        name: summary.name,
        image: summary.image,
        restart_count: 0,
        started_at: None,
        labels: summary.labels,
        tty: false,
    }
}

/// Configuration for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Host id stamped on every sample
    pub host_id: String,
    /// Time between sampling ticks (default: 10 seconds)
    pub interval: Duration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            host_id: "master".to_string(),
            interval: Duration::from_secs(10),
        }
    }
}

/// Periodically samples the local runtime and hands each batch to a sink
pub struct SamplingLoop {
    runtime: Arc<dyn ContainerRuntime>,
    sink: Arc<dyn SampleSink>,
    config: SamplingConfig,
}

impl SamplingLoop {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        sink: Arc<dyn SampleSink>,
        config: SamplingConfig,
    ) -> Self {
        Self {
            runtime,
            sink,
            config,
        }
    }

    /// Run a single sampling tick, returning how many samples were delivered
    pub async fn run_once(&self) -> Result<usize> {
        let samples = collect_host(self.runtime.as_ref(), &self.config.host_id).await?;
        let count = samples.len();
        self.sink
            .deliver(&self.config.host_id, samples)
            .await
            .context("Failed to deliver samples")?;
        Ok(count)
    }

    /// Sample every interval until cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            host_id = %self.config.host_id,
            interval_secs = self.config.interval.as_secs(),
            "Starting sampling loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    match self.run_once().await {
                        Ok(count) => debug!(
                            containers = count,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Sampling tick complete"
                        ),
                        Err(e) => warn!(
                            host_id = %self.config.host_id,
                            error = %e,
                            "Sampling tick failed"
                        ),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down sampling loop");
                    break;
                }
            }
        }
    }
}
