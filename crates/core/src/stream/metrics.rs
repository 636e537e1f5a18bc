//! Live resource metrics for one container

use super::{SessionEnd, SessionGuard, Subscriber};
use crate::runtime::{ContainerDetails, ContainerRuntime};
use crate::sampler::sample_stats;
use crate::tsdb::TimeSeriesStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for a metrics session
#[derive(Debug, Clone)]
pub struct MetricsSessionConfig {
    /// Time between pushes (default: 2 seconds)
    pub interval: Duration,
    /// Host id stamped on samples written to the time-series store
    pub host_id: String,
}

impl Default for MetricsSessionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            host_id: "master".to_string(),
        }
    }
}

/// Pushes one JSON `MetricsPayload` per tick
///
/// The derived sample is also written to the time-series store, when one is
/// attached, from a detached task so a slow write never delays the stream.
pub struct MetricsSession {
    runtime: Arc<dyn ContainerRuntime>,
    tsdb: Option<Arc<dyn TimeSeriesStore>>,
    container_id: String,
    config: MetricsSessionConfig,
}

impl MetricsSession {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        container_id: impl Into<String>,
        config: MetricsSessionConfig,
    ) -> Self {
        Self {
            runtime,
            tsdb: None,
            container_id: container_id.into(),
            config,
        }
    }

    pub fn with_time_series(mut self, tsdb: Arc<dyn TimeSeriesStore>) -> Self {
        self.tsdb = Some(tsdb);
        self
    }

    pub async fn run<S: Subscriber>(
        self,
        subscriber: &mut S,
        shutdown: CancellationToken,
    ) -> SessionEnd {
        let guard = SessionGuard::start("metrics", &self.container_id);

        let details = tokio::select! {
            details = self.runtime.inspect(&self.container_id) => details,
            _ = shutdown.cancelled() => return guard.finish(SessionEnd::Cancelled),
        };
        let details = match details {
            Ok(details) => details,
            Err(e) => {
                warn!(container_id = %self.container_id, error = %e, "Failed to inspect container");
                return guard.finish(SessionEnd::FetchFailed);
            }
        };

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return guard.finish(SessionEnd::Cancelled),
                _ = ticker.tick() => {
                    if let Some(end) = self.push_once(&details, subscriber).await {
                        return guard.finish(end);
                    }
                }
            }
        }
    }

    async fn push_once<S: Subscriber>(
        &self,
        details: &ContainerDetails,
        subscriber: &mut S,
    ) -> Option<SessionEnd> {
        let stats = match self.runtime.stats(&self.container_id).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(container_id = %self.container_id, error = %e, "Stats fetch failed");
                return Some(SessionEnd::FetchFailed);
            }
        };

        let usage = sample_stats(&stats);
        let text = match serde_json::to_string(&usage.to_payload()) {
            Ok(text) => text,
            Err(e) => {
                warn!(container_id = %self.container_id, error = %e, "Failed to encode metrics");
                return Some(SessionEnd::DecodeFailed);
            }
        };

        if let Some(tsdb) = &self.tsdb {
            let tsdb = Arc::clone(tsdb);
            let sample = usage.to_sample(&self.config.host_id, details);
            tokio::spawn(async move {
                if let Err(e) = tsdb.write_samples(std::slice::from_ref(&sample)).await {
                    debug!(container_id = %sample.container_id, error = %e, "Time-series write failed");
                }
            });
        }

        if subscriber.send_text(text).await.is_err() {
            return Some(SessionEnd::SubscriberGone);
        }
        None
    }
}
