//! Sample ingestion shared by the push endpoint and the local sampling loop

use anyhow::Result;
use async_trait::async_trait;
use dockscope_core::models::ContainerSample;
use dockscope_core::observability::StructuredLogger;
use dockscope_core::sampler::SampleSink;
use dockscope_core::store::HostMetricStore;
use dockscope_core::tsdb::TimeSeriesStore;
use std::sync::Arc;
use tracing::warn;

/// Replaces the host snapshot and forwards the batch to the time-series store
///
/// The store update happens inline; the time-series write runs on its own task
/// so a slow or unreachable database never delays the caller.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<HostMetricStore>,
    tsdb: Arc<dyn TimeSeriesStore>,
    logger: StructuredLogger,
}

impl Ingestor {
    pub fn new(
        store: Arc<HostMetricStore>,
        tsdb: Arc<dyn TimeSeriesStore>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            tsdb,
            logger,
        }
    }

    pub fn store(&self) -> &Arc<HostMetricStore> {
        &self.store
    }

    pub fn ingest(&self, host_id: &str, mut samples: Vec<ContainerSample>) -> usize {
        for sample in &mut samples {
            sample.host_id = host_id.to_string();
        }

        self.forward(samples.clone());
        let stored = self.store.ingest(host_id, samples);
        self.logger.log_ingest(host_id, stored);
        stored
    }

    /// Write samples to the time-series store in the background
    pub fn forward(&self, samples: Vec<ContainerSample>) {
        if samples.is_empty() {
            return;
        }
        let tsdb = Arc::clone(&self.tsdb);
        tokio::spawn(async move {
            if let Err(e) = tsdb.write_samples(&samples).await {
                warn!(samples = samples.len(), error = %e, "Time-series write failed");
            }
        });
    }
}

#[async_trait]
impl SampleSink for Ingestor {
    async fn deliver(&self, host_id: &str, samples: Vec<ContainerSample>) -> Result<()> {
        self.ingest(host_id, samples);
        Ok(())
    }
}
