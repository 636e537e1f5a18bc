//! Multi-host metric store
//!
//! Holds the latest snapshot of every host that has pushed samples. Each push
//! replaces the host's snapshot as a whole; the new snapshot is built before
//! the swap, so readers see either the old or the new batch, never a mix.
//!
//! Snapshots live in a sharded concurrent map keyed by host id. A write locks
//! only the shard holding its host and only for the pointer swap; queries
//! clone snapshot pointers shard by shard and filter outside any lock.

mod query;

pub use query::{paginate, ContainerQuery, SortKey, SortOrder};

use crate::models::ContainerSample;
use crate::observability::ScopeMetrics;
use crate::sampler::SampleSink;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latest batch received from one host
#[derive(Debug, Clone)]
pub struct HostSnapshot {
    pub samples: Vec<ContainerSample>,
    pub last_seen: DateTime<Utc>,
}

impl HostSnapshot {
    /// Build a snapshot keyed by container id
    ///
    /// A container repeated within the batch keeps the position of its first
    /// occurrence and the values of its last. Every sample is stamped with
    /// `host_id`.
    fn build(host_id: &str, samples: Vec<ContainerSample>, last_seen: DateTime<Utc>) -> Self {
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(samples.len());
        let mut ordered: Vec<ContainerSample> = Vec::with_capacity(samples.len());

        for mut sample in samples {
            sample.host_id = host_id.to_string();
            match positions.get(&sample.container_id) {
                Some(&idx) => ordered[idx] = sample,
                None => {
                    positions.insert(sample.container_id.clone(), ordered.len());
                    ordered.push(sample);
                }
            }
        }

        Self {
            samples: ordered,
            last_seen,
        }
    }
}

/// Concurrent store of per-host snapshots
#[derive(Default)]
pub struct HostMetricStore {
    hosts: DashMap<String, Arc<HostSnapshot>>,
    metrics: Option<ScopeMetrics>,
}

impl HostMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that reports its size and ingestion latency to Prometheus
    pub fn with_metrics(metrics: ScopeMetrics) -> Self {
        Self {
            hosts: DashMap::new(),
            metrics: Some(metrics),
        }
    }

    /// Replace `host_id`'s snapshot with `samples`, returning the container count
    pub fn ingest(&self, host_id: &str, samples: Vec<ContainerSample>) -> usize {
        let start = Instant::now();
        let sample_count = samples.len() as u64;

        let snapshot = Arc::new(HostSnapshot::build(host_id, samples, Utc::now()));
        let containers = snapshot.samples.len();
        self.hosts.insert(host_id.to_string(), snapshot);

        if let Some(metrics) = &self.metrics {
            metrics.observe_ingest_latency(start.elapsed().as_secs_f64());
            metrics.add_samples_ingested(sample_count);
            metrics.set_tracked(self.hosts.len() as i64, self.container_count() as i64);
        }

        containers
    }

    /// Filter, sort and paginate the flattened view across all hosts
    pub fn query(&self, query: &ContainerQuery) -> Vec<ContainerSample> {
        let mut hosts: Vec<(String, Arc<HostSnapshot>)> = self
            .hosts
            .iter()
            .filter(|entry| query.wants_host(entry.key()))
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        hosts.sort_by(|a, b| a.0.cmp(&b.0));

        let mut matched: Vec<ContainerSample> = hosts
            .iter()
            .flat_map(|(_, snapshot)| snapshot.samples.iter())
            .filter(|sample| query.matches(sample))
            .cloned()
            .collect();

        query.sort(&mut matched);
        paginate(matched, query.offset, query.limit)
    }

    /// Current snapshot of one host
    pub fn snapshot(&self, host_id: &str) -> Option<Arc<HostSnapshot>> {
        self.hosts.get(host_id).map(|entry| Arc::clone(entry.value()))
    }

    /// When `host_id` last pushed
    pub fn last_seen(&self, host_id: &str) -> Option<DateTime<Utc>> {
        self.hosts.get(host_id).map(|entry| entry.value().last_seen)
    }

    /// Hosts that have not pushed for longer than `max_age`
    ///
    /// Stale snapshots are reported, never evicted.
    pub fn stale_hosts(&self, max_age: Duration) -> Vec<String> {
        let now = Utc::now();
        let mut stale: Vec<String> = self
            .hosts
            .iter()
            .filter(|entry| {
                let age = now
                    .signed_duration_since(entry.value().last_seen)
                    .to_std()
                    .unwrap_or_default();
                age > max_age
            })
            .map(|entry| entry.key().clone())
            .collect();
        stale.sort();
        stale
    }

    /// Known host ids in ascending order
    pub fn host_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.hosts.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Containers across all snapshots
    pub fn container_count(&self) -> usize {
        self.hosts.iter().map(|e| e.value().samples.len()).sum()
    }
}

#[async_trait]
impl SampleSink for HostMetricStore {
    async fn deliver(&self, host_id: &str, samples: Vec<ContainerSample>) -> Result<()> {
        self.ingest(host_id, samples);
        Ok(())
    }
}
