//! Resource sampling from cumulative runtime counters
//!
//! The runtime reports monotonically increasing counters; this module turns a
//! pair of readings into instantaneous percentages and totals:
//! - CPU percent from the container and system usage deltas
//! - Used memory with reclaimable cache subtracted
//! - Network and block I/O totals summed across interfaces and devices
//!
//! [`sample_stats`] is the single entry point used by the agent, the local
//! sampling loop, the one-shot metrics endpoint and live metric sessions.

mod collect;


pub use collect::{collect_host, SampleSink, SamplingConfig, SamplingLoop};

use crate::models::{ContainerSample, MetricsPayload};
use crate::runtime::{BlkioStats, ContainerDetails, CpuStats, NetworkStats, RawStats};
use chrono::Utc;
use std::collections::HashMap;

/// CPU readings outside `[0, MAX_CPU_PERCENT]` are treated as measurement noise
pub const MAX_CPU_PERCENT: f64 = 1000.0;

/// Cumulative CPU counters of one reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCounters {
    /// Container CPU time
    pub total: u64,
    /// Host CPU time
    pub system: u64,
}

impl From<&CpuStats> for CpuCounters {
    fn from(stats: &CpuStats) -> Self {
        Self {
            total: stats.cpu_usage.total_usage,
            system: stats.system_cpu_usage.unwrap_or(0),
        }
    }
}

/// Used memory after cache subtraction
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub percent: f64,
}

/// Everything derived from one stats reading
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory: MemoryUsage,
    pub net_rx: u64,
    pub net_tx: u64,
    pub disk_read: u64,
    pub disk_write: u64,
}

/// CPU usage as a percentage of one CPU, scaled by the schedulable CPU count
///
/// A counter that went backwards counts as no progress.
pub fn cpu_percent(current: CpuCounters, previous: CpuCounters, cpu_count: u32) -> f64 {
    let cpu_delta = current.total.saturating_sub(previous.total);
    let system_delta = current.system.saturating_sub(previous.system);
    if cpu_delta == 0 || system_delta == 0 {
        return 0.0;
    }

    let percent = cpu_delta as f64 / system_delta as f64 * f64::from(cpu_count) * 100.0;
    if (0.0..=MAX_CPU_PERCENT).contains(&percent) {
        percent
    } else {
        0.0
    }
}

/// Used memory (`usage - cache`, saturating) and its share of the limit
pub fn memory_usage(usage: u64, cache: u64, limit: u64) -> MemoryUsage {
    let used_bytes = usage.saturating_sub(cache);
    let percent = if limit > 0 {
        used_bytes as f64 / limit as f64 * 100.0
    } else {
        0.0
    };

    MemoryUsage {
        used_bytes,
        limit_bytes: limit,
        percent,
    }
}

/// Received and transmitted bytes summed across interfaces
pub fn network_totals(networks: Option<&HashMap<String, NetworkStats>>) -> (u64, u64) {
    networks
        .into_iter()
        .flat_map(|n| n.values())
        .fold((0, 0), |(rx, tx), n| {
            (rx.saturating_add(n.rx_bytes), tx.saturating_add(n.tx_bytes))
        })
}

/// Bytes read and written summed across block devices
pub fn blkio_totals(blkio: &BlkioStats) -> (u64, u64) {
    let mut read = 0u64;
    let mut write = 0u64;

    for entry in blkio.io_service_bytes_recursive.iter().flatten() {
        if entry.op.eq_ignore_ascii_case("read") {
            read = read.saturating_add(entry.value);
        } else if entry.op.eq_ignore_ascii_case("write") {
            write = write.saturating_add(entry.value);
        }
    }

    (read, write)
}

/// Derive usage figures from one runtime stats reading
pub fn sample_stats(stats: &RawStats) -> ResourceUsage {
    let cpu_percent = cpu_percent(
        CpuCounters::from(&stats.cpu_stats),
        CpuCounters::from(&stats.precpu_stats),
        stats.cpu_stats.cpu_count(),
    );
    let memory = memory_usage(
        stats.memory_stats.usage.unwrap_or(0),
        stats.memory_stats.cache_bytes(),
        stats.memory_stats.limit.unwrap_or(0),
    );
    let (net_rx, net_tx) = network_totals(stats.networks.as_ref());
    let (disk_read, disk_write) = blkio_totals(&stats.blkio_stats);

    ResourceUsage {
        cpu_percent,
        memory,
        net_rx,
        net_tx,
        disk_read,
        disk_write,
    }
}

impl ResourceUsage {
    /// Live stream representation
    pub fn to_payload(&self) -> MetricsPayload {
        MetricsPayload {
            cpu_percent: self.cpu_percent,
            memory_usage: self.memory.used_bytes,
            memory_limit: self.memory.limit_bytes,
            memory_percent: self.memory.percent,
            network_rx: self.net_rx,
            network_tx: self.net_tx,
            disk_read: self.disk_read,
            disk_write: self.disk_write,
        }
    }

    /// Stamp the usage with container identity, producing a sample taken now
    pub fn to_sample(&self, host_id: &str, container: &ContainerDetails) -> ContainerSample {
        ContainerSample {
            host_id: host_id.to_string(),
            container_id: container.id.clone(),
            name: container.name.clone(),
            image: container.image.clone(),
            labels: container.labels.clone(),
            cpu_percent: self.cpu_percent,
            memory_used_bytes: self.memory.used_bytes,
            memory_limit_bytes: self.memory.limit_bytes,
            memory_percent: self.memory.percent,
            net_rx: self.net_rx,
            net_tx: self.net_tx,
            disk_read: self.disk_read,
            disk_write: self.disk_write,
            restart_count: container.restart_count,
            timestamp: Utc::now(),
        }
    }
}
