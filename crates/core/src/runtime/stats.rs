//! Wire format of a runtime stats reading
//!
//! Mirrors the subset of the Docker `/containers/{id}/stats` document the
//! sampler needs. Fields the engine omits (or sends as `null`) default to
//! zero so that partial documents from older engines still decode.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStats {
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub precpu_stats: CpuStats,
    #[serde(default)]
    pub memory_stats: MemoryStats,
    #[serde(default)]
    pub networks: Option<HashMap<String, NetworkStats>>,
    #[serde(default)]
    pub blkio_stats: BlkioStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
    #[serde(default)]
    pub online_cpus: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub stats: Option<HashMap<String, u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlkioStats {
    #[serde(default)]
    pub io_service_bytes_recursive: Option<Vec<BlkioEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlkioEntry {
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub value: u64,
}

impl CpuStats {
    /// Number of CPUs the container may be scheduled on
    pub fn cpu_count(&self) -> u32 {
        if let Some(online) = self.online_cpus.filter(|n| *n > 0) {
            return online;
        }
        match &self.cpu_usage.percpu_usage {
            Some(per_cpu) if !per_cpu.is_empty() => per_cpu.len() as u32,
            _ => 1,
        }
    }
}

impl MemoryStats {
    /// Reclaimable page cache (`cache` on cgroup v1, `inactive_file` on v2)
    pub fn cache_bytes(&self) -> u64 {
        let Some(stats) = &self.stats else {
            return 0;
        };
        stats
            .get("cache")
            .or_else(|| stats.get("inactive_file"))
            .copied()
            .unwrap_or(0)
    }
}
