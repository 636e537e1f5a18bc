//! Filter, sort and pagination parameters for container queries

use crate::models::ContainerSample;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Field the container view is sorted by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Name,
    Cpu,
    Memory,
}

impl SortKey {
    /// Parse a query parameter, falling back to name for unknown keys
    pub fn from_param(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "cpu" => SortKey::Cpu,
            "memory" | "mem" => SortKey::Memory,
            _ => SortKey::Name,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Parse a query parameter, falling back to ascending
    pub fn from_param(value: &str) -> Self {
        if value.eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }
}

/// Container view query
///
/// Empty filters match everything; `limit <= 0` means no limit.
#[derive(Debug, Clone, Default)]
pub struct ContainerQuery {
    /// Exact host ids to include (empty = all hosts)
    pub host_ids: Vec<String>,
    /// Case-insensitive substring of the container name
    pub name: Option<String>,
    /// Case-insensitive substring of the image
    pub image: Option<String>,
    /// Case-insensitive substring of any `key=value` label rendering
    pub label: Option<String>,
    pub sort_by: SortKey,
    pub order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

fn contains_ci(haystack: &str, needle: &Option<String>) -> bool {
    match needle.as_deref() {
        Some(needle) if !needle.is_empty() => haystack
            .to_lowercase()
            .contains(&needle.to_lowercase()),
        _ => true,
    }
}

impl ContainerQuery {
    pub(crate) fn wants_host(&self, host_id: &str) -> bool {
        self.host_ids.is_empty() || self.host_ids.iter().any(|h| h == host_id)
    }

    pub(crate) fn matches(&self, sample: &ContainerSample) -> bool {
        if !contains_ci(&sample.name, &self.name) || !contains_ci(&sample.image, &self.image) {
            return false;
        }

        match self.label.as_deref() {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                sample
                    .labels
                    .iter()
                    .any(|(k, v)| format!("{}={}", k, v).to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }

    /// Stable sort; ties keep input order in both directions
    pub(crate) fn sort(&self, samples: &mut [ContainerSample]) {
        let key = self.sort_by;
        let compare = move |a: &ContainerSample, b: &ContainerSample| -> Ordering {
            match key {
                SortKey::Name => a.name.cmp(&b.name),
                SortKey::Cpu => a.cpu_percent.total_cmp(&b.cpu_percent),
                SortKey::Memory => a.memory_used_bytes.cmp(&b.memory_used_bytes),
            }
        };

        match self.order {
            SortOrder::Asc => samples.sort_by(compare),
            SortOrder::Desc => samples.sort_by(|a, b| compare(a, b).reverse()),
        }
    }
}

/// `items[min(offset, R) .. min(offset + limit, R)]`, or to the end when `limit <= 0`
pub fn paginate<T>(items: Vec<T>, offset: i64, limit: i64) -> Vec<T> {
    let total = items.len();
    let start = usize::try_from(offset.max(0)).unwrap_or(usize::MAX).min(total);
    let end = if limit <= 0 {
        total
    } else {
        start
            .saturating_add(usize::try_from(limit).unwrap_or(usize::MAX))
            .min(total)
    };
    items.into_iter().skip(start).take(end - start).collect()
}
