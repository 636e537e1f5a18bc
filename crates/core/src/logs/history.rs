//! Historical log queries over a bounded tail

use super::fetch_tail;
use crate::models::LogLine;
use crate::runtime::{ContainerRuntime, LogOptions};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Lines requested from the runtime for a history query
pub const HISTORY_TAIL: u32 = 1000;

/// Page size used when none (or a non-positive one) is requested
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Window, search and page of a history query
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Case-insensitive substring the line must contain
    pub search: Option<String>,
    /// Inclusive lower bound (default: beginning of time)
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound (default: now)
    pub until: Option<DateTime<Utc>>,
    /// 1-based page number
    pub page: Option<i64>,
    /// Lines per page
    pub limit: Option<i64>,
}

impl LogQuery {
    fn page(&self) -> usize {
        match self.page {
            Some(p) if p >= 1 => p as usize,
            _ => 1,
        }
    }

    fn limit(&self) -> usize {
        match self.limit {
            Some(l) if l >= 1 => l as usize,
            _ => DEFAULT_PAGE_LIMIT,
        }
    }

    /// Keep lines inside the window that match the search, then cut one page
    ///
    /// Lines without a timestamp cannot be placed in the window and are dropped.
    pub fn apply(&self, lines: Vec<LogLine>, now: DateTime<Utc>) -> Vec<LogLine> {
        let until = self.until.unwrap_or(now);
        let needle = self
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let filtered: Vec<LogLine> = lines
            .into_iter()
            .filter(|line| match line.timestamp {
                Some(ts) => self.since.map_or(true, |since| ts >= since) && ts <= until,
                None => false,
            })
            .filter(|line| match &needle {
                Some(needle) => line.message().to_lowercase().contains(needle),
                None => true,
            })
            .collect();

        page_of(filtered, self.page(), self.limit())
    }
}

/// `items[min((page-1)*limit, R) .. min(page*limit, R)]`
pub fn page_of<T>(items: Vec<T>, page: usize, limit: usize) -> Vec<T> {
    let total = items.len();
    let start = page.saturating_sub(1).saturating_mul(limit).min(total);
    let end = page.saturating_mul(limit).min(total);
    items.into_iter().skip(start).take(end - start).collect()
}

/// Fetch a timestamped tail from the runtime and apply `query` to it
pub async fn fetch_history(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    query: &LogQuery,
) -> Result<Vec<LogLine>> {
    let options = LogOptions::tail(HISTORY_TAIL).with_timestamps();
    let lines = fetch_tail(runtime, container_id, options).await?;

    Ok(query.apply(lines, Utc::now()))
}
