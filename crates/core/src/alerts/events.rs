//! Append-only alert event log

use super::persist::{load_json, save_json};
use crate::models::AlertEvent;
use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Durable, append-only record of alert triggers
pub struct EventLog {
    events: Mutex<Vec<AlertEvent>>,
    path: Option<PathBuf>,
}

impl EventLog {
    pub fn in_memory() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Load persisted events (empty when the file does not exist)
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let events: Vec<AlertEvent> = load_json(&path).await?;
        info!(path = %path.display(), events = events.len(), "Loaded alert events");
        Ok(Self {
            events: Mutex::new(events),
            path: Some(path),
        })
    }

    /// Append one event and persist the whole log before returning
    ///
    /// The lock is held across the write so the file reflects appends in
    /// order. A failed write is logged and the event stays in memory.
    pub async fn append(&self, event: AlertEvent) {
        let mut events = self.events.lock().await;
        events.push(event);

        if let Some(path) = &self.path {
            if let Err(e) = save_json(path, &*events).await {
                warn!(path = %path.display(), error = %e, "Failed to persist alert events");
            }
        }
    }

    /// All events, oldest first
    pub async fn list(&self) -> Vec<AlertEvent> {
        self.events.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }
}
