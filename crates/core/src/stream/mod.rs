//! Live per-subscriber streaming sessions
//!
//! Each session owns its source and pushes to exactly one [`Subscriber`]
//! until the source ends, the subscriber goes away, or its cancellation
//! token fires. Sessions share no mutable state with one another.

mod logs;
mod metrics;


pub use logs::LogSession;
pub use metrics::{MetricsSession, MetricsSessionConfig};

use crate::observability::{ScopeMetrics, StructuredLogger};
use anyhow::Result;
use async_trait::async_trait;

/// Receiving end of a streaming session
#[async_trait]
pub trait Subscriber: Send {
    /// Push one text message; an error means the subscriber is gone
    async fn send_text(&mut self, text: String) -> Result<()>;
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The session's cancellation token fired
    Cancelled,
    /// The runtime closed the source stream
    SourceEnded,
    /// The runtime could not be queried
    FetchFailed,
    /// The source produced data that could not be decoded
    DecodeFailed,
    /// Pushing to the subscriber failed
    SubscriberGone,
}

impl SessionEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEnd::Cancelled => "cancelled",
            SessionEnd::SourceEnded => "source_ended",
            SessionEnd::FetchFailed => "fetch_failed",
            SessionEnd::DecodeFailed => "decode_failed",
            SessionEnd::SubscriberGone => "subscriber_gone",
        }
    }
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keeps the active-session gauge balanced for the lifetime of one session
struct SessionGuard {
    kind: &'static str,
    container_id: String,
    metrics: ScopeMetrics,
    logger: StructuredLogger,
    end: SessionEnd,
}

impl SessionGuard {
    fn start(kind: &'static str, container_id: &str) -> Self {
        let metrics = ScopeMetrics::new();
        let logger = StructuredLogger::new("");
        metrics.session_started(kind);
        logger.log_session_start(kind, container_id);
        Self {
            kind,
            container_id: container_id.to_string(),
            metrics,
            logger,
            end: SessionEnd::Cancelled,
        }
    }

    fn finish(mut self, end: SessionEnd) -> SessionEnd {
        self.end = end;
        end
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.metrics.session_ended(self.kind);
        self.logger
            .log_session_end(self.kind, &self.container_id, self.end.as_str());
    }
}
