//! Live log lines for one container

use super::{SessionEnd, SessionGuard, Subscriber};
use crate::logs::{is_tty, line_stream};
use crate::runtime::{ContainerRuntime, LogOptions};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DEFAULT_TAIL: u32 = 100;

/// Follows a container's output and pushes every line that passes the filter
pub struct LogSession {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: String,
    filter: Option<String>,
    tail: u32,
}

impl LogSession {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, container_id: impl Into<String>) -> Self {
        Self {
            runtime,
            container_id: container_id.into(),
            filter: None,
            tail: DEFAULT_TAIL,
        }
    }

    /// Only push lines containing `filter`, ignoring case; empty means all
    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter = (!filter.is_empty()).then(|| filter.to_lowercase());
        self
    }

    /// Lines of existing output sent before following (default: 100)
    pub fn with_tail(mut self, tail: u32) -> Self {
        self.tail = tail;
        self
    }

    fn accepts(&self, message: &str) -> bool {
        match &self.filter {
            Some(needle) => message.to_lowercase().contains(needle),
            None => true,
        }
    }

    pub async fn run<S: Subscriber>(
        self,
        subscriber: &mut S,
        shutdown: CancellationToken,
    ) -> SessionEnd {
        let guard = SessionGuard::start("logs", &self.container_id);

        let options = LogOptions::tail(self.tail).follow();
        let opened = async {
            let tty = is_tty(self.runtime.as_ref(), &self.container_id).await;
            self.runtime
                .logs(&self.container_id, options)
                .await
                .map(|reader| (tty, reader))
        };
        let reader = tokio::select! {
            reader = opened => reader,
            _ = shutdown.cancelled() => return guard.finish(SessionEnd::Cancelled),
        };
        let reader = match reader {
            Ok(opened) => opened,
            Err(e) => {
                warn!(container_id = %self.container_id, error = %e, "Failed to open log stream");
                return guard.finish(SessionEnd::FetchFailed);
            }
        };

        let (tty, reader) = reader;
        let mut lines = line_stream(reader, tty, false);

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return guard.finish(SessionEnd::Cancelled),
                next = lines.next() => next,
            };

            let line = match next {
                None => return guard.finish(SessionEnd::SourceEnded),
                Some(Err(e)) => {
                    warn!(container_id = %self.container_id, error = %e, "Log stream decode failed");
                    return guard.finish(SessionEnd::DecodeFailed);
                }
                Some(Ok(line)) => line,
            };

            if !self.accepts(&line.message()) {
                continue;
            }
            if subscriber.send_text(line.render()).await.is_err() {
                return guard.finish(SessionEnd::SubscriberGone);
            }
        }
    }
}
