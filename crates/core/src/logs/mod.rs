//! Container log decoding and queries
//!
//! - [`LogFrameDemuxer`] turns the runtime's multiplexed stream into lines,
//!   either to exhaustion (bounded) or line by line as output arrives (follow)
//! - [`UnframedReader`] splits the raw output of TTY containers
//! - [`history`] applies time window, search and pagination to a bounded tail

mod demux;
pub mod history;
mod unframed;

pub use demux::{DemuxError, LogFrameDemuxer, DEFAULT_MAX_FRAME_SIZE, HEADER_LEN};
pub use history::{fetch_history, LogQuery};
pub use unframed::UnframedReader;

use crate::models::LogLine;
use crate::runtime::{ContainerRuntime, LogOptions, LogReader};
use anyhow::{Context, Result};
use futures::stream::{BoxStream, StreamExt};
use tracing::debug;

/// Decoded lines of a followed log stream
pub type LineStream = BoxStream<'static, std::result::Result<LogLine, DemuxError>>;

/// Whether the container writes unframed TTY output
///
/// A failed inspect counts as framed; the log fetch that follows reports
/// the actual error.
pub async fn is_tty(runtime: &dyn ContainerRuntime, container_id: &str) -> bool {
    match runtime.inspect(container_id).await {
        Ok(details) => details.tty,
        Err(e) => {
            debug!(container_id = %container_id, error = %e, "Inspect failed, assuming framed logs");
            false
        }
    }
}

/// Decode a bounded log read to exhaustion
pub async fn collect_lines(
    reader: LogReader,
    tty: bool,
    timestamps: bool,
) -> std::result::Result<Vec<LogLine>, DemuxError> {
    if tty {
        UnframedReader::new(reader)
            .with_timestamps(timestamps)
            .collect_all()
            .await
    } else {
        LogFrameDemuxer::new(reader)
            .with_timestamps(timestamps)
            .collect_all()
            .await
    }
}

/// Lines of a followed log read as they arrive
pub fn line_stream(reader: LogReader, tty: bool, timestamps: bool) -> LineStream {
    if tty {
        UnframedReader::new(reader)
            .with_timestamps(timestamps)
            .into_stream()
            .boxed()
    } else {
        LogFrameDemuxer::new(reader)
            .with_timestamps(timestamps)
            .into_stream()
            .boxed()
    }
}

/// Fetch a bounded tail and decode it according to the container's TTY mode
pub async fn fetch_tail(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    options: LogOptions,
) -> Result<Vec<LogLine>> {
    let tty = is_tty(runtime, container_id).await;
    let reader = runtime
        .logs(container_id, options)
        .await
        .with_context(|| format!("Failed to fetch logs for {}", container_id))?;

    collect_lines(reader, tty, options.timestamps)
        .await
        .context("Failed to decode log stream")
}
