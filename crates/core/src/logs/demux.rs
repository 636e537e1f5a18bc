//! Multiplexed stdout/stderr frame decoder
//!
//! The runtime interleaves both output channels of a non-TTY container into
//! one byte stream of frames:
//!
//! ```text
//! +------+-----------+-------------------+-----------------+
//! | tag  | 3 bytes   | u32 BE length (N) | N payload bytes |
//! +------+-----------+-------------------+-----------------+
//! ```
//!
//! Tag 1 is stdout, 2 is stderr, anything else is reported as "other".
//! A clean end of stream, a partial header or a short payload all end
//! decoding without an error; only I/O failures and oversized frames are
//! reported as [`DemuxError`].

use crate::models::{LogLine, OutputStream};
use chrono::{DateTime, Utc};
use futures::Stream;
use std::io::ErrorKind;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the frame header
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted by default (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors that end a log stream
#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("log stream read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

/// Decodes [`LogLine`]s from a multiplexed log stream
pub struct LogFrameDemuxer<R> {
    reader: R,
    max_frame_size: usize,
    timestamps: bool,
}

impl<R: AsyncRead + Unpin> LogFrameDemuxer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            timestamps: false,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Parse the leading RFC 3339 token the runtime adds when asked for timestamps
    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Decode the next non-empty frame, `None` at end of stream
    pub async fn next_line(&mut self) -> Result<Option<LogLine>, DemuxError> {
        let mut header = [0u8; HEADER_LEN];

        loop {
            if !read_full(&mut self.reader, &mut header).await? {
                return Ok(None);
            }

            let size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            if size == 0 {
                continue;
            }
            if size > self.max_frame_size {
                return Err(DemuxError::FrameTooLarge {
                    size,
                    max: self.max_frame_size,
                });
            }

            let mut payload = vec![0u8; size];
            if !read_full(&mut self.reader, &mut payload).await? {
                return Ok(None);
            }

            return Ok(Some(to_line(
                OutputStream::from_tag(header[0]),
                payload,
                self.timestamps,
            )));
        }
    }

    /// Bounded mode: decode until the source is exhausted
    pub async fn collect_all(mut self) -> Result<Vec<LogLine>, DemuxError> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }

    /// Follow mode: yield each line as soon as its frame is complete
    ///
    /// The stream ends after the source ends or after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<LogLine, DemuxError>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut demuxer = state?;
            match demuxer.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(demuxer))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// Fill `buf` completely; `false` when the stream ended first
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<bool, DemuxError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(DemuxError::Io(e)),
    }
}

/// Build a line, splitting off the leading RFC 3339 token when asked to
pub(super) fn to_line(stream: OutputStream, payload: Vec<u8>, timestamps: bool) -> LogLine {
    if timestamps {
        if let Some((timestamp, offset)) = split_timestamp(&payload) {
            return LogLine::new(stream, Some(timestamp), payload[offset..].to_vec());
        }
    }
    LogLine::new(stream, None, payload)
}

/// Timestamp and the offset of the text following it
fn split_timestamp(payload: &[u8]) -> Option<(DateTime<Utc>, usize)> {
    let space = payload.iter().position(|b| *b == b' ')?;
    let token = std::str::from_utf8(&payload[..space]).ok()?;
    let timestamp = DateTime::parse_from_rfc3339(token).ok()?;
    Some((timestamp.with_timezone(&Utc), space + 1))
}
