//! Line splitter for TTY containers
//!
//! A container started with a TTY has its output written to the log endpoint
//! as-is, without frame headers. Lines are split on `\n` and reported as
//! stdout, since a TTY merges both channels.

use super::demux::{to_line, DemuxError, DEFAULT_MAX_FRAME_SIZE};
use crate::models::{LogLine, OutputStream};
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Reads [`LogLine`]s from an unframed log stream
pub struct UnframedReader<R> {
    reader: BufReader<R>,
    max_line_size: usize,
    timestamps: bool,
}

impl<R: AsyncRead + Unpin> UnframedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_line_size: DEFAULT_MAX_FRAME_SIZE,
            timestamps: false,
        }
    }

    pub fn with_max_line_size(mut self, max_line_size: usize) -> Self {
        self.max_line_size = max_line_size;
        self
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Next line including its terminator, `None` at end of stream
    ///
    /// A final line without a terminator is still returned.
    pub async fn next_line(&mut self) -> Result<Option<LogLine>, DemuxError> {
        let mut line = Vec::new();
        let limit = self.max_line_size as u64 + 1;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut line)
            .await?;

        if read == 0 {
            return Ok(None);
        }
        if line.len() > self.max_line_size {
            return Err(DemuxError::FrameTooLarge {
                size: line.len(),
                max: self.max_line_size,
            });
        }

        Ok(Some(to_line(OutputStream::Stdout, line, self.timestamps)))
    }

    pub async fn collect_all(mut self) -> Result<Vec<LogLine>, DemuxError> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<LogLine, DemuxError>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_splits_lines_across_reads() {
        let reader = Builder::new()
            .read(b"first li")
            .read(b"ne\nsecond\r\nthi")
            .read(b"rd")
            .build();

        let lines = UnframedReader::new(reader).collect_all().await.unwrap();
        let messages: Vec<_> = lines.iter().map(|l| l.message().into_owned()).collect();
        assert_eq!(messages, vec!["first line", "second", "third"]);
        assert!(lines.iter().all(|l| l.stream == OutputStream::Stdout));
    }

    #[tokio::test]
    async fn test_header_like_bytes_are_text() {
        // would be a stderr frame header if the stream were multiplexed
        let bytes = b"\x02\x00\x00\x00 panic: boom\n".to_vec();
        let lines = UnframedReader::new(std::io::Cursor::new(bytes))
            .collect_all()
            .await
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("panic: boom"));
    }

    #[tokio::test]
    async fn test_timestamps_are_split() {
        let bytes = b"2024-03-01T12:00:00Z ready\nplain\n".to_vec();
        let lines = UnframedReader::new(std::io::Cursor::new(bytes))
            .with_timestamps(true)
            .collect_all()
            .await
            .unwrap();

        assert!(lines[0].timestamp.is_some());
        assert_eq!(lines[0].message(), "ready");
        assert!(lines[1].timestamp.is_none());
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let bytes = vec![b'x'; 64];
        let err = UnframedReader::new(std::io::Cursor::new(bytes))
            .with_max_line_size(16)
            .collect_all()
            .await
            .unwrap_err();
        assert!(matches!(err, DemuxError::FrameTooLarge { max: 16, .. }));
    }

    #[tokio::test]
    async fn test_stream_follows_writes() {
        use tokio::io::AsyncWriteExt;

        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut stream = Box::pin(UnframedReader::new(reader).into_stream());

        writer.write_all(b"one\n").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().message(), "one");

        drop(writer);
        assert!(stream.next().await.is_none());
    }
}
