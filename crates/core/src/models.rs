//! Core data models shared by the server, the agent and the alert engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// One sampling instant for one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSample {
    #[serde(default)]
    pub host_id: String,
    #[serde(alias = "id")]
    pub container_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, alias = "cpu")]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_used_bytes: u64,
    #[serde(default)]
    pub memory_limit_bytes: u64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default)]
    pub net_rx: u64,
    #[serde(default)]
    pub net_tx: u64,
    #[serde(default)]
    pub disk_read: u64,
    #[serde(default)]
    pub disk_write: u64,
    #[serde(default)]
    pub restart_count: u64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ContainerSample {
    /// Used memory in MiB, the unit memory alert thresholds are expressed in
    pub fn memory_used_mib(&self) -> f64 {
        self.memory_used_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Batch pushed by a host agent to the ingestion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPayload {
    pub host_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub containers: Vec<ContainerSample>,
}

/// Payload pushed to live metrics subscribers on every sampling tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub network_rx: u64,
    pub network_tx: u64,
    pub disk_read: u64,
    pub disk_write: u64,
}

/// What an alert rule measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    #[serde(alias = "high_cpu")]
    Cpu,
    #[serde(alias = "high_memory")]
    Memory,
    LogPattern,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Cpu => write!(f, "cpu"),
            MetricKind::Memory => write!(f, "memory"),
            MetricKind::LogPattern => write!(f, "log_pattern"),
        }
    }
}

/// Operator-defined alert rule
///
/// `kind` is optional on the wire so that a missing kind can be rejected with
/// a field-level error rather than a generic parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub host_id: String,
    #[serde(default)]
    pub container_id: String,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: Option<MetricKind>,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub slack_webhook: String,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub auto_stop: bool,
}

impl AlertRule {
    pub fn wants_remediation(&self) -> bool {
        self.auto_restart || self.auto_stop
    }

    pub fn wants_notification(&self) -> bool {
        !self.email.is_empty() || !self.slack_webhook.is_empty()
    }
}

/// Durable record of one alert trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: String,
    pub host_id: String,
    pub container_id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub message: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Output channel a log frame was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
    Other,
}

impl OutputStream {
    /// Decode the stream tag carried in byte 0 of a frame header
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            1 => OutputStream::Stdout,
            2 => OutputStream::Stderr,
            _ => OutputStream::Other,
        }
    }
}

/// One decoded log record
///
/// The payload is kept as the runtime wrote it; text is only produced when
/// the line is displayed, so non-UTF-8 output still matches byte patterns.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub stream: OutputStream,
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: Vec<u8>,
}

impl LogLine {
    pub fn new(
        stream: OutputStream,
        timestamp: Option<DateTime<Utc>>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            stream,
            timestamp,
            payload: payload.into(),
        }
    }

    /// Payload without the trailing line terminator the runtime usually appends
    pub fn trimmed(&self) -> &[u8] {
        let end = self
            .payload
            .iter()
            .rposition(|b| *b != b'\n' && *b != b'\r')
            .map_or(0, |i| i + 1);
        &self.payload[..end]
    }

    /// Display text; invalid UTF-8 sequences become U+FFFD
    pub fn message(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.trimmed())
    }

    /// Byte-wise substring match against the raw payload
    pub fn contains(&self, pattern: &str) -> bool {
        let needle = pattern.as_bytes();
        needle.is_empty() || self.payload.windows(needle.len()).any(|w| w == needle)
    }

    /// `<RFC3339 timestamp> <message>` when a timestamp is known
    pub fn render(&self) -> String {
        match self.timestamp {
            Some(ts) => format!(
                "{} {}",
                ts.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
                self.message()
            ),
            None => self.message().into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_accepts_agent_aliases_and_defaults() {
        let sample: ContainerSample =
            serde_json::from_str(r#"{"id": "abc", "name": "web", "cpu": 12.5}"#).unwrap();
        assert_eq!(sample.container_id, "abc");
        assert_eq!(sample.cpu_percent, 12.5);
        assert_eq!(sample.memory_used_bytes, 0);
        assert!(sample.labels.is_empty());
    }

    #[test]
    fn test_rule_kind_accepts_legacy_names() {
        let rule: AlertRule = serde_json::from_str(
            r#"{"id": "r1", "container_id": "c1", "type": "high_cpu", "threshold": 80}"#,
        )
        .unwrap();
        assert_eq!(rule.kind, Some(MetricKind::Cpu));

        let rule: AlertRule =
            serde_json::from_str(r#"{"id": "r2", "container_id": "c1", "type": "log_pattern"}"#)
                .unwrap();
        assert_eq!(rule.kind, Some(MetricKind::LogPattern));
    }

    #[test]
    fn test_log_line_message_trims_terminator() {
        let line = LogLine::new(OutputStream::Stdout, None, "hello\r\n");
        assert_eq!(line.message(), "hello");
        assert_eq!(line.render(), "hello");
        assert_eq!(LogLine::new(OutputStream::Stdout, None, "\n").message(), "");
    }

    #[test]
    fn test_log_line_keeps_invalid_utf8() {
        let line = LogLine::new(OutputStream::Stderr, None, b"bad \xff\xfe byte ERROR\n".to_vec());

        assert_eq!(line.payload, b"bad \xff\xfe byte ERROR\n");
        assert!(line.contains("ERROR"));
        assert!(!line.contains("\u{fffd}"));
        assert_eq!(line.message(), "bad \u{fffd}\u{fffd} byte ERROR");
    }

    #[test]
    fn test_output_stream_tags() {
        assert_eq!(OutputStream::from_tag(1), OutputStream::Stdout);
        assert_eq!(OutputStream::from_tag(2), OutputStream::Stderr);
        assert_eq!(OutputStream::from_tag(0), OutputStream::Other);
        assert_eq!(OutputStream::from_tag(9), OutputStream::Other);
    }
}
