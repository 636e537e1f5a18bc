//! InfluxDB client for container samples
//!
//! Writes and reads go through the `influxdb` crate against the 1.x-compatible
//! API, which InfluxDB 2 serves for a bucket mapped to a database of the same
//! name.

use super::TimeSeriesStore;
use crate::models::{ContainerSample, MetricKind};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use influxdb::{Client, ReadQuery, Timestamp, WriteQuery};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Measurement every container sample is written under
pub const MEASUREMENT: &str = "container_metrics";

/// Connection settings for InfluxDB
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub url: String,
    /// API token; empty for an unauthenticated instance
    pub token: String,
    /// Bucket (database) samples are written to
    pub bucket: String,
}

pub struct InfluxClient {
    client: Client,
    request_timeout: Duration,
}

impl InfluxClient {
    pub fn new(config: InfluxConfig, request_timeout: Duration) -> Result<Self> {
        url::Url::parse(&config.url).context("Invalid InfluxDB URL")?;

        let mut client = Client::new(config.url.trim_end_matches('/'), config.bucket);
        if !config.token.is_empty() {
            client = client.with_token(config.token);
        }

        Ok(Self {
            client,
            request_timeout,
        })
    }

    async fn bounded<T, F>(&self, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, influxdb::Error>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.with_context(|| format!("InfluxDB {} failed", what)),
            Err(_) => Err(anyhow!(
                "InfluxDB {} timed out after {:?}",
                what,
                self.request_timeout
            )),
        }
    }
}

fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Build the write for one sample
///
/// Empty tag values are left out because InfluxDB rejects them.
pub fn write_query(sample: &ContainerSample) -> WriteQuery {
    let nanos = sample.timestamp.timestamp_nanos_opt().unwrap_or_default().max(0);
    let mut query = WriteQuery::new(Timestamp::Nanoseconds(nanos as u128), MEASUREMENT);

    for (key, value) in [
        ("host_id", &sample.host_id),
        ("container_id", &sample.container_id),
        ("name", &sample.name),
        ("image", &sample.image),
    ] {
        if !value.is_empty() {
            query = query.add_tag(key, value.as_str());
        }
    }

    query
        .add_field("cpu", finite(sample.cpu_percent))
        .add_field("memory", finite(sample.memory_used_mib()))
        .add_field("memory_percent", finite(sample.memory_percent))
        .add_field("restart_count", sample.restart_count as i64)
        .add_field("net_rx", sample.net_rx as i64)
        .add_field("net_tx", sample.net_tx as i64)
        .add_field("disk_read", sample.disk_read as i64)
        .add_field("disk_write", sample.disk_write as i64)
}

/// InfluxQL string literal
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// InfluxQL for the trailing mean of one field of one container
pub fn mean_query(field: &str, host_id: &str, container_id: &str, window: Duration) -> String {
    format!(
        "SELECT mean(\"{field}\") FROM \"{measurement}\" WHERE \"host_id\" = {host} AND \"container_id\" = {container} AND time > now() - {secs}s",
        field = field,
        measurement = MEASUREMENT,
        host = quote(host_id),
        container = quote(container_id),
        secs = window.as_secs().max(1),
    )
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// First `mean` value of a query response; `None` when the window is empty
fn parse_mean(body: &str) -> Result<Option<f64>> {
    let response: QueryResponse =
        serde_json::from_str(body).context("Invalid InfluxDB query response")?;

    let Some(statement) = response.results.into_iter().next() else {
        return Ok(None);
    };
    if let Some(error) = statement.error {
        bail!("InfluxDB query error: {}", error);
    }

    let Some(series) = statement.series.into_iter().next() else {
        return Ok(None);
    };
    let index = series
        .columns
        .iter()
        .position(|c| c == "mean")
        .ok_or_else(|| anyhow!("InfluxDB response has no mean column"))?;

    Ok(series
        .values
        .first()
        .and_then(|row| row.get(index))
        .and_then(serde_json::Value::as_f64))
}

#[async_trait]
impl TimeSeriesStore for InfluxClient {
    async fn ping(&self) -> Result<()> {
        self.bounded("ping", self.client.ping()).await?;
        Ok(())
    }

    async fn write_samples(&self, samples: &[ContainerSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let writes: Vec<WriteQuery> = samples.iter().map(write_query).collect();
        self.bounded("write", self.client.query(writes)).await?;
        Ok(())
    }

    async fn mean(
        &self,
        kind: MetricKind,
        host_id: &str,
        container_id: &str,
        window: Duration,
    ) -> Result<Option<f64>> {
        let field = match kind {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::LogPattern => bail!("log_pattern rules have no time series"),
        };

        let query = ReadQuery::new(mean_query(field, host_id, container_id, window));
        let body = self.bounded("query", self.client.query(query)).await?;
        parse_mean(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use influxdb::Query;
    use mockito::Matcher;

    fn sample() -> ContainerSample {
        ContainerSample {
            host_id: "rack,3".to_string(),
            container_id: "abc".to_string(),
            name: "web api".to_string(),
            image: String::new(),
            labels: Default::default(),
            cpu_percent: 12.5,
            memory_used_bytes: 150 * 1024 * 1024,
            memory_limit_bytes: 0,
            memory_percent: 0.0,
            net_rx: 1,
            net_tx: 2,
            disk_read: 3,
            disk_write: 4,
            restart_count: 5,
            timestamp: chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn config(url: &str) -> InfluxConfig {
        InfluxConfig {
            url: url.to_string(),
            token: "secret".to_string(),
            bucket: "metrics".to_string(),
        }
    }

    #[test]
    fn test_write_query_escapes_tags_and_skips_empty() {
        let line = write_query(&sample()).build().unwrap().get();

        assert!(line.starts_with("container_metrics,"));
        assert!(line.contains("host_id=rack\\,3"));
        assert!(line.contains("name=web\\ api"));
        assert!(!line.contains("image="));
        assert!(line.contains("cpu=12.5"));
        assert!(line.contains("restart_count=5i"));
        assert!(line.ends_with("1700000000000000000"));
    }

    #[test]
    fn test_mean_query_quotes_literals() {
        let query = mean_query("cpu", "rack,3", "it's", Duration::from_secs(300));
        assert_eq!(
            query,
            "SELECT mean(\"cpu\") FROM \"container_metrics\" WHERE \"host_id\" = 'rack,3' \
             AND \"container_id\" = 'it\\'s' AND time > now() - 300s"
        );
    }

    #[test]
    fn test_parse_mean() {
        let body = r#"{"results":[{"statement_id":0,"series":[{"name":"container_metrics","columns":["time","mean"],"values":[["2024-01-01T00:00:00Z",81.25]]}]}]}"#;
        assert_eq!(parse_mean(body).unwrap(), Some(81.25));

        assert_eq!(parse_mean(r#"{"results":[{"statement_id":0}]}"#).unwrap(), None);
        assert!(parse_mean(r#"{"results":[{"statement_id":0,"error":"database not found"}]}"#).is_err());
        assert!(parse_mean("not json").is_err());
    }

    #[tokio::test]
    async fn test_write_samples_posts_to_bucket() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_query(Matcher::UrlEncoded("db".into(), "metrics".into()))
            .match_header("authorization", "Token secret")
            .match_body(Matcher::Regex(r"^container_metrics,host_id=rack\\,3".into()))
            .with_status(204)
            .create_async()
            .await;

        let client = InfluxClient::new(config(&server.url()), Duration::from_secs(2)).unwrap();
        client.write_samples(&[sample()]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_mean_for_host_with_comma() {
        let mut server = mockito::Server::new_async().await;
        let expected = mean_query("cpu", "rack,3", "c1", Duration::from_secs(300));
        server
            .mock("GET", "/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("db".into(), "metrics".into()),
                Matcher::UrlEncoded("q".into(), expected),
            ]))
            .with_body(
                r#"{"results":[{"statement_id":0,"series":[{"name":"container_metrics","columns":["time","mean"],"values":[["2024-01-01T00:00:00Z",81.25]]}]}]}"#,
            )
            .create_async()
            .await;

        let client = InfluxClient::new(config(&server.url()), Duration::from_secs(2)).unwrap();
        let mean = client
            .mean(MetricKind::Cpu, "rack,3", "c1", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(mean, Some(81.25));
    }

    #[tokio::test]
    async fn test_mean_of_empty_window() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_body(r#"{"results":[{"statement_id":0}]}"#)
            .create_async()
            .await;

        let client = InfluxClient::new(config(&server.url()), Duration::from_secs(2)).unwrap();
        let mean = client
            .mean(MetricKind::Memory, "h1", "c1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(mean, None);
    }

    #[tokio::test]
    async fn test_mean_rejects_log_pattern() {
        let client =
            InfluxClient::new(config("http://127.0.0.1:9"), Duration::from_secs(1)).unwrap();
        assert!(client
            .mean(MetricKind::LogPattern, "h1", "c1", Duration::from_secs(60))
            .await
            .is_err());
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(InfluxClient::new(config("not a url"), Duration::from_secs(1)).is_err());
    }
}
