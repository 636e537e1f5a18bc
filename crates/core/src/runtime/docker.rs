//! Docker Engine HTTP API client

use super::{
    ContainerDetails, ContainerRuntime, ContainerSummary, LogOptions, LogReader, RawStats,
    RuntimeError, RuntimeResult,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

/// Seconds Docker waits after SIGTERM before killing a container on stop or restart
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(3);

/// Client for the Docker Engine API exposed over TCP
pub struct DockerClient {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
    stop_grace: Duration,
}

impl DockerClient {
    /// Create a client for `base_url` (`tcp://` is accepted as an alias of `http://`)
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .context("Failed to create runtime HTTP client")?;

        let normalized = match base_url.strip_prefix("tcp://") {
            Some(rest) => format!("http://{}", rest),
            None => base_url.to_string(),
        };
        let mut base_url = Url::parse(&normalized).context("Invalid runtime URL")?;
        // Relative joins must extend a versioned prefix such as /v1.43 rather than replace it
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            request_timeout,
            stop_grace: DEFAULT_STOP_GRACE,
        })
    }

    /// Grace period sent as `t` on stop and restart
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    fn url(&self, path: &str) -> RuntimeResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Map non-success statuses onto runtime errors
    async fn check(response: Response, container_id: Option<&str>) -> RuntimeResult<Response> {
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = container_id {
                return Err(RuntimeError::NotFound(id.to_string()));
            }
        }
        let message = response.text().await.unwrap_or_default();
        Err(RuntimeError::Status {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        container_id: Option<&str>,
    ) -> RuntimeResult<T> {
        let response = self
            .client
            .get(self.url(path)?)
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = Self::check(response, container_id).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| RuntimeError::Decode(e.to_string()))
    }

    /// Stop or restart; the call returns only after the grace period at worst
    async fn post_action(&self, container_id: &str, action: &str) -> RuntimeResult<()> {
        let path = format!("containers/{}/{}", container_id, action);
        let grace = self.stop_grace.as_secs().to_string();
        let response = self
            .client
            .post(self.url(&path)?)
            .query(&[("t", grace.as_str())])
            .timeout(self.request_timeout + self.stop_grace)
            .send()
            .await?;
        Self::check(response, Some(container_id)).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectDocument {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    restart_count: u64,
    #[serde(default)]
    config: Option<InspectConfig>,
    #[serde(default)]
    state: Option<InspectState>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    tty: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    started_at: Option<String>,
}

/// Docker reports names with a leading slash
fn display_name(raw: &str) -> String {
    raw.trim_start_matches('/').to_string()
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn ping(&self) -> RuntimeResult<()> {
        let response = self
            .client
            .get(self.url("_ping")?)
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::check(response, None).await?;
        Ok(())
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        let entries: Vec<ListEntry> = self.get_json("containers/json", &[], None).await?;
        Ok(entries
            .into_iter()
            .map(|entry| ContainerSummary {
                name: entry
                    .names
                    .first()
                    .map(|n| display_name(n))
                    .unwrap_or_default(),
                id: entry.id,
                image: entry.image,
                labels: entry.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerDetails> {
        let path = format!("containers/{}/json", container_id);
        let doc: InspectDocument = self.get_json(&path, &[], Some(container_id)).await?;

        let started_at = doc
            .state
            .and_then(|s| s.started_at)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc));
        let (image, labels, tty) = match doc.config {
            Some(config) => (config.image, config.labels.unwrap_or_default(), config.tty),
            None => (String::new(), BTreeMap::new(), false),
        };

        Ok(ContainerDetails {
            id: doc.id,
            name: display_name(&doc.name),
            image,
            restart_count: doc.restart_count,
            started_at,
            labels,
            tty,
        })
    }

    async fn stats(&self, container_id: &str) -> RuntimeResult<RawStats> {
        // stream=false makes the engine take two readings so precpu_stats is populated
        let path = format!("containers/{}/stats", container_id);
        self.get_json(&path, &[("stream", "false")], Some(container_id))
            .await
    }

    async fn logs(&self, container_id: &str, options: LogOptions) -> RuntimeResult<LogReader> {
        let path = format!("containers/{}/logs", container_id);
        let tail = options
            .tail
            .map(|n| n.to_string())
            .unwrap_or_else(|| "all".to_string());
        let query = [
            ("stdout", "1"),
            ("stderr", "1"),
            ("follow", if options.follow { "1" } else { "0" }),
            ("timestamps", if options.timestamps { "1" } else { "0" }),
            ("tail", tail.as_str()),
        ];

        let mut request = self.client.get(self.url(&path)?).query(&query);
        // A follow stream stays open for as long as the subscriber listens
        if !options.follow {
            request = request.timeout(self.request_timeout);
        }

        let response = Self::check(request.send().await?, Some(container_id)).await?;
        debug!(container_id = %container_id, follow = options.follow, "Opened log stream");

        let bytes = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::pin(StreamReader::new(bytes)))
    }

    async fn restart(&self, container_id: &str) -> RuntimeResult<()> {
        self.post_action(container_id, "restart").await
    }

    async fn stop(&self, container_id: &str) -> RuntimeResult<()> {
        self.post_action(container_id, "stop").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn client_for(server: &mockito::Server) -> DockerClient {
        DockerClient::new(&server.url(), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_tcp_scheme_is_normalized() {
        let client = DockerClient::new("tcp://10.0.0.1:2375", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url.as_str(), "http://10.0.0.1:2375/");
    }

    #[tokio::test]
    async fn test_list_containers_strips_leading_slash() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/containers/json")
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"Id": "abc123", "Names": ["/web"], "Image": "nginx:1.25", "Labels": {"tier": "front"}}]"#,
            )
            .create_async()
            .await;

        let containers = client_for(&server).list_containers().await.unwrap();
        mock.assert_async().await;

        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "web");
        assert_eq!(containers[0].image, "nginx:1.25");
        assert_eq!(containers[0].labels.get("tier").unwrap(), "front");
    }

    #[tokio::test]
    async fn test_inspect_missing_container_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/containers/ghost/json")
            .with_status(404)
            .with_body(r#"{"message": "No such container: ghost"}"#)
            .create_async()
            .await;

        let err = client_for(&server).inspect("ghost").await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_inspect_parses_details() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/containers/abc/json")
            .with_body(
                r#"{"Id": "abc", "Name": "/api", "RestartCount": 3,
                    "Config": {"Image": "api:2", "Labels": null},
                    "State": {"StartedAt": "2024-01-01T10:00:00.123456789Z"}}"#,
            )
            .create_async()
            .await;

        let details = client_for(&server).inspect("abc").await.unwrap();
        assert_eq!(details.name, "api");
        assert_eq!(details.image, "api:2");
        assert_eq!(details.restart_count, 3);
        assert!(details.started_at.is_some());
        assert!(details.labels.is_empty());
        assert!(!details.tty);
    }

    #[tokio::test]
    async fn test_inspect_reads_tty_flag() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/containers/sh/json")
            .with_body(r#"{"Id": "sh", "Name": "/shell", "Config": {"Image": "alpine", "Tty": true}}"#)
            .create_async()
            .await;

        let details = client_for(&server).inspect("sh").await.unwrap();
        assert!(details.tty);
    }

    #[tokio::test]
    async fn test_stats_decode_failure_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/containers/abc/stats")
            .match_query(mockito::Matcher::UrlEncoded("stream".into(), "false".into()))
            .with_body("not json")
            .create_async()
            .await;

        let err = client_for(&server).stats("abc").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Decode(_)));
    }

    #[tokio::test]
    async fn test_logs_returns_raw_bytes() {
        let mut server = mockito::Server::new_async().await;
        let frame = [1u8, 0, 0, 0, 0, 0, 0, 2, b'h', b'i'];
        server
            .mock("GET", "/containers/abc/logs")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("tail".into(), "100".into()),
                mockito::Matcher::UrlEncoded("follow".into(), "0".into()),
            ]))
            .with_body(frame)
            .create_async()
            .await;

        let mut reader = client_for(&server)
            .logs("abc", LogOptions::tail(100))
            .await
            .unwrap();
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, frame);
    }

    #[tokio::test]
    async fn test_stop_accepts_not_modified() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/containers/abc/stop")
            .match_query(mockito::Matcher::UrlEncoded("t".into(), "3".into()))
            .with_status(304)
            .create_async()
            .await;

        client_for(&server).stop("abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_sends_stop_grace() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/containers/abc/restart")
            .match_query(mockito::Matcher::UrlEncoded("t".into(), "7".into()))
            .with_status(204)
            .create_async()
            .await;

        client_for(&server)
            .with_stop_grace(Duration::from_secs(7))
            .restart("abc")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_restart_server_error_is_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/containers/abc/restart")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client_for(&server).restart("abc").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Status { status: 500, .. }));
    }
}
