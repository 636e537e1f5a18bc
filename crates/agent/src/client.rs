//! Push client for the DockScope ingestion endpoint

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use dockscope_core::models::{AgentPayload, ContainerSample};
use dockscope_core::sampler::SampleSink;
use reqwest::Client;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Client posting sample batches to `POST /metrics`
pub struct PushClient {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl PushClient {
    /// Create a client; `server_url` may be the server root or the full endpoint
    pub fn new(server_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: metrics_endpoint(server_url)?,
            token: token.map(str::to_string),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send one batch
    pub async fn push(&self, payload: &AgentPayload) -> Result<()> {
        let mut request = self.client.post(self.endpoint.clone()).json(payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Server error ({}): {}", status, body);
        }

        Ok(())
    }
}

fn metrics_endpoint(server_url: &str) -> Result<Url> {
    let mut base = Url::parse(server_url).context("Invalid server URL")?;
    if base.path().trim_end_matches('/').ends_with("/metrics") {
        return Ok(base);
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("metrics").context("Invalid server URL")
}

#[async_trait]
impl SampleSink for PushClient {
    async fn deliver(&self, host_id: &str, samples: Vec<ContainerSample>) -> Result<()> {
        let payload = AgentPayload {
            host_id: host_id.to_string(),
            timestamp: Some(Utc::now().to_rfc3339()),
            containers: samples,
        };
        self.push(&payload).await?;
        info!(
            host_id = %host_id,
            containers = payload.containers.len(),
            "Pushed samples to server"
        );
        Ok(())
    }
}
