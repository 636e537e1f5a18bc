//! Server configuration

use anyhow::{Context, Result};
use dockscope_core::tsdb::InfluxConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
///
/// Read from `DOCKSCOPE_*` environment variables (for example
/// `DOCKSCOPE_PORT`, `DOCKSCOPE_API_TOKEN`) layered over an optional
/// `dockscope.toml` in the working directory.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token agents must present when pushing samples
    #[serde(default)]
    pub api_token: Option<String>,

    /// Directory holding persisted alert rules and events
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Docker Engine API endpoint of the local host
    #[serde(default = "default_docker_url")]
    pub docker_url: String,

    #[serde(default = "default_influx_url")]
    pub influx_url: String,

    #[serde(default)]
    pub influx_token: String,

    #[serde(default = "default_influx_bucket")]
    pub influx_bucket: String,

    /// Host id of the containers sampled by this server
    #[serde(default = "default_local_host_id")]
    pub local_host_id: String,

    /// Alert evaluation interval in seconds
    #[serde(default = "default_alert_interval")]
    pub alert_interval_secs: u64,

    /// Averaging window of threshold rules in seconds
    #[serde(default = "default_alert_window")]
    pub alert_window_secs: u64,

    /// Log lines scanned by pattern rules
    #[serde(default = "default_log_tail")]
    pub log_tail: u32,

    /// Push interval of live metrics streams in seconds
    #[serde(default = "default_metrics_stream_interval")]
    pub metrics_stream_interval_secs: u64,

    /// Timeout for runtime, time-series and notification calls in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Seconds the runtime waits after SIGTERM on restart and stop
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Capacity of the notification and remediation queue
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue: usize,

    /// Local sampling interval in seconds; 0 disables local sampling
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_secs: u64,

    /// Mail relay that alert emails are posted to
    #[serde(default)]
    pub mail_relay_url: Option<String>,
}

fn default_port() -> u16 {
    9448
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_docker_url() -> String {
    "http://localhost:2375".to_string()
}

fn default_influx_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_influx_bucket() -> String {
    "dockscope-bucket".to_string()
}

fn default_local_host_id() -> String {
    "master".to_string()
}

fn default_alert_interval() -> u64 {
    10
}

fn default_alert_window() -> u64 {
    300
}

fn default_log_tail() -> u32 {
    100
}

fn default_metrics_stream_interval() -> u64 {
    2
}

fn default_request_timeout() -> u64 {
    5
}

fn default_stop_grace() -> u64 {
    3
}

fn default_dispatch_queue() -> usize {
    256
}

fn default_sampling_interval() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            api_token: None,
            data_dir: default_data_dir(),
            docker_url: default_docker_url(),
            influx_url: default_influx_url(),
            influx_token: String::new(),
            influx_bucket: default_influx_bucket(),
            local_host_id: default_local_host_id(),
            alert_interval_secs: default_alert_interval(),
            alert_window_secs: default_alert_window(),
            log_tail: default_log_tail(),
            metrics_stream_interval_secs: default_metrics_stream_interval(),
            request_timeout_secs: default_request_timeout(),
            stop_grace_secs: default_stop_grace(),
            dispatch_queue: default_dispatch_queue(),
            sampling_interval_secs: default_sampling_interval(),
            mail_relay_url: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `dockscope.toml` and the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("dockscope").required(false))
            .add_source(config::Environment::with_prefix("DOCKSCOPE"))
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Configured token, treating an empty value as none
    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn influx(&self) -> InfluxConfig {
        InfluxConfig {
            url: self.influx_url.clone(),
            token: self.influx_token.clone(),
            bucket: self.influx_bucket.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Bound on one restart or stop: the grace period plus the runtime
    /// round trips before and after it
    pub fn remediation_timeout(&self) -> Duration {
        self.stop_grace() + self.request_timeout() * 2
    }

    pub fn alert_interval(&self) -> Duration {
        Duration::from_secs(self.alert_interval_secs.max(1))
    }

    pub fn alert_window(&self) -> Duration {
        Duration::from_secs(self.alert_window_secs.max(1))
    }

    pub fn metrics_stream_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_stream_interval_secs.max(1))
    }

    /// `None` when local sampling is disabled
    pub fn sampling_interval(&self) -> Option<Duration> {
        (self.sampling_interval_secs > 0).then(|| Duration::from_secs(self.sampling_interval_secs))
    }

    pub fn rules_path(&self) -> PathBuf {
        self.data_dir.join(dockscope_core::alerts::RULES_FILE)
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join(dockscope_core::alerts::EVENTS_FILE)
    }
}
