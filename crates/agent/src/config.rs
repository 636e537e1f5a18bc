//! Command-line and environment configuration for the agent

use clap::Parser;
use std::time::Duration;

/// Samples the containers of this host and pushes them to a DockScope server
#[derive(Debug, Clone, Parser)]
#[command(name = "dockscope-agent")]
#[command(author, version, about = "DockScope host agent", long_about = None)]
pub struct AgentArgs {
    /// DockScope server URL; `/metrics` is appended when missing
    #[arg(long, env = "SERVER_URL", default_value = "http://localhost:9448")]
    pub server_url: String,

    /// Identifier of this host (defaults to the machine hostname)
    #[arg(long, env = "HOST_ID")]
    pub host_id: Option<String>,

    /// Bearer token expected by the server
    #[arg(long, env = "DOCKSCOPE_TOKEN")]
    pub token: Option<String>,

    /// Docker Engine API endpoint
    #[arg(long, env = "DOCKER_URL", default_value = "http://localhost:2375")]
    pub docker_url: String,

    /// Seconds between pushes
    #[arg(long, default_value_t = 10)]
    pub interval_secs: u64,

    /// Timeout in seconds for Docker and server requests
    #[arg(long, default_value_t = 5)]
    pub timeout_secs: u64,

    /// Push a single batch and exit
    #[arg(long)]
    pub once: bool,

    /// Port of the log tail endpoint
    #[arg(long, env = "LOG_PORT", default_value_t = 8880)]
    pub log_port: u16,

    /// Do not serve the log tail endpoint
    #[arg(long)]
    pub no_log_server: bool,
}

impl AgentArgs {
    /// Configured host id, else `HOSTNAME`, else `default-host`
    pub fn resolve_host_id(&self) -> String {
        self.host_id
            .clone()
            .filter(|h| !h.trim().is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| "default-host".to_string())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_flags() {
        let args = AgentArgs::try_parse_from([
            "dockscope-agent",
            "--server-url",
            "http://central:9448",
            "--host-id",
            "edge-1",
            "--token",
            "s3cret",
            "--interval-secs",
            "30",
            "--once",
        ])
        .unwrap();

        assert_eq!(args.server_url, "http://central:9448");
        assert_eq!(args.resolve_host_id(), "edge-1");
        assert_eq!(args.token(), Some("s3cret"));
        assert_eq!(args.interval(), Duration::from_secs(30));
        assert!(args.once);
        assert_eq!(args.log_port, 8880);
        assert!(!args.no_log_server);
    }

    #[test]
    fn test_empty_values_fall_back() {
        let args = AgentArgs::try_parse_from([
            "dockscope-agent",
            "--host-id",
            " ",
            "--token",
            "",
            "--interval-secs",
            "0",
            "--log-port",
            "9999",
            "--no-log-server",
        ])
        .unwrap();

        assert_ne!(args.resolve_host_id().trim(), "");
        assert!(args.token().is_none());
        assert_eq!(args.interval(), Duration::from_secs(1));
        assert_eq!(args.log_port, 9999);
        assert!(args.no_log_server);
    }
}
