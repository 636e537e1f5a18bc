//! DockScope agent
//!
//! Runs on each monitored host, sampling local containers through the Docker
//! Engine API and pushing them to the central server.

use anyhow::Result;
use clap::Parser;
use dockscope_agent::{log_server, AgentArgs, LogServerState, PushClient};
use dockscope_core::runtime::DockerClient;
use dockscope_core::sampler::{SamplingConfig, SamplingLoop};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = AgentArgs::parse();

    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let host_id = args.resolve_host_id();
    let runtime = Arc::new(DockerClient::new(&args.docker_url, args.timeout())?);
    let client = Arc::new(PushClient::new(&args.server_url, args.token(), args.timeout())?);
    info!(
        host_id = %host_id,
        server = %client.endpoint(),
        interval_secs = args.interval().as_secs(),
        "Starting dockscope-agent"
    );

    let sampler = SamplingLoop::new(
        runtime.clone(),
        client,
        SamplingConfig {
            host_id,
            interval: args.interval(),
        },
    );

    if args.once {
        let count = sampler.run_once().await?;
        info!(containers = count, "Single push complete");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(sampler.run(shutdown.clone()));

    let log_handle = if args.no_log_server {
        None
    } else {
        let addr = SocketAddr::from(([0, 0, 0, 0], args.log_port));
        let listener = TcpListener::bind(addr).await?;
        let state = Arc::new(LogServerState::new(runtime, args.token()));
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = log_server::serve(listener, state, token).await {
                error!(error = %e, "Log server error");
            }
        }))
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown.cancel();
    handle.await?;
    if let Some(log_handle) = log_handle {
        log_handle.await?;
    }

    Ok(())
}
