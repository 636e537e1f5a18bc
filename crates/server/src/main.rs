//! DockScope server
//!
//! Accepts agent pushes, samples the local Docker host, evaluates alert rules
//! and serves container, log and alert views plus live streams.

use anyhow::{Context, Result};
use dockscope_core::alerts::{
    AlertEngine, DispatchConfig, Dispatcher, EngineConfig, EventLog, HttpNotifier, RuleBook,
};
use dockscope_core::health::{components, HealthRegistry};
use dockscope_core::observability::{ScopeMetrics, StructuredLogger};
use dockscope_core::runtime::{ContainerRuntime, DockerClient};
use dockscope_core::sampler::{SamplingConfig, SamplingLoop};
use dockscope_core::store::HostMetricStore;
use dockscope_core::tsdb::{InfluxClient, TimeSeriesStore};
use dockscope_server::{api, ApiSettings, AppState, Ingestor, ServerConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = ServerConfig::load()?;
    info!(
        local_host_id = %config.local_host_id,
        data_dir = %config.data_dir.display(),
        "Server configured"
    );

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;

    let logger = StructuredLogger::new(&config.local_host_id);
    let timeout = config.request_timeout();

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerClient::new(&config.docker_url, timeout)?.with_stop_grace(config.stop_grace()),
    );
    let tsdb: Arc<dyn TimeSeriesStore> = Arc::new(InfluxClient::new(config.influx(), timeout)?);
    let rules = Arc::new(RuleBook::load(config.rules_path()).await?);
    let events = Arc::new(EventLog::load(config.events_path()).await?);
    info!(rules = rules.len(), events = events.len().await, "Alert state loaded");

    let store = Arc::new(HostMetricStore::with_metrics(ScopeMetrics::new()));
    let ingest = Ingestor::new(Arc::clone(&store), Arc::clone(&tsdb), logger.clone());
    let shutdown = CancellationToken::new();

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ALERT_ENGINE).await;
    health_registry
        .probe_dependencies(runtime.as_ref(), tsdb.as_ref(), timeout)
        .await;

    let notifier = Arc::new(HttpNotifier::new(config.mail_relay_url.as_deref(), timeout)?);
    let (dispatcher, dispatch_handle) = Dispatcher::start(
        notifier,
        Arc::clone(&runtime),
        DispatchConfig {
            capacity: config.dispatch_queue,
            job_timeout: timeout,
            remediation_timeout: config.remediation_timeout(),
        },
        logger.clone(),
        shutdown.child_token(),
    );

    let engine = Arc::new(
        AlertEngine::builder()
            .rules(Arc::clone(&rules))
            .events(Arc::clone(&events))
            .time_series(Arc::clone(&tsdb))
            .runtime(Arc::clone(&runtime))
            .dispatcher(dispatcher)
            .health(health_registry.clone())
            .config(EngineConfig {
                interval: config.alert_interval(),
                window: config.alert_window(),
                log_tail: config.log_tail,
                local_host_id: config.local_host_id.clone(),
            })
            .build()?,
    );
    let engine_handle = tokio::spawn(engine.run(shutdown.child_token()));

    let sampling_handle = config.sampling_interval().map(|interval| {
        let sampler = SamplingLoop::new(
            Arc::clone(&runtime),
            Arc::new(ingest.clone()),
            SamplingConfig {
                host_id: config.local_host_id.clone(),
                interval,
            },
        );
        tokio::spawn(sampler.run(shutdown.child_token()))
    });
    if sampling_handle.is_none() {
        info!("Local sampling disabled");
    }

    if config.api_token().is_none() {
        warn!("No API token configured, metrics ingestion is unauthenticated");
    }

    let state = Arc::new(AppState {
        store,
        ingest,
        runtime,
        tsdb,
        rules,
        events,
        health_registry: health_registry.clone(),
        settings: ApiSettings {
            api_token: config.api_token().map(str::to_string),
            local_host_id: config.local_host_id.clone(),
            metrics_stream_interval: config.metrics_stream_interval(),
            probe_timeout: timeout,
        },
        shutdown: shutdown.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    logger.log_startup(SERVER_VERSION, &addr);
    health_registry.set_ready(true).await;

    let mut server = tokio::spawn(api::serve(
        listener,
        api::create_router(state),
        shutdown.clone(),
    ));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = &mut server => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    health_registry.set_ready(false).await;
    shutdown.cancel();

    if !server.is_finished() {
        let _ = server.await;
    }
    let _ = engine_handle.await;
    let _ = dispatch_handle.await;
    if let Some(handle) = sampling_handle {
        let _ = handle.await;
    }

    info!("Shutdown complete");
    Ok(())
}
