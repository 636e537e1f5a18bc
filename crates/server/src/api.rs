//! HTTP and WebSocket API
//!
//! Ingestion, container and log queries, live streams, alert management,
//! health probes and Prometheus exposition.

use crate::ingest::Ingestor;
use crate::ws::WsSubscriber;
use axum::{
    body::Bytes,
    extract::{Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use dockscope_core::alerts::{EventLog, RuleBook, RuleError};
use dockscope_core::auth::bearer_authorized;
use dockscope_core::health::{ComponentStatus, HealthRegistry};
use dockscope_core::logs::{fetch_history, LogQuery};
use dockscope_core::models::{AgentPayload, AlertEvent, AlertRule, ContainerSample, MetricsPayload};
use dockscope_core::runtime::{ContainerRuntime, RuntimeError};
use dockscope_core::sampler::sample_stats;
use dockscope_core::store::{ContainerQuery, HostMetricStore, SortKey, SortOrder};
use dockscope_core::stream::{LogSession, MetricsSession, MetricsSessionConfig};
use dockscope_core::tsdb::TimeSeriesStore;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Request-independent settings used by the handlers
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Bearer token required on ingestion; `None` leaves it open
    pub api_token: Option<String>,
    pub local_host_id: String,
    pub metrics_stream_interval: Duration,
    /// Upper bound on dependency pings from the health endpoint
    pub probe_timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_token: None,
            local_host_id: "master".to_string(),
            metrics_stream_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub store: Arc<HostMetricStore>,
    pub ingest: Ingestor,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub tsdb: Arc<dyn TimeSeriesStore>,
    pub rules: Arc<RuleBook>,
    pub events: Arc<EventLog>,
    pub health_registry: HealthRegistry,
    pub settings: ApiSettings,
    /// Parent of every streaming session's token
    pub shutdown: CancellationToken,
}

/// Errors returned to API clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a failed runtime-backed operation, surfacing unknown containers as 404
    fn from_runtime(error: anyhow::Error) -> Self {
        match error.downcast_ref::<RuntimeError>() {
            Some(RuntimeError::NotFound(id)) => ApiError::NotFound(format!("container {} not found", id)),
            _ => ApiError::Internal(format!("{:#}", error)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<RuntimeError> for ApiError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::NotFound(id) => ApiError::NotFound(format!("container {} not found", id)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RuleError> for ApiError {
    fn from(error: RuleError) -> Self {
        match error {
            RuleError::MissingField(_) => ApiError::BadRequest(error.to_string()),
            RuleError::Duplicate(_) => ApiError::Conflict(error.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn authorize(headers: &HeaderMap, token: Option<&str>) -> ApiResult<()> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if bearer_authorized(presented, token) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

fn required_id(id: Option<String>) -> ApiResult<String> {
    id.filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Container ID is required".to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Agent push: replace the host's snapshot
async fn receive_metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    authorize(&headers, state.settings.api_token.as_deref())?;

    let payload: AgentPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;
    if payload.host_id.trim().is_empty() {
        return Err(ApiError::BadRequest("host_id is required".to_string()));
    }

    let stored = state.ingest.ingest(&payload.host_id, payload.containers);
    Ok(Json(serde_json::json!({
        "status": "ok",
        "host_id": payload.host_id,
        "containers": stored,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerParams {
    pub id: Option<String>,
    pub host_id: Option<String>,
}

/// One-shot reading of a local container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetricsResponse {
    pub id: String,
    pub name: String,
    pub image: String,
    pub host_id: String,
    pub restart_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub metrics: MetricsPayload,
}

async fn container_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ContainerParams>,
) -> ApiResult<Json<ContainerMetricsResponse>> {
    let id = required_id(params.id)?;
    let host_id =
        non_empty(params.host_id).unwrap_or_else(|| state.settings.local_host_id.clone());

    let stats = state.runtime.stats(&id).await?;
    let details = state.runtime.inspect(&id).await?;

    let usage = sample_stats(&stats);
    let sample = usage.to_sample(&host_id, &details);
    state.ingest.forward(vec![sample.clone()]);

    let now = Utc::now();
    Ok(Json(ContainerMetricsResponse {
        id: details.id,
        name: details.name,
        image: details.image,
        host_id,
        restart_count: details.restart_count,
        started_at: details.started_at,
        uptime_secs: details.started_at.map(|s| (now - s).num_seconds().max(0)),
        cpu_percent: sample.cpu_percent,
        memory_mb: sample.memory_used_mib(),
        metrics: usage.to_payload(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerListParams {
    pub host_id: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub label: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ContainerListParams {
    /// Unparseable numbers count as zero, i.e. no limit and no offset
    pub fn to_query(&self) -> ContainerQuery {
        let host_ids = self
            .host_id
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        let number = |v: &Option<String>| {
            v.as_deref()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(0)
        };

        ContainerQuery {
            host_ids,
            name: non_empty(self.name.clone()),
            image: non_empty(self.image.clone()),
            label: non_empty(self.label.clone()),
            sort_by: self
                .sort_by
                .as_deref()
                .map(SortKey::from_param)
                .unwrap_or_default(),
            order: self
                .order
                .as_deref()
                .map(SortOrder::from_param)
                .unwrap_or_default(),
            limit: number(&self.limit),
            offset: number(&self.offset),
        }
    }
}

async fn list_containers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ContainerListParams>,
) -> Json<Vec<ContainerSample>> {
    Json(state.store.query(&params.to_query()))
}

async fn export_containers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let containers = state.store.query(&ContainerQuery::default());
    (
        [(
            header::CONTENT_DISPOSITION,
            "attachment; filename=containers.json",
        )],
        Json(containers),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct LogParams {
    pub id: Option<String>,
    pub search: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
}

impl LogParams {
    /// Unparseable bounds and page numbers are ignored
    pub fn to_query(&self) -> LogQuery {
        let number = |v: &Option<String>| v.as_deref().and_then(|v| v.trim().parse::<i64>().ok());
        LogQuery {
            search: non_empty(self.search.clone()),
            since: parse_time(self.since.as_deref()),
            until: parse_time(self.until.as_deref()),
            page: number(&self.page),
            limit: number(&self.limit),
        }
    }
}

async fn container_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogParams>,
) -> ApiResult<impl IntoResponse> {
    let id = required_id(params.id.clone())?;
    let lines = fetch_history(state.runtime.as_ref(), &id, &params.to_query())
        .await
        .map_err(ApiError::from_runtime)?;

    let mut body = String::new();
    for line in &lines {
        body.push_str(&line.render());
        body.push('\n');
    }

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct LogStreamParams {
    pub id: Option<String>,
    pub filter: Option<String>,
}

async fn ws_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogStreamParams>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let id = required_id(params.id)?;
    let filter = params.filter.unwrap_or_default();

    Ok(ws.on_upgrade(move |socket| async move {
        let token = state.shutdown.child_token();
        let mut subscriber = WsSubscriber::attach(socket, token.clone());
        LogSession::new(Arc::clone(&state.runtime), id)
            .with_filter(&filter)
            .run(&mut subscriber, token.clone())
            .await;
        token.cancel();
        subscriber.close().await;
    }))
}

async fn ws_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ContainerParams>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let id = required_id(params.id)?;
    let config = MetricsSessionConfig {
        interval: state.settings.metrics_stream_interval,
        host_id: non_empty(params.host_id).unwrap_or_else(|| state.settings.local_host_id.clone()),
    };

    Ok(ws.on_upgrade(move |socket| async move {
        let token = state.shutdown.child_token();
        let mut subscriber = WsSubscriber::attach(socket, token.clone());
        MetricsSession::new(Arc::clone(&state.runtime), id, config)
            .with_time_series(Arc::clone(&state.tsdb))
            .run(&mut subscriber, token.clone())
            .await;
        token.cancel();
        subscriber.close().await;
    }))
}

async fn create_alert(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<AlertRule>> {
    let rule: AlertRule = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;
    let rule = state.rules.create(rule).await?;
    info!(alert_id = %rule.id, container_id = %rule.container_id, "Alert rule created");
    Ok(Json(rule))
}

async fn list_alerts(State(state): State<Arc<AppState>>) -> Json<Vec<AlertRule>> {
    Json(state.rules.snapshot().to_vec())
}

async fn list_alert_events(State(state): State<Arc<AppState>>) -> Json<Vec<AlertEvent>> {
    Json(state.events.list().await)
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .health_registry
        .probe_dependencies(
            state.runtime.as_ref(),
            state.tsdb.as_ref(),
            state.settings.probe_timeout,
        )
        .await;
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn prometheus_metrics() -> ApiResult<impl IntoResponse> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| ApiError::Internal(format!("Failed to encode metrics: {}", e)))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    ))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(container_metrics).post(receive_metrics))
        .route("/containers", get(list_containers))
        .route("/export/containers", get(export_containers))
        .route("/logs", get(container_logs))
        .route("/wslogs", get(ws_logs))
        .route("/wsmetrics", get(ws_metrics))
        .route("/alerts", get(list_alerts).post(create_alert))
        .route("/alerts/events", get(list_alert_events))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/prometheus", get(prometheus_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve `router` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Starting API server");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
