//! Log tail served by the agent
//!
//! `GET /logs?id=<container>` returns the last lines of a local container's
//! output as plain text, one rendered line per row. When the agent has a
//! token, the same bearer check as the server's ingestion applies.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use dockscope_core::auth::bearer_authorized;
use dockscope_core::logs::fetch_tail;
use dockscope_core::runtime::{ContainerRuntime, LogOptions, RuntimeError};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lines returned per request
pub const LOG_TAIL: u32 = 100;

pub struct LogServerState {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub token: Option<String>,
    pub tail: u32,
}

impl LogServerState {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, token: Option<&str>) -> Self {
        Self {
            runtime,
            token: token.map(str::to_string),
            tail: LOG_TAIL,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogServerError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Missing container ID")]
    MissingId,

    #[error("container {0} not found")]
    NotFound(String),

    #[error("Failed to fetch logs: {0}")]
    Fetch(String),
}

impl IntoResponse for LogServerError {
    fn into_response(self) -> Response {
        let status = match self {
            LogServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            LogServerError::MissingId => StatusCode::BAD_REQUEST,
            LogServerError::NotFound(_) => StatusCode::NOT_FOUND,
            LogServerError::Fetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, "Log request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TailParams {
    pub id: Option<String>,
}

async fn tail_logs(
    State(state): State<Arc<LogServerState>>,
    headers: HeaderMap,
    Query(params): Query<TailParams>,
) -> Result<impl IntoResponse, LogServerError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !bearer_authorized(presented, state.token.as_deref()) {
        return Err(LogServerError::Unauthorized);
    }

    let id = params
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or(LogServerError::MissingId)?;

    let lines = fetch_tail(state.runtime.as_ref(), &id, LogOptions::tail(state.tail))
        .await
        .map_err(|e| match e.downcast_ref::<RuntimeError>() {
            Some(RuntimeError::NotFound(id)) => LogServerError::NotFound(id.clone()),
            _ => LogServerError::Fetch(format!("{:#}", e)),
        })?;

    let mut body = String::new();
    for line in &lines {
        body.push_str(&line.render());
        body.push('\n');
    }

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body))
}

pub fn create_router(state: Arc<LogServerState>) -> Router {
    Router::new()
        .route("/logs", get(tail_logs))
        .with_state(state)
}

/// Serve the log tail until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: Arc<LogServerState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Starting agent log server");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
