//! DockScope server: configuration, HTTP API and process wiring

pub mod api;
pub mod config;
pub mod ingest;
pub mod ws;

pub use api::{create_router, serve, ApiError, ApiSettings, AppState};
pub use config::ServerConfig;
pub use ingest::Ingestor;
