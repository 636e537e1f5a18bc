//! Core library for DockScope container observability
//!
//! This crate provides the building blocks shared by the server and the agent:
//! - Resource sampling from container runtime statistics
//! - Multiplexed log stream decoding and historical log queries
//! - The in-memory per-host metric store
//! - Alert rules, evaluation, notification and remediation
//! - Live metrics and log streaming sessions
//! - Health checks and observability

pub mod alerts;
pub mod auth;
pub mod health;
pub mod logs;
pub mod models;
pub mod observability;
pub mod runtime;
pub mod sampler;
pub mod store;
pub mod stream;
pub mod tsdb;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ScopeMetrics, StructuredLogger};
