//! Health tracking for the server and its dependencies
//!
//! Components report their own status; [`HealthRegistry::probe_dependencies`]
//! refreshes the container runtime and time-series entries by pinging them.
//! A dependency outage degrades the server rather than failing it, since the
//! in-memory views keep being served.

use crate::runtime::ContainerRuntime;
use crate::tsdb::TimeSeriesStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }

    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of the health endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        let mut status = ComponentStatus::Healthy;
        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => status = ComponentStatus::Degraded,
                ComponentStatus::Healthy => {}
            }
        }
        status
    }
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const RUNTIME: &str = "docker";
    pub const TIME_SERIES: &str = "influxdb";
    pub const ALERT_ENGINE: &str = "alert_engine";
}

#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Ping the runtime and the time-series store, each bounded by `timeout`
    pub async fn probe_dependencies(
        &self,
        runtime: &dyn ContainerRuntime,
        tsdb: &dyn TimeSeriesStore,
        timeout: Duration,
    ) {
        let (runtime_result, tsdb_result) = tokio::join!(
            tokio::time::timeout(timeout, runtime.ping()),
            tokio::time::timeout(timeout, tsdb.ping()),
        );

        let runtime_health = match runtime_result {
            Ok(Ok(())) => ComponentHealth::healthy(),
            Ok(Err(e)) => ComponentHealth::degraded(format!("Container runtime unreachable: {}", e)),
            Err(_) => ComponentHealth::degraded("Container runtime ping timed out"),
        };
        let tsdb_health = match tsdb_result {
            Ok(Ok(())) => ComponentHealth::healthy(),
            Ok(Err(e)) => ComponentHealth::degraded(format!("Time-series store unreachable: {}", e)),
            Err(_) => ComponentHealth::degraded("Time-series store ping timed out"),
        };

        self.update(components::RUNTIME, runtime_health).await;
        self.update(components::TIME_SERIES, tsdb_health).await;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        let reason = if !ready {
            Some("Server not yet initialized")
        } else if !health.status.is_operational() {
            Some("Critical component unhealthy")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRuntime, FakeTimeSeries};

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let registry = HealthRegistry::new();
        registry.register(components::RUNTIME).await;
        registry.register(components::ALERT_ENGINE).await;

        registry.set_degraded(components::RUNTIME, "slow").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(components::ALERT_ENGINE, "stopped")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_requires_initialization() {
        let registry = HealthRegistry::new();
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(components::ALERT_ENGINE, "stopped")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Critical component unhealthy")
        );
    }

    #[tokio::test]
    async fn test_probe_marks_unreachable_runtime_degraded() {
        let registry = HealthRegistry::new();
        let runtime = FakeRuntime::new();
        let tsdb = FakeTimeSeries::new();

        registry
            .probe_dependencies(&runtime, &tsdb, Duration::from_secs(1))
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(
            health.components[components::TIME_SERIES].status,
            ComponentStatus::Healthy
        );

        runtime.set_unreachable(true);
        registry
            .probe_dependencies(&runtime, &tsdb, Duration::from_secs(1))
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.components[components::RUNTIME]
            .message
            .as_deref()
            .unwrap()
            .contains("unreachable"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ComponentHealth::degraded("x")).unwrap();
        assert!(json.contains("\"degraded\""));
    }
}
