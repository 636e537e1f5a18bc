//! Observability infrastructure for DockScope
//!
//! Provides:
//! - Prometheus metrics (ingestion latency, tracked hosts, alert evaluation,
//!   dispatch outcomes, live sessions)
//! - Structured JSON logging of domain events with tracing

use crate::models::AlertEvent;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ScopeMetricsInner> = OnceLock::new();

struct ScopeMetricsInner {
    ingest_latency_seconds: Histogram,
    samples_ingested: IntCounter,
    hosts_tracked: IntGauge,
    containers_tracked: IntGauge,
    alert_tick_seconds: Histogram,
    rule_evaluations: IntCounter,
    alerts_triggered: IntCounter,
    evaluation_failures: IntCounter,
    dispatch_outcomes: IntCounterVec,
    active_sessions: IntGaugeVec,
}

impl ScopeMetricsInner {
    fn new() -> Self {
        Self {
            ingest_latency_seconds: register_histogram!(
                "dockscope_ingest_latency_seconds",
                "Time spent replacing a host snapshot",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register ingest_latency_seconds"),

            samples_ingested: register_int_counter!(
                "dockscope_samples_ingested_total",
                "Container samples accepted from agents and local sampling"
            )
            .expect("Failed to register samples_ingested"),

            hosts_tracked: register_int_gauge!(
                "dockscope_hosts_tracked",
                "Hosts with a snapshot in the metric store"
            )
            .expect("Failed to register hosts_tracked"),

            containers_tracked: register_int_gauge!(
                "dockscope_containers_tracked",
                "Containers across all host snapshots"
            )
            .expect("Failed to register containers_tracked"),

            alert_tick_seconds: register_histogram!(
                "dockscope_alert_tick_seconds",
                "Time spent evaluating all alert rules once",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register alert_tick_seconds"),

            rule_evaluations: register_int_counter!(
                "dockscope_rule_evaluations_total",
                "Alert rules evaluated"
            )
            .expect("Failed to register rule_evaluations"),

            alerts_triggered: register_int_counter!(
                "dockscope_alerts_triggered_total",
                "Alert events appended"
            )
            .expect("Failed to register alerts_triggered"),

            evaluation_failures: register_int_counter!(
                "dockscope_evaluation_failures_total",
                "Rule evaluations skipped because a query or fetch failed"
            )
            .expect("Failed to register evaluation_failures"),

            dispatch_outcomes: register_int_counter_vec!(
                "dockscope_dispatch_total",
                "Notification and remediation jobs by outcome",
                &["outcome"]
            )
            .expect("Failed to register dispatch_outcomes"),

            active_sessions: register_int_gauge_vec!(
                "dockscope_active_sessions",
                "Live streaming sessions by kind",
                &["kind"]
            )
            .expect("Failed to register active_sessions"),
        }
    }
}

/// Outcome of one dispatch job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Failure,
    /// No transport configured for the channel
    Skipped,
    Dropped,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Success => "success",
            DispatchOutcome::Failure => "failure",
            DispatchOutcome::Skipped => "skipped",
            DispatchOutcome::Dropped => "dropped",
        }
    }
}

/// DockScope metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct ScopeMetrics {
    _private: (),
}

impl Default for ScopeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScopeMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScopeMetricsInner {
        GLOBAL_METRICS.get_or_init(ScopeMetricsInner::new)
    }

    pub fn observe_ingest_latency(&self, duration_secs: f64) {
        self.inner().ingest_latency_seconds.observe(duration_secs);
    }

    pub fn add_samples_ingested(&self, count: u64) {
        self.inner().samples_ingested.inc_by(count);
    }

    /// Update the store size gauges
    pub fn set_tracked(&self, hosts: i64, containers: i64) {
        self.inner().hosts_tracked.set(hosts);
        self.inner().containers_tracked.set(containers);
    }

    pub fn observe_alert_tick(&self, duration_secs: f64) {
        self.inner().alert_tick_seconds.observe(duration_secs);
    }

    pub fn inc_rule_evaluations(&self) {
        self.inner().rule_evaluations.inc();
    }

    pub fn inc_alerts_triggered(&self) {
        self.inner().alerts_triggered.inc();
    }

    pub fn inc_evaluation_failures(&self) {
        self.inner().evaluation_failures.inc();
    }

    pub fn record_dispatch(&self, outcome: DispatchOutcome) {
        self.inner()
            .dispatch_outcomes
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn dispatch_count(&self, outcome: DispatchOutcome) -> u64 {
        self.inner()
            .dispatch_outcomes
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn session_started(&self, kind: &str) {
        self.inner().active_sessions.with_label_values(&[kind]).inc();
    }

    pub fn session_ended(&self, kind: &str) {
        self.inner().active_sessions.with_label_values(&[kind]).dec();
    }
}

/// Structured logger for domain events
///
/// Gives significant events (ingestion, alert triggers, remediation, session
/// lifecycle) a stable `event` field so they can be picked out of the JSON log.
#[derive(Clone)]
pub struct StructuredLogger {
    local_host_id: String,
}

impl StructuredLogger {
    pub fn new(local_host_id: impl Into<String>) -> Self {
        Self {
            local_host_id: local_host_id.into(),
        }
    }

    /// Log process startup
    pub fn log_startup(&self, version: &str, listen_addr: &str) {
        info!(
            event = "server_started",
            local_host_id = %self.local_host_id,
            version = %version,
            listen_addr = %listen_addr,
            "DockScope started"
        );
    }

    /// Log process shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "server_shutdown",
            local_host_id = %self.local_host_id,
            reason = %reason,
            "DockScope shutting down"
        );
    }

    /// Log a snapshot replacement
    pub fn log_ingest(&self, host_id: &str, containers: usize) {
        info!(
            event = "snapshot_ingested",
            host_id = %host_id,
            containers = containers,
            "Host snapshot replaced"
        );
    }

    /// Log an alert trigger
    pub fn log_alert(&self, event: &AlertEvent) {
        warn!(
            event = "alert_triggered",
            alert_id = %event.alert_id,
            host_id = %event.host_id,
            container_id = %event.container_id,
            kind = %event.kind,
            value = event.value,
            "{}",
            event.message
        );
    }

    /// Log the outcome of a remediation command
    pub fn log_remediation(&self, alert_id: &str, container_id: &str, action: &str, success: bool) {
        if success {
            info!(
                event = "remediation",
                alert_id = %alert_id,
                container_id = %container_id,
                action = %action,
                success = true,
                "Remediation applied"
            );
        } else {
            warn!(
                event = "remediation",
                alert_id = %alert_id,
                container_id = %container_id,
                action = %action,
                success = false,
                "Remediation failed"
            );
        }
    }

    /// Log a streaming session start
    pub fn log_session_start(&self, kind: &str, container_id: &str) {
        info!(
            event = "session_started",
            kind = %kind,
            container_id = %container_id,
            "Streaming session started"
        );
    }

    /// Log a streaming session end
    pub fn log_session_end(&self, kind: &str, container_id: &str, reason: &str) {
        info!(
            event = "session_ended",
            kind = %kind,
            container_id = %container_id,
            reason = %reason,
            "Streaming session ended"
        );
    }
}
