//! Polling alert evaluation
//!
//! Every tick the engine snapshots the rule list, resolves a measured value
//! for each enabled rule, and for every rule that fires appends an event
//! (persisted before anything else happens) and queues its notifications and
//! remediation on the dispatcher.

use super::{DispatchJob, Dispatcher, EventLog, RuleBook};
use crate::health::{components, HealthRegistry};
use crate::logs::fetch_tail;
use crate::models::{AlertEvent, AlertRule, MetricKind};
use crate::observability::{ScopeMetrics, StructuredLogger};
use crate::runtime::{ContainerRuntime, LogOptions};
use crate::tsdb::TimeSeriesStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the alert engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between evaluation ticks (default: 10 seconds)
    pub interval: Duration,
    /// Window threshold rules average over (default: 5 minutes)
    pub window: Duration,
    /// Log lines fetched for pattern rules (default: 100)
    pub log_tail: u32,
    /// Host id used for rules that name no host
    pub local_host_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            window: Duration::from_secs(300),
            log_tail: 100,
            local_host_id: "master".to_string(),
        }
    }
}

/// Decides whether a rule that crossed its threshold produces an event
///
/// The default fires on every tick a breach persists.
pub trait TriggerGate: Send + Sync {
    fn should_fire(&self, rule: &AlertRule, now: DateTime<Utc>) -> bool;
}

/// Gate that never suppresses a trigger
pub struct AlwaysFire;

impl TriggerGate for AlwaysFire {
    fn should_fire(&self, _rule: &AlertRule, _now: DateTime<Utc>) -> bool {
        true
    }
}

/// Value a rule was evaluated against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub triggered: bool,
}

/// Summary of one evaluation tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub evaluated: usize,
    pub triggered: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct AlertEngine {
    rules: Arc<RuleBook>,
    events: Arc<EventLog>,
    tsdb: Arc<dyn TimeSeriesStore>,
    runtime: Arc<dyn ContainerRuntime>,
    dispatcher: Dispatcher,
    gate: Arc<dyn TriggerGate>,
    config: EngineConfig,
    health: Option<HealthRegistry>,
    metrics: ScopeMetrics,
    logger: StructuredLogger,
}

impl AlertEngine {
    pub fn builder() -> AlertEngineBuilder {
        AlertEngineBuilder::new()
    }

    /// Evaluate until cancelled
    ///
    /// With a health registry attached, the engine reports itself degraded
    /// after a tick with failed evaluations and unhealthy once it stops.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            window_secs = self.config.window.as_secs(),
            "Starting alert engine"
        );
        if let Some(health) = &self.health {
            health.register(components::ALERT_ENGINE).await;
        }

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    self.report_health(&report).await;
                    if report.triggered > 0 || report.failed > 0 {
                        info!(
                            evaluated = report.evaluated,
                            triggered = report.triggered,
                            failed = report.failed,
                            "Alert tick complete"
                        );
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down alert engine");
                    break;
                }
            }
        }

        if let Some(health) = &self.health {
            health
                .set_unhealthy(components::ALERT_ENGINE, "Alert engine stopped")
                .await;
        }
    }

    async fn report_health(&self, report: &TickReport) {
        let Some(health) = &self.health else {
            return;
        };
        if report.failed > 0 {
            health
                .set_degraded(
                    components::ALERT_ENGINE,
                    format!(
                        "{} of {} rule evaluations failed",
                        report.failed, report.evaluated
                    ),
                )
                .await;
        } else {
            health.set_healthy(components::ALERT_ENGINE).await;
        }
    }

    /// Evaluate every enabled rule once
    pub async fn tick(&self) -> TickReport {
        let start = Instant::now();
        let rules = self.rules.snapshot();
        let mut report = TickReport::default();

        for rule in rules.iter().filter(|r| r.enabled) {
            report.evaluated += 1;
            self.metrics.inc_rule_evaluations();

            match self.evaluate(rule).await {
                Ok(Some(measurement)) if measurement.triggered => {
                    if self.gate.should_fire(rule, Utc::now()) {
                        self.fire(rule, measurement.value).await;
                        report.triggered += 1;
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    self.metrics.inc_evaluation_failures();
                    warn!(
                        alert_id = %rule.id,
                        container_id = %rule.container_id,
                        error = %e,
                        "Alert evaluation failed, skipping rule this tick"
                    );
                }
            }
        }

        self.metrics.observe_alert_tick(start.elapsed().as_secs_f64());
        report
    }

    fn host_for<'a>(&'a self, rule: &'a AlertRule) -> &'a str {
        if rule.host_id.is_empty() {
            &self.config.local_host_id
        } else {
            &rule.host_id
        }
    }

    /// Measure one rule; `Ok(None)` when there is nothing to compare against
    pub async fn evaluate(&self, rule: &AlertRule) -> Result<Option<Measurement>> {
        let Some(kind) = rule.kind else {
            return Ok(None);
        };

        match kind {
            MetricKind::Cpu | MetricKind::Memory => {
                let mean = self
                    .tsdb
                    .mean(kind, self.host_for(rule), &rule.container_id, self.config.window)
                    .await
                    .context("Time-series query failed")?;

                Ok(mean.map(|value| Measurement {
                    value,
                    triggered: value > rule.threshold,
                }))
            }
            MetricKind::LogPattern => {
                let matches = self.count_pattern(rule).await?;
                Ok(Some(Measurement {
                    value: matches as f64,
                    triggered: matches > 0,
                }))
            }
        }
    }

    async fn count_pattern(&self, rule: &AlertRule) -> Result<usize> {
        let options = LogOptions::tail(self.config.log_tail);
        let lines = fetch_tail(self.runtime.as_ref(), &rule.container_id, options)
            .await
            .context("Log tail failed")?;

        Ok(lines
            .iter()
            .filter(|line| line.contains(&rule.pattern))
            .count())
    }

    async fn fire(&self, rule: &AlertRule, value: f64) {
        let Some(kind) = rule.kind else {
            return;
        };

        let message = match kind {
            MetricKind::Cpu => format!("High CPU usage: {:.2}%", value),
            MetricKind::Memory => format!("High Memory usage: {:.2} MB", value),
            MetricKind::LogPattern => format!("Log pattern matched: '{}' found", rule.pattern),
        };

        let event = AlertEvent {
            alert_id: rule.id.clone(),
            host_id: self.host_for(rule).to_string(),
            container_id: rule.container_id.clone(),
            kind,
            message: message.clone(),
            value,
            timestamp: Utc::now(),
        };

        self.logger.log_alert(&event);
        self.metrics.inc_alerts_triggered();
        self.events.append(event).await;

        for job in jobs_for(rule, kind, &message) {
            debug!(alert_id = %rule.id, job = job.kind(), "Queueing dispatch job");
            self.dispatcher.submit(job);
        }
    }
}

/// Notification and remediation jobs a triggered rule asks for
fn jobs_for(rule: &AlertRule, kind: MetricKind, message: &str) -> Vec<DispatchJob> {
    let mut jobs = Vec::new();

    if !rule.slack_webhook.is_empty() {
        jobs.push(DispatchJob::Chat {
            alert_id: rule.id.clone(),
            webhook_url: rule.slack_webhook.clone(),
            text: message.to_string(),
        });
    }
    if !rule.email.is_empty() {
        jobs.push(DispatchJob::Email {
            alert_id: rule.id.clone(),
            to: rule.email.clone(),
            subject: format!("[DockScope Alert] {}", kind),
            body: format!(
                "Container: {} triggered {}.\nMessage: {}\nThreshold: {:.2}",
                rule.container_id, kind, message, rule.threshold
            ),
        });
    }
    if rule.auto_restart {
        jobs.push(DispatchJob::Restart {
            alert_id: rule.id.clone(),
            container_id: rule.container_id.clone(),
        });
    }
    if rule.auto_stop {
        jobs.push(DispatchJob::Stop {
            alert_id: rule.id.clone(),
            container_id: rule.container_id.clone(),
        });
    }

    jobs
}

/// Builder for the alert engine
pub struct AlertEngineBuilder {
    rules: Option<Arc<RuleBook>>,
    events: Option<Arc<EventLog>>,
    tsdb: Option<Arc<dyn TimeSeriesStore>>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    dispatcher: Option<Dispatcher>,
    gate: Arc<dyn TriggerGate>,
    config: EngineConfig,
    health: Option<HealthRegistry>,
}

impl AlertEngineBuilder {
    pub fn new() -> Self {
        Self {
            rules: None,
            events: None,
            tsdb: None,
            runtime: None,
            dispatcher: None,
            gate: Arc::new(AlwaysFire),
            config: EngineConfig::default(),
            health: None,
        }
    }

    pub fn rules(mut self, rules: Arc<RuleBook>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn events(mut self, events: Arc<EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn time_series(mut self, tsdb: Arc<dyn TimeSeriesStore>) -> Self {
        self.tsdb = Some(tsdb);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Replace the default fire-every-tick behavior
    pub fn gate(mut self, gate: Arc<dyn TriggerGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry the engine reports its own health to while running
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<AlertEngine> {
        let rules = self
            .rules
            .ok_or_else(|| anyhow::anyhow!("Rule book is required"))?;
        let events = self
            .events
            .ok_or_else(|| anyhow::anyhow!("Event log is required"))?;
        let tsdb = self
            .tsdb
            .ok_or_else(|| anyhow::anyhow!("Time-series store is required"))?;
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Container runtime is required"))?;
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| anyhow::anyhow!("Dispatcher is required"))?;
        let logger = StructuredLogger::new(self.config.local_host_id.clone());

        Ok(AlertEngine {
            rules,
            events,
            tsdb,
            runtime,
            dispatcher,
            gate: self.gate,
            config: self.config,
            health: self.health,
            metrics: ScopeMetrics::new(),
            logger,
        })
    }
}

impl Default for AlertEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
