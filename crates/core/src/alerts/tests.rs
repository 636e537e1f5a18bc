//! Alert engine and dispatch scenarios

use super::*;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{AlertRule, MetricKind};
use crate::observability::StructuredLogger;
use crate::testing::{frame, Action, FakeRuntime, FakeTimeSeries, RecordingNotifier, Sent};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    engine: AlertEngine,
    rules: Arc<RuleBook>,
    events: Arc<EventLog>,
    tsdb: Arc<FakeTimeSeries>,
    runtime: Arc<FakeRuntime>,
    notifier: Arc<RecordingNotifier>,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        Self::with_gate(Arc::new(AlwaysFire))
    }

    fn with_gate(gate: Arc<dyn TriggerGate>) -> Self {
        let rules = Arc::new(RuleBook::in_memory());
        let events = Arc::new(EventLog::in_memory());
        let tsdb = Arc::new(FakeTimeSeries::new());
        let runtime = Arc::new(FakeRuntime::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let shutdown = CancellationToken::new();

        let (dispatcher, _worker) = Dispatcher::start(
            notifier.clone(),
            runtime.clone(),
            DispatchConfig::default(),
            StructuredLogger::new("master"),
            shutdown.clone(),
        );

        let engine = AlertEngine::builder()
            .rules(rules.clone())
            .events(events.clone())
            .time_series(tsdb.clone())
            .runtime(runtime.clone())
            .dispatcher(dispatcher.clone())
            .gate(gate)
            .config(EngineConfig {
                local_host_id: "master".to_string(),
                ..Default::default()
            })
            .build()
            .unwrap();

        Self {
            engine,
            rules,
            events,
            tsdb,
            runtime,
            notifier,
            dispatcher,
            shutdown,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn cpu_rule(id: &str, container: &str, threshold: f64) -> AlertRule {
    AlertRule {
        id: id.to_string(),
        host_id: "h1".to_string(),
        container_id: container.to_string(),
        kind: Some(MetricKind::Cpu),
        threshold,
        pattern: String::new(),
        enabled: true,
        email: String::new(),
        slack_webhook: String::new(),
        auto_restart: false,
        auto_stop: false,
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_value_equal_to_threshold_does_not_fire() {
    let h = Harness::new();
    h.rules.create(cpu_rule("r1", "c1", 80.0)).await.unwrap();

    h.tsdb.set_mean(MetricKind::Cpu, "h1", "c1", 80.0);
    let report = h.engine.tick().await;
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.triggered, 0);
    assert_eq!(h.events.len().await, 0);

    h.tsdb.set_mean(MetricKind::Cpu, "h1", "c1", 80.1);
    let report = h.engine.tick().await;
    assert_eq!(report.triggered, 1);

    let events = h.events.list().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].alert_id, "r1");
    assert_eq!(events[0].kind, MetricKind::Cpu);
    assert_eq!(events[0].message, "High CPU usage: 80.10%");
    assert_eq!(events[0].value, 80.1);
}

#[tokio::test]
async fn test_breach_refires_every_tick() {
    let h = Harness::new();
    h.rules.create(cpu_rule("r1", "c1", 50.0)).await.unwrap();
    h.tsdb.set_mean(MetricKind::Cpu, "h1", "c1", 75.0);

    for _ in 0..3 {
        h.engine.tick().await;
    }
    assert_eq!(h.events.len().await, 3);
}

struct FireOnce(std::sync::Mutex<bool>);

impl TriggerGate for FireOnce {
    fn should_fire(&self, _rule: &AlertRule, _now: DateTime<Utc>) -> bool {
        let mut fired = self.0.lock().unwrap();
        !std::mem::replace(&mut *fired, true)
    }
}

#[tokio::test]
async fn test_custom_gate_suppresses_repeats() {
    let h = Harness::with_gate(Arc::new(FireOnce(std::sync::Mutex::new(false))));
    h.rules.create(cpu_rule("r1", "c1", 50.0)).await.unwrap();
    h.tsdb.set_mean(MetricKind::Cpu, "h1", "c1", 75.0);

    h.engine.tick().await;
    h.engine.tick().await;
    assert_eq!(h.events.len().await, 1);
}

#[tokio::test]
async fn test_failed_query_skips_only_that_rule() {
    let h = Harness::new();
    h.rules.create(cpu_rule("broken", "bad", 10.0)).await.unwrap();
    h.rules.create(cpu_rule("healthy", "good", 10.0)).await.unwrap();
    h.tsdb.fail_container("bad");
    h.tsdb.set_mean(MetricKind::Cpu, "h1", "good", 20.0);

    let report = h.engine.tick().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.triggered, 1);

    let events = h.events.list().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].alert_id, "healthy");
}

#[tokio::test]
async fn test_no_data_in_window_skips_rule() {
    let h = Harness::new();
    h.rules.create(cpu_rule("r1", "idle", 0.0)).await.unwrap();

    let report = h.engine.tick().await;
    assert_eq!(report.skipped, 1);
    assert_eq!(h.events.len().await, 0);
}

#[tokio::test]
async fn test_disabled_rules_are_not_evaluated() {
    let h = Harness::new();
    let mut rule = cpu_rule("r1", "c1", 10.0);
    rule.enabled = false;
    h.rules.create(rule).await.unwrap();
    h.tsdb.set_mean(MetricKind::Cpu, "h1", "c1", 99.0);

    let report = h.engine.tick().await;
    assert_eq!(report.evaluated, 0);
    assert!(h.tsdb.queries().is_empty());
}

#[tokio::test]
async fn test_memory_rule_uses_local_host_and_window() {
    let h = Harness::new();
    let mut rule = cpu_rule("mem", "c1", 512.0);
    rule.kind = Some(MetricKind::Memory);
    rule.host_id = String::new();
    h.rules.create(rule).await.unwrap();
    h.tsdb.set_mean(MetricKind::Memory, "master", "c1", 600.0);

    h.engine.tick().await;

    let queries = h.tsdb.queries();
    assert_eq!(queries[0].0, MetricKind::Memory);
    assert_eq!(queries[0].1, "master");
    assert_eq!(queries[0].3, Duration::from_secs(300));

    let events = h.events.list().await;
    assert_eq!(events[0].host_id, "master");
    assert_eq!(events[0].message, "High Memory usage: 600.00 MB");
}

#[tokio::test]
async fn test_log_pattern_counts_matching_lines() {
    let h = Harness::new();
    let mut bytes = frame(1, b"GET / 200\n");
    bytes.extend(frame(2, b"panic: out of memory\n"));
    bytes.extend(frame(2, b"panic: again\n"));
    bytes.extend(frame(1, b"PANIC upper case does not match\n"));
    h.runtime.set_logs("c1", bytes);

    let mut rule = cpu_rule("logs", "c1", 0.0);
    rule.kind = Some(MetricKind::LogPattern);
    rule.pattern = "panic".to_string();
    h.rules.create(rule).await.unwrap();

    let report = h.engine.tick().await;
    assert_eq!(report.triggered, 1);

    let events = h.events.list().await;
    assert_eq!(events[0].value, 2.0);
    assert_eq!(events[0].message, "Log pattern matched: 'panic' found");
    assert_eq!(h.runtime.log_requests()[0].1.tail, Some(100));
}

#[tokio::test]
async fn test_log_pattern_on_tty_container() {
    let h = Harness::new();
    h.runtime.add_container("c1", "console", "busybox");
    h.runtime.set_tty("c1", true);
    h.runtime
        .set_logs("c1", b"boot ok\npanic: disk full\nretrying\npanic: again".to_vec());

    let mut rule = cpu_rule("logs", "c1", 0.0);
    rule.kind = Some(MetricKind::LogPattern);
    rule.pattern = "panic".to_string();
    h.rules.create(rule).await.unwrap();

    let report = h.engine.tick().await;
    assert_eq!(report.failed, 0);
    assert_eq!(report.triggered, 1);
    assert_eq!(h.events.list().await[0].value, 2.0);
}

#[tokio::test]
async fn test_log_pattern_matches_non_utf8_output() {
    let h = Harness::new();
    h.runtime
        .set_logs("c1", frame(2, b"\xff\xfe fatal: bad header\n"));

    let mut rule = cpu_rule("logs", "c1", 0.0);
    rule.kind = Some(MetricKind::LogPattern);
    rule.pattern = "fatal".to_string();
    h.rules.create(rule).await.unwrap();

    let report = h.engine.tick().await;
    assert_eq!(report.triggered, 1);
}

#[tokio::test]
async fn test_log_pattern_without_match_does_not_fire() {
    let h = Harness::new();
    h.runtime.set_logs("c1", frame(1, b"all good\n"));

    let mut rule = cpu_rule("logs", "c1", 0.0);
    rule.kind = Some(MetricKind::LogPattern);
    rule.pattern = "error".to_string();
    h.rules.create(rule).await.unwrap();

    let report = h.engine.tick().await;
    assert_eq!(report.triggered, 0);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_log_fetch_failure_is_counted() {
    let h = Harness::new();
    let mut rule = cpu_rule("logs", "missing", 0.0);
    rule.kind = Some(MetricKind::LogPattern);
    rule.pattern = "error".to_string();
    h.rules.create(rule).await.unwrap();

    let report = h.engine.tick().await;
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_trigger_dispatches_notifications_and_remediation() {
    let h = Harness::new();
    let mut rule = cpu_rule("r1", "c1", 50.0);
    rule.email = "ops@example.com".to_string();
    rule.slack_webhook = "https://hooks.example.com/T1".to_string();
    rule.auto_restart = true;
    h.rules.create(rule).await.unwrap();
    h.tsdb.set_mean(MetricKind::Cpu, "h1", "c1", 90.0);

    h.engine.tick().await;

    let notifier = h.notifier.clone();
    eventually("notifications", || notifier.sent().len() == 2).await;
    let runtime = h.runtime.clone();
    eventually("restart", || !runtime.actions().is_empty()).await;

    let sent = h.notifier.sent();
    assert!(sent.contains(&Sent::Chat {
        webhook_url: "https://hooks.example.com/T1".to_string(),
        text: "High CPU usage: 90.00%".to_string(),
    }));
    assert!(sent.iter().any(|s| matches!(
        s,
        Sent::Email { to, subject, body }
            if to == "ops@example.com"
                && subject == "[DockScope Alert] cpu"
                && body.contains("Threshold: 50.00")
    )));
    assert_eq!(h.runtime.actions(), vec![Action::Restart("c1".to_string())]);

    let dispatcher = h.dispatcher.clone();
    eventually("stats", || dispatcher.stats().success == 3).await;
}

#[tokio::test]
async fn test_notification_failure_does_not_lose_event() {
    let h = Harness::new();
    h.notifier.set_failing(true);
    let mut rule = cpu_rule("r1", "c1", 50.0);
    rule.slack_webhook = "https://hooks.example.com/T1".to_string();
    h.rules.create(rule).await.unwrap();
    h.tsdb.set_mean(MetricKind::Cpu, "h1", "c1", 90.0);

    h.engine.tick().await;

    assert_eq!(h.events.len().await, 1);
    let dispatcher = h.dispatcher.clone();
    eventually("failure recorded", || dispatcher.stats().failure == 1).await;
}

struct StalledNotifier;

#[async_trait]
impl Notifier for StalledNotifier {
    async fn send_email(&self, _to: &str, _subject: &str, _body: &str) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn send_chat(&self, _webhook_url: &str, _text: &str) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

fn chat_job(n: usize) -> DispatchJob {
    DispatchJob::Chat {
        alert_id: format!("r{}", n),
        webhook_url: "https://hooks.example.com/T1".to_string(),
        text: "x".to_string(),
    }
}

#[tokio::test]
async fn test_full_queue_drops_jobs() {
    let shutdown = CancellationToken::new();
    let (dispatcher, _worker) = Dispatcher::start(
        Arc::new(StalledNotifier),
        Arc::new(FakeRuntime::new()),
        DispatchConfig {
            capacity: 1,
            job_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        StructuredLogger::new("master"),
        shutdown.clone(),
    );

    // the worker cannot run before the next await on this single-threaded runtime
    assert!(dispatcher.submit(chat_job(1)));
    assert!(!dispatcher.submit(chat_job(2)));
    assert!(!dispatcher.submit(chat_job(3)));
    assert_eq!(dispatcher.stats().dropped, 2);
    assert_eq!(dispatcher.queued(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_slow_job_times_out() {
    let shutdown = CancellationToken::new();
    let (dispatcher, _worker) = Dispatcher::start(
        Arc::new(StalledNotifier),
        Arc::new(FakeRuntime::new()),
        DispatchConfig {
            capacity: 4,
            job_timeout: Duration::from_millis(20),
            ..Default::default()
        },
        StructuredLogger::new("master"),
        shutdown.clone(),
    );

    dispatcher.submit(chat_job(1));
    let handle = dispatcher.clone();
    eventually("timeout", || handle.stats().failure == 1).await;
    assert_eq!(dispatcher.stats().success, 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_remediation_gets_its_own_timeout() {
    let shutdown = CancellationToken::new();
    let runtime = Arc::new(FakeRuntime::new());
    runtime.set_action_delay(Duration::from_millis(60));
    let (dispatcher, _worker) = Dispatcher::start(
        Arc::new(RecordingNotifier::new()),
        runtime.clone(),
        DispatchConfig {
            capacity: 4,
            job_timeout: Duration::from_millis(20),
            remediation_timeout: Duration::from_secs(2),
        },
        StructuredLogger::new("master"),
        shutdown.clone(),
    );

    dispatcher.submit(DispatchJob::Restart {
        alert_id: "r1".to_string(),
        container_id: "c1".to_string(),
    });
    let handle = dispatcher.clone();
    eventually("restart", || handle.stats().success == 1).await;
    assert_eq!(dispatcher.stats().failure, 0);
    assert_eq!(runtime.actions(), vec![Action::Restart("c1".to_string())]);

    shutdown.cancel();
}

#[tokio::test]
async fn test_email_without_relay_is_counted_as_skipped() {
    let shutdown = CancellationToken::new();
    let (dispatcher, _worker) = Dispatcher::start(
        Arc::new(HttpNotifier::new(None, Duration::from_secs(1)).unwrap()),
        Arc::new(FakeRuntime::new()),
        DispatchConfig::default(),
        StructuredLogger::new("master"),
        shutdown.clone(),
    );

    dispatcher.submit(DispatchJob::Email {
        alert_id: "r1".to_string(),
        to: "ops@example.com".to_string(),
        subject: "[DockScope Alert] cpu".to_string(),
        body: "body".to_string(),
    });
    let handle = dispatcher.clone();
    eventually("skipped", || handle.stats().skipped == 1).await;
    assert_eq!(dispatcher.stats().success, 0);
    assert_eq!(dispatcher.stats().failure, 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_submit_after_shutdown_is_dropped() {
    let shutdown = CancellationToken::new();
    let (dispatcher, worker) = Dispatcher::start(
        Arc::new(RecordingNotifier::new()),
        Arc::new(FakeRuntime::new()),
        DispatchConfig::default(),
        StructuredLogger::new("master"),
        shutdown.clone(),
    );

    shutdown.cancel();
    worker.await.unwrap();

    assert!(!dispatcher.submit(chat_job(1)));
    assert_eq!(dispatcher.stats().dropped, 1);
}

#[tokio::test]
async fn test_engine_run_stops_on_cancel() {
    let h = Harness::new();
    h.rules.create(cpu_rule("r1", "c1", 50.0)).await.unwrap();
    h.tsdb.set_mean(MetricKind::Cpu, "h1", "c1", 75.0);

    let events = h.events.clone();
    let shutdown = CancellationToken::new();
    let engine = Arc::new(
        AlertEngine::builder()
            .rules(h.rules.clone())
            .events(h.events.clone())
            .time_series(h.tsdb.clone())
            .runtime(h.runtime.clone())
            .dispatcher(h.dispatcher.clone())
            .config(EngineConfig {
                interval: Duration::from_secs(3600),
                ..Default::default()
            })
            .build()
            .unwrap(),
    );
    let task = tokio::spawn(engine.run(shutdown.clone()));

    // the first tick fires immediately
    for _ in 0..200 {
        if events.len().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(events.len().await, 1);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("engine did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_engine_reports_its_health() {
    let h = Harness::new();
    h.rules.create(cpu_rule("r1", "c1", 50.0)).await.unwrap();
    h.tsdb.fail_container("c1");

    let registry = HealthRegistry::new();
    let shutdown = CancellationToken::new();
    let engine = Arc::new(
        AlertEngine::builder()
            .rules(h.rules.clone())
            .events(h.events.clone())
            .time_series(h.tsdb.clone())
            .runtime(h.runtime.clone())
            .dispatcher(h.dispatcher.clone())
            .health(registry.clone())
            .config(EngineConfig {
                interval: Duration::from_secs(3600),
                ..Default::default()
            })
            .build()
            .unwrap(),
    );
    let task = tokio::spawn(engine.run(shutdown.clone()));

    let mut engine_health = None;
    for _ in 0..200 {
        engine_health = registry
            .health()
            .await
            .components
            .get(components::ALERT_ENGINE)
            .cloned();
        if matches!(&engine_health, Some(c) if c.status == ComponentStatus::Degraded) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let engine_health = engine_health.expect("engine never registered");
    assert_eq!(engine_health.status, ComponentStatus::Degraded);
    assert_eq!(
        engine_health.message.as_deref(),
        Some("1 of 1 rule evaluations failed")
    );

    shutdown.cancel();
    task.await.unwrap();
    let health = registry.health().await;
    assert_eq!(health.status, ComponentStatus::Unhealthy);
    assert_eq!(
        health.components[components::ALERT_ENGINE].message.as_deref(),
        Some("Alert engine stopped")
    );
}

#[test]
fn test_builder_requires_collaborators() {
    assert!(AlertEngine::builder().build().is_err());
    assert!(AlertEngine::builder()
        .rules(Arc::new(RuleBook::in_memory()))
        .events(Arc::new(EventLog::in_memory()))
        .build()
        .is_err());
}
