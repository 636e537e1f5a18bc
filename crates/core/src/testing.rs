//! In-memory collaborators for tests
//!
//! Enabled for this crate's own tests and, through the `testing` feature, for
//! the server and agent test suites.

use crate::alerts::Notifier;
use crate::models::{ContainerSample, MetricKind};
use crate::runtime::{
    ContainerDetails, ContainerRuntime, ContainerSummary, LogOptions, LogReader, RawStats,
    RuntimeError, RuntimeResult,
};
use crate::stream::Subscriber;
use crate::tsdb::TimeSeriesStore;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, DuplexStream};

/// Build a multiplexed log frame the way the runtime writes it
pub fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&[tag, 0, 0, 0]);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Stats reading whose derived CPU percent and used memory are known
pub fn stats_reading(cpu_delta: u64, system_delta: u64, cpus: u32, used_bytes: u64) -> RawStats {
    let mut stats = RawStats::default();
    stats.precpu_stats.cpu_usage.total_usage = 1_000;
    stats.precpu_stats.system_cpu_usage = Some(10_000);
    stats.cpu_stats.cpu_usage.total_usage = 1_000 + cpu_delta;
    stats.cpu_stats.system_cpu_usage = Some(10_000 + system_delta);
    stats.cpu_stats.online_cpus = Some(cpus);
    stats.memory_stats.usage = Some(used_bytes);
    stats.memory_stats.limit = Some(used_bytes * 4);
    stats
}

/// Remediation command observed by [`FakeRuntime`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Restart(String),
    Stop(String),
}

/// Scriptable container runtime
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<Vec<ContainerSummary>>,
    details: Mutex<HashMap<String, ContainerDetails>>,
    stats: Mutex<HashMap<String, VecDeque<Option<RawStats>>>>,
    logs: Mutex<HashMap<String, Vec<u8>>>,
    follow_streams: Mutex<HashMap<String, DuplexStream>>,
    log_requests: Mutex<Vec<(String, LogOptions)>>,
    actions: Mutex<Vec<Action>>,
    action_delay: Mutex<Duration>,
    unreachable: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running container
    pub fn add_container(&self, id: &str, name: &str, image: &str) {
        self.containers.lock().unwrap().push(ContainerSummary {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            labels: BTreeMap::new(),
        });
        self.details.lock().unwrap().insert(
            id.to_string(),
            ContainerDetails {
                id: id.to_string(),
                name: name.to_string(),
                image: image.to_string(),
                restart_count: 0,
                started_at: None,
                labels: BTreeMap::new(),
                tty: false,
            },
        );
    }

    pub fn set_restart_count(&self, id: &str, restarts: u64) {
        if let Some(details) = self.details.lock().unwrap().get_mut(id) {
            details.restart_count = restarts;
        }
    }

    /// Mark a container as started with a TTY; `set_logs` bytes are then raw output
    pub fn set_tty(&self, id: &str, tty: bool) {
        if let Some(details) = self.details.lock().unwrap().get_mut(id) {
            details.tty = tty;
        }
    }

    /// Queue a stats reading; the last queued reading repeats forever
    pub fn push_stats(&self, id: &str, stats: RawStats) {
        self.stats
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(Some(stats));
    }

    /// Queue a failing stats fetch
    pub fn push_stats_failure(&self, id: &str) {
        self.stats
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(None);
    }

    /// Raw multiplexed bytes returned by bounded log fetches
    pub fn set_logs(&self, id: &str, bytes: Vec<u8>) {
        self.logs.lock().unwrap().insert(id.to_string(), bytes);
    }

    /// Attach a live follow stream; the returned half writes into it
    pub fn attach_follow(&self, id: &str) -> DuplexStream {
        let (writer, reader) = duplex(64 * 1024);
        self.follow_streams
            .lock()
            .unwrap()
            .insert(id.to_string(), reader);
        writer
    }

    /// Time restart and stop take to complete
    pub fn set_action_delay(&self, delay: Duration) {
        *self.action_delay.lock().unwrap() = delay;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn log_requests(&self) -> Vec<(String, LogOptions)> {
        self.log_requests.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    fn check_reachable(&self) -> RuntimeResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RuntimeError::Status {
                status: 503,
                message: "runtime unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.check_reachable()
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        self.check_reachable()?;
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerDetails> {
        self.check_reachable()?;
        self.details
            .lock()
            .unwrap()
            .get(container_id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))
    }

    async fn stats(&self, container_id: &str) -> RuntimeResult<RawStats> {
        self.check_reachable()?;
        let mut all = self.stats.lock().unwrap();
        let queue = all
            .get_mut(container_id)
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))?;
        let next = if queue.len() > 1 {
            queue.pop_front().flatten()
        } else {
            queue.front().cloned().flatten()
        };
        next.ok_or_else(|| RuntimeError::Decode("scripted stats failure".to_string()))
    }

    async fn logs(&self, container_id: &str, options: LogOptions) -> RuntimeResult<LogReader> {
        self.check_reachable()?;
        self.log_requests
            .lock()
            .unwrap()
            .push((container_id.to_string(), options));

        if options.follow {
            if let Some(stream) = self.follow_streams.lock().unwrap().remove(container_id) {
                return Ok(Box::pin(stream));
            }
        }

        let bytes = self
            .logs
            .lock()
            .unwrap()
            .get(container_id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))?;
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }

    async fn restart(&self, container_id: &str) -> RuntimeResult<()> {
        self.check_reachable()?;
        let delay = *self.action_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.actions
            .lock()
            .unwrap()
            .push(Action::Restart(container_id.to_string()));
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> RuntimeResult<()> {
        self.check_reachable()?;
        let delay = *self.action_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.actions
            .lock()
            .unwrap()
            .push(Action::Stop(container_id.to_string()));
        Ok(())
    }
}

type SeriesKey = (MetricKind, String, String);

/// Time-series store with scripted means
#[derive(Default)]
pub struct FakeTimeSeries {
    means: Mutex<HashMap<SeriesKey, f64>>,
    failing: Mutex<HashSet<String>>,
    written: Mutex<Vec<ContainerSample>>,
    queries: Mutex<Vec<(SeriesKey, Duration)>>,
}

impl FakeTimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mean(&self, kind: MetricKind, host_id: &str, container_id: &str, value: f64) {
        self.means.lock().unwrap().insert(
            (kind, host_id.to_string(), container_id.to_string()),
            value,
        );
    }

    /// Make every mean query for this container fail
    pub fn fail_container(&self, container_id: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert(container_id.to_string());
    }

    pub fn written(&self) -> Vec<ContainerSample> {
        self.written.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<(MetricKind, String, String, Duration)> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .map(|((kind, host, container), window)| {
                (*kind, host.clone(), container.clone(), *window)
            })
            .collect()
    }
}

#[async_trait]
impl TimeSeriesStore for FakeTimeSeries {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn write_samples(&self, samples: &[ContainerSample]) -> Result<()> {
        self.written.lock().unwrap().extend_from_slice(samples);
        Ok(())
    }

    async fn mean(
        &self,
        kind: MetricKind,
        host_id: &str,
        container_id: &str,
        window: Duration,
    ) -> Result<Option<f64>> {
        let key = (kind, host_id.to_string(), container_id.to_string());
        self.queries.lock().unwrap().push((key.clone(), window));

        if self.failing.lock().unwrap().contains(container_id) {
            bail!("scripted query failure for {}", container_id);
        }
        Ok(self.means.lock().unwrap().get(&key).copied())
    }
}

/// Message captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Email { to: String, subject: String, body: String },
    Chat { webhook_url: String, text: String },
}

/// Notifier that records instead of delivering
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("scripted email failure");
        }
        self.sent.lock().unwrap().push(Sent::Email {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn send_chat(&self, webhook_url: &str, text: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("scripted chat failure");
        }
        self.sent.lock().unwrap().push(Sent::Chat {
            webhook_url: webhook_url.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Subscriber collecting pushed messages; clones share the same buffer
#[derive(Clone, Default)]
pub struct VecSubscriber {
    messages: Arc<Mutex<Vec<String>>>,
    accept: Option<usize>,
}

impl VecSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscriber that goes away after accepting `count` messages
    pub fn closing_after(count: usize) -> Self {
        Self {
            messages: Arc::default(),
            accept: Some(count),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Subscriber for VecSubscriber {
    async fn send_text(&mut self, text: String) -> Result<()> {
        let mut messages = self.messages.lock().unwrap();
        if self.accept.is_some_and(|limit| messages.len() >= limit) {
            return Err(anyhow!("subscriber closed"));
        }
        messages.push(text);
        Ok(())
    }
}
