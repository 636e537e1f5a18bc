//! Bounded background dispatch of notifications and remediation
//!
//! Jobs are queued on a bounded channel and executed by one worker task,
//! each under a timeout. A full queue drops the job instead of growing, a
//! channel without a transport is counted as skipped, and every outcome is
//! logged and counted.

use super::{Notifier, TransportUnavailable};
use crate::observability::{DispatchOutcome, ScopeMetrics, StructuredLogger};
use crate::runtime::ContainerRuntime;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Jobs that may wait for the worker (default: 256)
    pub capacity: usize,
    /// Upper bound on one notification (default: 5 seconds)
    pub job_timeout: Duration,
    /// Upper bound on one restart or stop; must cover the runtime's stop
    /// grace period (default: 15 seconds)
    pub remediation_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            job_timeout: Duration::from_secs(5),
            remediation_timeout: Duration::from_secs(15),
        }
    }
}

/// Side effect requested by a triggered alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchJob {
    Email {
        alert_id: String,
        to: String,
        subject: String,
        body: String,
    },
    Chat {
        alert_id: String,
        webhook_url: String,
        text: String,
    },
    Restart {
        alert_id: String,
        container_id: String,
    },
    Stop {
        alert_id: String,
        container_id: String,
    },
}

impl DispatchJob {
    pub fn alert_id(&self) -> &str {
        match self {
            DispatchJob::Email { alert_id, .. }
            | DispatchJob::Chat { alert_id, .. }
            | DispatchJob::Restart { alert_id, .. }
            | DispatchJob::Stop { alert_id, .. } => alert_id,
        }
    }

    pub fn is_remediation(&self) -> bool {
        matches!(self, DispatchJob::Restart { .. } | DispatchJob::Stop { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DispatchJob::Email { .. } => "email",
            DispatchJob::Chat { .. } => "chat",
            DispatchJob::Restart { .. } => "restart",
            DispatchJob::Stop { .. } => "stop",
        }
    }
}

/// Outcome counts of one dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub success: u64,
    pub failure: u64,
    pub skipped: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    success: AtomicU64,
    failure: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: DispatchOutcome, metrics: &ScopeMetrics) {
        let counter = match outcome {
            DispatchOutcome::Success => &self.success,
            DispatchOutcome::Failure => &self.failure,
            DispatchOutcome::Skipped => &self.skipped,
            DispatchOutcome::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics.record_dispatch(outcome);
    }
}

/// Handle for submitting jobs to the dispatch worker
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<DispatchJob>,
    counters: Arc<Counters>,
    metrics: ScopeMetrics,
}

impl Dispatcher {
    /// Spawn the worker and return a submission handle
    pub fn start(
        notifier: Arc<dyn Notifier>,
        runtime: Arc<dyn ContainerRuntime>,
        config: DispatchConfig,
        logger: StructuredLogger,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let counters = Arc::new(Counters::default());
        let metrics = ScopeMetrics::new();

        let worker = Worker {
            notifier,
            runtime,
            job_timeout: config.job_timeout,
            remediation_timeout: config.remediation_timeout,
            logger,
            counters: Arc::clone(&counters),
            metrics: metrics.clone(),
        };
        let handle = tokio::spawn(worker.run(rx, shutdown));

        (
            Self {
                tx,
                counters,
                metrics,
            },
            handle,
        )
    }

    /// Queue a job; returns `false` when it was dropped
    pub fn submit(&self, job: DispatchJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(
                    alert_id = %job.alert_id(),
                    job = job.kind(),
                    "Dispatch queue full, dropping job"
                );
                self.counters.record(DispatchOutcome::Dropped, &self.metrics);
                false
            }
            Err(TrySendError::Closed(job)) => {
                warn!(
                    alert_id = %job.alert_id(),
                    job = job.kind(),
                    "Dispatch worker stopped, dropping job"
                );
                self.counters.record(DispatchOutcome::Dropped, &self.metrics);
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            success: self.counters.success.load(Ordering::Relaxed),
            failure: self.counters.failure.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Jobs waiting for the worker
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

struct Worker {
    notifier: Arc<dyn Notifier>,
    runtime: Arc<dyn ContainerRuntime>,
    job_timeout: Duration,
    remediation_timeout: Duration,
    logger: StructuredLogger,
    counters: Arc<Counters>,
    metrics: ScopeMetrics,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<DispatchJob>, shutdown: CancellationToken) {
        info!("Starting dispatch worker");
        loop {
            tokio::select! {
                job = rx.recv() => match job {
                    Some(job) => self.handle(job).await,
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    info!("Shutting down dispatch worker");
                    break;
                }
            }
        }
    }

    async fn handle(&self, job: DispatchJob) {
        let limit = if job.is_remediation() {
            self.remediation_timeout
        } else {
            self.job_timeout
        };
        let result = match tokio::time::timeout(limit, self.execute(&job)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("timed out after {:?}", limit)),
        };

        match &job {
            DispatchJob::Restart { alert_id, container_id } => {
                self.logger
                    .log_remediation(alert_id, container_id, "restart", result.is_ok());
            }
            DispatchJob::Stop { alert_id, container_id } => {
                self.logger
                    .log_remediation(alert_id, container_id, "stop", result.is_ok());
            }
            _ => {}
        }

        match result {
            Ok(()) => {
                debug!(alert_id = %job.alert_id(), job = job.kind(), "Dispatch job succeeded");
                self.counters.record(DispatchOutcome::Success, &self.metrics);
            }
            Err(e) if e.downcast_ref::<TransportUnavailable>().is_some() => {
                warn!(
                    alert_id = %job.alert_id(),
                    job = job.kind(),
                    reason = %e,
                    "Dispatch job skipped"
                );
                self.counters.record(DispatchOutcome::Skipped, &self.metrics);
            }
            Err(e) => {
                warn!(
                    alert_id = %job.alert_id(),
                    job = job.kind(),
                    error = %e,
                    "Dispatch job failed"
                );
                self.counters.record(DispatchOutcome::Failure, &self.metrics);
            }
        }
    }

    async fn execute(&self, job: &DispatchJob) -> Result<()> {
        match job {
            DispatchJob::Email {
                to, subject, body, ..
            } => self.notifier.send_email(to, subject, body).await,
            DispatchJob::Chat {
                webhook_url, text, ..
            } => self.notifier.send_chat(webhook_url, text).await,
            DispatchJob::Restart { container_id, .. } => {
                Ok(self.runtime.restart(container_id).await?)
            }
            DispatchJob::Stop { container_id, .. } => Ok(self.runtime.stop(container_id).await?),
        }
    }
}
