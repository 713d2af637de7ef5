//! Audit trail for authorization decisions
//!
//! Every decision the gateway makes is recorded without slowing it down:
//! - Bounded channel between `record` and the sink; a full queue drops the
//!   record and counts it instead of blocking
//! - Background thread batches records and appends them to an [`AuditSink`]
//! - Sink failures are logged and counted, never propagated to the decision
//! - `shutdown` drains everything already queued

mod sink;

pub use sink::{AuditSink, JsonLinesSink, MemorySink};

use crate::error::{GateError, Result};
use crate::iam::{Decision, DecisionResult, Request, SubjectId};
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One audited decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub principal: String,
    pub action: String,
    pub resource: String,
    pub result: DecisionResult,
    /// Decisive statement, absent for implicit deny
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_subject: Option<SubjectId>,
    /// `subject#statement` for every policy that produced a verdict
    #[serde(default)]
    pub contributing: Vec<String>,
    /// Store generation the decision was computed against
    #[serde(default)]
    pub policy_generation: u64,
}

impl AuditRecord {
    pub fn new(request: &Request, decision: &Decision, timestamp: DateTime<Utc>) -> Self {
        AuditRecord {
            timestamp,
            principal: request.principal.clone(),
            action: request.action.clone(),
            resource: request.resource.clone(),
            result: decision.result,
            statement_id: decision.statement_id.clone(),
            policy_subject: decision.policy_subject.clone(),
            contributing: decision.contributing(),
            policy_generation: decision.generation,
        }
    }
}

/// Audit pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Records held between `record` and the sink before new ones are dropped
    pub queue_capacity: usize,
    /// Maximum records handed to the sink at once
    pub batch_size: usize,
    /// Longest time a queued record waits for its batch
    pub flush_interval_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            queue_capacity: 4096,
            batch_size: 256,
            flush_interval_ms: 100,
        }
    }
}

impl AuditConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(GateError::Config(
                "audit.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(GateError::Config(
                "audit.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(GateError::Config(
                "audit.flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counters since the emitter started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditStats {
    /// Accepted into the queue
    pub enqueued: u64,
    /// Rejected because the queue was full or closed
    pub dropped: u64,
    /// Appended by the sink
    pub flushed: u64,
    /// Lost to sink failures
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
    failed: AtomicU64,
}

/// Asynchronous audit emitter with a background flush thread
pub struct AuditEmitter {
    sender: Option<Sender<AuditRecord>>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl AuditEmitter {
    /// Start the background flush thread
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid settings and `Io` if the thread cannot be
    /// spawned.
    pub fn start<S: AuditSink>(config: &AuditConfig, sink: S) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = channel::bounded(config.queue_capacity);
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);
        let batch_size = config.batch_size;
        let flush_interval = config.flush_interval();

        let worker = thread::Builder::new()
            .name("tenant-gate-audit".to_string())
            .spawn(move || {
                flush_loop(receiver, sink, batch_size, flush_interval, &worker_counters)
            })?;

        Ok(AuditEmitter {
            sender: Some(sender),
            worker: Some(worker),
            counters,
        })
    }

    /// Queue a decision for the sink (non-blocking)
    pub fn record(&self, request: &Request, decision: &Decision, timestamp: DateTime<Utc>) {
        let Some(sender) = &self.sender else {
            self.count_drop();
            return;
        };

        match sender.try_send(AuditRecord::new(request, decision, timestamp)) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.count_drop();
            }
        }
    }

    fn count_drop(&self) {
        let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % 1024 == 0 {
            warn!(dropped, "Audit queue full; dropping records");
        }
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Close the queue, wait for queued records to reach the sink
    pub fn shutdown(&mut self) {
        // Dropping the sender lets the worker drain and exit
        self.sender.take();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Audit flush thread panicked");
            }
        }
    }
}

impl Drop for AuditEmitter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn flush_loop<S: AuditSink>(
    receiver: Receiver<AuditRecord>,
    mut sink: S,
    batch_size: usize,
    flush_interval: Duration,
    counters: &Counters,
) {
    let mut batch = Vec::with_capacity(batch_size);

    loop {
        let deadline = Instant::now() + flush_interval;
        let disconnected = loop {
            match receiver.recv_deadline(deadline) {
                Ok(record) => {
                    batch.push(record);
                    if batch.len() >= batch_size {
                        break false;
                    }
                }
                Err(RecvTimeoutError::Timeout) => break false,
                Err(RecvTimeoutError::Disconnected) => break true,
            }
        };

        if !batch.is_empty() {
            deliver(&mut sink, &mut batch, counters);
        }
        if disconnected {
            break;
        }
    }

    if let Err(e) = sink.flush() {
        warn!(error = %e, "Audit sink flush failed");
    }
    debug!("Audit flush thread stopped");
}

fn deliver<S: AuditSink>(sink: &mut S, batch: &mut Vec<AuditRecord>, counters: &Counters) {
    let count = batch.len() as u64;
    match sink.append(batch) {
        Ok(()) => {
            counters.flushed.fetch_add(count, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(count, Ordering::Relaxed);
            let error = match e {
                GateError::AuditSinkUnavailable(_) => e,
                other => GateError::AuditSinkUnavailable(other.to_string()),
            };
            warn!(error = %error, records = count, "Dropping audit batch");
        }
    }
    batch.clear();
}
