//! Generic retryable transaction loop
//!
//! Drives an abstract [`Endpoint`] through
//! `Prepare → Process → Commit | Abort | Rollback` with per-message attempt
//! counters persisted in an [`AttemptStore`]. The loop classifies failures
//! only by [`Severity`]: fatal errors abort the message immediately,
//! transient errors roll back and retry until the fixed ceiling of
//! [`MAX_DELIVERY_ATTEMPTS`]. The ceiling is a deliberate
//! simplicity/predictability tradeoff: uniform, no exponential backoff.
//!
//! Failure policy per phase:
//! - `Prepare`/`Process` failures propagate into retry/abort classification;
//! - `Commit` failures are logged and never escalate; the transaction is
//!   already materially complete and committing is a best-effort side
//!   channel (e.g. acking a transport);
//! - `Abort`/`Rollback` failures are logged and suppressed so the loop
//!   always returns control to the caller.

use crate::{Error, Result, Severity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Fixed delivery ceiling, applied uniformly to every message
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Consecutive failures tolerated per batch item before moving on
pub const BATCH_BACKOUT_LIMIT: u32 = 3;

/// Opaque identifier assigned by a successful `Prepare`, used to key
/// persisted attempt state
pub type TransactionKey = String;

/// Identifier stable across all retry attempts of one logical message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh unique id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The contract the transaction loop drives
///
/// Concrete endpoints (file/queue/db/REST) implement this using the
/// mediator layer for their message transforms.
pub trait Endpoint {
    /// Acquire the next unit of work, returning its transaction key
    fn prepare(&mut self) -> Result<TransactionKey>;

    /// Apply the business logic (mediator transform, hand-off to storage or
    /// transport)
    fn process(&mut self, correlation: &CorrelationId) -> Result<()>;

    /// Acknowledge completion; best-effort
    fn commit(&mut self) -> Result<()>;

    /// Discard the current message terminally
    fn abort(&mut self) -> Result<()>;

    /// Undo the current attempt so the message can be retried
    fn rollback(&mut self) -> Result<()>;

    /// Whether more messages are immediately available (batch mode)
    fn more_messages(&mut self) -> bool {
        false
    }
}

/// Persisted per-message attempt state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub key: TransactionKey,
    pub attempts: u32,
    pub correlation: CorrelationId,
}

/// Persistence facility for attempt records
pub trait AttemptStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<AttemptRecord>>;
    fn save(&self, record: &AttemptRecord) -> Result<()>;
    fn release(&self, key: &str) -> Result<()>;
}

/// In-process attempt store for single-process connectors and tests
#[derive(Default)]
pub struct InMemoryAttemptStore {
    records: Mutex<HashMap<String, AttemptRecord>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttemptStore for InMemoryAttemptStore {
    fn load(&self, key: &str) -> Result<Option<AttemptRecord>> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn save(&self, record: &AttemptRecord) -> Result<()> {
        self.records
            .lock()
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn release(&self, key: &str) -> Result<()> {
        self.records.lock().remove(key);
        Ok(())
    }
}

/// JSON-file-backed attempt store surviving connector restarts
pub struct FileAttemptStore {
    path: PathBuf,
    records: Mutex<HashMap<String, AttemptRecord>>,
}

impl FileAttemptStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .map_err(|e| Error::Persistence(format!("cannot read {}: {}", path.display(), e)))?;
            if data.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&data).map_err(|e| {
                    Error::Persistence(format!("corrupt attempt store {}: {}", path.display(), e))
                })?
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn flush(&self, records: &HashMap<String, AttemptRecord>) -> Result<()> {
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| Error::Persistence(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::Persistence(format!("cannot write {}: {}", self.path.display(), e)))
    }
}

impl AttemptStore for FileAttemptStore {
    fn load(&self, key: &str) -> Result<Option<AttemptRecord>> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn save(&self, record: &AttemptRecord) -> Result<()> {
        let mut records = self.records.lock();
        records.insert(record.key.clone(), record.clone());
        self.flush(&records)
    }

    fn release(&self, key: &str) -> Result<()> {
        let mut records = self.records.lock();
        if records.remove(key).is_some() {
            self.flush(&records)?;
        }
        Ok(())
    }
}

/// Loop states, exposed for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Preparing,
    Prepared,
    Processing,
    Committing,
    Aborting,
    RollingBack,
}

/// Result of one loop invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processed and committed
    Completed,
    /// Rolled back; the caller re-invokes the loop to retry
    NotCompleted,
    /// Aborted terminally
    Rejected,
}

/// Lifecycle events fired by the loop
#[derive(Debug, Clone)]
pub enum DeliveryEvent {
    /// First attempt of a message started
    Begin {
        key: TransactionKey,
        correlation: CorrelationId,
    },
    /// Message processed and committed
    Committed {
        key: TransactionKey,
        correlation: CorrelationId,
    },
    /// Attempt rolled back; the message will be retried
    Retrying {
        key: TransactionKey,
        correlation: CorrelationId,
        remaining: u32,
    },
    /// Message rejected terminally
    Aborted {
        key: Option<TransactionKey>,
        correlation: CorrelationId,
    },
}

/// Receiver for lifecycle events
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &DeliveryEvent);
}

/// Default sink routing events to tracing
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_event(&self, event: &DeliveryEvent) {
        match event {
            DeliveryEvent::Begin { key, correlation } => {
                info!(key = %key, correlation = %correlation, "delivery started");
            }
            DeliveryEvent::Committed { key, correlation } => {
                info!(key = %key, correlation = %correlation, "delivery committed");
            }
            DeliveryEvent::Retrying {
                key,
                correlation,
                remaining,
            } => {
                warn!(
                    key = %key,
                    correlation = %correlation,
                    "delivery rolled back, will retry {} more times",
                    remaining
                );
            }
            DeliveryEvent::Aborted { key, correlation } => {
                error!(
                    key = key.as_deref().unwrap_or("-"),
                    correlation = %correlation,
                    "delivery rejected"
                );
            }
        }
    }
}

/// Totals for one batch invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: u64,
    pub rejected: u64,
    pub backed_out: u64,
    pub retries: u64,
}

/// The retryable transaction loop
pub struct TransactionLoop {
    store: Option<Box<dyn AttemptStore>>,
    events: Box<dyn EventSink>,
    max_attempts: u32,
    state: TransactionState,
    failure_correlation: Option<CorrelationId>,
    consecutive_prepare_failures: u32,
    last_correlation: Option<CorrelationId>,
    fatal_seen: bool,
    running: Arc<AtomicBool>,
}

impl TransactionLoop {
    /// Loop without attempt persistence: failures are never retried
    pub fn new() -> Self {
        Self {
            store: None,
            events: Box::new(TracingEventSink),
            max_attempts: MAX_DELIVERY_ATTEMPTS,
            state: TransactionState::Idle,
            failure_correlation: None,
            consecutive_prepare_failures: 0,
            last_correlation: None,
            fatal_seen: false,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Attach an attempt store enabling bounded retries
    pub fn with_store(mut self, store: Box<dyn AttemptStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the lifecycle event sink
    pub fn with_event_sink(mut self, events: Box<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Cooperative cancellation flag, checked between iterations only; an
    /// in-flight `Process` call is never pre-empted
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Current loop state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether a fatal error was observed since the last batch started
    pub fn fatal_seen(&self) -> bool {
        self.fatal_seen
    }

    /// Correlation id used by the most recent invocation
    pub fn last_correlation(&self) -> Option<&CorrelationId> {
        self.last_correlation.as_ref()
    }

    /// Run one Prepare→Process→Commit/Abort/Rollback iteration
    pub fn run_single<E: Endpoint>(&mut self, endpoint: &mut E) -> Outcome {
        self.state = TransactionState::Preparing;
        let key = match endpoint.prepare() {
            Ok(key) => key,
            Err(error) => return self.prepare_failed(endpoint, error),
        };
        self.state = TransactionState::Prepared;
        self.consecutive_prepare_failures = 0;
        // A successful prepare never reuses a failure-generated id; the id
        // either comes back from persistence or is assigned fresh below.
        self.failure_correlation = None;

        let store = match &self.store {
            Some(store) => store,
            None => return self.run_unpersisted(endpoint, key),
        };

        let loaded = match store.load(&key) {
            Ok(loaded) => loaded,
            Err(error) => {
                error!(key = %key, error = %error, "attempt store load failed");
                let correlation = CorrelationId::generate();
                return self.abort(endpoint, Some(&key), correlation);
            }
        };
        let mut record = loaded.unwrap_or_else(|| AttemptRecord {
            key: key.clone(),
            attempts: 0,
            correlation: CorrelationId::generate(),
        });

        // A counter already at the ceiling means the retries are spent:
        // abort without incrementing, so the persisted counter tops out at
        // exactly the ceiling.
        if record.attempts >= self.max_attempts {
            warn!(
                key = %key,
                correlation = %record.correlation,
                attempts = record.attempts,
                "delivery attempts exhausted"
            );
            let correlation = record.correlation.clone();
            return self.abort(endpoint, Some(&key), correlation);
        }

        record.attempts += 1;
        if let Err(error) = store.save(&record) {
            error!(key = %key, error = %error, "attempt store save failed");
            let correlation = record.correlation.clone();
            return self.abort(endpoint, Some(&key), correlation);
        }
        let correlation = record.correlation.clone();
        self.last_correlation = Some(correlation.clone());
        if record.attempts == 1 {
            self.events.on_event(&DeliveryEvent::Begin {
                key: key.clone(),
                correlation: correlation.clone(),
            });
        }

        self.state = TransactionState::Processing;
        match endpoint.process(&correlation) {
            Ok(()) => self.complete(endpoint, key, correlation, true),
            Err(error) => {
                error!(
                    key = %key,
                    correlation = %correlation,
                    error = %error,
                    "processing failed"
                );
                if error.severity() == Severity::Fatal {
                    self.fatal_seen = true;
                    return self.abort(endpoint, Some(&key), correlation);
                }
                self.state = TransactionState::RollingBack;
                if let Err(rollback_error) = endpoint.rollback() {
                    warn!(
                        key = %key,
                        correlation = %correlation,
                        error = %rollback_error,
                        "rollback handler failed"
                    );
                }
                let remaining = self.max_attempts.saturating_sub(record.attempts);
                self.events.on_event(&DeliveryEvent::Retrying {
                    key,
                    correlation,
                    remaining,
                });
                self.state = TransactionState::Idle;
                Outcome::NotCompleted
            }
        }
    }

    /// Repeat single-message iterations while the endpoint has more work
    /// and no fatal error occurred, backing out of an item after
    /// [`BATCH_BACKOUT_LIMIT`] consecutive failures
    pub fn run_batch<E: Endpoint>(&mut self, endpoint: &mut E) -> BatchSummary {
        let mut summary = BatchSummary::default();
        self.fatal_seen = false;
        loop {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            let mut consecutive_failures = 0u32;
            let outcome = loop {
                match self.run_single(endpoint) {
                    Outcome::NotCompleted => {
                        consecutive_failures += 1;
                        summary.retries += 1;
                        if consecutive_failures >= BATCH_BACKOUT_LIMIT {
                            break Outcome::NotCompleted;
                        }
                    }
                    outcome => break outcome,
                }
            };
            match outcome {
                Outcome::Completed => summary.completed += 1,
                Outcome::Rejected => summary.rejected += 1,
                Outcome::NotCompleted => summary.backed_out += 1,
            }
            if self.fatal_seen || !endpoint.more_messages() {
                break;
            }
        }
        summary
    }

    fn run_unpersisted<E: Endpoint>(&mut self, endpoint: &mut E, key: TransactionKey) -> Outcome {
        // Without a persistence facility nothing can bound retries, so any
        // failure goes straight to Aborting.
        let correlation = CorrelationId::generate();
        self.last_correlation = Some(correlation.clone());
        self.events.on_event(&DeliveryEvent::Begin {
            key: key.clone(),
            correlation: correlation.clone(),
        });
        self.state = TransactionState::Processing;
        match endpoint.process(&correlation) {
            Ok(()) => self.complete(endpoint, key, correlation, false),
            Err(error) => {
                error!(
                    key = %key,
                    correlation = %correlation,
                    error = %error,
                    "processing failed without attempt persistence"
                );
                if error.severity() == Severity::Fatal {
                    self.fatal_seen = true;
                }
                self.abort(endpoint, Some(&key), correlation)
            }
        }
    }

    fn complete<E: Endpoint>(
        &mut self,
        endpoint: &mut E,
        key: TransactionKey,
        correlation: CorrelationId,
        release: bool,
    ) -> Outcome {
        self.state = TransactionState::Committing;
        if release {
            if let Some(store) = &self.store {
                if let Err(error) = store.release(&key) {
                    warn!(key = %key, error = %error, "attempt record release failed");
                }
            }
        }
        if let Err(error) = endpoint.commit() {
            // The transaction is materially complete; committing is a
            // best-effort side channel and never triggers abort/rollback.
            warn!(
                key = %key,
                correlation = %correlation,
                error = %error,
                "commit failed after successful processing"
            );
        }
        self.events.on_event(&DeliveryEvent::Committed { key, correlation });
        self.state = TransactionState::Idle;
        Outcome::Completed
    }

    fn prepare_failed<E: Endpoint>(&mut self, endpoint: &mut E, error: Error) -> Outcome {
        // The first failure since the last success generates the id all
        // subsequent retries of this failing input share.
        if self.failure_correlation.is_none() {
            self.failure_correlation = Some(CorrelationId::generate());
        }
        let correlation = self
            .failure_correlation
            .clone()
            .unwrap_or_else(CorrelationId::generate);
        self.last_correlation = Some(correlation.clone());
        error!(correlation = %correlation, error = %error, "prepare failed");

        if error.severity() == Severity::Fatal {
            self.fatal_seen = true;
            self.consecutive_prepare_failures = 0;
            return self.abort(endpoint, None, correlation);
        }
        if self.store.is_none() {
            return self.abort(endpoint, None, correlation);
        }
        self.consecutive_prepare_failures += 1;
        if self.consecutive_prepare_failures >= self.max_attempts {
            self.consecutive_prepare_failures = 0;
            return self.abort(endpoint, None, correlation);
        }
        self.state = TransactionState::Idle;
        Outcome::NotCompleted
    }

    fn abort<E: Endpoint>(
        &mut self,
        endpoint: &mut E,
        key: Option<&str>,
        correlation: CorrelationId,
    ) -> Outcome {
        self.state = TransactionState::Aborting;
        if let (Some(store), Some(key)) = (&self.store, key) {
            if let Err(error) = store.release(key) {
                warn!(key = %key, error = %error, "attempt record release failed");
            }
        }
        if let Err(error) = endpoint.abort() {
            warn!(correlation = %correlation, error = %error, "abort handler failed");
        }
        self.events.on_event(&DeliveryEvent::Aborted {
            key: key.map(str::to_string),
            correlation,
        });
        self.state = TransactionState::Idle;
        Outcome::Rejected
    }
}

impl Default for TransactionLoop {
    fn default() -> Self {
        Self::new()
    }
}
