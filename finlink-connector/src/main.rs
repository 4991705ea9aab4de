// SPDX-License-Identifier: MIT
//
// FinLink: Financial Message Gateway
//
// https://github.com/finlink/finlink

//! FinLink Connector - Single-Connector Host Process
//!
//! Exchanges signed financial messages with a counterparty gateway over the
//! REST transport. A watcher thread polls for inbound messages and feeds
//! the bounded notification pool; a worker thread drains the pool and
//! drives the transaction loop, delivering verified payloads to the
//! delivery directory and acknowledging them on commit. An optional
//! publisher thread scans the outbox directory, frames and signs each file
//! and posts it outbound.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    poll     ┌──────────────┐   notification   ┌──────────────┐
//! │ Counterparty │ ───────────>│   Watcher    │ ────────────────>│    Worker    │
//! │   Gateway    │   (HTTPS)   │   (thread)   │   (bounded pool) │ (txn loop)   │
//! └──────────────┘             └──────────────┘                  └──────┬───────┘
//!        ^                                                              │ deliver
//!        │ publish                 ┌──────────────┐                     v
//!        └─────────────────────── │  Publisher   │<─ outbox/      delivery dir
//!                      (HTTPS)     └──────────────┘
//! ```
//!
//! # Features
//!
//! - Per-format framing and signature mediation (FIN/PCC/strict/MX/IP)
//! - At-least-once delivery with persisted attempt counters
//! - Sleep-based failure throttling and forced transport reconnects
//! - Graceful shutdown draining the notification pool

use anyhow::{Context, Result};
use clap::Parser;
use finlink_core::{
    config::ConnectorConfig,
    keys::KeyHandle,
    mediator::Mediator,
    metrics::GatewayMetrics,
    pool::NotificationPool,
    protocol::{Notification, TransportHeaders, HDR_PAYLOAD_DIGEST, HDR_SERVICE_ID},
    rest::{RestClient, RestClientConfig},
    retry::{BackoffThrottle, ReconnectPolicy},
    transaction::{
        AttemptStore, CorrelationId, Endpoint, FileAttemptStore, InMemoryAttemptStore, Outcome,
        TransactionKey, TransactionLoop,
    },
    Error,
};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "finlink-connector")]
#[command(about = "FinLink connector - exchanges signed financial messages over REST", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Inbound endpoint: one pooled notification at a time through
/// fetch-preparation into the delivery directory
struct InboundEndpoint {
    mediator: Mediator,
    keys: KeyHandle,
    client: RestClient,
    pool: NotificationPool,
    delivery_dir: PathBuf,
    rejected_dir: PathBuf,
    metrics: GatewayMetrics,
    current: Option<Notification>,
}

impl InboundEndpoint {
    fn begin(&mut self, notification: Notification) {
        self.current = Some(notification);
    }

    fn delivery_path(&self, key: &str) -> PathBuf {
        self.delivery_dir.join(format!("{}.msg", sanitize(key)))
    }
}

impl Endpoint for InboundEndpoint {
    fn prepare(&mut self) -> finlink_core::Result<TransactionKey> {
        match &self.current {
            Some(notification) => Ok(notification.key.clone()),
            None => Err(Error::Internal("no notification staged".to_string())),
        }
    }

    fn process(&mut self, correlation: &CorrelationId) -> finlink_core::Result<()> {
        let notification = self
            .current
            .as_ref()
            .ok_or_else(|| Error::Internal("no notification staged".to_string()))?;
        let started = Instant::now();
        let digest_hint = notification.headers.get(HDR_PAYLOAD_DIGEST);
        let payload = self
            .mediator
            .fetch_preparation(notification.buffer.as_slice(), &self.keys, digest_hint)
            .inspect_err(|e| {
                if e.is_auth_error() {
                    self.metrics.record_auth_failure();
                }
            })?;
        let path = self.delivery_path(&notification.key);
        std::fs::write(&path, payload.as_slice())?;
        self.metrics.record_fetch(
            notification.buffer.len(),
            started.elapsed().as_micros() as u64,
        );
        info!(
            correlation = %correlation,
            key = %notification.key,
            path = %path.display(),
            "delivered inbound payload"
        );
        Ok(())
    }

    fn commit(&mut self) -> finlink_core::Result<()> {
        if let Some(notification) = self.current.take() {
            self.client.acknowledge(&notification.key)?;
            self.metrics.record_commit();
        }
        Ok(())
    }

    fn abort(&mut self) -> finlink_core::Result<()> {
        self.metrics.record_abort();
        if let Some(notification) = self.current.take() {
            let path = self
                .rejected_dir
                .join(format!("{}.rejected", sanitize(&notification.key)));
            std::fs::write(&path, notification.buffer.as_slice())?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> finlink_core::Result<()> {
        self.metrics.record_retry();
        // The notification stays staged for the retry; only the partial
        // delivery is undone.
        if let Some(notification) = &self.current {
            let path = self.delivery_path(&notification.key);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn more_messages(&mut self) -> bool {
        !self.pool.is_empty()
    }
}

/// Outbound endpoint: outbox files through publish-preparation to the
/// counterparty gateway
struct OutboundEndpoint {
    mediator: Mediator,
    keys: KeyHandle,
    client: RestClient,
    service_id: String,
    outbox_dir: PathBuf,
    sent_dir: PathBuf,
    failed_dir: PathBuf,
    metrics: GatewayMetrics,
    current: Option<PathBuf>,
}

impl OutboundEndpoint {
    fn next_outbox_file(&self) -> finlink_core::Result<Option<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.outbox_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        Ok(files.into_iter().next())
    }

    fn move_current_to(&mut self, target_dir: &PathBuf) -> finlink_core::Result<()> {
        if let Some(path) = self.current.take() {
            let name = path
                .file_name()
                .ok_or_else(|| Error::Internal("outbox file has no name".to_string()))?;
            std::fs::rename(&path, target_dir.join(name))?;
        }
        Ok(())
    }
}

impl Endpoint for OutboundEndpoint {
    fn prepare(&mut self) -> finlink_core::Result<TransactionKey> {
        let path = self
            .next_outbox_file()?
            .ok_or_else(|| Error::Transport("outbox is empty".to_string()))?;
        let key = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("outbound")
            .to_string();
        self.current = Some(path);
        Ok(key)
    }

    fn process(&mut self, correlation: &CorrelationId) -> finlink_core::Result<()> {
        let path = self
            .current
            .as_ref()
            .ok_or_else(|| Error::Internal("no outbox file staged".to_string()))?;
        let payload = std::fs::read(path)?;
        let framed = self
            .mediator
            .publish_preparation(&payload, &self.keys, None)?;

        let mut headers = TransportHeaders::new();
        headers.set(HDR_SERVICE_ID, self.service_id.clone());
        self.client.publish(framed.as_slice(), &headers)?;
        self.metrics.record_publish(framed.len());
        info!(
            correlation = %correlation,
            file = %path.display(),
            bytes = framed.len(),
            "published outbound message"
        );
        Ok(())
    }

    fn commit(&mut self) -> finlink_core::Result<()> {
        let sent_dir = self.sent_dir.clone();
        self.move_current_to(&sent_dir)
    }

    fn abort(&mut self) -> finlink_core::Result<()> {
        self.metrics.record_publish_failure();
        let failed_dir = self.failed_dir.clone();
        self.move_current_to(&failed_dir)
    }

    fn rollback(&mut self) -> finlink_core::Result<()> {
        self.metrics.record_retry();
        // The file stays in the outbox; the next iteration republishes it.
        self.current = None;
        Ok(())
    }

    fn more_messages(&mut self) -> bool {
        matches!(self.next_outbox_file(), Ok(Some(_)))
    }
}

fn watcher_loop(
    config: &ConnectorConfig,
    mut client: RestClient,
    pool: NotificationPool,
    metrics: GatewayMetrics,
) {
    let throttle = BackoffThrottle::new(config.failure_throttle());
    let reconnect = ReconnectPolicy::new(config.reconnect_threshold);
    let service_id = config.service_id.clone();

    loop {
        if !pool.is_running() {
            info!("watcher observed shutdown, exiting");
            break;
        }
        match client.poll() {
            Ok(Some(message)) => {
                reconnect.record_success();
                let mut headers = message.headers;
                if headers.get(HDR_SERVICE_ID).is_none() {
                    headers.set(HDR_SERVICE_ID, service_id.clone());
                }
                let notification = Notification::new(message.id, message.body, headers);
                match pool.insert(notification) {
                    Ok(()) => {}
                    Err(Error::PoolShutdown) => {
                        info!("pool shut down during insert, watcher exiting");
                        break;
                    }
                    Err(Error::DuplicateNotification(key)) => {
                        warn!(key = %key, "duplicate transport delivery ignored");
                    }
                    Err(e) => error!(error = %e, "failed to queue inbound message"),
                }
            }
            Ok(None) => thread::sleep(config.poll_idle()),
            Err(e) => {
                metrics.record_fetch_failure();
                warn!(error = %e, "inbound poll failed");
                if reconnect.record_failure() {
                    if let Err(reconnect_error) = client.reconnect() {
                        error!(error = %reconnect_error, "transport reconnect failed");
                    }
                }
                throttle.pause();
            }
        }
    }
}

fn worker_loop(
    mut endpoint: InboundEndpoint,
    pool: NotificationPool,
    store: Box<dyn AttemptStore>,
    throttle: BackoffThrottle,
) {
    let mut txn = TransactionLoop::new().with_store(store);
    while let Some(notification) = pool.next() {
        let key = notification.key.clone();
        endpoint.begin(notification);
        loop {
            match txn.run_single(&mut endpoint) {
                Outcome::NotCompleted => throttle.pause(),
                Outcome::Completed | Outcome::Rejected => break,
            }
        }
        pool.complete(&key);
    }
    info!("worker drained the notification pool, exiting");
}

fn publisher_loop(mut endpoint: OutboundEndpoint, pool: NotificationPool, idle: std::time::Duration) {
    let mut txn = TransactionLoop::new().with_store(Box::new(InMemoryAttemptStore::new()));
    loop {
        if !pool.is_running() {
            info!("publisher observed shutdown, exiting");
            break;
        }
        match endpoint.next_outbox_file() {
            Ok(Some(_)) => {
                let summary = txn.run_batch(&mut endpoint);
                if summary.rejected > 0 || summary.backed_out > 0 {
                    warn!(
                        rejected = summary.rejected,
                        backed_out = summary.backed_out,
                        "outbound batch finished with failures"
                    );
                }
            }
            Ok(None) => thread::sleep(idle),
            Err(e) => {
                error!(error = %e, "cannot scan outbox");
                thread::sleep(idle);
            }
        }
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn rest_client(base: &str, config: &ConnectorConfig) -> Result<RestClient> {
    let base_url = Url::parse(base).context("invalid transport base URL")?;
    let mut client_config = RestClientConfig::new(base_url);
    client_config.timeout = config.wire_timeout();
    RestClient::new(client_config).context("failed to build transport client")
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use signal_hook::consts::signal::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).expect("failed to register signal handlers");
        if let Some(signal) = signals.forever().next() {
            info!(signal, "received shutdown signal");
        }
    }

    #[cfg(not(unix))]
    {
        std::thread::park();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .json()
        .init();

    info!("FinLink connector v{}", env!("CARGO_PKG_VERSION"));

    info!("loading configuration from environment variables");
    let config = ConnectorConfig::from_env().context("failed to load configuration")?;
    let keys = config.load_key_handle().context("failed to load signing material")?;
    let mediator = Mediator::select(&config.service_id);
    info!(
        service_id = %config.service_id,
        mediator = mediator.name(),
        poll_url = %config.poll_url,
        "connector configured"
    );

    let delivery_dir = PathBuf::from(&config.delivery_dir);
    let rejected_dir = delivery_dir.join("rejected");
    std::fs::create_dir_all(&delivery_dir).context("cannot create delivery directory")?;
    std::fs::create_dir_all(&rejected_dir).context("cannot create rejected directory")?;

    let metrics = GatewayMetrics::new();
    let pool = NotificationPool::with_capacity(config.pool_capacity);

    let store: Box<dyn AttemptStore> = match &config.attempt_store_path {
        Some(path) => {
            Box::new(FileAttemptStore::open(path).context("cannot open attempt store")?)
        }
        None => Box::new(InMemoryAttemptStore::new()),
    };

    // Watcher thread: poll the counterparty and feed the pool.
    let watcher_handle = {
        let client = rest_client(&config.poll_url, &config)?;
        let pool = pool.clone();
        let metrics = metrics.clone();
        let config = config.clone();
        thread::Builder::new()
            .name("finlink-watcher".to_string())
            .spawn(move || watcher_loop(&config, client, pool, metrics))
            .context("failed to spawn watcher thread")?
    };

    // Worker thread: drain the pool and drive the transaction loop.
    let worker_handle = {
        let endpoint = InboundEndpoint {
            mediator: mediator.clone(),
            keys: keys.clone(),
            client: rest_client(&config.poll_url, &config)?,
            pool: pool.clone(),
            delivery_dir,
            rejected_dir,
            metrics: metrics.clone(),
            current: None,
        };
        let pool = pool.clone();
        let throttle = BackoffThrottle::new(config.failure_throttle());
        thread::Builder::new()
            .name("finlink-worker".to_string())
            .spawn(move || worker_loop(endpoint, pool, store, throttle))
            .context("failed to spawn worker thread")?
    };

    // Optional publisher thread: drain the outbox.
    let publisher_handle = match &config.outbox_dir {
        Some(outbox) => {
            let outbox_dir = PathBuf::from(outbox);
            let sent_dir = outbox_dir.join("sent");
            let failed_dir = outbox_dir.join("failed");
            std::fs::create_dir_all(&outbox_dir).context("cannot create outbox directory")?;
            std::fs::create_dir_all(&sent_dir).context("cannot create sent directory")?;
            std::fs::create_dir_all(&failed_dir).context("cannot create failed directory")?;

            let endpoint = OutboundEndpoint {
                mediator: mediator.clone(),
                keys: keys.clone(),
                client: rest_client(config.publish_base(), &config)?,
                service_id: config.service_id.clone(),
                outbox_dir,
                sent_dir,
                failed_dir,
                metrics: metrics.clone(),
                current: None,
            };
            let pool = pool.clone();
            let idle = config.poll_idle();
            Some(
                thread::Builder::new()
                    .name("finlink-publisher".to_string())
                    .spawn(move || publisher_loop(endpoint, pool, idle))
                    .context("failed to spawn publisher thread")?,
            )
        }
        None => None,
    };

    wait_for_shutdown();

    info!("shutting down, closing the notification pool");
    pool.shutdown_writers();

    if watcher_handle.join().is_err() {
        error!("watcher thread panicked");
    }
    if worker_handle.join().is_err() {
        error!("worker thread panicked");
    }
    if let Some(handle) = publisher_handle {
        if handle.join().is_err() {
            error!("publisher thread panicked");
        }
    }

    info!(
        fetched = metrics.fetched_total(),
        committed = metrics.commits_total(),
        rejected = metrics.aborts_total(),
        published = metrics.published_total(),
        "connector shut down gracefully"
    );
    Ok(())
}
