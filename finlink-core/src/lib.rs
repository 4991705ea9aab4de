// SPDX-License-Identifier: MIT
//
// FinLink: Financial Message Gateway
//
// https://github.com/finlink/finlink

//! FinLink Core Library
//!
//! Foundational types and components for the FinLink gateway: wire-format
//! framing and message authentication for SWIFT FIN, PCC, FileAct strict,
//! MX and IP/IPS formats, plus the retryable delivery pipeline that drives
//! every connector.
//!
//! # Architecture
//!
//! The library is organized into modules representing core concerns:
//! - `mediator`: per-format framing and signature mediators plus selection
//! - `crypto` / `keys` / `c14n`: codec primitives (HMAC, RSA, ECDSA, X.509,
//!   exclusive XML canonicalization)
//! - `transaction`: the Prepare/Process/Commit/Abort/Rollback loop with
//!   persisted attempt counters
//! - `pool`: bounded notification queue between watcher and worker threads
//! - `rest` / `retry`: blocking transport client and watcher backoff
//! - `config` / `metrics` / `error`: connector settings, counters, taxonomy
//!
//! # Concurrency model
//!
//! Codec and mediator calls are pure, synchronous and reentrant; they are
//! safe to call from multiple worker threads as long as each call owns its
//! buffers. Watchers and workers are dedicated OS threads synchronizing
//! only through the notification pool.

pub mod buffer;
pub mod c14n;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod mediator;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod rest;
pub mod retry;
pub mod transaction;
pub mod xml;

#[cfg(test)]
pub(crate) mod testdata;

pub use error::{Error, Result, Severity};

/// Library version for diagnostics
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default notification pool capacity
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Largest inbound message accepted from a transport (8 MiB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;
