// SPDX-License-Identifier: MIT
//
// FinLink: Financial Message Gateway
//
// https://github.com/finlink/finlink

//! Error types for the FinLink gateway
//!
//! Provides a unified error taxonomy using `thiserror`. The transaction loop
//! never matches on concrete variants: it classifies failures only through
//! [`Error::severity`], so every new variant must pick a severity explicitly.

pub type Result<T> = std::result::Result<T, Error>;

/// Failure classification used by the transaction loop.
///
/// `Fatal` failures abort the current message (content trust cannot be
/// re-established by retrying); `Transient` failures roll back and retry up
/// to the delivery ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Transient,
}

/// Core error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Signature or digest mismatch, or a missing/unexpected signature
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Malformed framing: length mismatch, unparseable XML, missing element
    #[error("Malformed message: {0}")]
    Format(String),

    /// Key load, PEM parse, or signing-library failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Certificate could not be decoded or interpreted
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// The signer certificate's key type has no supported signature scheme
    #[error("Unsupported signature algorithm for key type {0}")]
    UnsupportedAlgorithm(String),

    /// Connection drop, non-success status, timeout
    #[error("Transport error: {0}")]
    Transport(String),

    /// Missing or inconsistent connector settings; fails fast at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// The notification pool was shut down while inserting or draining
    #[error("Notification pool is shut down")]
    PoolShutdown,

    /// A notification with this key is already in flight
    #[error("Notification key already in flight: {0}")]
    DuplicateNotification(String),

    /// Attempt-store read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Severity classification consumed by the transaction loop.
    pub fn severity(&self) -> Severity {
        match self {
            Error::Transport(_) | Error::Persistence(_) | Error::Io(_) => Severity::Transient,
            _ => Severity::Fatal,
        }
    }

    /// Check if the error is transient and retryable
    pub fn is_retryable(&self) -> bool {
        self.severity() == Severity::Transient
    }

    /// Check if the error indicates an authentication failure
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Authentication(_))
    }
}

// Conversions for common error types
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}
