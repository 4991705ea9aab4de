// SPDX-License-Identifier: MIT
//
// FinLink: Financial Message Gateway
//
// https://github.com/finlink/finlink

//! Transport-level message envelope
//!
//! A watcher delivers a raw byte buffer plus a small set of string headers
//! into the notification pool; the worker hands both to the mediator layer.
//! Headers travel untouched through the gateway: keys are case-sensitive and
//! unknown keys are ignored by every consumer.

use crate::buffer::ManagedBuffer;
use chrono::{DateTime, Utc};

/// Header key: service/format selector string (e.g. `SAA_FIN`)
pub const HDR_SERVICE_ID: &str = "service-id";

/// Header key: reference to the signing key configured for the message
pub const HDR_SIGNING_KEY_REF: &str = "signing-key-ref";

/// Header key: Base64 digest of the payload, supplied by the transport
pub const HDR_PAYLOAD_DIGEST: &str = "payload-digest";

/// Header key: transport-assigned message identifier
pub const HDR_MESSAGE_ID: &str = "message-id";

/// Ordered, case-sensitive string-keyed header map
///
/// Insertion order is preserved; `set` replaces the first matching key in
/// place so the original position survives an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHeaders {
    entries: Vec<(String, String)>,
}

impl TransportHeaders {
    /// Create an empty header map
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Look up a header value; keys compare case-sensitively
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace a header, preserving the original position on replace
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Iterate headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Unit of work carried through the notification pool
///
/// `key` is the caller-supplied identifier (sequence number or message id)
/// used for at-most-one-in-flight auditing.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Caller-supplied identifier, unique per in-flight message
    pub key: String,

    /// Raw wire bytes as delivered by the transport
    pub buffer: ManagedBuffer,

    /// Transport headers accompanying the buffer
    pub headers: TransportHeaders,

    /// UTC timestamp when the watcher accepted the message
    pub received_at: DateTime<Utc>,
}

impl Notification {
    /// Create a notification stamped with the current time
    pub fn new(key: impl Into<String>, buffer: ManagedBuffer, headers: TransportHeaders) -> Self {
        Self {
            key: key.into(),
            buffer,
            headers,
            received_at: Utc::now(),
        }
    }
}
