//! Blocking REST transport client
//!
//! Thin HTTP client used by watcher and publisher threads: poll for the
//! next inbound message, acknowledge a delivered one, publish an outbound
//! frame. The fixed wire-call timeout lives here and only here; the
//! transaction loop never enforces its own timeouts. Transport failures map
//! to the transient [`Error::Transport`] variant and are retried by the
//! caller, not by this client.

use crate::buffer::ManagedBuffer;
use crate::protocol::{
    TransportHeaders, HDR_MESSAGE_ID, HDR_PAYLOAD_DIGEST, HDR_SERVICE_ID, HDR_SIGNING_KEY_REF,
};
use crate::{Error, Result};
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default fixed wire-call timeout
pub const DEFAULT_WIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP header carrying the transport message id
pub const HTTP_HDR_MESSAGE_ID: &str = "x-finlink-message-id";
/// HTTP header carrying the service/format selector
pub const HTTP_HDR_SERVICE_ID: &str = "x-finlink-service-id";
/// HTTP header carrying the signing key reference
pub const HTTP_HDR_SIGNING_KEY_REF: &str = "x-finlink-signing-key-ref";
/// HTTP header carrying the transport payload digest
pub const HTTP_HDR_PAYLOAD_DIGEST: &str = "x-finlink-payload-digest";

/// Configuration for the REST client
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// Base URL of the counterparty gateway endpoint
    pub base_url: Url,
    /// Fixed wire-call timeout
    pub timeout: Duration,
}

impl RestClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_WIRE_TIMEOUT,
        }
    }
}

/// An inbound message returned by [`RestClient::poll`]
#[derive(Debug)]
pub struct PolledMessage {
    /// Transport-assigned message identifier
    pub id: String,
    /// Raw message bytes
    pub body: ManagedBuffer,
    /// Mapped transport headers
    pub headers: TransportHeaders,
}

/// Blocking HTTP client for the REST transport
pub struct RestClient {
    client: Client,
    config: RestClientConfig,
}

impl RestClient {
    /// Create a client with connection pooling and the fixed timeout
    pub fn new(config: RestClientConfig) -> Result<Self> {
        let client = Self::build_client(config.timeout)?;
        Ok(Self { client, config })
    }

    fn build_client(timeout: Duration) -> Result<Client> {
        ClientBuilder::new()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .use_rustls_tls()
            .build()
            .map_err(Error::from)
    }

    /// Drop pooled connections and rebuild the client (forced reconnect)
    pub fn reconnect(&mut self) -> Result<()> {
        warn!(base_url = %self.config.base_url, "reconnecting transport client");
        self.client = Self::build_client(self.config.timeout)?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid transport URL: {}", e)))
    }

    /// Poll for the next inbound message; `None` when the remote has nothing
    /// queued (HTTP 204)
    pub fn poll(&self) -> Result<Option<PolledMessage>> {
        let url = self.endpoint("messages/next")?;
        let response = self.client.get(url.clone()).send()?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("poll failed: HTTP {}", status)));
        }

        let mut headers = TransportHeaders::new();
        let mut id = None;
        for (http_name, key) in [
            (HTTP_HDR_MESSAGE_ID, HDR_MESSAGE_ID),
            (HTTP_HDR_SERVICE_ID, HDR_SERVICE_ID),
            (HTTP_HDR_SIGNING_KEY_REF, HDR_SIGNING_KEY_REF),
            (HTTP_HDR_PAYLOAD_DIGEST, HDR_PAYLOAD_DIGEST),
        ] {
            if let Some(value) = response.headers().get(http_name) {
                let value = value
                    .to_str()
                    .map_err(|_| Error::Transport(format!("non-ASCII {} header", http_name)))?;
                if key == HDR_MESSAGE_ID {
                    id = Some(value.to_string());
                }
                headers.set(key, value);
            }
        }
        let id =
            id.ok_or_else(|| Error::Transport("poll response has no message id".to_string()))?;

        let body = response.bytes()?;
        if body.is_empty() {
            return Err(Error::Transport("poll response has an empty body".to_string()));
        }
        if body.len() > crate::MAX_MESSAGE_SIZE {
            return Err(Error::Transport(format!(
                "message of {} bytes exceeds the {} byte limit",
                body.len(),
                crate::MAX_MESSAGE_SIZE
            )));
        }
        debug!(message_id = %id, bytes = body.len(), "polled inbound message");
        Ok(Some(PolledMessage {
            id,
            body: ManagedBuffer::from(body.to_vec()),
            headers,
        }))
    }

    /// Acknowledge a delivered message so the remote releases it
    pub fn acknowledge(&self, message_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("messages/{}", message_id))?;
        let response = self.client.delete(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "acknowledge failed: HTTP {}",
                status
            )));
        }
        Ok(())
    }

    /// Publish a framed outbound buffer
    pub fn publish(&self, body: &[u8], headers: &TransportHeaders) -> Result<()> {
        let url = self.endpoint("messages")?;
        let mut request = self
            .client
            .post(url)
            .header("content-type", "application/octet-stream")
            .body(body.to_vec());
        if let Some(service_id) = headers.get(HDR_SERVICE_ID) {
            request = request.header(HTTP_HDR_SERVICE_ID, service_id);
        }
        if let Some(digest) = headers.get(HDR_PAYLOAD_DIGEST) {
            request = request.header(HTTP_HDR_PAYLOAD_DIGEST, digest);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("publish failed: HTTP {}", status)));
        }
        debug!(bytes = body.len(), "published outbound message");
        Ok(())
    }
}
