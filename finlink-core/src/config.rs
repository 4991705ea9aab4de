//! Configuration for connector processes

use crate::keys::KeyHandle;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Single-connector configuration
///
/// Loaded from `FINLINK_`-prefixed environment variables. Signing material
/// is referenced by hex secret or by PEM file paths; the loaded
/// [`KeyHandle`] is owned by the connector, never shared process-wide.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectorConfig {
    /// Service/format selector (e.g. `SAA_FIN`, `SAA_FILEACT_MX`)
    pub service_id: String,

    /// Base URL polled for inbound messages (must end with `/`)
    pub poll_url: String,

    /// Base URL for outbound publishing; defaults to `poll_url`
    #[serde(default)]
    pub publish_url: Option<String>,

    /// HMAC secret, hex-encoded; empty/absent runs the symmetric formats
    /// unsigned
    #[serde(default)]
    pub hmac_secret_hex: Option<String>,

    /// Path to a PEM private key (RSA or P-256), for the IP mediator
    #[serde(default)]
    pub private_key_path: Option<String>,

    /// Path to the PEM signer certificate, for the IP mediator
    #[serde(default)]
    pub certificate_path: Option<String>,

    /// Notification pool capacity
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Idle sleep between empty polls, in milliseconds
    #[serde(default = "default_poll_idle_ms")]
    pub poll_idle_ms: u64,

    /// Throttle after a retryable watcher failure, in seconds
    #[serde(default = "default_failure_throttle_secs")]
    pub failure_throttle_secs: u64,

    /// Consecutive protocol failures before a forced reconnect
    #[serde(default = "default_reconnect_threshold")]
    pub reconnect_threshold: u32,

    /// Fixed wire-call timeout, in seconds
    #[serde(default = "default_wire_timeout_secs")]
    pub wire_timeout_secs: u64,

    /// Directory receiving verified inbound payloads
    pub delivery_dir: String,

    /// Directory scanned for outbound payloads; absent disables publishing
    #[serde(default)]
    pub outbox_dir: Option<String>,

    /// Path of the JSON attempt store; absent disables attempt persistence
    #[serde(default)]
    pub attempt_store_path: Option<String>,
}

impl ConnectorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("FINLINK_")
            .from_env()
            .map_err(|e| Error::Config(format!("failed to parse environment variables: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.service_id.trim().is_empty() {
            return Err(Error::Config("service_id cannot be empty".to_string()));
        }

        Url::parse(&self.poll_url)
            .map_err(|e| Error::Config(format!("invalid poll_url '{}': {}", self.poll_url, e)))?;
        if let Some(publish_url) = &self.publish_url {
            Url::parse(publish_url)
                .map_err(|e| Error::Config(format!("invalid publish_url '{}': {}", publish_url, e)))?;
        }

        if let Some(secret) = &self.hmac_secret_hex {
            if !secret.is_empty() {
                crate::crypto::decode_hex(secret)
                    .map_err(|_| Error::Config("hmac_secret_hex is not valid hex".to_string()))?;
            }
        }

        if self.private_key_path.is_some() != self.certificate_path.is_some() {
            return Err(Error::Config(
                "private_key_path and certificate_path must be configured together".to_string(),
            ));
        }

        if self.pool_capacity == 0 {
            return Err(Error::Config("pool_capacity must be > 0".to_string()));
        }

        if self.delivery_dir.trim().is_empty() {
            return Err(Error::Config("delivery_dir cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Load the connector's signing material
    pub fn load_key_handle(&self) -> Result<KeyHandle> {
        let mut handle = match &self.private_key_path {
            Some(path) => {
                let pem = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read private key {}: {}", path, e))
                })?;
                KeyHandle::from_private_key_pem(&pem)?
            }
            None => KeyHandle::unsigned(),
        };
        if let Some(path) = &self.certificate_path {
            let pem = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("cannot read certificate {}: {}", path, e)))?;
            handle = handle.with_certificate_pem(pem);
        }
        if let Some(secret) = &self.hmac_secret_hex {
            if !secret.is_empty() {
                handle = handle.with_secret(crate::crypto::decode_hex(secret)?);
            }
        }
        Ok(handle)
    }

    pub fn poll_idle(&self) -> Duration {
        Duration::from_millis(self.poll_idle_ms)
    }

    pub fn failure_throttle(&self) -> Duration {
        Duration::from_secs(self.failure_throttle_secs)
    }

    pub fn wire_timeout(&self) -> Duration {
        Duration::from_secs(self.wire_timeout_secs)
    }

    /// Effective publish base URL
    pub fn publish_base(&self) -> &str {
        self.publish_url.as_deref().unwrap_or(&self.poll_url)
    }
}

// Default value functions
fn default_pool_capacity() -> usize {
    crate::DEFAULT_POOL_CAPACITY
}

fn default_poll_idle_ms() -> u64 {
    500
}

fn default_failure_throttle_secs() -> u64 {
    5
}

fn default_reconnect_threshold() -> u32 {
    3
}

fn default_wire_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ConnectorConfig {
        ConnectorConfig {
            service_id: "SAA_FIN".to_string(),
            poll_url: "https://saa.example.com/gateway/".to_string(),
            publish_url: None,
            hmac_secret_hex: Some("6b31".to_string()),
            private_key_path: None,
            certificate_path: None,
            pool_capacity: 64,
            poll_idle_ms: 500,
            failure_throttle_secs: 5,
            reconnect_threshold: 3,
            wire_timeout_secs: 30,
            delivery_dir: "/var/spool/finlink/in".to_string(),
            outbox_dir: None,
            attempt_store_path: None,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let mut config = base_config();
        config.poll_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_hex_secret_rejected() {
        let mut config = base_config();
        config.hmac_secret_hex = Some("zzzz".to_string());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_key_and_certificate_must_pair() {
        let mut config = base_config();
        config.private_key_path = Some("/etc/finlink/key.pem".to_string());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_key_handle_from_hex_secret() {
        let handle = base_config().load_key_handle().unwrap();
        // 0x6b31 == "k1"
        assert!(handle.has_secret());
        let signer = handle.mac_signer().unwrap();
        let reference = crate::crypto::MacSigner::new(b"k1".to_vec());
        assert_eq!(
            signer.digest(b"payload").unwrap(),
            reference.digest(b"payload").unwrap()
        );
    }

    #[test]
    fn test_empty_secret_is_unsigned() {
        let mut config = base_config();
        config.hmac_secret_hex = Some(String::new());
        let handle = config.load_key_handle().unwrap();
        assert!(!handle.has_secret());
    }
}
