//! Symmetric codec primitives: HMAC-SHA256, SHA-256, Base64 and hex
//!
//! All functions here are pure, synchronous and reentrant; callers on
//! concurrent worker threads must only ensure each call owns its buffers.

use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Truncated HMAC length used in fixed-width PDU signature slots (128 bits)
pub const TRUNCATED_MAC_LEN: usize = 16;

/// HMAC-SHA256 signer over an owned secret
#[derive(Clone)]
pub struct MacSigner {
    key: Vec<u8>,
}

impl MacSigner {
    /// Create a new signer with the given secret key
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Generate a random 32-byte secret
    pub fn generate_key() -> Vec<u8> {
        use rand::Rng;
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill(&mut key[..]);
        key
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Crypto(format!("Invalid key length: {}", e)))
    }

    /// Full 32-byte HMAC-SHA256 digest
    pub fn digest(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Digest encoded as upper-case hex (64 characters), the FIN/PCC form
    pub fn digest_hex_upper(&self, data: &[u8]) -> Result<String> {
        Ok(encode_hex_upper(&self.digest(data)?))
    }

    /// Digest encoded as standard Base64, the XML-DSig form
    pub fn digest_base64(&self, data: &[u8]) -> Result<String> {
        Ok(encode_base64(&self.digest(data)?))
    }

    /// Truncated digest for a fixed-width PDU signature slot: the first
    /// 16 bytes of the HMAC, Base64-encoded into exactly 24 ASCII bytes.
    pub fn truncated_slot(&self, data: &[u8]) -> Result<[u8; 24]> {
        let digest = self.digest(data)?;
        let encoded = encode_base64(&digest[..TRUNCATED_MAC_LEN]);
        let mut slot = [0u8; 24];
        slot.copy_from_slice(encoded.as_bytes());
        Ok(slot)
    }

    /// Verify a full-length signature using constant-time comparison
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.verify_slice(signature).is_ok())
    }
}

/// SHA-256 digest of a byte buffer
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// SHA-256 digest encoded as standard Base64
pub fn sha256_base64(data: &[u8]) -> String {
    encode_base64(&sha256(data))
}

/// Encode bytes to an upper-case hexadecimal string
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode a hexadecimal string to bytes
pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| Error::Crypto(format!("Invalid hex: {}", e)))
}

/// Encode bytes to a standard Base64 string
pub fn encode_base64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode a standard Base64 string to bytes
pub fn decode_base64(s: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| Error::Crypto(format!("Invalid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing() {
        let signer = MacSigner::new(b"test-secret-key".to_vec());
        let data = b"hello world";
        let sig = signer.digest(data).unwrap();
        assert_eq!(sig.len(), 32);
        assert!(signer.verify(data, &sig).unwrap());
        assert!(!signer.verify(b"different data", &sig).unwrap());
    }

    #[test]
    fn test_hex_upper_digest_shape() {
        let signer = MacSigner::new(b"k1".to_vec());
        let hex = signer.digest_hex_upper(b"payload").unwrap();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_truncated_slot_is_24_ascii_bytes() {
        let signer = MacSigner::new(b"secret".to_vec());
        let payload: Vec<u8> = std::iter::once(b'<')
            .chain(std::iter::repeat(b'x').take(98))
            .chain(std::iter::once(b'>'))
            .collect();
        let slot = signer.truncated_slot(&payload).unwrap();
        // Reference value computed with an independent HMAC implementation.
        assert_eq!(&slot, b"Nosn43G2LaDFIFbPuXlwSA==");
    }

    #[test]
    fn test_known_fin_digest() {
        let signer = MacSigner::new(b"k1".to_vec());
        let text = "{1:F01BANKBEBBAXXX0000000000}{2:I103BANKDEFFXXXXN}{4:\ntest\n-}";
        assert_eq!(
            signer.digest_hex_upper(text.as_bytes()).unwrap(),
            "35F06F28AF3FE4E8A977075525A0DF75F434504C0E3A422E986B0576C299487F"
        );
    }

    #[test]
    fn test_base64_roundtrip() {
        let data = b"hello world";
        let b64 = encode_base64(data);
        assert_eq!(decode_base64(&b64).unwrap(), data);
    }

    #[test]
    fn test_hex_roundtrip() {
        assert_eq!(encode_hex_upper(b"hello"), "68656C6C6F");
        assert_eq!(decode_hex("68656C6C6F").unwrap(), b"hello");
    }
}
