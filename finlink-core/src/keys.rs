//! Asymmetric signing keys and certificate metadata
//!
//! Signing material is an explicit [`KeyHandle`] owned by the caller and
//! constructed per connector configuration, never process-wide cached
//! state, so independent connectors (and tests) can hold independent keys
//! concurrently.
//!
//! ECDSA signatures are serialized as the raw concatenation of the `r` and
//! `s` components, 32 bytes each, big-endian and zero-padded, then
//! Base64-encoded. This is NOT ASN.1 DER: external counterparties expect
//! the fixed-width encoding, and it must be preserved exactly.

use crate::crypto::MacSigner;
use crate::{Error, Result};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fmt;

/// Length of a raw `r‖s` P-256 ECDSA signature
pub const ECDSA_SIGNATURE_LEN: usize = 64;

/// Private signing key, RSA or NIST P-256
#[derive(Clone, Debug)]
pub enum AsymmetricKey {
    Rsa(RsaPrivateKey),
    Ec(p256::ecdsa::SigningKey),
}

impl AsymmetricKey {
    /// Load a private key from PEM, sniffing the container format.
    ///
    /// PKCS#8 (`BEGIN PRIVATE KEY`) is tried as RSA first, then P-256;
    /// legacy PKCS#1 (`BEGIN RSA PRIVATE KEY`) is accepted for RSA.
    pub fn from_pem(pem: &str) -> Result<Self> {
        if pem.contains("BEGIN RSA PRIVATE KEY") {
            use rsa::pkcs1::DecodeRsaPrivateKey;
            let key = RsaPrivateKey::from_pkcs1_pem(pem)
                .map_err(|e| Error::Crypto(format!("RSA PKCS#1 key parse failed: {}", e)))?;
            return Ok(AsymmetricKey::Rsa(key));
        }
        if pem.contains("BEGIN PRIVATE KEY") {
            use rsa::pkcs8::DecodePrivateKey;
            if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
                return Ok(AsymmetricKey::Rsa(key));
            }
            use p256::pkcs8::DecodePrivateKey as _;
            let key = p256::ecdsa::SigningKey::from_pkcs8_pem(pem)
                .map_err(|e| Error::Crypto(format!("PKCS#8 key parse failed: {}", e)))?;
            return Ok(AsymmetricKey::Ec(key));
        }
        Err(Error::Crypto(
            "unrecognized private key PEM container (expected PKCS#8 or PKCS#1)".to_string(),
        ))
    }

    /// XML-DSig algorithm identifier for this key type
    pub fn algorithm_uri(&self) -> &'static str {
        match self {
            AsymmetricKey::Rsa(_) => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            AsymmetricKey::Ec(_) => "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256",
        }
    }

    /// Sign `data` with SHA-256 and this key's scheme
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            AsymmetricKey::Rsa(key) => rsa_sign(key, data),
            AsymmetricKey::Ec(key) => ecdsa_sign(key, data),
        }
    }
}

/// Sign `text` with RSASSA-PKCS1-v1_5 over SHA-256
pub fn rsa_sign(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    use rsa::signature::{SignatureEncoding, Signer};
    if data.is_empty() {
        return Err(Error::Crypto("cannot sign empty input".to_string()));
    }
    let signing_key = rsa::pkcs1v15::SigningKey::<rsa::sha2::Sha256>::new(key.clone());
    let signature = signing_key
        .try_sign(data)
        .map_err(|e| Error::Crypto(format!("RSA signing failed: {}", e)))?;
    Ok(signature.to_vec())
}

/// Verify an RSASSA-PKCS1-v1_5 SHA-256 signature
pub fn rsa_verify(key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> Result<bool> {
    use rsa::signature::Verifier;
    if data.is_empty() {
        return Err(Error::Crypto("cannot verify empty input".to_string()));
    }
    let verifying_key = rsa::pkcs1v15::VerifyingKey::<rsa::sha2::Sha256>::new(key.clone());
    let signature = rsa::pkcs1v15::Signature::try_from(signature)
        .map_err(|e| Error::Crypto(format!("malformed RSA signature: {}", e)))?;
    Ok(verifying_key.verify(data, &signature).is_ok())
}

/// Sign `data` with ECDSA P-256 over SHA-256; output is raw `r‖s`
pub fn ecdsa_sign(key: &p256::ecdsa::SigningKey, data: &[u8]) -> Result<Vec<u8>> {
    use p256::ecdsa::signature::Signer;
    if data.is_empty() {
        return Err(Error::Crypto("cannot sign empty input".to_string()));
    }
    let signature: p256::ecdsa::Signature = key
        .try_sign(data)
        .map_err(|e| Error::Crypto(format!("ECDSA signing failed: {}", e)))?;
    Ok(signature.to_bytes().to_vec())
}

/// Verify a raw `r‖s` ECDSA P-256 signature over SHA-256
pub fn ecdsa_verify(key: &p256::ecdsa::VerifyingKey, data: &[u8], signature: &[u8]) -> Result<bool> {
    use p256::ecdsa::signature::Verifier;
    if signature.len() != ECDSA_SIGNATURE_LEN {
        return Err(Error::Crypto(format!(
            "ECDSA signature must be {} raw bytes, got {}",
            ECDSA_SIGNATURE_LEN,
            signature.len()
        )));
    }
    let signature = p256::ecdsa::Signature::from_slice(signature)
        .map_err(|e| Error::Crypto(format!("malformed ECDSA signature: {}", e)))?;
    Ok(key.verify(data, &signature).is_ok())
}

/// Public key family carried by a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyType {
    Rsa,
    Dsa,
    Dh,
    Ecc,
    Unknown,
}

impl fmt::Display for PublicKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublicKeyType::Rsa => "RSA",
            PublicKeyType::Dsa => "DSA",
            PublicKeyType::Dh => "DH",
            PublicKeyType::Ecc => "ECC",
            PublicKeyType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Metadata extracted from an X.509 certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Serial number rendered in decimal
    pub serial_decimal: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Subject distinguished name
    pub subject: String,
    /// Subject public key family
    pub public_key_type: PublicKeyType,
}

/// Parse certificate metadata from a PEM-encoded X.509 certificate
pub fn parse_certificate(pem: &str) -> Result<CertificateInfo> {
    let (_, doc) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
        .map_err(|e| Error::Certificate(format!("PEM decode failed: {}", e)))?;
    let cert = doc
        .parse_x509()
        .map_err(|e| Error::Certificate(format!("X.509 parse failed: {}", e)))?;

    let algorithm = cert.public_key().algorithm.algorithm.to_id_string();
    let public_key_type = match algorithm.as_str() {
        "1.2.840.113549.1.1.1" => PublicKeyType::Rsa,
        "1.2.840.10040.4.1" => PublicKeyType::Dsa,
        "1.2.840.10046.2.1" => PublicKeyType::Dh,
        "1.2.840.10045.2.1" => PublicKeyType::Ecc,
        _ => PublicKeyType::Unknown,
    };

    Ok(CertificateInfo {
        serial_decimal: cert.tbs_certificate.serial.to_string(),
        issuer: cert.issuer().to_string(),
        subject: cert.subject().to_string(),
        public_key_type,
    })
}

/// Extract the RSA public key from a PEM certificate
pub fn certificate_rsa_public_key(pem: &str) -> Result<RsaPublicKey> {
    use rsa::pkcs1::DecodeRsaPublicKey;
    let spki = certificate_spki_bytes(pem)?;
    RsaPublicKey::from_pkcs1_der(&spki)
        .map_err(|e| Error::Certificate(format!("RSA public key parse failed: {}", e)))
}

/// Extract the P-256 verifying key from a PEM certificate
pub fn certificate_ec_verifying_key(pem: &str) -> Result<p256::ecdsa::VerifyingKey> {
    let spki = certificate_spki_bytes(pem)?;
    p256::ecdsa::VerifyingKey::from_sec1_bytes(&spki)
        .map_err(|e| Error::Certificate(format!("EC public key parse failed: {}", e)))
}

fn certificate_spki_bytes(pem: &str) -> Result<Vec<u8>> {
    let (_, doc) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
        .map_err(|e| Error::Certificate(format!("PEM decode failed: {}", e)))?;
    let cert = doc
        .parse_x509()
        .map_err(|e| Error::Certificate(format!("X.509 parse failed: {}", e)))?;
    Ok(cert.public_key().subject_public_key.data.to_vec())
}

/// Caller-owned signing material for one connector
///
/// An empty or absent secret means the symmetric formats run unsigned; the
/// asymmetric key and certificate are only consulted by the XML-DSig
/// mediators.
#[derive(Clone, Default)]
pub struct KeyHandle {
    secret: Option<Vec<u8>>,
    private_key: Option<AsymmetricKey>,
    certificate_pem: Option<String>,
}

impl KeyHandle {
    /// Key handle with no signing material at all
    pub fn unsigned() -> Self {
        Self::default()
    }

    /// Key handle holding an HMAC secret; an empty secret is treated as
    /// no key configured
    pub fn from_secret(secret: impl Into<Vec<u8>>) -> Self {
        let secret = secret.into();
        Self {
            secret: if secret.is_empty() { None } else { Some(secret) },
            ..Self::default()
        }
    }

    /// Key handle holding an RSA or EC private key parsed from PEM
    pub fn from_private_key_pem(pem: &str) -> Result<Self> {
        Ok(Self {
            private_key: Some(AsymmetricKey::from_pem(pem)?),
            ..Self::default()
        })
    }

    /// Attach a signer certificate (PEM)
    pub fn with_certificate_pem(mut self, pem: impl Into<String>) -> Self {
        self.certificate_pem = Some(pem.into());
        self
    }

    /// Attach an HMAC secret; an empty secret is treated as no key
    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        let secret = secret.into();
        self.secret = if secret.is_empty() { None } else { Some(secret) };
        self
    }

    /// Whether an HMAC secret is configured
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// HMAC signer over the configured secret, if any
    pub fn mac_signer(&self) -> Option<MacSigner> {
        self.secret.as_deref().map(MacSigner::new)
    }

    /// The configured private key, if any
    pub fn private_key(&self) -> Option<&AsymmetricKey> {
        self.private_key.as_ref()
    }

    /// The configured certificate PEM, if any
    pub fn certificate_pem(&self) -> Option<&str> {
        self.certificate_pem.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;

    #[test]
    fn test_rsa_sign_verify_roundtrip() {
        let key = match AsymmetricKey::from_pem(testdata::RSA_KEY_PEM).unwrap() {
            AsymmetricKey::Rsa(k) => k,
            AsymmetricKey::Ec(_) => panic!("expected RSA key"),
        };
        let public = key.to_public_key();
        let signature = rsa_sign(&key, b"payment instruction").unwrap();
        assert!(rsa_verify(&public, b"payment instruction", &signature).unwrap());
        assert!(!rsa_verify(&public, b"tampered instruction", &signature).unwrap());
    }

    #[test]
    fn test_rsa_rejects_empty_input() {
        let key = match AsymmetricKey::from_pem(testdata::RSA_KEY_PEM).unwrap() {
            AsymmetricKey::Rsa(k) => k,
            AsymmetricKey::Ec(_) => panic!("expected RSA key"),
        };
        assert!(rsa_sign(&key, b"").is_err());
    }

    #[test]
    fn test_ecdsa_raw_fixed_width_signature() {
        let key = match AsymmetricKey::from_pem(testdata::EC_KEY_PEM).unwrap() {
            AsymmetricKey::Ec(k) => k,
            AsymmetricKey::Rsa(_) => panic!("expected EC key"),
        };
        let signature = ecdsa_sign(&key, b"payment instruction").unwrap();
        // Raw r||s: exactly 64 bytes, never DER (which would start 0x30).
        assert_eq!(signature.len(), ECDSA_SIGNATURE_LEN);

        let verifying = p256::ecdsa::VerifyingKey::from(&key);
        assert!(ecdsa_verify(&verifying, b"payment instruction", &signature).unwrap());
        assert!(!ecdsa_verify(&verifying, b"tampered", &signature).unwrap());
    }

    #[test]
    fn test_ecdsa_rejects_der_length() {
        let key = match AsymmetricKey::from_pem(testdata::EC_KEY_PEM).unwrap() {
            AsymmetricKey::Ec(k) => k,
            AsymmetricKey::Rsa(_) => panic!("expected EC key"),
        };
        let verifying = p256::ecdsa::VerifyingKey::from(&key);
        assert!(ecdsa_verify(&verifying, b"data", &[0u8; 70]).is_err());
    }

    #[test]
    fn test_malformed_pem_is_crypto_error() {
        let err = AsymmetricKey::from_pem("-----BEGIN GARBAGE-----").unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn test_certificate_metadata() {
        let info = parse_certificate(testdata::RSA_CERT_PEM).unwrap();
        assert_eq!(info.serial_decimal, "4660");
        assert_eq!(info.public_key_type, PublicKeyType::Rsa);
        assert!(info.subject.contains("FinLink RSA Signer"));
        assert!(info.issuer.contains("FinLink Test"));

        let info = parse_certificate(testdata::EC_CERT_PEM).unwrap();
        assert_eq!(info.serial_decimal, "350");
        assert_eq!(info.public_key_type, PublicKeyType::Ecc);

        let info = parse_certificate(testdata::DSA_CERT_PEM).unwrap();
        assert_eq!(info.serial_decimal, "77");
        assert_eq!(info.public_key_type, PublicKeyType::Dsa);
    }

    #[test]
    fn test_certificate_error_on_bad_pem() {
        let err = parse_certificate("not a certificate").unwrap_err();
        assert!(matches!(err, Error::Certificate(_)));
    }

    #[test]
    fn test_certificate_public_key_matches_private_key() {
        let signing = match AsymmetricKey::from_pem(testdata::EC_KEY_PEM).unwrap() {
            AsymmetricKey::Ec(k) => k,
            AsymmetricKey::Rsa(_) => panic!("expected EC key"),
        };
        let signature = ecdsa_sign(&signing, b"cross-check").unwrap();
        let verifying = certificate_ec_verifying_key(testdata::EC_CERT_PEM).unwrap();
        assert!(ecdsa_verify(&verifying, b"cross-check", &signature).unwrap());
    }

    #[test]
    fn test_key_handle_empty_secret_is_unsigned() {
        assert!(!KeyHandle::from_secret(Vec::new()).has_secret());
        assert!(KeyHandle::from_secret(b"k1".to_vec()).has_secret());
        assert!(KeyHandle::unsigned().mac_signer().is_none());
    }
}
