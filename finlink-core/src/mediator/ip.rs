//! IP/IPS instant-payment XML-DSig scheme
//!
//! The signature lives in a `<Sgntr>` block inside `<hdr:AppHdr>`. Unlike
//! MX, the scheme is asymmetric: the algorithm is chosen by the signer
//! certificate's public key type: RSA certificates sign with rsa-sha256,
//! ECC certificates with ecdsa-sha256 (raw fixed-width `r‖s`, Base64).
//! Any other key type is an unsupported-algorithm error.
//!
//! The document digest always covers the message with `<Sgntr>` absent;
//! the exclusion is a canonicalizer parameter in both directions.

use super::mx::{build_signed_info, SignatureParts};
use crate::buffer::ManagedBuffer;
use crate::c14n::{canonicalize_document, escape_text};
use crate::crypto::{decode_base64, encode_base64, sha256_base64};
use crate::keys::{
    certificate_ec_verifying_key, certificate_rsa_public_key, ecdsa_verify, parse_certificate,
    rsa_verify, AsymmetricKey, KeyHandle, PublicKeyType,
};
use crate::xml::XmlDocument;
use crate::{Error, Result};

const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Mediator for IP/IPS documents with `<Sgntr>` authentication
#[derive(Debug, Clone, Copy, Default)]
pub struct IpMediator;

impl IpMediator {
    /// Verify the document digest and certificate signature, returning the
    /// document with the `<Sgntr>` block removed
    pub fn fetch(&self, input: &[u8], key: &KeyHandle) -> Result<ManagedBuffer> {
        let text = std::str::from_utf8(input)
            .map_err(|_| Error::Format("IP document is not valid UTF-8".to_string()))?;
        let doc = XmlDocument::parse(text)?;

        let sgntr = doc.find("Sgntr");
        match (key.certificate_pem(), sgntr) {
            (None, None) => Ok(ManagedBuffer::from(input)),
            (None, Some(_)) => Err(Error::Authentication(
                "unexpected Sgntr signature: no signer certificate configured".to_string(),
            )),
            (Some(_), None) => Err(Error::Authentication(
                "Sgntr signature required but absent".to_string(),
            )),
            (Some(certificate), Some(sgntr)) => {
                let parts = SignatureParts::locate(sgntr)?;

                let canonical_without_signature = canonicalize_document(&doc, Some(sgntr))?;
                if sha256_base64(&canonical_without_signature) != parts.digest_value {
                    return Err(Error::Authentication(
                        "IP message digest mismatch".to_string(),
                    ));
                }

                let canonical_signed_info =
                    crate::c14n::canonicalize_subtree(&doc, parts.signed_info)?;
                let signature_bytes = decode_base64(&parts.signature_value)?;

                let info = parse_certificate(certificate)?;
                let valid = match info.public_key_type {
                    PublicKeyType::Rsa => rsa_verify(
                        &certificate_rsa_public_key(certificate)?,
                        &canonical_signed_info,
                        &signature_bytes,
                    )?,
                    PublicKeyType::Ecc => ecdsa_verify(
                        &certificate_ec_verifying_key(certificate)?,
                        &canonical_signed_info,
                        &signature_bytes,
                    )?,
                    other => return Err(Error::UnsupportedAlgorithm(other.to_string())),
                };
                if !valid {
                    return Err(Error::Authentication(
                        "Sgntr signature value mismatch".to_string(),
                    ));
                }

                Ok(ManagedBuffer::from(doc.without_span(&sgntr.span)))
            }
        }
    }

    /// Digest and sign the document, splicing the `<Sgntr>` block into the
    /// application header
    pub fn publish(&self, input: &[u8], key: &KeyHandle) -> Result<ManagedBuffer> {
        let (private_key, certificate) = match (key.private_key(), key.certificate_pem()) {
            (None, None) => return Ok(ManagedBuffer::from(input)),
            (Some(private_key), Some(certificate)) => (private_key, certificate),
            _ => {
                return Err(Error::Crypto(
                    "IP signing requires both a private key and a signer certificate".to_string(),
                ))
            }
        };

        let text = std::str::from_utf8(input)
            .map_err(|_| Error::Format("IP document is not valid UTF-8".to_string()))?;
        let doc = XmlDocument::parse(text)?;
        let app_hdr = doc
            .find("AppHdr")
            .ok_or_else(|| Error::Format("IP document has no AppHdr element".to_string()))?;

        let info = parse_certificate(certificate)?;
        match (&info.public_key_type, private_key) {
            (PublicKeyType::Rsa, AsymmetricKey::Rsa(_)) => {}
            (PublicKeyType::Ecc, AsymmetricKey::Ec(_)) => {}
            (PublicKeyType::Rsa, _) | (PublicKeyType::Ecc, _) => {
                return Err(Error::Crypto(
                    "signer certificate key type does not match the configured private key"
                        .to_string(),
                ))
            }
            (other, _) => return Err(Error::UnsupportedAlgorithm(other.to_string())),
        }

        let canonical = canonicalize_document(&doc, None)?;
        let digest = sha256_base64(&canonical);
        let signed_info = build_signed_info(private_key.algorithm_uri(), &digest);

        let signed_info_doc = XmlDocument::parse(&signed_info)?;
        let canonical_signed_info = canonicalize_document(&signed_info_doc, None)?;
        let signature_value = encode_base64(&private_key.sign(&canonical_signed_info)?);

        let key_info = format!(
            concat!(
                "<ds:KeyInfo><ds:X509Data>",
                "<ds:X509IssuerSerial>",
                "<ds:X509IssuerName>{issuer}</ds:X509IssuerName>",
                "<ds:X509SerialNumber>{serial}</ds:X509SerialNumber>",
                "</ds:X509IssuerSerial>",
                "<ds:X509SubjectName>{subject}</ds:X509SubjectName>",
                "</ds:X509Data></ds:KeyInfo>"
            ),
            issuer = escape_text(&info.issuer),
            serial = info.serial_decimal,
            subject = escape_text(&info.subject),
        );
        let sgntr = format!(
            "<Sgntr><ds:Signature xmlns:ds=\"{}\">{}<ds:SignatureValue>{}</ds:SignatureValue>{}</ds:Signature></Sgntr>",
            DS_NS, signed_info, signature_value, key_info
        );

        let offset = doc.insertion_point(app_hdr)?;
        Ok(ManagedBuffer::from(doc.with_fragment_at(offset, &sgntr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;

    const DOCUMENT: &str = "<hdr:Message xmlns:hdr=\"urn:finlink:instant:head.001\">\
<hdr:AppHdr><hdr:Fr>BANKBEBB</hdr:Fr><hdr:To>BANKDEFF</hdr:To>\
<hdr:BizMsgIdr>IP-0001</hdr:BizMsgIdr></hdr:AppHdr>\
<hdr:Document><hdr:Amt>123.45</hdr:Amt></hdr:Document></hdr:Message>";

    fn ec_keys() -> KeyHandle {
        KeyHandle::from_private_key_pem(testdata::EC_KEY_PEM)
            .unwrap()
            .with_certificate_pem(testdata::EC_CERT_PEM)
    }

    fn rsa_keys() -> KeyHandle {
        KeyHandle::from_private_key_pem(testdata::RSA_KEY_PEM)
            .unwrap()
            .with_certificate_pem(testdata::RSA_CERT_PEM)
    }

    #[test]
    fn test_publish_splices_signature_into_app_hdr() {
        let published = IpMediator.publish(DOCUMENT.as_bytes(), &ec_keys()).unwrap();
        let text = std::str::from_utf8(published.as_slice()).unwrap();
        assert!(text.contains("<Sgntr><ds:Signature"));
        assert!(text.contains("</Sgntr></hdr:AppHdr>"));
        assert!(text.contains("ecdsa-sha256"));
        assert!(text.contains("<ds:X509SerialNumber>350</ds:X509SerialNumber>"));
        assert!(text.contains("FinLink EC Signer"));
    }

    #[test]
    fn test_roundtrip_ecdsa() {
        let keys = ec_keys();
        let published = IpMediator.publish(DOCUMENT.as_bytes(), &keys).unwrap();
        let verifier = KeyHandle::unsigned().with_certificate_pem(testdata::EC_CERT_PEM);
        let fetched = IpMediator.fetch(published.as_slice(), &verifier).unwrap();
        assert_eq!(fetched.as_slice(), DOCUMENT.as_bytes());
    }

    #[test]
    fn test_roundtrip_rsa() {
        let keys = rsa_keys();
        let published = IpMediator.publish(DOCUMENT.as_bytes(), &keys).unwrap();
        let text = std::str::from_utf8(published.as_slice()).unwrap();
        assert!(text.contains("rsa-sha256"));
        assert!(text.contains("<ds:X509SerialNumber>4660</ds:X509SerialNumber>"));
        let verifier = KeyHandle::unsigned().with_certificate_pem(testdata::RSA_CERT_PEM);
        let fetched = IpMediator.fetch(published.as_slice(), &verifier).unwrap();
        assert_eq!(fetched.as_slice(), DOCUMENT.as_bytes());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let published = IpMediator.publish(DOCUMENT.as_bytes(), &ec_keys()).unwrap();
        let tampered = String::from_utf8(published.into_vec())
            .unwrap()
            .replace("123.45", "999.99");
        let verifier = KeyHandle::unsigned().with_certificate_pem(testdata::EC_CERT_PEM);
        let err = IpMediator.fetch(tampered.as_bytes(), &verifier).unwrap_err();
        assert!(matches!(&err, Error::Authentication(msg) if msg.contains("digest")));
    }

    #[test]
    fn test_wrong_certificate_rejected() {
        let published = IpMediator.publish(DOCUMENT.as_bytes(), &ec_keys()).unwrap();
        let verifier = KeyHandle::unsigned().with_certificate_pem(testdata::RSA_CERT_PEM);
        // RSA certificate cannot validate an ECDSA signature.
        let err = IpMediator.fetch(published.as_slice(), &verifier).unwrap_err();
        assert!(matches!(err, Error::Authentication(_) | Error::Crypto(_)));
    }

    #[test]
    fn test_unsupported_key_type() {
        let keys = KeyHandle::from_private_key_pem(testdata::EC_KEY_PEM)
            .unwrap()
            .with_certificate_pem(testdata::DSA_CERT_PEM);
        let err = IpMediator.publish(DOCUMENT.as_bytes(), &keys).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_partial_material_is_crypto_error() {
        let only_key = KeyHandle::from_private_key_pem(testdata::EC_KEY_PEM).unwrap();
        assert!(matches!(
            IpMediator.publish(DOCUMENT.as_bytes(), &only_key),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_key_presence_matrix() {
        let unsigned = DOCUMENT.as_bytes();
        let signed = IpMediator.publish(unsigned, &ec_keys()).unwrap();
        let verifier = KeyHandle::unsigned().with_certificate_pem(testdata::EC_CERT_PEM);

        assert!(IpMediator.fetch(unsigned, &KeyHandle::unsigned()).is_ok());
        assert!(matches!(
            IpMediator.fetch(signed.as_slice(), &KeyHandle::unsigned()),
            Err(Error::Authentication(_))
        ));
        assert!(matches!(
            IpMediator.fetch(unsigned, &verifier),
            Err(Error::Authentication(_))
        ));
        assert!(IpMediator.fetch(signed.as_slice(), &verifier).is_ok());
    }

    #[test]
    fn test_missing_app_hdr_is_format_error() {
        let doc = "<hdr:Message xmlns:hdr=\"urn:x\"><hdr:Document>1</hdr:Document></hdr:Message>";
        assert!(matches!(
            IpMediator.publish(doc.as_bytes(), &ec_keys()),
            Err(Error::Format(_))
        ));
    }
}
