//! MX (ISO 20022) local-authentication scheme
//!
//! An MX document carries a `<LAU>` element holding an XML-DSig tree whose
//! `SignedInfo` is HMAC-SHA256 signed over its exclusive-c14n form. Three
//! checks run in order on fetch, each naming its stage on failure:
//!
//! 1. the transport's `payload-digest` hint against the SHA-256 of the
//!    canonicalized document as received,
//! 2. the HMAC of the canonical `ds:SignedInfo` against
//!    `ds:SignatureValue`,
//! 3. the SHA-256 of the document canonicalized with `<LAU>` absent against
//!    `ds:DigestValue`.
//!
//! The `<LAU>` exclusion is a parameter of the canonicalizer, so the digest
//! is always computed with the signature container absent, never by
//! serializing a mutated tree.

use crate::buffer::ManagedBuffer;
use crate::c14n::{canonicalize_document, canonicalize_subtree};
use crate::crypto::sha256_base64;
use crate::keys::KeyHandle;
use crate::xml::{XmlDocument, XmlElement};
use crate::{Error, Result};

const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const C14N_ALGORITHM: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const HMAC_SHA256_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#hmac-sha256";
const SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Mediator for MX documents with `<LAU>` authentication
#[derive(Debug, Clone, Copy, Default)]
pub struct MxMediator;

impl MxMediator {
    /// Verify the document digests and signature, returning the document
    /// with the `<LAU>` element removed
    pub fn fetch(
        &self,
        input: &[u8],
        key: &KeyHandle,
        digest_hint: Option<&str>,
    ) -> Result<ManagedBuffer> {
        let text = std::str::from_utf8(input)
            .map_err(|_| Error::Format("MX document is not valid UTF-8".to_string()))?;
        let doc = XmlDocument::parse(text)?;

        let hint = digest_hint.ok_or_else(|| {
            Error::Format("payload digest header required for MX fetch".to_string())
        })?;
        let canonical = canonicalize_document(&doc, None)?;
        if sha256_base64(&canonical) != hint {
            return Err(Error::Authentication(
                "MX payload digest mismatch".to_string(),
            ));
        }

        let lau = doc.find("LAU");
        match (key.mac_signer(), lau) {
            (None, None) => Ok(ManagedBuffer::from(input)),
            (None, Some(_)) => Err(Error::Authentication(
                "unexpected LAU signature: no signing key configured".to_string(),
            )),
            (Some(_), None) => Err(Error::Authentication(
                "LAU signature required but absent".to_string(),
            )),
            (Some(signer), Some(lau)) => {
                let parts = SignatureParts::locate(lau)?;
                let canonical_signed_info = canonicalize_subtree(&doc, parts.signed_info)?;
                let expected = signer.digest_base64(&canonical_signed_info)?;
                if expected != parts.signature_value {
                    return Err(Error::Authentication(
                        "LAU signature value mismatch".to_string(),
                    ));
                }

                let canonical_without_lau = canonicalize_document(&doc, Some(lau))?;
                if sha256_base64(&canonical_without_lau) != parts.digest_value {
                    return Err(Error::Authentication(
                        "MX document digest mismatch".to_string(),
                    ));
                }

                Ok(ManagedBuffer::from(doc.without_span(&lau.span)))
            }
        }
    }

    /// Digest and sign the document, appending the `<LAU>` signature tree
    /// before the root closing tag
    pub fn publish(&self, input: &[u8], key: &KeyHandle) -> Result<ManagedBuffer> {
        let signer = match key.mac_signer() {
            None => return Ok(ManagedBuffer::from(input)),
            Some(signer) => signer,
        };
        let text = std::str::from_utf8(input)
            .map_err(|_| Error::Format("MX document is not valid UTF-8".to_string()))?;
        let doc = XmlDocument::parse(text)?;

        let canonical = canonicalize_document(&doc, None)?;
        let digest = sha256_base64(&canonical);
        let signed_info = build_signed_info(HMAC_SHA256_ALGORITHM, &digest);

        let signed_info_doc = XmlDocument::parse(&signed_info)?;
        let canonical_signed_info = canonicalize_document(&signed_info_doc, None)?;
        let signature_value = signer.digest_base64(&canonical_signed_info)?;

        let lau = format!(
            "<LAU><ds:Signature xmlns:ds=\"{}\">{}<ds:SignatureValue>{}</ds:SignatureValue></ds:Signature></LAU>",
            DS_NS, signed_info, signature_value
        );
        let offset = doc.insertion_point(doc.root())?;
        Ok(ManagedBuffer::from(doc.with_fragment_at(offset, &lau)))
    }
}

/// The three XML-DSig leaves every verification needs
pub(crate) struct SignatureParts<'a> {
    pub signed_info: &'a XmlElement,
    pub signature_value: String,
    pub digest_value: String,
}

impl<'a> SignatureParts<'a> {
    pub fn locate(container: &'a XmlElement) -> Result<SignatureParts<'a>> {
        let signature = container
            .find("Signature")
            .ok_or_else(|| Error::Format("signature container has no Signature element".to_string()))?;
        let signed_info = signature
            .find("SignedInfo")
            .ok_or_else(|| Error::Format("Signature has no SignedInfo element".to_string()))?;
        let signature_value = signature
            .find("SignatureValue")
            .ok_or_else(|| Error::Format("Signature has no SignatureValue element".to_string()))?
            .text_content()
            .trim()
            .to_string();
        let digest_value = signed_info
            .find("DigestValue")
            .ok_or_else(|| Error::Format("SignedInfo has no DigestValue element".to_string()))?
            .text_content()
            .trim()
            .to_string();
        Ok(SignatureParts {
            signed_info,
            signature_value,
            digest_value,
        })
    }
}

/// Canonical-form `ds:SignedInfo` referencing the whole document
pub(crate) fn build_signed_info(signature_algorithm: &str, digest: &str) -> String {
    format!(
        concat!(
            "<ds:SignedInfo xmlns:ds=\"{ns}\">",
            "<ds:CanonicalizationMethod Algorithm=\"{c14n}\"></ds:CanonicalizationMethod>",
            "<ds:SignatureMethod Algorithm=\"{sig}\"></ds:SignatureMethod>",
            "<ds:Reference URI=\"\">",
            "<ds:DigestMethod Algorithm=\"{dig}\"></ds:DigestMethod>",
            "<ds:DigestValue>{value}</ds:DigestValue>",
            "</ds:Reference>",
            "</ds:SignedInfo>"
        ),
        ns = DS_NS,
        c14n = C14N_ALGORITHM,
        sig = signature_algorithm,
        dig = SHA256_ALGORITHM,
        value = digest,
    )
}
