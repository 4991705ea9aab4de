//! FIN trailer-signature scheme
//!
//! A FIN message is text (`{1:...}{2:...}{4:...}`) optionally terminated by
//! a trailer block `{S:...{MDG:<hex>}}`. The MDG digest is the upper-case
//! hex HMAC-SHA256 of everything preceding the final `{S:` marker. The
//! presence of `{MDG:` implies a mandatory key; its absence with a
//! configured key is an authentication failure.

use crate::buffer::ManagedBuffer;
use crate::crypto::MacSigner;
use crate::keys::KeyHandle;
use crate::{Error, Result};

const TRAILER_OPEN: &str = "{S:";
const MDG_OPEN: &str = "{MDG:";
const DIGEST_LEN: usize = 64;

/// Mediator for FIN text messages
#[derive(Debug, Clone, Copy, Default)]
pub struct FinMediator;

impl FinMediator {
    /// FIN recognition: a leading `{nnn:` block tag (1–3 digits)
    pub fn is_fin_text(input: &[u8]) -> bool {
        if input.first() != Some(&b'{') {
            return false;
        }
        let digits = input[1..]
            .iter()
            .take_while(|byte| byte.is_ascii_digit())
            .count();
        (1..=3).contains(&digits) && input.get(1 + digits) == Some(&b':')
    }

    /// Verify and strip the MDG trailer digest
    pub fn fetch(&self, input: &[u8], key: &KeyHandle) -> Result<ManagedBuffer> {
        let text = std::str::from_utf8(input)
            .map_err(|_| Error::Format("FIN message is not valid text".to_string()))?;
        let trailer = locate_digest_block(text)?;
        match (key.mac_signer(), trailer) {
            (None, None) => Ok(ManagedBuffer::from(input)),
            (None, Some(_)) => Err(Error::Authentication(
                "unexpected MDG trailer: no signing key configured".to_string(),
            )),
            (Some(_), None) => Err(Error::Authentication(
                "MDG trailer required but absent".to_string(),
            )),
            (Some(signer), Some(block)) => {
                let computed = signer.digest_hex_upper(text[..block.trailer_pos].as_bytes())?;
                if computed != block.digest {
                    return Err(Error::Authentication(
                        "MDG trailer digest mismatch".to_string(),
                    ));
                }
                Ok(ManagedBuffer::from(strip_digest_block(text, &block)))
            }
        }
    }

    /// Insert or append the MDG trailer digest
    pub fn publish(&self, input: &[u8], key: &KeyHandle) -> Result<ManagedBuffer> {
        let signer = match key.mac_signer() {
            None => return Ok(ManagedBuffer::from(input)),
            Some(signer) => signer,
        };
        let text = std::str::from_utf8(input)
            .map_err(|_| Error::Format("FIN message is not valid text".to_string()))?;
        Ok(ManagedBuffer::from(append_digest(text, &signer)?))
    }
}

/// A located `{MDG:<hex>}` block and the `{S:` marker owning it
pub(crate) struct DigestBlock<'a> {
    /// Offset of the final `{S:` marker; the digest covers the text before it
    pub trailer_pos: usize,
    /// Offset of the `{MDG:` tag
    pub mdg_pos: usize,
    /// The 64 hex digest characters
    pub digest: &'a str,
}

pub(crate) fn locate_digest_block(text: &str) -> Result<Option<DigestBlock<'_>>> {
    let mdg_pos = match text.rfind(MDG_OPEN) {
        None => return Ok(None),
        Some(pos) => pos,
    };
    let trailer_pos = text[..mdg_pos]
        .rfind(TRAILER_OPEN)
        .ok_or_else(|| Error::Format("MDG digest block outside an S block".to_string()))?;
    let digest_start = mdg_pos + MDG_OPEN.len();
    let digest_end = digest_start + DIGEST_LEN;
    if text.len() <= digest_end {
        return Err(Error::Format("truncated MDG digest block".to_string()));
    }
    let digest = &text[digest_start..digest_end];
    if !digest.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(Error::Format("MDG digest is not hexadecimal".to_string()));
    }
    if text.as_bytes()[digest_end] != b'}' {
        return Err(Error::Format("unterminated MDG digest block".to_string()));
    }
    Ok(Some(DigestBlock {
        trailer_pos,
        mdg_pos,
        digest,
    }))
}

pub(crate) fn strip_digest_block(text: &str, block: &DigestBlock<'_>) -> String {
    let mdg_end = block.mdg_pos + MDG_OPEN.len() + DIGEST_LEN + 1;
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..block.mdg_pos]);
    out.push_str(&text[mdg_end..]);
    // A trailer we created ourselves collapses to `{S:}`; remove it so the
    // original message comes back byte-exact.
    if out.ends_with("{S:}") && out.len() - 4 == block.trailer_pos {
        out.truncate(block.trailer_pos);
    }
    out
}

pub(crate) fn append_digest(text: &str, signer: &MacSigner) -> Result<String> {
    if let Some(trailer_pos) = ends_with_s_block(text) {
        // Existing trailing {S:...} block: insert the digest right before
        // its final closing brace.
        let digest = signer.digest_hex_upper(text[..trailer_pos].as_bytes())?;
        let mut out = String::with_capacity(text.len() + MDG_OPEN.len() + DIGEST_LEN + 2);
        out.push_str(&text[..text.len() - 1]);
        out.push_str(MDG_OPEN);
        out.push_str(&digest);
        out.push_str("}}");
        Ok(out)
    } else {
        let digest = signer.digest_hex_upper(text.as_bytes())?;
        Ok(format!("{}{}{}{}{}", text, "{S:", MDG_OPEN, digest, "}}"))
    }
}

/// Whether the message ends with a complete `{S:...}` block; returns the
/// block's start offset
fn ends_with_s_block(text: &str) -> Option<usize> {
    let trailer_pos = text.rfind(TRAILER_OPEN)?;
    let mut depth = 0usize;
    for (i, byte) in text[trailer_pos..].bytes().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return (trailer_pos + i == text.len() - 1).then_some(trailer_pos);
                }
            }
            _ => {}
        }
    }
    None
}
