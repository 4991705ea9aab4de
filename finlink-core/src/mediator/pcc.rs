//! PCC print-control envelope
//!
//! The envelope is delimited by ASCII SOH (0x01) and ETX (0x03) control
//! bytes: `\x01<message>{S:...{MDG:<hex>}}\x03`. The MDG digest covers
//! exactly the `<message>` span. Published envelopes are right-padded with
//! spaces to the next 512-byte boundary.

use super::fin::locate_digest_block;
use crate::buffer::ManagedBuffer;
use crate::keys::KeyHandle;
use crate::{Error, Result};

/// Start-of-heading delimiter
pub const SOH: u8 = 0x01;
/// End-of-text delimiter
pub const ETX: u8 = 0x03;
/// Published envelopes are padded to a multiple of this size
pub const BLOCK_SIZE: usize = 512;

/// Mediator for PCC envelopes
#[derive(Debug, Clone, Copy, Default)]
pub struct PccMediator;

impl PccMediator {
    /// Extract and verify the enveloped message
    pub fn fetch(&self, input: &[u8], key: &KeyHandle) -> Result<ManagedBuffer> {
        let soh = input
            .iter()
            .position(|byte| *byte == SOH)
            .ok_or_else(|| Error::Format("PCC envelope has no SOH delimiter".to_string()))?;
        let etx = input
            .iter()
            .rposition(|byte| *byte == ETX)
            .ok_or_else(|| Error::Format("PCC envelope has no ETX delimiter".to_string()))?;
        if etx <= soh {
            return Err(Error::Format(
                "PCC ETX delimiter precedes SOH".to_string(),
            ));
        }

        let inner = &input[soh + 1..etx];
        let text = std::str::from_utf8(inner)
            .map_err(|_| Error::Format("PCC message is not valid text".to_string()))?;

        match (key.mac_signer(), locate_digest_block(text)?) {
            // Bare span without a hash block and no key configured.
            (None, None) => Ok(ManagedBuffer::from(inner)),
            (None, Some(_)) => Err(Error::Authentication(
                "unexpected MDG trailer: no signing key configured".to_string(),
            )),
            (Some(_), None) => Err(Error::Authentication(
                "MDG trailer required but absent".to_string(),
            )),
            (Some(signer), Some(block)) => {
                let message = &text[..block.trailer_pos];
                let computed = signer.digest_hex_upper(message.as_bytes())?;
                if computed != block.digest {
                    return Err(Error::Authentication(
                        "MDG trailer digest mismatch".to_string(),
                    ));
                }
                Ok(ManagedBuffer::from(message.as_bytes()))
            }
        }
    }

    /// Envelope the message, then pad with spaces to the block boundary
    pub fn publish(&self, payload: &[u8], key: &KeyHandle) -> Result<ManagedBuffer> {
        let mut out = Vec::with_capacity(payload.len() + BLOCK_SIZE);
        out.push(SOH);
        out.extend_from_slice(payload);
        if let Some(signer) = key.mac_signer() {
            let text = std::str::from_utf8(payload)
                .map_err(|_| Error::Format("PCC message is not valid text".to_string()))?;
            let digest = signer.digest_hex_upper(text.as_bytes())?;
            out.extend_from_slice(b"{S:{MDG:");
            out.extend_from_slice(digest.as_bytes());
            out.extend_from_slice(b"}}");
        }
        out.push(ETX);
        while out.len() % BLOCK_SIZE != 0 {
            out.push(b' ');
        }
        Ok(ManagedBuffer::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MESSAGE: &[u8] = b"PCCMESSAGE-0001";

    fn keyed() -> KeyHandle {
        KeyHandle::from_secret(b"k1".to_vec())
    }

    #[test]
    fn test_publish_layout_and_padding() {
        let published = PccMediator.publish(MESSAGE, &keyed()).unwrap();
        let bytes = published.as_slice();
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);
        assert_eq!(bytes[0], SOH);
        let text = std::str::from_utf8(&bytes[1..]).unwrap();
        // Known digest of the message under key "k1".
        assert!(text.starts_with(
            "PCCMESSAGE-0001{S:{MDG:4296B8191CDF82F0787C02D672FB7ED733BD2888D63C3F4997B5B657A7D6D664}}\x03"
        ));
        assert!(bytes[bytes.len() - 1] == b' ' || bytes[bytes.len() - 1] == ETX);
    }

    #[test]
    fn test_roundtrip_signed() {
        let published = PccMediator.publish(MESSAGE, &keyed()).unwrap();
        let fetched = PccMediator.fetch(published.as_slice(), &keyed()).unwrap();
        assert_eq!(fetched.as_slice(), MESSAGE);
    }

    #[test]
    fn test_roundtrip_unsigned() {
        let published = PccMediator.publish(MESSAGE, &KeyHandle::unsigned()).unwrap();
        assert_eq!(published.len() % BLOCK_SIZE, 0);
        let fetched = PccMediator
            .fetch(published.as_slice(), &KeyHandle::unsigned())
            .unwrap();
        assert_eq!(fetched.as_slice(), MESSAGE);
    }

    #[test]
    fn test_key_presence_matrix() {
        let unsigned = PccMediator.publish(MESSAGE, &KeyHandle::unsigned()).unwrap();
        let signed = PccMediator.publish(MESSAGE, &keyed()).unwrap();

        assert!(PccMediator
            .fetch(unsigned.as_slice(), &KeyHandle::unsigned())
            .is_ok());
        assert!(matches!(
            PccMediator.fetch(signed.as_slice(), &KeyHandle::unsigned()),
            Err(Error::Authentication(_))
        ));
        assert!(matches!(
            PccMediator.fetch(unsigned.as_slice(), &keyed()),
            Err(Error::Authentication(_))
        ));
        assert!(PccMediator.fetch(signed.as_slice(), &keyed()).is_ok());
    }

    #[test]
    fn test_tampered_message_rejected() {
        let published = PccMediator.publish(MESSAGE, &keyed()).unwrap();
        let mut tampered = published.into_vec();
        tampered[3] ^= 0x01;
        assert!(matches!(
            PccMediator.fetch(&tampered, &keyed()),
            Err(Error::Authentication(_))
        ));
    }

    #[test]
    fn test_missing_delimiters() {
        assert!(matches!(
            PccMediator.fetch(b"no delimiters here", &keyed()),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            PccMediator.fetch(b"\x01unterminated", &keyed()),
            Err(Error::Format(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_output_is_block_aligned(len in 0usize..2000) {
            let payload = vec![b'M'; len];
            let published = PccMediator.publish(&payload, &keyed()).unwrap();
            prop_assert_eq!(published.len() % BLOCK_SIZE, 0);
        }

        #[test]
        fn prop_roundtrip(payload in "[ -~]{1,600}") {
            let published = PccMediator.publish(payload.as_bytes(), &keyed()).unwrap();
            let fetched = PccMediator.fetch(published.as_slice(), &keyed()).unwrap();
            prop_assert_eq!(fetched.as_slice(), payload.as_bytes());
        }
    }
}
