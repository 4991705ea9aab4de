//! Strict-format PDU framing
//!
//! Wire layout, bit-exact:
//!
//! ```text
//! byte 0        0x1F frame prefix
//! bytes 1..7    ASCII decimal length of signature+payload, zero-left-padded
//! bytes 7..31   24-byte signature slot: NUL-filled when unsigned, else the
//!               Base64 encoding of the HMAC-SHA256 of the payload truncated
//!               to 16 bytes
//! bytes 31..    payload
//! ```

use crate::buffer::ManagedBuffer;
use crate::keys::KeyHandle;
use crate::{Error, Result};

/// Frame prefix byte
pub const FRAME_PREFIX: u8 = 0x1F;
/// Width of the ASCII decimal length field
pub const LENGTH_FIELD_LEN: usize = 6;
/// Width of the signature slot
pub const SIGNATURE_SLOT_LEN: usize = 24;
/// Total header length preceding the payload
pub const HEADER_LEN: usize = 1 + LENGTH_FIELD_LEN + SIGNATURE_SLOT_LEN;

const MAX_DECLARED_LEN: usize = 999_999;

/// Mediator for strict-format PDUs
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictFormatMediator;

impl StrictFormatMediator {
    /// Strict framing recognition: prefix byte, a payload that starts at
    /// byte 31 with `<` and a final `>`
    pub fn is_strict_framed(input: &[u8]) -> bool {
        input.len() > HEADER_LEN
            && input[0] == FRAME_PREFIX
            && input[HEADER_LEN] == b'<'
            && input[input.len() - 1] == b'>'
    }

    /// Strip the frame and verify the signature slot. Non-strict input
    /// passes through unmodified.
    pub fn fetch(&self, input: &[u8], key: &KeyHandle) -> Result<ManagedBuffer> {
        if !Self::is_strict_framed(input) {
            return Ok(ManagedBuffer::from(input));
        }

        let length_field = std::str::from_utf8(&input[1..1 + LENGTH_FIELD_LEN])
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| Error::Format("PDU length field is not decimal".to_string()))?;
        let declared: usize = length_field
            .parse()
            .map_err(|_| Error::Format("PDU length field is not decimal".to_string()))?;

        let payload = &input[HEADER_LEN..];
        if declared != SIGNATURE_SLOT_LEN + payload.len() {
            return Err(Error::Format(format!(
                "PDU length field {} does not match signature+payload length {}",
                declared,
                SIGNATURE_SLOT_LEN + payload.len()
            )));
        }

        let slot = &input[1 + LENGTH_FIELD_LEN..HEADER_LEN];
        let signed = slot.iter().any(|byte| *byte != 0);
        match (key.mac_signer(), signed) {
            (None, false) => Ok(ManagedBuffer::from(payload)),
            (None, true) => Err(Error::Authentication(
                "unexpected PDU signature: no signing key configured".to_string(),
            )),
            (Some(_), false) => Err(Error::Authentication(
                "PDU signature required but absent".to_string(),
            )),
            (Some(signer), true) => {
                // The slot is compared as raw Base64 ASCII, never decoded.
                let expected = signer.truncated_slot(payload)?;
                if slot != expected.as_slice() {
                    return Err(Error::Authentication("PDU signature mismatch".to_string()));
                }
                Ok(ManagedBuffer::from(payload))
            }
        }
    }

    /// Frame a payload, filling the signature slot per the key-presence rule
    pub fn publish(&self, payload: &[u8], key: &KeyHandle) -> Result<ManagedBuffer> {
        let declared = SIGNATURE_SLOT_LEN + payload.len();
        if declared > MAX_DECLARED_LEN {
            return Err(Error::Format(format!(
                "payload of {} bytes overflows the 6-digit PDU length field",
                payload.len()
            )));
        }

        let mut out = ManagedBuffer::allocate(HEADER_LEN + payload.len());
        out.put_u8(FRAME_PREFIX);
        out.put_slice(format!("{:06}", declared).as_bytes());
        match key.mac_signer() {
            Some(signer) => out.put_slice(&signer.truncated_slot(payload)?),
            None => out.put_slice(&[0u8; SIGNATURE_SLOT_LEN]),
        }
        out.put_slice(payload);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keyed() -> KeyHandle {
        KeyHandle::from_secret(b"secret".to_vec())
    }

    fn payload_100() -> Vec<u8> {
        let mut payload = vec![b'<'];
        payload.extend(std::iter::repeat(b'x').take(98));
        payload.push(b'>');
        payload
    }

    #[test]
    fn test_unsigned_publish_layout() {
        let mediator = StrictFormatMediator;
        let framed = mediator.publish(&payload_100(), &KeyHandle::unsigned()).unwrap();
        let bytes = framed.as_slice();
        assert_eq!(bytes.len(), 131);
        assert_eq!(bytes[0], 0x1F);
        assert_eq!(&bytes[1..7], b"000124");
        assert!(bytes[7..31].iter().all(|b| *b == 0));
        assert_eq!(&bytes[31..], payload_100().as_slice());
    }

    #[test]
    fn test_signed_roundtrip() {
        let mediator = StrictFormatMediator;
        let key = keyed();
        let framed = mediator.publish(&payload_100(), &key).unwrap();
        // Known slot for payload <x*98> under key "secret".
        assert_eq!(&framed.as_slice()[7..31], b"Nosn43G2LaDFIFbPuXlwSA==");
        let fetched = mediator.fetch(framed.as_slice(), &key).unwrap();
        assert_eq!(fetched.as_slice(), payload_100().as_slice());
    }

    #[test]
    fn test_key_presence_matrix() {
        let mediator = StrictFormatMediator;
        let unsigned = mediator.publish(&payload_100(), &KeyHandle::unsigned()).unwrap();
        let signed = mediator.publish(&payload_100(), &keyed()).unwrap();

        // no key / unsigned: pass
        assert!(mediator.fetch(unsigned.as_slice(), &KeyHandle::unsigned()).is_ok());
        // no key / signed: reject
        assert!(matches!(
            mediator.fetch(signed.as_slice(), &KeyHandle::unsigned()),
            Err(Error::Authentication(_))
        ));
        // key / unsigned: reject
        assert!(matches!(
            mediator.fetch(unsigned.as_slice(), &keyed()),
            Err(Error::Authentication(_))
        ));
        // key / signed: pass
        assert!(mediator.fetch(signed.as_slice(), &keyed()).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let mediator = StrictFormatMediator;
        let key = keyed();
        let mut framed = mediator.publish(&payload_100(), &key).unwrap().into_vec();
        framed[40] ^= 0x01;
        assert!(matches!(
            mediator.fetch(&framed, &key),
            Err(Error::Authentication(_))
        ));
    }

    #[test]
    fn test_length_mismatch_is_format_error() {
        let mediator = StrictFormatMediator;
        let mut framed = mediator
            .publish(&payload_100(), &KeyHandle::unsigned())
            .unwrap()
            .into_vec();
        framed[6] = b'5';
        assert!(matches!(
            mediator.fetch(&framed, &KeyHandle::unsigned()),
            Err(Error::Format(_))
        ));
        framed[6] = b'Z';
        assert!(matches!(
            mediator.fetch(&framed, &KeyHandle::unsigned()),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_non_strict_input_passes_through() {
        let mediator = StrictFormatMediator;
        let fetched = mediator.fetch(b"{1:plain fin text}", &keyed()).unwrap();
        assert_eq!(fetched.as_slice(), b"{1:plain fin text}");
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mediator = StrictFormatMediator;
        let payload = vec![b'x'; MAX_DECLARED_LEN];
        assert!(matches!(
            mediator.publish(&payload, &KeyHandle::unsigned()),
            Err(Error::Format(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_length_field_invariant(body in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let mut payload = vec![b'<'];
            payload.extend(body);
            payload.push(b'>');
            let framed = StrictFormatMediator
                .publish(&payload, &keyed())
                .unwrap();
            let declared: usize = std::str::from_utf8(&framed.as_slice()[1..7])
                .unwrap()
                .parse()
                .unwrap();
            prop_assert_eq!(declared, SIGNATURE_SLOT_LEN + payload.len());
        }

        #[test]
        fn prop_roundtrip(body in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let mut payload = vec![b'<'];
            payload.extend(body);
            payload.push(b'>');
            let mediator = StrictFormatMediator;
            let key = keyed();
            let framed = mediator.publish(&payload, &key).unwrap();
            let fetched = mediator.fetch(framed.as_slice(), &key).unwrap();
            prop_assert_eq!(fetched.as_slice(), payload.as_slice());
        }
    }
}
