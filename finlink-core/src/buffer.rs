//! Owned message buffers passed between fetch and publish stages
//!
//! A [`ManagedBuffer`] is exclusively owned by whichever stage currently
//! holds it; ownership transfers by move (or an explicit copy), never by
//! aliasing another buffer's storage.

use bytes::{BufMut, BytesMut};

/// Owned, resizable byte buffer for wire frames and payloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedBuffer {
    data: BytesMut,
}

impl ManagedBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self { data: BytesMut::new() }
    }

    /// Create an empty buffer with pre-allocated capacity
    pub fn allocate(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Replace the buffer contents with a copy of `src`
    pub fn copy_from(&mut self, src: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(src);
    }

    /// Append bytes to the buffer
    pub fn put_slice(&mut self, src: &[u8]) {
        self.data.put_slice(src);
    }

    /// Append a single byte
    pub fn put_u8(&mut self, byte: u8) {
        self.data.put_u8(byte);
    }

    /// View the current contents
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Current size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the buffer, yielding its bytes
    pub fn into_vec(self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl From<Vec<u8>> for ManagedBuffer {
    fn from(v: Vec<u8>) -> Self {
        Self {
            data: BytesMut::from(&v[..]),
        }
    }
}

impl From<&[u8]> for ManagedBuffer {
    fn from(v: &[u8]) -> Self {
        Self {
            data: BytesMut::from(v),
        }
    }
}

impl From<String> for ManagedBuffer {
    fn from(s: String) -> Self {
        Self {
            data: BytesMut::from(s.as_bytes()),
        }
    }
}

impl AsRef<[u8]> for ManagedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_from_replaces_contents() {
        let mut buf = ManagedBuffer::allocate(16);
        buf.copy_from(b"first");
        assert_eq!(buf.as_slice(), b"first");
        buf.copy_from(b"second payload");
        assert_eq!(buf.as_slice(), b"second payload");
        assert_eq!(buf.len(), 14);
    }

    #[test]
    fn test_append() {
        let mut buf = ManagedBuffer::new();
        buf.put_u8(0x1F);
        buf.put_slice(b"000124");
        assert_eq!(buf.len(), 7);
        assert_eq!(buf.as_slice()[0], 0x1F);
    }

    #[test]
    fn test_ownership_transfer_by_move() {
        let buf = ManagedBuffer::from(b"payload".as_slice());
        let v = buf.into_vec();
        assert_eq!(v, b"payload");
    }
}
