//! Byte encoding of ids and message payloads.
//!
//! Messages rest in the stores in encoded form and are decoded on drain, so
//! a batch arriving off the wire can be spliced in by raw byte copy without
//! a deserialise/reserialise round trip. [`EncodedQueue`] is the per-vertex
//! buffer behind that: appended encodings, a message count, and a growth cap
//! whose violation surfaces as `PayloadTooLarge`.

use crate::error::{EngineError, Result};
use bincode::config;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode one value to a standalone byte string.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(encode_to_vec(value, config::standard())?)
}

/// Decode one value from the front of `bytes`, returning it together with
/// the number of bytes consumed.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize)> {
    Ok(decode_from_slice(bytes, config::standard())?)
}

/// Decode a whole buffer of `count` back-to-back encodings.
pub fn decode_all<T: DeserializeOwned>(bytes: &[u8], count: usize) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(count);
    let mut pos = 0;
    while out.len() < count {
        if pos >= bytes.len() {
            return Err(EngineError::StoreIo(format!(
                "buffer exhausted after {} of {count} messages",
                out.len()
            )));
        }
        let (value, used) = decode::<T>(&bytes[pos..])?;
        pos += used;
        out.push(value);
    }
    Ok(out)
}

/// Append-only buffer of encoded messages for one destination vertex.
///
/// Append order is preserved; a drain leaves the queue empty so later
/// appends start a fresh one. Growth past `limit` fails the append without
/// touching the buffer, so a rejected message cannot corrupt what is
/// already queued.
#[derive(Debug)]
pub struct EncodedQueue {
    buf: Vec<u8>,
    count: usize,
    limit: usize,
}

impl EncodedQueue {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            count: 0,
            limit,
        }
    }

    /// Encode and append one message.
    pub fn push<M: Serialize>(&mut self, msg: &M) -> Result<()> {
        let bytes = encode(msg)?;
        self.push_raw(&bytes, 1)
    }

    /// Append `count` already-encoded messages by raw byte copy.
    pub fn push_raw(&mut self, bytes: &[u8], count: usize) -> Result<()> {
        if self.buf.len().saturating_add(bytes.len()) > self.limit {
            return Err(EngineError::PayloadTooLarge { limit: self.limit });
        }
        self.buf.extend_from_slice(bytes);
        self.count += count;
        Ok(())
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Take the buffer and count, leaving the queue empty.
    pub fn take(&mut self) -> (Vec<u8>, usize) {
        let count = std::mem::take(&mut self.count);
        (std::mem::take(&mut self.buf), count)
    }

    /// Borrow the raw buffer (for snapshot reads).
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_append_order() {
        let mut q = EncodedQueue::with_limit(1024);
        q.push(&1u64).unwrap();
        q.push(&2u64).unwrap();
        q.push(&3u64).unwrap();
        let (bytes, count) = q.take();
        assert_eq!(decode_all::<u64>(&bytes, count).unwrap(), vec![1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn overflow_leaves_queue_intact() {
        let mut q = EncodedQueue::with_limit(12);
        q.push(&7u64).unwrap();
        let before = q.bytes().to_vec();
        let err = q.push(&[0u8; 64].to_vec()).unwrap_err();
        assert!(matches!(err, EngineError::PayloadTooLarge { .. }));
        assert_eq!(q.bytes(), &before[..]);
        assert_eq!(q.len(), 1);
    }
}
