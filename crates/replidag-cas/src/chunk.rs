// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable content-addressed chunk.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::{chunk_hash, ChunkHash, StoreError};

/// An immutable unit of storage: bytes, their hash, and the hashes this chunk
/// keeps alive.
///
/// Cloning is cheap; data and refs are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    hash: ChunkHash,
    data: Arc<[u8]>,
    refs: Arc<[ChunkHash]>,
}

impl Chunk {
    /// Build a chunk from raw bytes, computing its hash.
    pub fn new(data: impl Into<Arc<[u8]>>, refs: impl Into<Arc<[ChunkHash]>>) -> Self {
        let data = data.into();
        Self {
            hash: chunk_hash(&data),
            data,
            refs: refs.into(),
        }
    }

    /// Build a chunk whose hash was computed elsewhere (e.g. loaded from disk),
    /// rejecting it if the bytes disagree.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::HashMismatch`] if `BLAKE3(data) != expected`.
    pub fn from_parts_verified(
        expected: ChunkHash,
        data: impl Into<Arc<[u8]>>,
        refs: impl Into<Arc<[ChunkHash]>>,
    ) -> Result<Self, StoreError> {
        let chunk = Self::new(data, refs);
        if chunk.hash != expected {
            return Err(StoreError::HashMismatch {
                expected,
                computed: chunk.hash,
            });
        }
        Ok(chunk)
    }

    /// Encode `value` as CBOR and wrap it in a chunk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] if serialization fails.
    pub fn encode<T: Serialize + ?Sized>(
        value: &T,
        refs: impl Into<Arc<[ChunkHash]>>,
    ) -> Result<Self, StoreError> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(value, &mut bytes)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok(Self::new(bytes, refs))
    }

    /// Decode the chunk's CBOR payload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] if the bytes are not a valid `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        ciborium::de::from_reader(&*self.data)
            .map_err(|e| StoreError::Codec(format!("chunk {}: {e}", self.hash)))
    }

    /// Content hash.
    pub fn hash(&self) -> ChunkHash {
        self.hash
    }

    /// Raw payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Outgoing references.
    pub fn refs(&self) -> &[ChunkHash] {
        &self.refs
    }

    /// Shared handle to the refs, for traversal without copying.
    pub(crate) fn refs_arc(&self) -> Arc<[ChunkHash]> {
        Arc::clone(&self.refs)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("hash", &self.hash)
            .field("len", &self.data.len())
            .field("refs", &self.refs)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_refs() {
        let a = Chunk::new(b"same".to_vec(), Vec::new());
        let b = Chunk::new(b"same".to_vec(), vec![chunk_hash(b"other")]);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn verified_parts_reject_tampered_bytes() {
        let good = Chunk::new(b"payload".to_vec(), Vec::new());
        let err = Chunk::from_parts_verified(good.hash(), b"tampered".to_vec(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { expected, .. } if expected == good.hash()));
    }

    #[test]
    fn encode_decode_cbor() {
        let chunk = Chunk::encode(&vec!["a".to_string(), "b".to_string()], Vec::new()).unwrap();
        let back: Vec<String> = chunk.decode().unwrap();
        assert_eq!(back, vec!["a", "b"]);
    }

    #[test]
    fn decode_wrong_type_is_codec_error() {
        let chunk = Chunk::encode(&42u64, Vec::new()).unwrap();
        assert!(matches!(chunk.decode::<Vec<String>>(), Err(StoreError::Codec(_))));
    }
}
