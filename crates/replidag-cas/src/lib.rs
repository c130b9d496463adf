// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Content-addressed chunk store for replidag.
//!
//! `replidag-cas` stores immutable [`Chunk`]s keyed by the BLAKE3 hash of their
//! bytes. A chunk may reference other chunks by hash; those references must
//! resolve inside the same store before a write transaction is allowed to
//! commit. Named heads (`main`, `clients`, ...) point into the graph and are the
//! roots for garbage collection.
//!
//! # Hash Domain Policy
//!
//! The chunk hash is content-only: `BLAKE3(data)` with no domain prefix. Two
//! stores that build the same commit produce the same hash, which is what lets an
//! in-memory working copy and a durable copy of the graph share commit identity.
//! References are derived from the data and are not part of the hash.
//!
//! # Transactions
//!
//! [`ChunkStore::write`] hands out at most one [`ChunkWrite`] per store instance
//! at a time; other writers block until it is dropped. Writes are staged and
//! only become visible on [`ChunkWrite::commit`]. Dropping an uncommitted write
//! discards everything it staged.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod chunk;
mod fs;
mod gc;
mod lazy;
mod memory;
mod staging;

pub use chunk::Chunk;
pub use fs::{FsRead, FsStore, FsWrite};
pub use lazy::{LazyRead, LazyStore, LazyWrite, DEFAULT_CACHE_LIMIT_BYTES};
pub use memory::{MemoryRead, MemoryStore, MemoryWrite};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 32-byte BLAKE3 chunk hash.
///
/// Thin newtype over `[u8; 32]`. `Display` renders lowercase hex; serde uses the
/// same hex string so hashes stay readable inside JSON and CBOR records.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkHash(pub [u8; 32]);

impl ChunkHash {
    /// View the hash as a byte array.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a 64-character lowercase or uppercase hex string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] when the input is not 32 bytes of hex.
    pub fn from_hex(s: &str) -> Result<Self, StoreError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| StoreError::Codec(format!("bad chunk hash {s:?}: {e}")))?;
        Ok(Self(out))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short prefix keeps assertion output readable.
        write!(f, "ChunkHash({})", &self.to_hex()[..12])
    }
}

impl Serialize for ChunkHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChunkHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Compute the BLAKE3 content hash of `bytes`.
pub fn chunk_hash(bytes: &[u8]) -> ChunkHash {
    ChunkHash(*blake3::hash(bytes).as_bytes())
}

/// Errors raised by chunk stores.
///
/// Every variant except [`StoreError::Io`] is an integrity failure: the
/// transaction that hit it is aborted and nothing it staged becomes visible.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A chunk that must exist is not present in the store.
    #[error("[CHUNK_NOT_FOUND] {0}")]
    ChunkNotFound(ChunkHash),
    /// A staged chunk references a hash that is not in the store.
    #[error("[DANGLING_REF] chunk {chunk} references missing chunk {missing}")]
    DanglingRef {
        /// The chunk holding the reference.
        chunk: ChunkHash,
        /// The referenced hash that could not be resolved.
        missing: ChunkHash,
    },
    /// A head would point at a chunk that is not in the store.
    #[error("[DANGLING_HEAD] head {name:?} points at missing chunk {hash}")]
    DanglingHead {
        /// Head name.
        name: String,
        /// Target hash.
        hash: ChunkHash,
    },
    /// Chunk bytes did not match their declared hash.
    #[error("[HASH_MISMATCH] expected {expected}, computed {computed}")]
    HashMismatch {
        /// The hash that was declared.
        expected: ChunkHash,
        /// The hash computed from the bytes.
        computed: ChunkHash,
    },
    /// Chunk payload could not be encoded or decoded.
    #[error("[CODEC] {0}")]
    Codec(String),
    /// Underlying storage failed.
    #[error("[IO] {0}")]
    Io(#[from] std::io::Error),
}

/// Read access to a chunk store.
pub trait ChunkRead {
    /// Fetch a chunk. Absence is not an error at this layer.
    fn get_chunk(&self, hash: &ChunkHash) -> Result<Option<Chunk>, StoreError>;

    /// Resolve a named head.
    fn get_head(&self, name: &str) -> Result<Option<ChunkHash>, StoreError>;

    /// Check existence without decoding.
    fn has_chunk(&self, hash: &ChunkHash) -> Result<bool, StoreError> {
        Ok(self.get_chunk(hash)?.is_some())
    }

    /// Fetch a chunk that the caller knows must exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ChunkNotFound`] if the chunk is absent.
    fn must_get_chunk(&self, hash: &ChunkHash) -> Result<Chunk, StoreError> {
        self.get_chunk(hash)?
            .ok_or(StoreError::ChunkNotFound(*hash))
    }
}

/// A write transaction. Reads observe the transaction's own staged writes.
pub trait ChunkWrite: ChunkRead {
    /// Stage a chunk. Putting a chunk that already exists is a no-op.
    fn put_chunk(&mut self, chunk: Chunk) -> Result<(), StoreError>;

    /// Stage a head move.
    fn set_head(&mut self, name: &str, hash: ChunkHash) -> Result<(), StoreError>;

    /// Stage a head removal.
    fn remove_head(&mut self, name: &str) -> Result<(), StoreError>;

    /// Validate and apply everything staged so far.
    ///
    /// # Errors
    ///
    /// [`StoreError::DanglingRef`] / [`StoreError::DanglingHead`] when the
    /// staged graph does not resolve; nothing is applied in that case.
    fn commit(&mut self) -> Result<(), StoreError>;
}

/// A store that hands out read and write transactions.
pub trait ChunkStore: Send + Sync {
    /// Read transaction type.
    type Read<'a>: ChunkRead
    where
        Self: 'a;
    /// Write transaction type.
    type Write<'a>: ChunkWrite
    where
        Self: 'a;

    /// Open a read transaction.
    fn read(&self) -> Result<Self::Read<'_>, StoreError>;

    /// Open the write transaction, waiting for any open writer to finish.
    fn write(&self) -> Result<Self::Write<'_>, StoreError>;
}

/// Run `f` inside a read transaction.
pub fn with_read<'s, S, R, E, F>(store: &'s S, f: F) -> Result<R, E>
where
    S: ChunkStore + ?Sized,
    E: From<StoreError>,
    F: FnOnce(&S::Read<'s>) -> Result<R, E>,
{
    let read = store.read()?;
    f(&read)
}

/// Run `f` inside a write transaction. `f` decides whether to commit; an early
/// return or error drops the transaction and rolls back.
pub fn with_write<'s, S, R, E, F>(store: &'s S, f: F) -> Result<R, E>
where
    S: ChunkStore + ?Sized,
    E: From<StoreError>,
    F: FnOnce(&mut S::Write<'s>) -> Result<R, E>,
{
    let mut write = store.write()?;
    f(&mut write)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let h = chunk_hash(b"replidag");
        assert_eq!(ChunkHash::from_hex(&h.to_hex()).unwrap(), h);
        assert_eq!(h.to_string(), h.to_hex());
    }

    #[test]
    fn from_hex_rejects_short_input() {
        assert!(matches!(
            ChunkHash::from_hex("abcd"),
            Err(StoreError::Codec(_))
        ));
    }

    #[test]
    fn serde_uses_hex_string() {
        let h = chunk_hash(b"x");
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&h, &mut buf).unwrap();
        let s: String = ciborium::de::from_reader(buf.as_slice()).unwrap();
        assert_eq!(s, h.to_hex());
    }
}
