// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Staged (uncommitted) writes shared by every backend's write transaction.

use std::collections::{BTreeMap, HashMap};

use crate::{Chunk, ChunkHash, StoreError};

/// Chunks and head moves buffered by an open write transaction.
///
/// A head entry of `None` records a removal.
#[derive(Default)]
pub(crate) struct Staging {
    chunks: HashMap<ChunkHash, Chunk>,
    heads: BTreeMap<String, Option<ChunkHash>>,
}

/// Drained contents of a [`Staging`], ready to apply.
pub(crate) struct Staged {
    pub(crate) chunks: Vec<Chunk>,
    pub(crate) heads: Vec<(String, Option<ChunkHash>)>,
}

impl Staging {
    pub(crate) fn chunk(&self, hash: &ChunkHash) -> Option<&Chunk> {
        self.chunks.get(hash)
    }

    /// `Some(None)` means the head was removed in this transaction.
    pub(crate) fn head(&self, name: &str) -> Option<Option<ChunkHash>> {
        self.heads.get(name).copied()
    }

    pub(crate) fn put_chunk(&mut self, chunk: Chunk) {
        self.chunks.entry(chunk.hash()).or_insert(chunk);
    }

    pub(crate) fn set_head(&mut self, name: &str, hash: ChunkHash) {
        self.heads.insert(name.to_owned(), Some(hash));
    }

    pub(crate) fn remove_head(&mut self, name: &str) {
        self.heads.insert(name.to_owned(), None);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.heads.is_empty()
    }

    /// Check that every staged ref and head target resolves either inside this
    /// transaction or through `exists`.
    pub(crate) fn verify(
        &self,
        exists: &dyn Fn(&ChunkHash) -> Result<bool, StoreError>,
    ) -> Result<(), StoreError> {
        let resolves = |hash: &ChunkHash| -> Result<bool, StoreError> {
            if self.chunks.contains_key(hash) {
                return Ok(true);
            }
            exists(hash)
        };
        // Sorted so the reported failure is stable.
        let mut staged: Vec<&Chunk> = self.chunks.values().collect();
        staged.sort_by_key(|c| c.hash());
        for chunk in staged {
            for r in chunk.refs() {
                if !resolves(r)? {
                    return Err(StoreError::DanglingRef {
                        chunk: chunk.hash(),
                        missing: *r,
                    });
                }
            }
        }
        for (name, target) in &self.heads {
            if let Some(hash) = target {
                if !resolves(hash)? {
                    return Err(StoreError::DanglingHead {
                        name: name.clone(),
                        hash: *hash,
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn take(&mut self) -> Staged {
        let mut chunks: Vec<Chunk> = std::mem::take(&mut self.chunks).into_values().collect();
        chunks.sort_by_key(Chunk::hash);
        Staged {
            chunks,
            heads: std::mem::take(&mut self.heads).into_iter().collect(),
        }
    }
}
