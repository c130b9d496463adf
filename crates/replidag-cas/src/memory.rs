// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory chunk store.
//!
//! [`MemoryStore`] is an arena of chunks keyed by hash plus a table of named
//! heads. It backs the in-memory side of a lazy store and doubles as the test
//! store for anything that wants a durable-looking graph without disk I/O.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use tracing::{debug, info};

use crate::gc;
use crate::staging::Staging;
use crate::{Chunk, ChunkHash, ChunkRead, ChunkStore, ChunkWrite, StoreError};

/// In-memory content-addressed chunk store.
///
/// Handles are cheap to clone and share the same arena.
///
/// # Concurrency
///
/// - One [`MemoryWrite`] at a time; [`ChunkStore::write`] blocks until the
///   previous writer is dropped.
/// - Reads never block on an open writer. They observe committed state only.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    state: RwLock<MemoryState>,
    writer: Mutex<()>,
}

#[derive(Default)]
struct MemoryState {
    chunks: HashMap<ChunkHash, Chunk>,
    heads: BTreeMap<String, ChunkHash>,
    byte_count: usize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of committed chunks.
    pub fn len(&self) -> usize {
        self.state().chunks.len()
    }

    /// Returns `true` if no chunks are committed.
    pub fn is_empty(&self) -> bool {
        self.state().chunks.is_empty()
    }

    /// Total payload bytes across committed chunks.
    pub fn byte_count(&self) -> usize {
        self.state().byte_count
    }

    /// Committed head names and targets, sorted by name.
    pub fn heads(&self) -> Vec<(String, ChunkHash)> {
        self.state()
            .heads
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub(crate) fn committed_chunk(&self, hash: &ChunkHash) -> Option<Chunk> {
        self.state().chunks.get(hash).cloned()
    }

    pub(crate) fn committed_head(&self, name: &str) -> Option<ChunkHash> {
        self.state().heads.get(name).copied()
    }

    pub(crate) fn contains(&self, hash: &ChunkHash) -> bool {
        self.state().chunks.contains_key(hash)
    }

    /// Drop every chunk that no head reaches. Returns the number removed.
    ///
    /// Takes the writer lock, so it waits for (and excludes) write
    /// transactions.
    pub fn collect_garbage(&self) -> usize {
        let _writer = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let roots: Vec<ChunkHash> = state.heads.values().copied().collect();
        let chunks = &state.chunks;
        // Infallible: the closure never errors for an in-memory arena.
        let marked = match gc::mark(roots, |h| Ok(chunks.get(h).map(Chunk::refs_arc))) {
            Ok(marked) => marked,
            Err(_) => return 0,
        };
        let before = state.chunks.len();
        state.chunks.retain(|h, _| marked.contains(h));
        state.byte_count = state.chunks.values().map(Chunk::len).sum();
        let removed = before - state.chunks.len();
        info!(removed, kept = state.chunks.len(), "memory store gc");
        removed
    }
}

impl ChunkStore for MemoryStore {
    type Read<'a> = MemoryRead<'a>;
    type Write<'a> = MemoryWrite<'a>;

    fn read(&self) -> Result<MemoryRead<'_>, StoreError> {
        Ok(MemoryRead { store: self })
    }

    fn write(&self) -> Result<MemoryWrite<'_>, StoreError> {
        let writer = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(MemoryWrite {
            store: self,
            _writer: writer,
            staging: Staging::default(),
        })
    }
}

/// Read transaction over a [`MemoryStore`].
pub struct MemoryRead<'a> {
    store: &'a MemoryStore,
}

impl ChunkRead for MemoryRead<'_> {
    fn get_chunk(&self, hash: &ChunkHash) -> Result<Option<Chunk>, StoreError> {
        Ok(self.store.committed_chunk(hash))
    }

    fn get_head(&self, name: &str) -> Result<Option<ChunkHash>, StoreError> {
        Ok(self.store.committed_head(name))
    }

    fn has_chunk(&self, hash: &ChunkHash) -> Result<bool, StoreError> {
        Ok(self.store.contains(hash))
    }
}

/// Write transaction over a [`MemoryStore`]. Holds the store's writer lock
/// until dropped.
pub struct MemoryWrite<'a> {
    store: &'a MemoryStore,
    _writer: MutexGuard<'a, ()>,
    staging: Staging,
}

impl MemoryWrite<'_> {
    /// Commit, treating any hash for which `external` returns `true` as
    /// present. Lazy stores use this to let refs resolve in their source.
    pub(crate) fn commit_resolving(
        &mut self,
        external: &dyn Fn(&ChunkHash) -> Result<bool, StoreError>,
    ) -> Result<(), StoreError> {
        if self.staging.is_empty() {
            return Ok(());
        }
        let store = self.store;
        self.staging.verify(&|h| {
            if store.contains(h) {
                return Ok(true);
            }
            external(h)
        })?;
        let staged = self.staging.take();
        let mut state = store
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let chunk_count = staged.chunks.len();
        for chunk in staged.chunks {
            if !state.chunks.contains_key(&chunk.hash()) {
                state.byte_count += chunk.len();
                state.chunks.insert(chunk.hash(), chunk);
            }
        }
        for (name, target) in staged.heads {
            match target {
                Some(hash) => {
                    debug!(head = %name, %hash, "set head");
                    state.heads.insert(name, hash);
                }
                None => {
                    debug!(head = %name, "remove head");
                    state.heads.remove(&name);
                }
            }
        }
        debug!(chunks = chunk_count, "memory store commit");
        Ok(())
    }
}

impl ChunkRead for MemoryWrite<'_> {
    fn get_chunk(&self, hash: &ChunkHash) -> Result<Option<Chunk>, StoreError> {
        if let Some(chunk) = self.staging.chunk(hash) {
            return Ok(Some(chunk.clone()));
        }
        Ok(self.store.committed_chunk(hash))
    }

    fn get_head(&self, name: &str) -> Result<Option<ChunkHash>, StoreError> {
        match self.staging.head(name) {
            Some(staged) => Ok(staged),
            None => Ok(self.store.committed_head(name)),
        }
    }
}

impl ChunkWrite for MemoryWrite<'_> {
    fn put_chunk(&mut self, chunk: Chunk) -> Result<(), StoreError> {
        self.staging.put_chunk(chunk);
        Ok(())
    }

    fn set_head(&mut self, name: &str, hash: ChunkHash) -> Result<(), StoreError> {
        self.staging.set_head(name, hash);
        Ok(())
    }

    fn remove_head(&mut self, name: &str) -> Result<(), StoreError> {
        self.staging.remove_head(name);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.commit_resolving(&|_| Ok(false))
    }
}
