// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read-through chunk store layered over a source store.
//!
//! A [`LazyStore`] is the in-memory working copy of a durable graph. Chunks it
//! writes stay in memory; chunks it does not hold are fetched from the source on
//! demand and kept in a bounded cache. Heads are local to the lazy store: the
//! source's heads are never visible through it, and nothing written here ever
//! reaches the source.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::memory::{MemoryStore, MemoryWrite};
use crate::{Chunk, ChunkHash, ChunkRead, ChunkStore, ChunkWrite, StoreError};

/// Default byte budget for chunks cached from the source (10 MiB).
pub const DEFAULT_CACHE_LIMIT_BYTES: usize = 10 * (1 << 20);

/// In-memory store that falls back to `source` for chunks it does not own.
#[derive(Clone)]
pub struct LazyStore<S> {
    memory: MemoryStore,
    source: S,
    cache: Arc<Mutex<SourceCache>>,
}

/// FIFO cache of source chunks. Eviction only drops cached copies; the source
/// still has them.
struct SourceCache {
    chunks: HashMap<ChunkHash, Chunk>,
    order: VecDeque<ChunkHash>,
    bytes: usize,
    limit: usize,
}

impl SourceCache {
    fn new(limit: usize) -> Self {
        Self {
            chunks: HashMap::new(),
            order: VecDeque::new(),
            bytes: 0,
            limit,
        }
    }

    fn insert(&mut self, chunk: Chunk) {
        if chunk.len() > self.limit || self.chunks.contains_key(&chunk.hash()) {
            return;
        }
        self.bytes += chunk.len();
        self.order.push_back(chunk.hash());
        self.chunks.insert(chunk.hash(), chunk);
        while self.bytes > self.limit {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(evicted) = self.chunks.remove(&oldest) {
                self.bytes -= evicted.len();
            }
        }
    }
}

impl<S: ChunkStore> LazyStore<S> {
    /// Layer a new, empty in-memory store over `source` with the default cache
    /// budget.
    pub fn new(source: S) -> Self {
        Self::with_cache_limit(source, DEFAULT_CACHE_LIMIT_BYTES)
    }

    /// Layer over `source` with an explicit cache budget in bytes.
    pub fn with_cache_limit(source: S, limit: usize) -> Self {
        Self {
            memory: MemoryStore::new(),
            source,
            cache: Arc::new(Mutex::new(SourceCache::new(limit))),
        }
    }

    /// The store reads fall through to.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Number of chunks written into this store (not counting cached ones).
    pub fn memory_chunk_count(&self) -> usize {
        self.memory.len()
    }

    /// Number of source chunks currently cached.
    pub fn cached_chunk_count(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chunks
            .len()
    }

    /// `true` if `hash` was written into this store rather than borrowed from
    /// the source.
    pub fn is_memory_only(&self, hash: &ChunkHash) -> bool {
        self.memory.contains(hash)
    }

    fn lookup(&self, hash: &ChunkHash) -> Result<Option<Chunk>, StoreError> {
        if let Some(chunk) = self.memory.committed_chunk(hash) {
            return Ok(Some(chunk));
        }
        {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(chunk) = cache.chunks.get(hash) {
                return Ok(Some(chunk.clone()));
            }
        }
        let fetched = self.source.read()?.get_chunk(hash)?;
        if let Some(chunk) = &fetched {
            trace!(%hash, "lazy store cached source chunk");
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(chunk.clone());
        }
        Ok(fetched)
    }

    fn resolves_outside_memory(&self, hash: &ChunkHash) -> Result<bool, StoreError> {
        {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if cache.chunks.contains_key(hash) {
                return Ok(true);
            }
        }
        self.source.read()?.has_chunk(hash)
    }

    /// Drop memory-only chunks that no local head reaches. Source chunks are
    /// never touched. Returns the number of chunks removed.
    pub fn collect_garbage(&self) -> usize {
        self.memory.collect_garbage()
    }
}

impl<S: ChunkStore> ChunkStore for LazyStore<S> {
    type Read<'a>
        = LazyRead<'a, S>
    where
        S: 'a;
    type Write<'a>
        = LazyWrite<'a, S>
    where
        S: 'a;

    fn read(&self) -> Result<LazyRead<'_, S>, StoreError> {
        Ok(LazyRead { store: self })
    }

    fn write(&self) -> Result<LazyWrite<'_, S>, StoreError> {
        Ok(LazyWrite {
            store: self,
            inner: self.memory.write()?,
        })
    }
}

/// Read transaction over a [`LazyStore`].
pub struct LazyRead<'a, S> {
    store: &'a LazyStore<S>,
}

impl<S: ChunkStore> ChunkRead for LazyRead<'_, S> {
    fn get_chunk(&self, hash: &ChunkHash) -> Result<Option<Chunk>, StoreError> {
        self.store.lookup(hash)
    }

    fn get_head(&self, name: &str) -> Result<Option<ChunkHash>, StoreError> {
        Ok(self.store.memory.committed_head(name))
    }
}

/// Write transaction over a [`LazyStore`]. Staged refs and head targets may
/// resolve in the source.
pub struct LazyWrite<'a, S> {
    store: &'a LazyStore<S>,
    inner: MemoryWrite<'a>,
}

impl<S: ChunkStore> ChunkRead for LazyWrite<'_, S> {
    fn get_chunk(&self, hash: &ChunkHash) -> Result<Option<Chunk>, StoreError> {
        if let Some(chunk) = self.inner.get_chunk(hash)? {
            return Ok(Some(chunk));
        }
        self.store.lookup(hash)
    }

    fn get_head(&self, name: &str) -> Result<Option<ChunkHash>, StoreError> {
        self.inner.get_head(name)
    }
}

impl<S: ChunkStore> ChunkWrite for LazyWrite<'_, S> {
    fn put_chunk(&mut self, chunk: Chunk) -> Result<(), StoreError> {
        self.inner.put_chunk(chunk)
    }

    fn set_head(&mut self, name: &str, hash: ChunkHash) -> Result<(), StoreError> {
        self.inner.set_head(name, hash)
    }

    fn remove_head(&mut self, name: &str) -> Result<(), StoreError> {
        self.inner.remove_head(name)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let store = self.store;
        self.inner
            .commit_resolving(&|h| store.resolves_outside_memory(h))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn seeded_source() -> (MemoryStore, Chunk) {
        let source = MemoryStore::new();
        let chunk = Chunk::new(b"durable".to_vec(), Vec::new());
        let mut w = source.write().unwrap();
        w.put_chunk(chunk.clone()).unwrap();
        w.set_head("main", chunk.hash()).unwrap();
        w.commit().unwrap();
        drop(w);
        (source, chunk)
    }

    #[test]
    fn reads_fall_through_to_source_and_cache() {
        let (source, chunk) = seeded_source();
        let lazy = LazyStore::new(source);
        let r = lazy.read().unwrap();
        assert_eq!(r.get_chunk(&chunk.hash()).unwrap(), Some(chunk.clone()));
        assert_eq!(lazy.cached_chunk_count(), 1);
        assert!(!lazy.is_memory_only(&chunk.hash()));
    }

    #[test]
    fn source_heads_are_not_visible() {
        let (source, _) = seeded_source();
        let lazy = LazyStore::new(source);
        assert_eq!(lazy.read().unwrap().get_head("main").unwrap(), None);
    }

    #[test]
    fn local_chunks_may_reference_source_chunks() {
        let (source, durable) = seeded_source();
        let lazy = LazyStore::new(source.clone());
        let local = Chunk::new(b"local".to_vec(), vec![durable.hash()]);
        let mut w = lazy.write().unwrap();
        w.put_chunk(local.clone()).unwrap();
        w.set_head("main", local.hash()).unwrap();
        w.commit().unwrap();
        drop(w);
        assert!(lazy.is_memory_only(&local.hash()));
        // Nothing leaks into the source.
        assert!(!source.read().unwrap().has_chunk(&local.hash()).unwrap());
    }

    #[test]
    fn head_may_point_at_source_chunk() {
        let (source, durable) = seeded_source();
        let lazy = LazyStore::new(source);
        let mut w = lazy.write().unwrap();
        w.set_head("refresh", durable.hash()).unwrap();
        w.commit().unwrap();
        drop(w);
        assert_eq!(
            lazy.read().unwrap().get_head("refresh").unwrap(),
            Some(durable.hash())
        );
    }

    #[test]
    fn cache_respects_byte_budget() {
        let source = MemoryStore::new();
        let chunks: Vec<Chunk> = (0u8..4)
            .map(|i| Chunk::new(vec![i; 8], Vec::new()))
            .collect();
        let mut w = source.write().unwrap();
        for c in &chunks {
            w.put_chunk(c.clone()).unwrap();
        }
        w.commit().unwrap();
        drop(w);

        let lazy = LazyStore::with_cache_limit(source, 16);
        let r = lazy.read().unwrap();
        for c in &chunks {
            assert!(r.get_chunk(&c.hash()).unwrap().is_some());
        }
        assert_eq!(lazy.cached_chunk_count(), 2);
    }
}
