// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Copy-on-write ordered map backing a commit's value and index maps.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use replidag_cas::{Chunk, ChunkHash, ChunkRead, ChunkWrite};
use serde_json::Value;

use crate::DbError;

/// Ordered string-keyed JSON map stored as one chunk.
///
/// Clones share the entries until one side writes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KvMap {
    entries: Arc<BTreeMap<String, Value>>,
}

impl KvMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the map stored in chunk `hash`.
    pub fn load<R: ChunkRead + ?Sized>(read: &R, hash: &ChunkHash) -> Result<Self, DbError> {
        let chunk = read.must_get_chunk(hash)?;
        Ok(Self {
            entries: Arc::new(chunk.decode()?),
        })
    }

    /// Value at `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// `true` if `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose key starts with `prefix`, in key order, beginning at
    /// `start` when that sorts after the prefix.
    pub fn scan<'a>(
        &'a self,
        prefix: &'a str,
        start: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        let from = match start {
            Some(s) if s > prefix => s,
            _ => prefix,
        };
        self.entries
            .range::<str, _>((Bound::Included(from), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Insert or replace `key`.
    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        Arc::make_mut(&mut self.entries).insert(key.into(), value);
    }

    /// Remove `key`, returning whether it was present.
    pub fn del(&mut self, key: &str) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }
        Arc::make_mut(&mut self.entries).remove(key).is_some()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries = Arc::default();
        }
    }

    /// Stage the map as a chunk and return its hash.
    pub fn flush<W: ChunkWrite + ?Sized>(&self, write: &mut W) -> Result<ChunkHash, DbError> {
        let chunk = Chunk::encode(&*self.entries, Vec::new())?;
        let hash = chunk.hash();
        write.put_chunk(chunk)?;
        Ok(hash)
    }
}
