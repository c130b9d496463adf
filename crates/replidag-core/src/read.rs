// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read-only view of one commit.

use std::collections::BTreeMap;

use replidag_cas::ChunkRead;
use serde_json::Value;

use crate::commit::Commit;
use crate::index::{load_indexes, scan_named, IndexEntry, LiveIndex};
use crate::kv::KvMap;
use crate::write::Whence;
use crate::DbError;

/// A commit with its value map and indexes loaded.
///
/// Detached from the chunk transaction it was loaded from, so it stays valid
/// after that transaction ends.
#[derive(Clone, Debug)]
pub struct Read {
    commit: Commit,
    map: KvMap,
    indexes: BTreeMap<String, LiveIndex>,
}

impl Read {
    /// Load the commit `whence` refers to.
    pub fn at<R: ChunkRead + ?Sized>(whence: &Whence, read: &R) -> Result<Self, DbError> {
        Self::from_commit(whence.resolve(read)?, read)
    }

    /// Load the maps of an already decoded commit.
    pub fn from_commit<R: ChunkRead + ?Sized>(commit: Commit, read: &R) -> Result<Self, DbError> {
        let map = KvMap::load(read, &commit.value_hash())?;
        let indexes = load_indexes(commit.indexes(), read)?;
        Ok(Self {
            commit,
            map,
            indexes,
        })
    }

    /// The commit being read.
    pub fn commit(&self) -> &Commit {
        &self.commit
    }

    /// Value at `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// `true` if `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.map.has(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` if the value map is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Entries under `prefix`, from `start`.
    pub fn scan<'s>(
        &'s self,
        prefix: &'s str,
        start: Option<&'s str>,
    ) -> impl Iterator<Item = (&'s str, &'s Value)> + 's {
        self.map.scan(prefix, start)
    }

    /// Names of the commit's indexes.
    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }

    /// Entries of index `name` whose secondary key starts with `prefix`.
    pub fn scan_index(
        &self,
        name: &str,
        prefix: &str,
        start: Option<&str>,
    ) -> Result<Vec<IndexEntry>, DbError> {
        scan_named(&self.indexes, name, prefix, start)
    }
}
