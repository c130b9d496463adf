// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Value-map diffs between two commits.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::iter::Peekable;

use replidag_cas::{ChunkHash, ChunkRead};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commit::Commit;
use crate::kv::KvMap;
use crate::DbError;

/// Kind of change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOp {
    /// Key only in the new map.
    Add,
    /// Key only in the old map.
    Remove,
    /// Key in both with different values.
    Change,
}

/// One changed key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    /// Kind of change.
    pub op: DiffOp,
    /// Changed key.
    pub key: String,
    /// Value before, for `remove` and `change`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Value after, for `add` and `change`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

impl DiffEntry {
    /// `add` entry.
    pub fn add(key: impl Into<String>, new_value: Value) -> Self {
        Self {
            op: DiffOp::Add,
            key: key.into(),
            old_value: None,
            new_value: Some(new_value),
        }
    }

    /// `remove` entry.
    pub fn remove(key: impl Into<String>, old_value: Value) -> Self {
        Self {
            op: DiffOp::Remove,
            key: key.into(),
            old_value: Some(old_value),
            new_value: None,
        }
    }

    /// `change` entry.
    pub fn change(key: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            op: DiffOp::Change,
            key: key.into(),
            old_value: Some(old_value),
            new_value: Some(new_value),
        }
    }
}

/// Diffs keyed by index name; the value map is under `""`. Maps without
/// changes are omitted.
pub type DiffsMap = BTreeMap<String, Vec<DiffEntry>>;

/// Sorted-merge diff of two maps, in key order.
pub fn diff_maps(old: &KvMap, new: &KvMap) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    let mut a: Peekable<_> = old.iter().peekable();
    let mut b: Peekable<_> = new.iter().peekable();
    loop {
        let order = match (a.peek(), b.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((ka, _)), Some((kb, _))) => ka.cmp(kb),
        };
        match order {
            Ordering::Less => {
                if let Some((k, v)) = a.next() {
                    out.push(DiffEntry::remove(k, v.clone()));
                }
            }
            Ordering::Greater => {
                if let Some((k, v)) = b.next() {
                    out.push(DiffEntry::add(k, v.clone()));
                }
            }
            Ordering::Equal => {
                if let (Some((k, va)), Some((_, vb))) = (a.next(), b.next()) {
                    if va != vb {
                        out.push(DiffEntry::change(k, va.clone(), vb.clone()));
                    }
                }
            }
        }
    }
    out
}

/// Diff the value map and every index between `old` and `new`.
///
/// An index present only in `old` diffs as all removals, one present only in
/// `new` as all additions.
pub fn diff_commits<R: ChunkRead + ?Sized>(
    old: &Commit,
    new: &Commit,
    read: &R,
) -> Result<DiffsMap, DbError> {
    let mut diffs = DiffsMap::new();
    if old.value_hash() != new.value_hash() {
        let entries = diff_maps(
            &KvMap::load(read, &old.value_hash())?,
            &KvMap::load(read, &new.value_hash())?,
        );
        if !entries.is_empty() {
            diffs.insert(String::new(), entries);
        }
    }

    let old_indexes: BTreeMap<&str, ChunkHash> = old
        .indexes()
        .iter()
        .map(|i| (i.definition.name.as_str(), i.value_hash))
        .collect();
    let new_indexes: BTreeMap<&str, ChunkHash> = new
        .indexes()
        .iter()
        .map(|i| (i.definition.name.as_str(), i.value_hash))
        .collect();
    let mut names: Vec<&str> = old_indexes.keys().chain(new_indexes.keys()).copied().collect();
    names.sort_unstable();
    names.dedup();

    for name in names {
        let (before, after) = (old_indexes.get(name), new_indexes.get(name));
        if before == after {
            continue;
        }
        let load = |hash: Option<&ChunkHash>| match hash {
            Some(h) => KvMap::load(read, h),
            None => Ok(KvMap::new()),
        };
        let entries = diff_maps(&load(before)?, &load(after)?);
        if !entries.is_empty() {
            diffs.insert(name.to_owned(), entries);
        }
    }
    Ok(diffs)
}
