// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Secondary indexes.
//!
//! An index maps `"\0" + secondary + "\0" + primary` to the primary entry's
//! value. The secondary key is read from the value through a JSON pointer and
//! must be a string or an array of strings (one entry per element).

use std::collections::BTreeMap;

use replidag_cas::{ChunkHash, ChunkRead, ChunkWrite};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::kv::KvMap;
use crate::DbError;

/// Describes what an index covers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    /// Index name, unique per commit.
    pub name: String,
    /// Only primary keys starting with this prefix are indexed.
    #[serde(default)]
    pub key_prefix: String,
    /// RFC 6901 pointer to the secondary key inside each value.
    pub json_pointer: String,
    /// When `true`, values without a pointer target are skipped silently.
    #[serde(default)]
    pub allow_empty: bool,
}

impl IndexDefinition {
    /// Definition with an empty key prefix and `allow_empty = false`.
    pub fn new(name: impl Into<String>, json_pointer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_prefix: String::new(),
            json_pointer: json_pointer.into(),
            allow_empty: false,
        }
    }
}

/// An index as stored on a commit: its definition plus the hash of its map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    /// What the index covers.
    pub definition: IndexDefinition,
    /// Chunk holding the index map.
    pub value_hash: ChunkHash,
}

/// One decoded index entry.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntry {
    /// Secondary key (from the indexed value).
    pub secondary: String,
    /// Primary key of the indexed entry.
    pub primary: String,
    /// The primary entry's value.
    pub value: Value,
}

/// Encode an index map key.
pub fn encode_index_key(secondary: &str, primary: &str) -> String {
    let mut key = String::with_capacity(secondary.len() + primary.len() + 2);
    key.push('\0');
    key.push_str(secondary);
    key.push('\0');
    key.push_str(primary);
    key
}

/// Split an index map key into `(secondary, primary)`.
pub fn decode_index_key(key: &str) -> Result<(&str, &str), DbError> {
    key.strip_prefix('\0')
        .and_then(|rest| rest.split_once('\0'))
        .ok_or_else(|| DbError::Codec(format!("malformed index key {key:?}")))
}

/// Index map keys that `value` at `primary` contributes to `def`.
///
/// Keys outside `def.key_prefix` contribute nothing. A missing pointer target
/// contributes nothing when `allow_empty` is set and is an error otherwise, as
/// is a target that is neither a string nor an array of strings.
pub fn index_keys(
    primary: &str,
    value: &Value,
    def: &IndexDefinition,
) -> Result<Vec<String>, DbError> {
    if !primary.starts_with(&def.key_prefix) {
        return Ok(Vec::new());
    }
    let not_indexable = |reason: String| DbError::NotIndexable {
        key: primary.to_owned(),
        reason,
    };
    let Some(target) = value.pointer(&def.json_pointer) else {
        if def.allow_empty {
            return Ok(Vec::new());
        }
        return Err(not_indexable(format!("No value at path: {}", def.json_pointer)));
    };
    // The index key separator is NUL, so a secondary may not contain one.
    let secondary_key = |s: &str| {
        if s.contains('\0') {
            return Err(not_indexable("Secondary key cannot contain null byte".into()));
        }
        Ok(encode_index_key(s, primary))
    };
    match target {
        Value::String(s) => Ok(vec![secondary_key(s)?]),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => secondary_key(s),
                other => Err(not_indexable(format!("Unsupported target type: {other}"))),
            })
            .collect(),
        other => Err(not_indexable(format!("Unsupported target type: {other}"))),
    }
}

/// An index loaded for reading or writing.
#[derive(Clone, Debug)]
pub(crate) struct LiveIndex {
    pub(crate) definition: IndexDefinition,
    pub(crate) map: KvMap,
}

impl LiveIndex {
    pub(crate) fn load<R: ChunkRead + ?Sized>(
        record: &IndexRecord,
        read: &R,
    ) -> Result<Self, DbError> {
        Ok(Self {
            definition: record.definition.clone(),
            map: KvMap::load(read, &record.value_hash)?,
        })
    }

    /// Build a fresh index over every entry of `source`.
    pub(crate) fn build(definition: IndexDefinition, source: &KvMap) -> Self {
        let mut index = Self {
            definition,
            map: KvMap::new(),
        };
        for (key, value) in source.iter() {
            index.add(key, value);
        }
        index
    }

    /// Index `value`. Values that cannot be indexed are logged and skipped.
    pub(crate) fn add(&mut self, primary: &str, value: &Value) {
        match index_keys(primary, value, &self.definition) {
            Ok(keys) => {
                for key in keys {
                    self.map.put(key, value.clone());
                }
            }
            Err(err) => info!(
                index = %self.definition.name,
                key = primary,
                error = %err,
                "not indexing value"
            ),
        }
    }

    /// Remove the entries `value` contributed.
    pub(crate) fn remove(&mut self, primary: &str, value: &Value) {
        if let Ok(keys) = index_keys(primary, value, &self.definition) {
            for key in keys {
                self.map.del(&key);
            }
        }
    }

    pub(crate) fn flush<W: ChunkWrite + ?Sized>(
        &self,
        write: &mut W,
    ) -> Result<IndexRecord, DbError> {
        Ok(IndexRecord {
            definition: self.definition.clone(),
            value_hash: self.map.flush(write)?,
        })
    }

    /// Decoded entries whose secondary key starts with `prefix`, from `start`.
    pub(crate) fn scan(
        &self,
        prefix: &str,
        start: Option<&str>,
    ) -> Result<Vec<IndexEntry>, DbError> {
        let key_prefix = format!("\0{prefix}");
        let key_start = start.map(|s| format!("\0{s}"));
        self.map
            .scan(&key_prefix, key_start.as_deref())
            .map(|(key, value)| {
                let (secondary, primary) = decode_index_key(key)?;
                Ok(IndexEntry {
                    secondary: secondary.to_owned(),
                    primary: primary.to_owned(),
                    value: value.clone(),
                })
            })
            .collect()
    }
}

/// Load every index record of a commit, keyed by name.
pub(crate) fn load_indexes<R: ChunkRead + ?Sized>(
    records: &[IndexRecord],
    read: &R,
) -> Result<BTreeMap<String, LiveIndex>, DbError> {
    records
        .iter()
        .map(|r| Ok((r.definition.name.clone(), LiveIndex::load(r, read)?)))
        .collect()
}

/// Scan the index called `name`.
pub(crate) fn scan_named(
    indexes: &BTreeMap<String, LiveIndex>,
    name: &str,
    prefix: &str,
    start: Option<&str>,
) -> Result<Vec<IndexEntry>, DbError> {
    indexes
        .get(name)
        .ok_or_else(|| DbError::IndexNotFound(name.to_owned()))?
        .scan(prefix, start)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn def(pointer: &str) -> IndexDefinition {
        IndexDefinition::new("idx", pointer)
    }

    #[test]
    fn key_round_trip() {
        let key = encode_index_key("sec", "pri");
        assert_eq!(key, "\0sec\0pri");
        assert_eq!(decode_index_key(&key).unwrap(), ("sec", "pri"));
        assert!(decode_index_key("no-leading-nul").is_err());
    }

    #[test]
    fn string_and_array_targets() {
        let d = def("/tag");
        assert_eq!(
            index_keys("k", &json!({"tag": "x"}), &d).unwrap(),
            vec![encode_index_key("x", "k")]
        );
        assert_eq!(
            index_keys("k", &json!({"tag": ["x", "y"]}), &d).unwrap(),
            vec![encode_index_key("x", "k"), encode_index_key("y", "k")]
        );
    }

    #[test]
    fn unsupported_target_is_an_error() {
        let err = index_keys("k", &json!({"tag": 1}), &def("/tag")).unwrap_err();
        assert!(matches!(err, DbError::NotIndexable { .. }));
        assert!(index_keys("k", &json!({"tag": ["x", 2]}), &def("/tag")).is_err());
    }

    #[test]
    fn nul_in_secondary_is_not_indexable() {
        let d = def("/tag");
        let err = index_keys("k", &json!({"tag": "a\u{0}b"}), &d).unwrap_err();
        assert!(matches!(
            err,
            DbError::NotIndexable { ref reason, .. }
                if reason == "Secondary key cannot contain null byte"
        ));
        assert!(index_keys("k", &json!({"tag": ["ok", "a\u{0}b"]}), &d).is_err());

        let mut source = KvMap::new();
        source.put("k", json!({"tag": "a\u{0}b"}));
        source.put("j", json!({"tag": "a"}));
        let live = LiveIndex::build(d, &source);
        let entries: Vec<(String, String)> = live
            .scan("", None)
            .unwrap()
            .into_iter()
            .map(|e| (e.secondary, e.primary))
            .collect();
        assert_eq!(entries, [("a".to_owned(), "j".to_owned())]);
    }

    #[test]
    fn missing_target_depends_on_allow_empty() {
        let mut d = def("/tag");
        assert!(index_keys("k", &json!({}), &d).is_err());
        d.allow_empty = true;
        assert!(index_keys("k", &json!({}), &d).unwrap().is_empty());
    }

    #[test]
    fn key_prefix_filters_primary_keys() {
        let mut d = def("/tag");
        d.key_prefix = "todo/".into();
        assert!(index_keys("note/1", &json!({"tag": "x"}), &d).unwrap().is_empty());
        assert_eq!(index_keys("todo/1", &json!({"tag": "x"}), &d).unwrap().len(), 1);
    }

    #[test]
    fn allow_empty_defaults_to_false_when_absent() {
        let d: IndexDefinition =
            serde_json::from_value(json!({"name": "n", "jsonPointer": "/a"})).unwrap();
        assert!(!d.allow_empty);
        assert_eq!(d.key_prefix, "");
    }

    #[test]
    fn live_index_tracks_puts_and_removals() {
        let mut source = KvMap::new();
        source.put("a", json!({"tag": "z"}));
        source.put("b", json!({"tag": "m"}));
        source.put("c", json!({}));
        let mut live = LiveIndex::build(def("/tag"), &source);
        assert_eq!(live.map.len(), 2);
        let secondaries: Vec<String> = live
            .scan("", None)
            .unwrap()
            .into_iter()
            .map(|e| e.secondary)
            .collect();
        assert_eq!(secondaries, ["m", "z"]);

        live.remove("a", &json!({"tag": "z"}));
        assert_eq!(live.map.len(), 1);
    }
}
