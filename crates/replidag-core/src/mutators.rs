// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Named mutators: application code that turns arguments into writes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::write::Write;
use crate::DbError;

/// A mutator body.
pub type MutatorFn = dyn Fn(&mut Write<'_>, &Value) -> Result<(), DbError> + Send + Sync;

/// Looks mutators up by name.
///
/// The same table drives fresh mutations and replays during rebase, so a
/// mutator must be deterministic in its arguments and the transaction's
/// current state.
pub trait MutatorTable: Send + Sync {
    /// Run mutator `name`. `None` if no such mutator exists.
    fn apply(&self, name: &str, tx: &mut Write<'_>, args: &Value) -> Option<Result<(), DbError>>;

    /// Every mutator name the table knows.
    fn names(&self) -> BTreeSet<String>;
}

/// Map-backed [`MutatorTable`].
#[derive(Clone, Default)]
pub struct MutatorRegistry {
    mutators: BTreeMap<String, Arc<MutatorFn>>,
}

impl MutatorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`MutatorRegistry::insert`].
    pub fn with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Write<'_>, &Value) -> Result<(), DbError> + Send + Sync + 'static,
    {
        self.insert(name, f);
        self
    }

    /// Register `f` under `name`, replacing any previous mutator.
    pub fn insert<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut Write<'_>, &Value) -> Result<(), DbError> + Send + Sync + 'static,
    {
        self.mutators.insert(name.into(), Arc::new(f));
    }

    /// `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.mutators.contains_key(name)
    }
}

impl fmt::Debug for MutatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.mutators.keys()).finish()
    }
}

impl MutatorTable for MutatorRegistry {
    fn apply(&self, name: &str, tx: &mut Write<'_>, args: &Value) -> Option<Result<(), DbError>> {
        self.mutators.get(name).map(|f| f(tx, args))
    }

    fn names(&self) -> BTreeSet<String> {
        self.mutators.keys().cloned().collect()
    }
}

impl<T: MutatorTable + ?Sized> MutatorTable for Arc<T> {
    fn apply(&self, name: &str, tx: &mut Write<'_>, args: &Value) -> Option<Result<(), DbError>> {
        (**self).apply(name, tx, args)
    }

    fn names(&self) -> BTreeSet<String> {
        (**self).names()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use replidag_cas::{ChunkStore, MemoryStore};
    use serde_json::json;

    use super::*;
    use crate::write::{init_db, Whence};
    use crate::{Dialect, DEFAULT_HEAD_NAME};

    #[test]
    fn registry_runs_known_mutators_only() {
        let registry = MutatorRegistry::new()
            .with("set", |tx, args| tx.put("k", args.clone()))
            .with("fail", |_, _| Err(DbError::mutator("fail", "nope")));
        assert!(registry.contains("set"));
        assert_eq!(
            registry.names().into_iter().collect::<Vec<_>>(),
            ["fail", "set"]
        );

        let store = MemoryStore::new();
        let mut w = store.write().unwrap();
        init_db(&mut w, DEFAULT_HEAD_NAME, Dialect::MultiClientGroup).unwrap();
        let main = Whence::head(DEFAULT_HEAD_NAME);
        let mut tx = Write::new_local(&main, "set", json!(1), None, &mut w, 0, "c").unwrap();
        registry.apply("set", &mut tx, &json!(1)).unwrap().unwrap();
        assert_eq!(tx.get("k"), Some(&json!(1)));
        assert!(registry.apply("fail", &mut tx, &json!(1)).unwrap().is_err());
        assert!(registry.apply("missing", &mut tx, &json!(1)).is_none());
    }
}
