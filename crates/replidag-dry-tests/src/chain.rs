// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Commit chain builder for tests.

use replidag_cas::{with_write, ChunkHash, ChunkStore, ChunkWrite};
use replidag_core::{
    genesis_commit, mutation_ids, Commit, DbError, Dialect, IndexDefinition, LastMutationIds,
    Whence, Write,
};
use serde_json::{json, Value};

/// Timestamp every local commit built by [`ChainBuilder`] carries, so the
/// same steps produce the same hashes in any store.
pub const LOCAL_TIMESTAMP: u64 = 42;

/// Grows a commit chain under one head.
///
/// Every step commits its own write transaction and moves the head. Builders
/// over different stores that run the same steps produce identical commits.
///
/// # Example
///
/// ```
/// use replidag_cas::MemoryStore;
/// use replidag_dry_tests::ChainBuilder;
/// use serde_json::json;
///
/// let store = MemoryStore::new();
/// let mut chain = ChainBuilder::new(&store, "main");
/// chain.add_genesis().unwrap();
/// chain.add_snapshot(&[], json!(1), None).unwrap();
/// let local = chain.add_local("c1", &[("k", json!("v"))]).unwrap();
/// assert_eq!(local.as_local().unwrap().mutator_name, "mutator_name_2");
/// ```
pub struct ChainBuilder<'s, S: ChunkStore> {
    store: &'s S,
    head_name: String,
    dialect: Dialect,
    chain: Vec<Commit>,
}

impl<'s, S: ChunkStore> ChainBuilder<'s, S> {
    /// Builder over `store` in the multi-client-group dialect.
    pub fn new(store: &'s S, head_name: &str) -> Self {
        Self {
            store,
            head_name: head_name.to_owned(),
            dialect: Dialect::MultiClientGroup,
            chain: Vec::new(),
        }
    }

    /// Use `dialect` for the genesis commit.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Commits built so far, oldest first.
    pub fn chain(&self) -> &[Commit] {
        &self.chain
    }

    /// Hash of the newest commit.
    pub fn head_hash(&self) -> Option<ChunkHash> {
        self.chain.last().map(Commit::hash)
    }

    fn tip(&self) -> Result<ChunkHash, DbError> {
        self.head_hash()
            .ok_or_else(|| DbError::MissingHead(self.head_name.clone()))
    }

    fn push(&mut self, commit: Commit) -> Commit {
        self.chain.push(commit.clone());
        commit
    }

    /// Root the chain.
    pub fn add_genesis(&mut self) -> Result<Commit, DbError> {
        let dialect = self.dialect;
        let head = self.head_name.clone();
        let genesis = with_write(self.store, |w| {
            let genesis = genesis_commit(w, dialect)?;
            w.set_head(&head, genesis.hash())?;
            w.commit()?;
            Ok::<_, DbError>(genesis)
        })?;
        Ok(self.push(genesis))
    }

    /// Add a snapshot at `cookie` that also writes `entries`.
    ///
    /// `last_mutation_ids` defaults to the table as of the current tip.
    pub fn add_snapshot(
        &mut self,
        entries: &[(&str, Value)],
        cookie: Value,
        last_mutation_ids: Option<LastMutationIds>,
    ) -> Result<Commit, DbError> {
        let tip = self.tip()?;
        let head = self.head_name.clone();
        let commit = with_write(self.store, |w| {
            let ids = match last_mutation_ids {
                Some(ids) => ids,
                None => {
                    let basis = replidag_core::commit_from_hash(&tip, &*w)?;
                    mutation_ids(&basis, &*w)?
                }
            };
            let mut tx = Write::new_snapshot(&Whence::Hash(tip), ids, cookie, w)?;
            for (key, value) in entries {
                tx.put(*key, value.clone())?;
            }
            let commit = tx.put_commit()?;
            w.set_head(&head, commit.hash())?;
            w.commit()?;
            Ok::<_, DbError>(commit)
        })?;
        Ok(self.push(commit))
    }

    /// Add a local mutation by `client_id` named `mutator_name_<n>` with
    /// arguments `[n]`, where `n` is the chain length, that writes `entries`.
    pub fn add_local(
        &mut self,
        client_id: &str,
        entries: &[(&str, Value)],
    ) -> Result<Commit, DbError> {
        let n = self.chain.len();
        self.add_mutation(client_id, &format!("mutator_name_{n}"), json!([n]), entries)
    }

    /// Add a local mutation with an explicit mutator name and arguments. The
    /// mutator is not run; the commit writes exactly `entries`.
    pub fn add_mutation(
        &mut self,
        client_id: &str,
        mutator_name: &str,
        mutator_args: Value,
        entries: &[(&str, Value)],
    ) -> Result<Commit, DbError> {
        let tip = self.tip()?;
        let head = self.head_name.clone();
        let commit = with_write(self.store, |w| {
            let mut tx = Write::new_local(
                &Whence::Hash(tip),
                mutator_name,
                mutator_args,
                None,
                w,
                LOCAL_TIMESTAMP,
                client_id,
            )?;
            for (key, value) in entries {
                tx.put(*key, value.clone())?;
            }
            let commit = tx.put_commit()?;
            w.set_head(&head, commit.hash())?;
            w.commit()?;
            Ok::<_, DbError>(commit)
        })?;
        Ok(self.push(commit))
    }

    /// Add an index-change commit creating `definition`.
    pub fn add_index_change(&mut self, definition: IndexDefinition) -> Result<Commit, DbError> {
        let tip = self.tip()?;
        let head = self.head_name.clone();
        let commit = with_write(self.store, |w| {
            let mut tx = Write::new_index_change(&Whence::Hash(tip), w)?;
            tx.create_index(definition)?;
            let commit = tx.put_commit()?;
            w.set_head(&head, commit.hash())?;
            w.commit()?;
            Ok::<_, DbError>(commit)
        })?;
        Ok(self.push(commit))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use replidag_cas::MemoryStore;
    use replidag_core::{verify_chain, Meta};

    use super::*;

    #[test]
    fn same_steps_build_same_hashes() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let mut ca = ChainBuilder::new(&a, "main");
        let mut cb = ChainBuilder::new(&b, "other");
        for c in [&mut ca, &mut cb] {
            c.add_genesis().unwrap();
            c.add_snapshot(&[], json!(1), None).unwrap();
            c.add_local("c1", &[]).unwrap();
        }
        assert_eq!(ca.head_hash(), cb.head_hash());
    }

    #[test]
    fn built_chains_verify() {
        let store = MemoryStore::new();
        let mut c = ChainBuilder::new(&store, "main");
        c.add_genesis().unwrap();
        c.add_local("c1", &[("a", json!(1))]).unwrap();
        c.add_index_change(IndexDefinition::new("i", "/x")).unwrap();
        c.add_local("c1", &[]).unwrap();
        let tip = c.head_hash().unwrap();
        let r = store.read().unwrap();
        verify_chain(&tip, &r).unwrap();
        assert!(matches!(c.chain()[2].meta(), Meta::IndexChange(_)));
        assert_eq!(c.chain()[3].as_local().unwrap().mutation_id, 2);
    }

    #[test]
    fn steps_before_genesis_fail() {
        let store = MemoryStore::new();
        let mut c = ChainBuilder::new(&store, "main");
        assert!(c.add_local("c1", &[]).is_err());
    }
}
