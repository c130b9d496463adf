// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Write transactions: build one new commit on top of a basis.
//!
//! A [`Write`] loads the basis commit's value map and indexes copy-on-write,
//! applies `put`/`del`/`clear` to the map and every live index at once, and on
//! commit stages the new maps plus the commit chunk in the underlying chunk
//! transaction. Local and snapshot writes may change data but not the index
//! set; an index-change write ([`IndexChangeWrite`]) may only change the index
//! set.

use std::collections::BTreeMap;

use replidag_cas::{ChunkHash, ChunkRead, ChunkWrite};
use serde_json::Value;
use tracing::debug;

use crate::commit::{
    commit_from_hash, commit_from_head, mutation_ids, Commit, CommitData, Dialect, GenesisMeta,
    IndexChangeMeta, LastMutationIds, LocalMeta, Meta, SnapshotMeta,
};
use crate::diff::{diff_commits, DiffsMap};
use crate::index::{load_indexes, scan_named, IndexDefinition, IndexEntry, LiveIndex};
use crate::kv::KvMap;
use crate::{ClientId, DbError};

/// Where a transaction's basis commit comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Whence {
    /// The commit a named head points at.
    Head(String),
    /// A specific commit.
    Hash(ChunkHash),
}

impl Whence {
    /// [`Whence::Head`] from anything string-like.
    pub fn head(name: impl Into<String>) -> Self {
        Self::Head(name.into())
    }

    /// Load the commit this refers to.
    pub fn resolve<R: ChunkRead + ?Sized>(&self, read: &R) -> Result<Commit, DbError> {
        match self {
            Self::Head(name) => commit_from_head(name, read),
            Self::Hash(hash) => commit_from_hash(hash, read),
        }
    }
}

enum Kind {
    Local {
        mutation_id: u64,
        mutator_name: String,
        mutator_args: Value,
        original_hash: Option<ChunkHash>,
        timestamp: u64,
        client_id: Option<ClientId>,
    },
    Snapshot {
        last_mutation_ids: LastMutationIds,
        cookie: Value,
    },
    IndexChange,
}

impl Kind {
    fn name(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Snapshot { .. } => "snapshot",
            Self::IndexChange => "index-change",
        }
    }
}

/// A pending commit on top of a basis.
///
/// Dropping a `Write` without committing discards its changes; nothing is
/// staged in the chunk transaction until [`Write::put_commit`].
pub struct Write<'a> {
    dag: &'a mut dyn ChunkWrite,
    basis: Commit,
    kind: Kind,
    map: KvMap,
    indexes: BTreeMap<String, LiveIndex>,
}

impl<'a> Write<'a> {
    fn open(whence: &Whence, dag: &'a mut dyn ChunkWrite, kind: Kind) -> Result<Self, DbError> {
        let basis = whence.resolve(&*dag)?;
        Self::on_basis(basis, dag, kind)
    }

    fn on_basis(basis: Commit, dag: &'a mut dyn ChunkWrite, kind: Kind) -> Result<Self, DbError> {
        let map = KvMap::load(&*dag, &basis.value_hash())?;
        let indexes = load_indexes(basis.indexes(), &*dag)?;
        Ok(Self {
            dag,
            basis,
            kind,
            map,
            indexes,
        })
    }

    /// Start a local mutation by `client_id`.
    ///
    /// The mutation id is one past the client's last id on the basis. In the
    /// multi-client-group dialect the commit is tagged with `client_id`.
    #[allow(clippy::too_many_arguments)]
    pub fn new_local(
        whence: &Whence,
        mutator_name: impl Into<String>,
        mutator_args: Value,
        original_hash: Option<ChunkHash>,
        dag: &'a mut dyn ChunkWrite,
        timestamp: u64,
        client_id: &str,
    ) -> Result<Self, DbError> {
        let mutator_name = mutator_name.into();
        if mutator_name.is_empty() {
            return Err(DbError::InvalidCommit("Missing mutator name".into()));
        }
        let basis = whence.resolve(&*dag)?;
        let ids = mutation_ids(&basis, &*dag)?;
        let kind = Kind::Local {
            mutation_id: ids.get(client_id) + 1,
            mutator_name,
            mutator_args,
            original_hash,
            timestamp,
            client_id: match ids.dialect() {
                Dialect::MultiClientGroup => Some(client_id.to_owned()),
                Dialect::SingleClientGroup => None,
            },
        };
        Self::on_basis(basis, dag, kind)
    }

    /// Start a snapshot: server state as of `cookie`, having absorbed
    /// `last_mutation_ids`.
    pub fn new_snapshot(
        whence: &Whence,
        last_mutation_ids: LastMutationIds,
        cookie: Value,
        dag: &'a mut dyn ChunkWrite,
    ) -> Result<Self, DbError> {
        Self::open(
            whence,
            dag,
            Kind::Snapshot {
                last_mutation_ids,
                cookie,
            },
        )
    }

    /// Start an index change. The returned transaction cannot change data.
    pub fn new_index_change(
        whence: &Whence,
        dag: &'a mut dyn ChunkWrite,
    ) -> Result<IndexChangeWrite<'a>, DbError> {
        Ok(IndexChangeWrite(Self::open(whence, dag, Kind::IndexChange)?))
    }

    /// The basis commit.
    pub fn basis(&self) -> &Commit {
        &self.basis
    }

    /// Mutation id the commit will carry, for local writes.
    pub fn mutation_id(&self) -> Option<u64> {
        match &self.kind {
            Kind::Local { mutation_id, .. } => Some(*mutation_id),
            _ => None,
        }
    }

    /// Value at `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// `true` if `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.map.has(key)
    }

    /// Number of entries in the value map.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` if the value map is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Value-map entries under `prefix`, from `start`.
    pub fn scan<'s>(
        &'s self,
        prefix: &'s str,
        start: Option<&'s str>,
    ) -> impl Iterator<Item = (&'s str, &'s Value)> + 's {
        self.map.scan(prefix, start)
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

    /// Names of the live indexes.
    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }

    fn ensure_data_write(&self, op: &'static str) -> Result<(), DbError> {
        match self.kind {
            Kind::IndexChange => Err(DbError::NotAllowed(op)),
            _ => Ok(()),
        }
    }

    fn ensure_index_change(&self, op: &'static str) -> Result<(), DbError> {
        match self.kind {
            Kind::IndexChange => Ok(()),
            _ => Err(DbError::NotAllowed(op)),
        }
    }

    /// Insert or replace `key`, updating every index.
    pub fn put(&mut self, key: impl Into<String>, value: Value) -> Result<(), DbError> {
        self.ensure_data_write("put")?;
        let key = key.into();
        if let Some(old) = self.map.get(&key).cloned() {
            for index in self.indexes.values_mut() {
                index.remove(&key, &old);
            }
        }
        for index in self.indexes.values_mut() {
            index.add(&key, &value);
        }
        self.map.put(key, value);
        Ok(())
    }

    /// Remove `key` and its index entries. Returns whether it was present.
    pub fn del(&mut self, key: &str) -> Result<bool, DbError> {
        self.ensure_data_write("del")?;
        let Some(old) = self.map.get(key).cloned() else {
            return Ok(false);
        };
        for index in self.indexes.values_mut() {
            index.remove(key, &old);
        }
        Ok(self.map.del(key))
    }

    /// Remove every entry from the value map and every index.
    pub fn clear(&mut self) -> Result<(), DbError> {
        self.ensure_data_write("clear")?;
        self.map.clear();
        for index in self.indexes.values_mut() {
            index.map.clear();
        }
        Ok(())
    }

    /// Add an index built over the current map. Re-creating an identical
    /// index is a no-op.
    pub fn create_index(&mut self, definition: IndexDefinition) -> Result<(), DbError> {
        self.ensure_index_change("createIndex")?;
        if let Some(existing) = self.indexes.get(&definition.name) {
            if existing.definition == definition {
                return Ok(());
            }
            return Err(DbError::IndexExists(definition.name));
        }
        let live = LiveIndex::build(definition, &self.map);
        self.indexes.insert(live.definition.name.clone(), live);
        Ok(())
    }

    /// Remove index `name`.
    pub fn drop_index(&mut self, name: &str) -> Result<(), DbError> {
        self.ensure_index_change("dropIndex")?;
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DbError::IndexNotFound(name.to_owned()))
    }

    fn stage(&mut self) -> Result<Commit, DbError> {
        let value_hash = self.map.flush(&mut *self.dag)?;
        let mut indexes = Vec::with_capacity(self.indexes.len());
        for index in self.indexes.values() {
            indexes.push(index.flush(&mut *self.dag)?);
        }
        let basis_hash = self.basis.hash();
        let meta = match &self.kind {
            Kind::Local {
                mutation_id,
                mutator_name,
                mutator_args,
                original_hash,
                timestamp,
                client_id,
            } => Meta::Local(LocalMeta {
                basis_hash,
                mutation_id: *mutation_id,
                mutator_name: mutator_name.clone(),
                mutator_args: mutator_args.clone(),
                original_hash: *original_hash,
                timestamp: *timestamp,
                client_id: client_id.clone(),
            }),
            Kind::Snapshot {
                last_mutation_ids,
                cookie,
            } => Meta::Snapshot(SnapshotMeta {
                basis_hash,
                last_mutation_ids: last_mutation_ids.clone(),
                cookie: cookie.clone(),
            }),
            Kind::IndexChange => Meta::IndexChange(IndexChangeMeta {
                basis_hash,
                last_mutation_ids: mutation_ids(&self.basis, &*self.dag)?,
            }),
        };
        let commit = Commit::new(CommitData {
            meta,
            value_hash,
            indexes,
        })?;
        self.dag.put_chunk(commit.chunk().clone())?;
        debug!(hash = %commit.hash(), kind = self.kind.name(), "staged commit");
        Ok(commit)
    }

    /// Stage the maps and the commit chunk without moving any head or
    /// committing the chunk transaction.
    pub fn put_commit(mut self) -> Result<Commit, DbError> {
        self.stage()
    }

    /// Stage, point `head` at the new commit, and commit the chunk
    /// transaction.
    pub fn commit(mut self, head: &str) -> Result<ChunkHash, DbError> {
        let commit = self.stage()?;
        self.dag.set_head(head, commit.hash())?;
        self.dag.commit()?;
        Ok(commit.hash())
    }

    /// [`Write::commit`], also returning the diff against the basis.
    pub fn commit_with_diffs(mut self, head: &str) -> Result<(ChunkHash, DiffsMap), DbError> {
        let commit = self.stage()?;
        let diffs = diff_commits(&self.basis, &commit, &*self.dag)?;
        self.dag.set_head(head, commit.hash())?;
        self.dag.commit()?;
        Ok((commit.hash(), diffs))
    }
}

/// A write that may only add or drop indexes.
pub struct IndexChangeWrite<'a>(Write<'a>);

impl IndexChangeWrite<'_> {
    /// The basis commit.
    pub fn basis(&self) -> &Commit {
        self.0.basis()
    }

    /// Value at `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// `true` if `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.0.has(key)
    }

    /// Entries of index `name` whose secondary key starts with `prefix`.
    pub fn scan_index(
        &self,
        name: &str,
        prefix: &str,
        start: Option<&str>,
    ) -> Result<Vec<IndexEntry>, DbError> {
        self.0.scan_index(name, prefix, start)
    }

    /// See [`Write::create_index`].
    pub fn create_index(&mut self, definition: IndexDefinition) -> Result<(), DbError> {
        self.0.create_index(definition)
    }

    /// See [`Write::drop_index`].
    pub fn drop_index(&mut self, name: &str) -> Result<(), DbError> {
        self.0.drop_index(name)
    }

    /// See [`Write::put_commit`].
    pub fn put_commit(self) -> Result<Commit, DbError> {
        self.0.put_commit()
    }

    /// See [`Write::commit`].
    pub fn commit(self, head: &str) -> Result<ChunkHash, DbError> {
        self.0.commit(head)
    }

    /// See [`Write::commit_with_diffs`].
    pub fn commit_with_diffs(self, head: &str) -> Result<(ChunkHash, DiffsMap), DbError> {
        self.0.commit_with_diffs(head)
    }
}

/// Stage a genesis commit with an empty value map. No head moves.
pub fn genesis_commit<W: ChunkWrite + ?Sized>(
    dag: &mut W,
    dialect: Dialect,
) -> Result<Commit, DbError> {
    let value_hash = KvMap::new().flush(dag)?;
    let commit = Commit::new(CommitData {
        meta: Meta::Genesis(GenesisMeta { dialect }),
        value_hash,
        indexes: Vec::new(),
    })?;
    dag.put_chunk(commit.chunk().clone())?;
    Ok(commit)
}

/// Write a genesis commit, point `head` at it, and commit.
pub fn init_db<W: ChunkWrite + ?Sized>(
    dag: &mut W,
    head: &str,
    dialect: Dialect,
) -> Result<ChunkHash, DbError> {
    let genesis = genesis_commit(dag, dialect)?;
    dag.set_head(head, genesis.hash())?;
    dag.commit()?;
    Ok(genesis.hash())
}
