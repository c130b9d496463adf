// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Commit records layered on chunks.
//!
//! A commit is a chunk whose payload is [`CommitData`]: a [`Meta`] describing
//! how the commit came to be, the hash of its value map, and its index records.
//! Chunk refs are the value map, the basis commit, and every index map, so a
//! head keeps its whole history and state alive. `original_hash` on a local
//! commit is informational and deliberately not a ref.
//!
//! Two metadata dialects exist. In the multi-client-group dialect (the one new
//! graphs use) snapshots carry a per-client mutation id table and local commits
//! carry their client id. The single-client-group dialect tracks one mutation id
//! and untagged local commits; it behaves as the multi dialect restricted to a
//! single client.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use replidag_cas::{Chunk, ChunkHash, ChunkRead};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cookie::compare_cookies;
use crate::index::IndexRecord;
use crate::{ClientId, DbError};

/// Metadata dialect, fixed at genesis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// One client per group; a single last mutation id.
    SingleClientGroup,
    /// Many clients per group; mutation ids tracked per client.
    MultiClientGroup,
}

/// The last mutation id absorbed for each client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastMutationIds {
    /// Single-client-group dialect. Answers for whichever client asks.
    Single(u64),
    /// Multi-client-group dialect. Absent clients are at 0.
    Multi(BTreeMap<ClientId, u64>),
}

impl LastMutationIds {
    /// Empty table for `dialect`.
    pub fn empty(dialect: Dialect) -> Self {
        match dialect {
            Dialect::SingleClientGroup => Self::Single(0),
            Dialect::MultiClientGroup => Self::Multi(BTreeMap::new()),
        }
    }

    /// Last mutation id for `client_id`.
    pub fn get(&self, client_id: &str) -> u64 {
        match self {
            Self::Single(id) => *id,
            Self::Multi(ids) => ids.get(client_id).copied().unwrap_or(0),
        }
    }

    /// Record `id` as the last mutation id for `client_id`.
    pub fn set(&mut self, client_id: &str, id: u64) {
        match self {
            Self::Single(last) => *last = id,
            Self::Multi(ids) => {
                ids.insert(client_id.to_owned(), id);
            }
        }
    }

    /// Dialect this table belongs to.
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Single(_) => Dialect::SingleClientGroup,
            Self::Multi(_) => Dialect::MultiClientGroup,
        }
    }
}

/// Root of a history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisMeta {
    /// Dialect every commit in this history uses.
    pub dialect: Dialect,
}

/// State received from the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Previous commit.
    pub basis_hash: ChunkHash,
    /// Mutations the server has applied, per client.
    pub last_mutation_ids: LastMutationIds,
    /// Server position; orders snapshots.
    pub cookie: Value,
}

/// A local mutation, replayable on a new basis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalMeta {
    /// Previous commit.
    pub basis_hash: ChunkHash,
    /// Per-client sequence number, starting at 1.
    pub mutation_id: u64,
    /// Mutator to replay.
    pub mutator_name: String,
    /// Arguments to replay it with.
    pub mutator_args: Value,
    /// First commit this mutation produced; `None` until it is rebased.
    pub original_hash: Option<ChunkHash>,
    /// Wall-clock milliseconds when this commit was made.
    pub timestamp: u64,
    /// Owning client; set exactly in the multi-client-group dialect.
    pub client_id: Option<ClientId>,
}

/// An index add or drop. Carries no data mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChangeMeta {
    /// Previous commit.
    pub basis_hash: ChunkHash,
    /// Mutation ids at the basis when the change was made.
    pub last_mutation_ids: LastMutationIds,
}

/// How a commit was produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Meta {
    /// See [`GenesisMeta`].
    Genesis(GenesisMeta),
    /// See [`SnapshotMeta`].
    Snapshot(SnapshotMeta),
    /// See [`LocalMeta`].
    Local(LocalMeta),
    /// See [`IndexChangeMeta`].
    IndexChange(IndexChangeMeta),
}

impl Meta {
    /// Basis commit, `None` for genesis.
    pub fn basis_hash(&self) -> Option<ChunkHash> {
        match self {
            Self::Genesis(_) => None,
            Self::Snapshot(m) => Some(m.basis_hash),
            Self::Local(m) => Some(m.basis_hash),
            Self::IndexChange(m) => Some(m.basis_hash),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Genesis(_) => "genesis",
            Self::Snapshot(_) => "snapshot",
            Self::Local(_) => "local",
            Self::IndexChange(_) => "index-change",
        }
    }
}

/// Payload of a commit chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitData {
    /// How the commit came to be.
    pub meta: Meta,
    /// Chunk holding the value map.
    pub value_hash: ChunkHash,
    /// Secondary indexes, sorted by name.
    pub indexes: Vec<IndexRecord>,
}

impl CommitData {
    fn validate(&self) -> Result<(), DbError> {
        if let Meta::Local(local) = &self.meta {
            if local.mutator_name.is_empty() {
                return Err(DbError::InvalidCommit("Missing mutator name".into()));
            }
            if local.mutation_id == 0 {
                return Err(DbError::InvalidCommit(
                    "local mutation ids start at 1".into(),
                ));
            }
        }
        let mut names = HashSet::new();
        for index in &self.indexes {
            if !names.insert(index.definition.name.as_str()) {
                return Err(DbError::InvalidCommit(format!(
                    "duplicate index {}",
                    index.definition.name
                )));
            }
        }
        Ok(())
    }

    fn refs(&self) -> Vec<ChunkHash> {
        let mut refs = vec![self.value_hash];
        refs.extend(self.meta.basis_hash());
        refs.extend(self.indexes.iter().map(|i| i.value_hash));
        let mut seen = HashSet::new();
        refs.retain(|h| seen.insert(*h));
        refs
    }
}

/// A decoded commit together with its chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct Commit {
    chunk: Chunk,
    data: CommitData,
}

impl Commit {
    /// Encode `data` as a new commit chunk.
    pub fn new(data: CommitData) -> Result<Self, DbError> {
        data.validate()?;
        let chunk = Chunk::encode(&data, data.refs())?;
        Ok(Self { chunk, data })
    }

    /// Decode and validate a commit chunk.
    pub fn from_chunk(chunk: Chunk) -> Result<Self, DbError> {
        let data: CommitData = chunk
            .decode()
            .map_err(|e| DbError::InvalidCommit(format!("{}: {e}", chunk.hash())))?;
        data.validate()?;
        Ok(Self { chunk, data })
    }

    /// Hash of the commit chunk.
    pub fn hash(&self) -> ChunkHash {
        self.chunk.hash()
    }

    /// Underlying chunk.
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Decoded payload.
    pub fn data(&self) -> &CommitData {
        &self.data
    }

    /// Commit metadata.
    pub fn meta(&self) -> &Meta {
        &self.data.meta
    }

    /// Chunk holding the value map.
    pub fn value_hash(&self) -> ChunkHash {
        self.data.value_hash
    }

    /// Index records.
    pub fn indexes(&self) -> &[IndexRecord] {
        &self.data.indexes
    }

    /// Basis commit, `None` for genesis.
    pub fn basis_hash(&self) -> Option<ChunkHash> {
        self.data.meta.basis_hash()
    }

    /// Local metadata if this is a local mutation.
    pub fn as_local(&self) -> Option<&LocalMeta> {
        match &self.data.meta {
            Meta::Local(m) => Some(m),
            _ => None,
        }
    }

    /// `true` for genesis and snapshot commits, which anchor server state.
    pub fn is_snapshot(&self) -> bool {
        matches!(self.data.meta, Meta::Genesis(_) | Meta::Snapshot(_))
    }

    /// Cookie of a snapshot; genesis has the `null` cookie.
    pub fn cookie(&self) -> Result<&Value, DbError> {
        const NULL: &Value = &Value::Null;
        match &self.data.meta {
            Meta::Genesis(_) => Ok(NULL),
            Meta::Snapshot(m) => Ok(&m.cookie),
            other => Err(DbError::InvalidCommit(format!(
                "{} commit {} has no cookie",
                other.kind(),
                self.hash()
            ))),
        }
    }

    /// Last mutation id for `client_id` as of this commit.
    pub fn mutation_id<R: ChunkRead + ?Sized>(
        &self,
        client_id: &str,
        read: &R,
    ) -> Result<u64, DbError> {
        let mut commit = self.clone();
        loop {
            match &commit.data.meta {
                Meta::Genesis(_) => return Ok(0),
                Meta::Snapshot(m) => return Ok(m.last_mutation_ids.get(client_id)),
                Meta::IndexChange(m) => return Ok(m.last_mutation_ids.get(client_id)),
                Meta::Local(m) => {
                    if owned_by(m, client_id) {
                        return Ok(m.mutation_id);
                    }
                    commit = commit_from_hash(&m.basis_hash, read)?;
                }
            }
        }
    }

    /// Mutation id the next local commit by `client_id` on top of this one gets.
    pub fn next_mutation_id<R: ChunkRead + ?Sized>(
        &self,
        client_id: &str,
        read: &R,
    ) -> Result<u64, DbError> {
        Ok(self.mutation_id(client_id, read)? + 1)
    }
}

/// `true` if `meta` counts as a mutation by `client_id`. Untagged (single
/// dialect) commits belong to whichever client asks.
fn owned_by(meta: &LocalMeta, client_id: &str) -> bool {
    meta.client_id.as_deref().is_none_or(|c| c == client_id)
}

/// Load the commit stored at `hash`.
pub fn commit_from_hash<R: ChunkRead + ?Sized>(
    hash: &ChunkHash,
    read: &R,
) -> Result<Commit, DbError> {
    Commit::from_chunk(read.must_get_chunk(hash)?)
}

/// Load the commit head `name` points at.
pub fn commit_from_head<R: ChunkRead + ?Sized>(name: &str, read: &R) -> Result<Commit, DbError> {
    let hash = read
        .get_head(name)?
        .ok_or_else(|| DbError::MissingHead(name.to_owned()))?;
    commit_from_hash(&hash, read)
}

/// Nearest snapshot (or genesis) at or below `commit`.
pub fn base_snapshot_from_commit<R: ChunkRead + ?Sized>(
    commit: &Commit,
    read: &R,
) -> Result<Commit, DbError> {
    let mut current = commit.clone();
    while !current.is_snapshot() {
        let basis = current.basis_hash().ok_or_else(|| {
            DbError::InvalidCommit(format!("commit {} has no basis", current.hash()))
        })?;
        current = commit_from_hash(&basis, read)?;
    }
    Ok(current)
}

/// [`base_snapshot_from_commit`] starting from a hash.
pub fn base_snapshot_from_hash<R: ChunkRead + ?Sized>(
    hash: &ChunkHash,
    read: &R,
) -> Result<Commit, DbError> {
    base_snapshot_from_commit(&commit_from_hash(hash, read)?, read)
}

/// Compare two snapshots by cookie.
pub fn compare_cookies_for_snapshots(a: &Commit, b: &Commit) -> Result<Ordering, DbError> {
    compare_cookies(a.cookie()?, b.cookie()?)
}

/// The full mutation id table as of `commit`: the nearest snapshot or index
/// change, with every later local commit applied.
pub fn mutation_ids<R: ChunkRead + ?Sized>(
    commit: &Commit,
    read: &R,
) -> Result<LastMutationIds, DbError> {
    let mut locals = Vec::new();
    let mut current = commit.clone();
    let mut ids = loop {
        match &current.data.meta {
            Meta::Genesis(g) => break LastMutationIds::empty(g.dialect),
            Meta::Snapshot(m) => break m.last_mutation_ids.clone(),
            Meta::IndexChange(m) => break m.last_mutation_ids.clone(),
            Meta::Local(m) => {
                let basis = m.basis_hash;
                locals.push(current);
                current = commit_from_hash(&basis, read)?;
            }
        }
    };
    for local in locals.iter().rev() {
        if let Some(m) = local.as_local() {
            let owner = m.client_id.as_deref().unwrap_or_default();
            ids.set(owner, m.mutation_id);
        }
    }
    Ok(ids)
}

/// Local commits above the base snapshot of `hash`, newest first.
pub fn local_mutations<R: ChunkRead + ?Sized>(
    hash: &ChunkHash,
    read: &R,
) -> Result<Vec<Commit>, DbError> {
    let mut out = Vec::new();
    let mut current = commit_from_hash(hash, read)?;
    while !current.is_snapshot() {
        let basis = current.basis_hash().ok_or_else(|| {
            DbError::InvalidCommit(format!("commit {} has no basis", current.hash()))
        })?;
        if current.as_local().is_some() {
            out.push(current);
        }
        current = commit_from_hash(&basis, read)?;
    }
    Ok(out)
}

/// Local commits reachable from `commit` (above its base snapshot) whose
/// mutation id exceeds the limit for their client, oldest first.
///
/// Walking newest to oldest, the first local at or below a client's limit
/// retires that client: everything older is already absorbed. Clients not in
/// `limits` are ignored. The walk stops early once every client is retired.
pub fn local_mutations_greater_than<R: ChunkRead + ?Sized>(
    commit: &Commit,
    limits: &BTreeMap<ClientId, u64>,
    read: &R,
) -> Result<Vec<Commit>, DbError> {
    let mut remaining = limits.clone();
    let mut out = Vec::new();
    let mut current = commit.clone();
    while !remaining.is_empty() && !current.is_snapshot() {
        if let Some(m) = current.as_local() {
            let owners: Vec<ClientId> = match &m.client_id {
                Some(c) if remaining.contains_key(c) => vec![c.clone()],
                Some(_) => Vec::new(),
                None => remaining.keys().cloned().collect(),
            };
            let mut pending = false;
            for owner in owners {
                if remaining.get(&owner).is_some_and(|limit| m.mutation_id > *limit) {
                    pending = true;
                } else {
                    remaining.remove(&owner);
                }
            }
            if pending {
                out.push(current.clone());
            }
        }
        let basis = current.basis_hash().ok_or_else(|| {
            DbError::InvalidCommit(format!("commit {} has no basis", current.hash()))
        })?;
        current = commit_from_hash(&basis, read)?;
    }
    out.reverse();
    Ok(out)
}

/// Every commit from `hash` down to genesis, newest first.
pub fn chain<R: ChunkRead + ?Sized>(hash: &ChunkHash, read: &R) -> Result<Vec<Commit>, DbError> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(*hash);
    while let Some(h) = next {
        if !seen.insert(h) {
            return Err(DbError::InvalidCommit(format!("cycle through {h}")));
        }
        let commit = commit_from_hash(&h, read)?;
        next = commit.basis_hash();
        out.push(commit);
    }
    Ok(out)
}

/// Walk from `hash` to genesis and check the chain invariants: every basis
/// resolves, the dialect is consistent, and each client's local mutation ids
/// continue exactly one past the previous id (snapshot or local) with no gaps
/// or repeats.
pub fn verify_chain<R: ChunkRead + ?Sized>(hash: &ChunkHash, read: &R) -> Result<(), DbError> {
    let commits = chain(hash, read)?;
    let mut iter = commits.iter().rev();
    let dialect = match iter.next().map(Commit::meta) {
        Some(Meta::Genesis(g)) => g.dialect,
        _ => {
            return Err(DbError::InvalidCommit(format!(
                "chain from {hash} does not end at genesis"
            )))
        }
    };
    let mut expected = LastMutationIds::empty(dialect);
    for commit in iter {
        let bad = |reason: String| DbError::InvalidCommit(format!("{}: {reason}", commit.hash()));
        match commit.meta() {
            Meta::Genesis(_) => return Err(bad("genesis in the middle of a chain".into())),
            Meta::Snapshot(SnapshotMeta {
                last_mutation_ids, ..
            })
            | Meta::IndexChange(IndexChangeMeta {
                last_mutation_ids, ..
            }) => {
                if last_mutation_ids.dialect() != dialect {
                    return Err(bad("mutation id table does not match dialect".into()));
                }
                expected = last_mutation_ids.clone();
            }
            Meta::Local(m) => {
                let owner = match (&m.client_id, dialect) {
                    (Some(c), Dialect::MultiClientGroup) => c.as_str(),
                    (None, Dialect::SingleClientGroup) => "",
                    _ => return Err(bad("client id tag does not match dialect".into())),
                };
                let want = expected.get(owner) + 1;
                if m.mutation_id != want {
                    return Err(bad(format!(
                        "mutation id {} for {owner:?}, expected {want}",
                        m.mutation_id
                    )));
                }
                expected.set(owner, m.mutation_id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use replidag_cas::{ChunkStore, ChunkWrite, MemoryStore};
    use serde_json::json;

    use super::*;
    use crate::kv::KvMap;

    struct Builder {
        store: MemoryStore,
        value_hash: ChunkHash,
        tip: Option<ChunkHash>,
    }

    impl Builder {
        fn new() -> Self {
            let store = MemoryStore::new();
            let mut w = store.write().unwrap();
            let value_hash = KvMap::new().flush(&mut w).unwrap();
            w.commit().unwrap();
            drop(w);
            Self {
                store,
                value_hash,
                tip: None,
            }
        }

        fn push(&mut self, meta: Meta) -> Commit {
            let commit = Commit::new(CommitData {
                meta,
                value_hash: self.value_hash,
                indexes: Vec::new(),
            })
            .unwrap();
            let mut w = self.store.write().unwrap();
            w.put_chunk(commit.chunk().clone()).unwrap();
            w.set_head("main", commit.hash()).unwrap();
            w.commit().unwrap();
            self.tip = Some(commit.hash());
            commit
        }

        fn genesis(&mut self, dialect: Dialect) -> Commit {
            self.push(Meta::Genesis(GenesisMeta { dialect }))
        }

        fn snapshot(&mut self, ids: LastMutationIds, cookie: Value) -> Commit {
            let basis_hash = self.tip.unwrap();
            self.push(Meta::Snapshot(SnapshotMeta {
                basis_hash,
                last_mutation_ids: ids,
                cookie,
            }))
        }

        fn local(&mut self, client: Option<&str>, id: u64) -> Commit {
            let basis_hash = self.tip.unwrap();
            self.push(Meta::Local(LocalMeta {
                basis_hash,
                mutation_id: id,
                mutator_name: "m".into(),
                mutator_args: json!(id),
                original_hash: None,
                timestamp: 42,
                client_id: client.map(str::to_owned),
            }))
        }
    }

    fn multi(pairs: &[(&str, u64)]) -> LastMutationIds {
        LastMutationIds::Multi(pairs.iter().map(|(c, i)| ((*c).to_owned(), *i)).collect())
    }

    #[test]
    fn refs_cover_value_basis_and_indexes_but_not_original() {
        let mut b = Builder::new();
        let g = b.genesis(Dialect::MultiClientGroup);
        let l = b.local(Some("c1"), 1);
        assert_eq!(l.chunk().refs(), &[b.value_hash, g.hash()]);
        let meta = LocalMeta {
            original_hash: Some(l.hash()),
            ..l.as_local().unwrap().clone()
        };
        let rebased = Commit::new(CommitData {
            meta: Meta::Local(meta),
            value_hash: b.value_hash,
            indexes: Vec::new(),
        })
        .unwrap();
        assert!(!rebased.chunk().refs().contains(&l.hash()));
    }

    #[test]
    fn from_chunk_rejects_missing_mutator_name() {
        let data = CommitData {
            meta: Meta::Local(LocalMeta {
                basis_hash: replidag_cas::chunk_hash(b"b"),
                mutation_id: 1,
                mutator_name: String::new(),
                mutator_args: Value::Null,
                original_hash: None,
                timestamp: 0,
                client_id: None,
            }),
            value_hash: replidag_cas::chunk_hash(b"v"),
            indexes: Vec::new(),
        };
        let chunk = Chunk::encode(&data, Vec::new()).unwrap();
        let err = Commit::from_chunk(chunk).unwrap_err();
        assert!(err.to_string().contains("Missing mutator name"));
        assert!(Commit::from_chunk(Chunk::new(b"junk".to_vec(), Vec::new())).is_err());
    }

    #[test]
    fn base_snapshot_and_local_mutations() {
        let mut b = Builder::new();
        b.genesis(Dialect::MultiClientGroup);
        let s = b.snapshot(multi(&[("c1", 0)]), json!(1));
        let l1 = b.local(Some("c1"), 1);
        let l2 = b.local(Some("c1"), 2);
        let r = b.store.read().unwrap();

        let base = base_snapshot_from_hash(&l2.hash(), &r).unwrap();
        assert_eq!(base.hash(), s.hash());
        assert_eq!(base.cookie().unwrap(), &json!(1));

        let locals = local_mutations(&l2.hash(), &r).unwrap();
        let hashes: Vec<ChunkHash> = locals.iter().map(Commit::hash).collect();
        assert_eq!(hashes, [l2.hash(), l1.hash()]);
        assert!(local_mutations(&s.hash(), &r).unwrap().is_empty());
    }

    #[test]
    fn mutation_ids_are_scoped_per_client() {
        let mut b = Builder::new();
        b.genesis(Dialect::MultiClientGroup);
        b.snapshot(multi(&[("c1", 3), ("c2", 2)]), json!(1));
        b.local(Some("c2"), 3);
        let tip = b.local(Some("c1"), 4);
        let r = b.store.read().unwrap();

        assert_eq!(tip.mutation_id("c1", &r).unwrap(), 4);
        assert_eq!(tip.mutation_id("c2", &r).unwrap(), 3);
        assert_eq!(tip.next_mutation_id("c3", &r).unwrap(), 1);
        assert_eq!(
            mutation_ids(&tip, &r).unwrap(),
            multi(&[("c1", 4), ("c2", 3)])
        );
    }

    #[test]
    fn single_dialect_answers_for_any_client() {
        let mut b = Builder::new();
        b.genesis(Dialect::SingleClientGroup);
        b.snapshot(LastMutationIds::Single(5), json!("a"));
        let tip = b.local(None, 6);
        let r = b.store.read().unwrap();
        assert_eq!(tip.mutation_id("whoever", &r).unwrap(), 6);
        assert_eq!(mutation_ids(&tip, &r).unwrap(), LastMutationIds::Single(6));
        verify_chain(&tip.hash(), &r).unwrap();

        let pending = local_mutations_greater_than(
            &tip,
            &BTreeMap::from([("me".to_owned(), 5)]),
            &r,
        )
        .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn greater_than_retires_clients_and_returns_oldest_first() {
        let mut b = Builder::new();
        b.genesis(Dialect::MultiClientGroup);
        b.snapshot(multi(&[]), json!(1));
        b.local(Some("c1"), 1);
        b.local(Some("c2"), 1);
        let l3 = b.local(Some("c1"), 2);
        let l4 = b.local(Some("c1"), 3);
        let r = b.store.read().unwrap();

        let limits = BTreeMap::from([("c1".to_owned(), 1)]);
        let got = local_mutations_greater_than(&l4, &limits, &r).unwrap();
        let hashes: Vec<ChunkHash> = got.iter().map(Commit::hash).collect();
        assert_eq!(hashes, [l3.hash(), l4.hash()]);

        let limits = BTreeMap::from([("c1".to_owned(), 3)]);
        assert!(local_mutations_greater_than(&l4, &limits, &r)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn chain_walks_to_genesis() {
        let mut b = Builder::new();
        b.genesis(Dialect::MultiClientGroup);
        b.snapshot(multi(&[]), Value::Null);
        let tip = b.local(Some("c1"), 1);
        let r = b.store.read().unwrap();
        let commits = chain(&tip.hash(), &r).unwrap();
        assert_eq!(commits.len(), 3);
        assert!(matches!(commits[2].meta(), Meta::Genesis(_)));
        verify_chain(&tip.hash(), &r).unwrap();
    }

    #[test]
    fn verify_chain_detects_gaps_and_dialect_mismatch() {
        let mut b = Builder::new();
        b.genesis(Dialect::MultiClientGroup);
        b.snapshot(multi(&[("c1", 1)]), json!(1));
        let gap = b.local(Some("c1"), 3);
        let r = b.store.read().unwrap();
        assert!(matches!(
            verify_chain(&gap.hash(), &r),
            Err(DbError::InvalidCommit(_))
        ));
        drop(r);

        let mut b = Builder::new();
        b.genesis(Dialect::MultiClientGroup);
        let untagged = b.local(None, 1);
        let r = b.store.read().unwrap();
        assert!(verify_chain(&untagged.hash(), &r).is_err());
    }

    #[test]
    fn snapshot_cookie_comparison() {
        let mut b = Builder::new();
        let g = b.genesis(Dialect::MultiClientGroup);
        let s1 = b.snapshot(multi(&[]), json!(1));
        let s2 = b.snapshot(multi(&[]), json!(2));
        let l = b.local(Some("c"), 1);
        assert_eq!(
            compare_cookies_for_snapshots(&g, &s1).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare_cookies_for_snapshots(&s2, &s1).unwrap(),
            Ordering::Greater
        );
        assert!(compare_cookies_for_snapshots(&l, &s1).is_err());
    }
}
