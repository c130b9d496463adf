// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! replidag-core: hash-linked commit graph and refresh protocol for an
//! offline-first client.
//!
//! Application state lives in commits stored as content-addressed chunks. A
//! fast in-memory copy of the graph (the memdag) takes local mutations; a
//! durable copy (the perdag) is shared by every client in a client group.
//! [`refresh`] merges the perdag's current head into the memdag, replaying any
//! local mutation the perdag has not absorbed yet.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod clock;
/// Client and client-group records kept in the perdag.
pub mod clients;
mod commit;
mod cookie;
mod diff;
mod error;
mod index;
mod kv;
mod mutators;
mod read;
mod rebase;
mod refresh;
mod replica;
mod write;

pub use clock::{Clock, SystemClock};
pub use commit::{
    base_snapshot_from_commit, base_snapshot_from_hash, chain, commit_from_hash,
    commit_from_head, compare_cookies_for_snapshots, local_mutations,
    local_mutations_greater_than, mutation_ids, verify_chain, Commit, CommitData, Dialect,
    GenesisMeta, IndexChangeMeta, LastMutationIds, LocalMeta, Meta, SnapshotMeta,
};
pub use cookie::compare_cookies;
pub use diff::{diff_commits, diff_maps, DiffEntry, DiffOp, DiffsMap};
pub use error::DbError;
pub use index::{
    decode_index_key, encode_index_key, index_keys, IndexDefinition, IndexEntry, IndexRecord,
};
pub use kv::KvMap;
pub use mutators::{MutatorFn, MutatorRegistry, MutatorTable};
pub use read::Read;
pub use rebase::rebase_mutation;
pub use refresh::{refresh, Refresh, RefreshOutcome, RefreshState, REFRESH_HEAD_NAME};
pub use replica::{open_perdag, Replica};
pub use write::{genesis_commit, init_db, IndexChangeWrite, Whence, Write};

/// Head every client's working state hangs off.
pub const DEFAULT_HEAD_NAME: &str = "main";

/// Identifies one client (a tab, a process) within a client group.
pub type ClientId = String;

/// Identifies a client group: the clients sharing one perdag head and one
/// server acknowledgement sequence.
pub type ClientGroupId = String;
