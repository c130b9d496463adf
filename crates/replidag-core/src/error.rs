// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use replidag_cas::{ChunkHash, StoreError};
use replidag_config::ConfigError;
use thiserror::Error;

use crate::{ClientGroupId, ClientId};

/// Errors produced by commit, transaction, registry, and refresh operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Chunk store failure: missing chunk, dangling ref, I/O.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A commit payload is malformed or violates a chain invariant.
    #[error("[INVALID_COMMIT] {0}")]
    InvalidCommit(String),
    /// The operation is structurally forbidden for this kind of transaction.
    #[error("[NOT_ALLOWED] Not allowed: {0}")]
    NotAllowed(&'static str),
    /// No index with this name exists on the commit.
    #[error("[INDEX_NOT_FOUND] Index not found: {0}")]
    IndexNotFound(String),
    /// An index with this name exists with a different definition.
    #[error("[INDEX_EXISTS] Index {0} already exists with a different definition")]
    IndexExists(String),
    /// A value could not be indexed.
    #[error("[NOT_INDEXABLE] {key}: {reason}")]
    NotIndexable {
        /// Primary key of the value.
        key: String,
        /// Why indexing failed.
        reason: String,
    },
    /// A named head the operation needs is not set.
    #[error("[MISSING_HEAD] head {0:?} is not set")]
    MissingHead(String),
    /// Rebase was handed a commit that is not a local mutation.
    #[error("[NOT_LOCAL] commit {0} is not a local mutation")]
    NotLocal(ChunkHash),
    /// Rebasing would skip or repeat a mutation id.
    #[error(
        "[INCONSISTENT_MUTATION_ID] Inconsistent mutation ID for {client_id}: expected {expected}, got {actual}"
    )]
    InconsistentMutationId {
        /// Client the mutation belongs to.
        client_id: ClientId,
        /// Next id on the new basis.
        expected: u64,
        /// Id carried by the commit being rebased.
        actual: u64,
    },
    /// No record for this client.
    #[error("[CLIENT_NOT_FOUND] client {0}")]
    ClientNotFound(ClientId),
    /// No record for this client group.
    #[error("[CLIENT_GROUP_NOT_FOUND] client group {0}")]
    ClientGroupNotFound(ClientGroupId),
    /// A client-group update would move a mutation id backwards.
    #[error(
        "[REGISTRY_REGRESSION] group {client_group_id}: {field} for {client_id} would move from {previous} to {next}"
    )]
    RegistryRegression {
        /// Group being updated.
        client_group_id: ClientGroupId,
        /// Which table regressed.
        field: &'static str,
        /// Client whose entry regressed.
        client_id: ClientId,
        /// Stored value.
        previous: u64,
        /// Rejected value.
        next: u64,
    },
    /// A cookie is not `null`, a number, a string, or an object with `order`.
    #[error("[INVALID_COOKIE] {0}")]
    Cookie(String),
    /// A mutator is unknown or failed.
    #[error("[MUTATOR] {name}: {reason}")]
    Mutator {
        /// Mutator name.
        name: String,
        /// Failure description.
        reason: String,
    },
    /// `Refresh::finish` was called before the loop reached a terminal state.
    #[error("[REFRESH_IN_PROGRESS] refresh has not reached a terminal state")]
    RefreshInProgress,
    /// Record (de)serialization failed outside the chunk codec.
    #[error("[CODEC] {0}")]
    Codec(String),
    /// Settings could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DbError {
    /// Convenience constructor for mutator failures raised by application code.
    pub fn mutator(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Mutator {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}
