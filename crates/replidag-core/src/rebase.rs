// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Replaying a local mutation on a new basis.

use replidag_cas::{ChunkHash, ChunkWrite};
use tracing::{debug, instrument, warn};

use crate::commit::{commit_from_hash, Commit, LocalMeta};
use crate::mutators::MutatorTable;
use crate::write::{Whence, Write};
use crate::DbError;

fn replay_write<'a>(
    meta: &LocalMeta,
    original_hash: ChunkHash,
    new_basis: ChunkHash,
    dag: &'a mut dyn ChunkWrite,
    timestamp: u64,
    owner: &str,
) -> Result<Write<'a>, DbError> {
    Write::new_local(
        &Whence::Hash(new_basis),
        meta.mutator_name.clone(),
        meta.mutator_args.clone(),
        Some(original_hash),
        dag,
        timestamp,
        owner,
    )
}

/// Re-run the mutator behind local commit `commit` on top of `new_basis`.
///
/// The new commit keeps the original arguments and the first `original_hash`
/// of the mutation, takes `timestamp`, and is staged without moving any head.
/// Returns its hash. The owning client is the commit's tag, or `client_id` for
/// untagged commits.
///
/// An unknown mutator, or one that fails, still yields a commit: a no-op on
/// the new basis, logged at `warn`.
///
/// # Errors
///
/// [`DbError::NotLocal`] for a non-local commit and
/// [`DbError::InconsistentMutationId`] when the new basis does not continue
/// the owner's mutation ids at exactly this mutation.
#[instrument(level = "debug", skip_all, fields(commit = %commit.hash(), basis = %new_basis))]
pub fn rebase_mutation<M: MutatorTable + ?Sized>(
    commit: &Commit,
    dag: &mut dyn ChunkWrite,
    new_basis: ChunkHash,
    mutators: &M,
    client_id: &str,
    timestamp: u64,
) -> Result<ChunkHash, DbError> {
    let meta = commit.as_local().ok_or(DbError::NotLocal(commit.hash()))?;
    let owner = meta.client_id.as_deref().unwrap_or(client_id);

    let basis = commit_from_hash(&new_basis, &*dag)?;
    let expected = basis.next_mutation_id(owner, &*dag)?;
    if expected != meta.mutation_id {
        return Err(DbError::InconsistentMutationId {
            client_id: owner.to_owned(),
            expected,
            actual: meta.mutation_id,
        });
    }

    let original_hash = meta.original_hash.unwrap_or_else(|| commit.hash());
    let mut tx = replay_write(meta, original_hash, new_basis, &mut *dag, timestamp, owner)?;
    let rebased = match mutators.apply(&meta.mutator_name, &mut tx, &meta.mutator_args) {
        Some(Ok(())) => tx.put_commit()?,
        None => {
            warn!(mutator = %meta.mutator_name, "unknown mutator; rebasing as a no-op");
            tx.put_commit()?
        }
        Some(Err(err)) => {
            warn!(mutator = %meta.mutator_name, ?err, "mutator failed; rebasing as a no-op");
            drop(tx);
            replay_write(meta, original_hash, new_basis, dag, timestamp, owner)?.put_commit()?
        }
    };
    debug!(rebased = %rebased.hash(), mutation_id = meta.mutation_id, "rebased mutation");
    Ok(rebased.hash())
}
