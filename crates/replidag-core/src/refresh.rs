// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Refresh: merge the perdag's client-group head into the memdag.
//!
//! The protocol runs as a sequence of short transactions so ordinary memdag
//! writes interleave with it:
//!
//! 1. [`Refresh::start`] (perdag write) reads the group head and pins it on
//!    the client record as `temp_refresh_hash`.
//! 2. [`Refresh::reconcile`] (memdag write) points the `refresh` head at the
//!    current merge tip and decides: abort, done, or more local mutations to
//!    replay.
//! 3. [`Refresh::rebase_pending`] (one memdag write per mutation) replays each
//!    pending mutation onto the merge tip.
//! 4. [`Refresh::finish`] (perdag write) records the outcome on the client and
//!    drops the pin.
//!
//! Steps 2 and 3 repeat until step 2 reaches a terminal state. Each round
//! re-reads memdag `main`, so mutations committed meanwhile are picked up and a
//! newer snapshot landing on `main` aborts the merge.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use replidag_cas::{ChunkHash, ChunkStore, ChunkWrite};
use tracing::{debug, info, instrument};

use crate::clients::{client_group_head, get_client, set_client};
use crate::clock::Clock;
use crate::commit::{
    base_snapshot_from_commit, commit_from_hash, commit_from_head, compare_cookies_for_snapshots,
    local_mutations_greater_than, Commit,
};
use crate::diff::{diff_commits, DiffsMap};
use crate::mutators::MutatorTable;
use crate::rebase::rebase_mutation;
use crate::{ClientId, DbError, DEFAULT_HEAD_NAME};

/// Memdag head tracking the merge tip while a refresh runs.
pub const REFRESH_HEAD_NAME: &str = "refresh";

/// Result of a completed refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshOutcome {
    /// Commit memdag `main` now points at.
    pub new_head: ChunkHash,
    /// What changed between the old and the new `main`.
    pub diffs: DiffsMap,
}

/// Where a refresh stands after [`Refresh::reconcile`].
#[derive(Clone, Debug, PartialEq)]
pub enum RefreshState {
    /// Memdag `main` already saw newer server state; nothing was merged.
    Aborted,
    /// These local mutations (oldest first) still need replaying.
    InProgress(Vec<Commit>),
    /// `main` moved to the merged head.
    Completed(RefreshOutcome),
}

impl RefreshState {
    /// `true` for [`RefreshState::Aborted`] and [`RefreshState::Completed`].
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress(_))
    }
}

/// One refresh of a client's memdag from the perdag.
pub struct Refresh<'r, D, P, M: ?Sized> {
    memdag: &'r D,
    perdag: &'r P,
    client_id: ClientId,
    mutators: &'r M,
    clock: &'r dyn Clock,
    perdag_head: ChunkHash,
    refresh_head: ChunkHash,
    iterations: usize,
}

impl<'r, D, P, M> Refresh<'r, D, P, M>
where
    D: ChunkStore,
    P: ChunkStore,
    M: MutatorTable + ?Sized,
{
    /// Pin the client group's head in the perdag and begin a refresh.
    ///
    /// # Errors
    ///
    /// [`DbError::ClientNotFound`] / [`DbError::ClientGroupNotFound`] if the
    /// client is not registered in the perdag.
    pub fn start(
        memdag: &'r D,
        perdag: &'r P,
        client_id: &str,
        mutators: &'r M,
        clock: &'r dyn Clock,
    ) -> Result<Self, DbError> {
        let mut w = perdag.write()?;
        let perdag_head = client_group_head(client_id, &w)?;
        let mut client = get_client(client_id, &w)?
            .ok_or_else(|| DbError::ClientNotFound(client_id.to_owned()))?;
        client.temp_refresh_hash = Some(perdag_head);
        set_client(client_id, client, &mut w)?;
        w.commit()?;
        debug!(client_id, head = %perdag_head, "refresh started");
        Ok(Self {
            memdag,
            perdag,
            client_id: client_id.to_owned(),
            mutators,
            clock,
            perdag_head,
            refresh_head: perdag_head,
            iterations: 0,
        })
    }

    /// Perdag head this refresh merges.
    pub fn perdag_head(&self) -> ChunkHash {
        self.perdag_head
    }

    /// Current merge tip.
    pub fn refresh_head(&self) -> ChunkHash {
        self.refresh_head
    }

    /// Reconcile rounds run so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// One reconcile round in a single memdag write.
    pub fn reconcile(&mut self) -> Result<RefreshState, DbError> {
        self.iterations += 1;
        let mut w = self.memdag.write()?;
        w.set_head(REFRESH_HEAD_NAME, self.refresh_head)?;
        let main = commit_from_head(DEFAULT_HEAD_NAME, &w)?;
        let tip = commit_from_hash(&self.refresh_head, &w)?;
        let main_base = base_snapshot_from_commit(&main, &w)?;
        let tip_base = base_snapshot_from_commit(&tip, &w)?;

        let stale = match compare_cookies_for_snapshots(&main_base, &tip_base)? {
            Ordering::Greater => true,
            // Same server state and nothing local on the tip: no news.
            Ordering::Equal => tip.hash() == tip_base.hash(),
            Ordering::Less => false,
        };
        if stale {
            w.remove_head(REFRESH_HEAD_NAME)?;
            w.commit()?;
            info!(client_id = %self.client_id, "refresh aborted");
            return Ok(RefreshState::Aborted);
        }

        let last_id = tip.mutation_id(&self.client_id, &w)?;
        let limits = BTreeMap::from([(self.client_id.clone(), last_id)]);
        let pending = local_mutations_greater_than(&main, &limits, &w)?;
        if pending.is_empty() {
            let diffs = diff_commits(&main, &tip, &w)?;
            w.set_head(DEFAULT_HEAD_NAME, self.refresh_head)?;
            w.remove_head(REFRESH_HEAD_NAME)?;
            w.commit()?;
            return Ok(RefreshState::Completed(RefreshOutcome {
                new_head: self.refresh_head,
                diffs,
            }));
        }

        w.commit()?;
        debug!(pending = pending.len(), "refresh has mutations to replay");
        Ok(RefreshState::InProgress(pending))
    }

    /// Replay `pending` (oldest first) onto the merge tip, one memdag write
    /// per mutation.
    pub fn rebase_pending(&mut self, pending: &[Commit]) -> Result<(), DbError> {
        for commit in pending {
            let mut w = self.memdag.write()?;
            let rebased = rebase_mutation(
                commit,
                &mut w,
                self.refresh_head,
                self.mutators,
                &self.client_id,
                self.clock.now_ms(),
            )?;
            w.set_head(REFRESH_HEAD_NAME, rebased)?;
            w.commit()?;
            self.refresh_head = rebased;
        }
        Ok(())
    }

    /// Record a terminal `state` on the client and drop the refresh pin.
    ///
    /// The client's `head_hash` advances to the merged perdag head only on
    /// completion. Returns `None` for an aborted refresh.
    ///
    /// # Errors
    ///
    /// [`DbError::RefreshInProgress`] for a non-terminal state.
    pub fn finish(self, state: RefreshState) -> Result<Option<RefreshOutcome>, DbError> {
        let outcome = match state {
            RefreshState::InProgress(_) => return Err(DbError::RefreshInProgress),
            RefreshState::Aborted => None,
            RefreshState::Completed(outcome) => Some(outcome),
        };
        let mut w = self.perdag.write()?;
        let mut client = get_client(&self.client_id, &w)?
            .ok_or_else(|| DbError::ClientNotFound(self.client_id.clone()))?;
        if outcome.is_some() {
            client.head_hash = self.perdag_head;
        }
        client.temp_refresh_hash = None;
        set_client(&self.client_id, client, &mut w)?;
        w.commit()?;
        Ok(outcome)
    }

    /// Drive reconcile and rebase rounds to a terminal state, then finish.
    pub fn run(mut self) -> Result<Option<RefreshOutcome>, DbError> {
        loop {
            match self.reconcile()? {
                RefreshState::InProgress(pending) => self.rebase_pending(&pending)?,
                terminal => {
                    info!(
                        client_id = %self.client_id,
                        iterations = self.iterations,
                        completed = matches!(terminal, RefreshState::Completed(_)),
                        "refresh finished"
                    );
                    return self.finish(terminal);
                }
            }
        }
    }
}

/// Run a whole refresh of `client_id`. `None` means it aborted.
#[instrument(level = "debug", skip(memdag, perdag, mutators, clock))]
pub fn refresh<D, P, M>(
    memdag: &D,
    perdag: &P,
    client_id: &str,
    mutators: &M,
    clock: &dyn Clock,
) -> Result<Option<RefreshOutcome>, DbError>
where
    D: ChunkStore,
    P: ChunkStore,
    M: MutatorTable + ?Sized,
{
    Refresh::start(memdag, perdag, client_id, mutators, clock)?.run()
}
