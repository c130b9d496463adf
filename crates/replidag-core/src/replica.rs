// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One client's view of a shared perdag.
//!
//! A [`Replica`] registers its client in the perdag, layers a memdag over the
//! perdag, applies mutations to memdag `main`, and refreshes from the client
//! group's perdag head on demand.

use std::collections::BTreeSet;
use std::sync::Arc;

use replidag_cas::{
    chunk_hash, with_read, with_write, ChunkHash, ChunkStore, ChunkWrite, FsStore, LazyStore,
};
use replidag_config::ReplicaSettings;
use serde_json::Value;
use tracing::{debug, info};

use crate::clients::{
    self, find_matching_client_group, get_client, get_client_group, set_client, set_client_group,
    Client, ClientGroup,
};
use crate::clock::Clock;
use crate::commit::Dialect;
use crate::mutators::MutatorTable;
use crate::read::Read;
use crate::refresh::{refresh, RefreshOutcome};
use crate::write::{genesis_commit, Whence, Write};
use crate::{ClientGroupId, ClientId, DbError, DEFAULT_HEAD_NAME};

/// Open (creating if needed) the file-backed perdag `settings` point at.
pub fn open_perdag(settings: &ReplicaSettings) -> Result<FsStore, DbError> {
    let dir = settings.resolve_perdag_dir()?;
    Ok(FsStore::open(dir)?)
}

/// A client working against a memdag over perdag `P`.
pub struct Replica<P: ChunkStore, M> {
    memdag: LazyStore<P>,
    client_id: ClientId,
    client_group_id: ClientGroupId,
    mutators: M,
    clock: Arc<dyn Clock>,
    settings: ReplicaSettings,
}

impl<P: ChunkStore, M: MutatorTable> Replica<P, M> {
    /// Register `client_id` in `perdag` and load its group head into a fresh
    /// memdag.
    ///
    /// A client already on record keeps its group. Otherwise the client joins
    /// an enabled group with exactly the same mutator names, or starts a new
    /// group rooted at a fresh genesis commit.
    pub fn open(
        perdag: P,
        client_id: impl Into<ClientId>,
        mutators: M,
        clock: Arc<dyn Clock>,
        settings: ReplicaSettings,
    ) -> Result<Self, DbError> {
        let client_id = client_id.into();
        let now = clock.now_ms();
        let names = mutators.names();
        let (client_group_id, head) = with_write(&perdag, |w| {
            let joined = register_client(&client_id, &names, now, w)?;
            w.commit()?;
            Ok::<_, DbError>(joined)
        })?;
        info!(%client_id, %client_group_id, head = %head, "replica opened");

        let memdag = LazyStore::with_cache_limit(perdag, settings.memdag_cache_limit_bytes);
        with_write(&memdag, |w| {
            w.set_head(DEFAULT_HEAD_NAME, head)?;
            w.commit()?;
            Ok::<_, DbError>(())
        })?;
        Ok(Self {
            memdag,
            client_id,
            client_group_id,
            mutators,
            clock,
            settings,
        })
    }

    /// This client's id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The group this client belongs to.
    pub fn client_group_id(&self) -> &str {
        &self.client_group_id
    }

    /// The in-memory store.
    pub fn memdag(&self) -> &LazyStore<P> {
        &self.memdag
    }

    /// The durable store.
    pub fn perdag(&self) -> &P {
        self.memdag.source()
    }

    /// Settings the replica was opened with.
    pub fn settings(&self) -> &ReplicaSettings {
        &self.settings
    }

    /// Run mutator `name` on memdag `main` and commit the result.
    ///
    /// # Errors
    ///
    /// [`DbError::Mutator`] for an unknown mutator, or whatever the mutator
    /// returns; nothing is committed in either case.
    pub fn mutate(&self, name: &str, args: &Value) -> Result<ChunkHash, DbError> {
        let now = self.clock.now_ms();
        with_write(&self.memdag, |w| {
            let mut tx = Write::new_local(
                &Whence::head(DEFAULT_HEAD_NAME),
                name,
                args.clone(),
                None,
                w,
                now,
                &self.client_id,
            )?;
            match self.mutators.apply(name, &mut tx, args) {
                None => return Err(DbError::mutator(name, "unknown mutator")),
                Some(result) => result?,
            }
            let hash = tx.commit(DEFAULT_HEAD_NAME)?;
            debug!(mutator = name, %hash, "mutation committed");
            Ok(hash)
        })
    }

    /// Snapshot of memdag `main`.
    pub fn read(&self) -> Result<Read, DbError> {
        with_read(&self.memdag, |r| Read::at(&Whence::head(DEFAULT_HEAD_NAME), r))
    }

    /// Value at `key` on memdag `main`.
    pub fn get(&self, key: &str) -> Result<Option<Value>, DbError> {
        Ok(self.read()?.get(key).cloned())
    }

    /// Entries under `prefix` on memdag `main`.
    pub fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>, DbError> {
        let read = self.read()?;
        Ok(read
            .scan(prefix, None)
            .map(|(k, v)| (k.to_owned(), v.clone()))
            .collect())
    }

    /// Merge the group's perdag head into memdag `main`.
    pub fn refresh(&self) -> Result<Option<RefreshOutcome>, DbError> {
        refresh(
            &self.memdag,
            self.memdag.source(),
            &self.client_id,
            &self.mutators,
            &*self.clock,
        )
    }

    /// Record that this client is alive.
    pub fn heartbeat(&self) -> Result<(), DbError> {
        let now = self.clock.now_ms();
        with_write(self.perdag(), |w| {
            clients::touch_heartbeat(&self.client_id, now, w)?;
            w.commit()?;
            Ok(())
        })
    }

    /// Drop other clients that missed heartbeats for longer than
    /// `client_max_inactive_ms`, and groups left without clients.
    pub fn collect_stale_clients(&self) -> Result<Vec<ClientId>, DbError> {
        let now = self.clock.now_ms();
        with_write(self.perdag(), |w| {
            let removed = clients::collect_stale_clients(
                now,
                self.settings.client_max_inactive_ms,
                &self.client_id,
                w,
            )?;
            w.commit()?;
            Ok(removed)
        })
    }
}

fn register_client<W: ChunkWrite + ?Sized>(
    client_id: &str,
    mutator_names: &BTreeSet<String>,
    now: u64,
    w: &mut W,
) -> Result<(ClientGroupId, ChunkHash), DbError> {
    let existing = match get_client(client_id, &*w)? {
        Some(client) => get_client_group(&client.client_group_id, &*w)?
            .map(|group| (client.client_group_id, group)),
        None => None,
    };
    let (group_id, group) = match existing {
        Some(found) => found,
        None => match find_matching_client_group(mutator_names, &*w)? {
            Some(found) => found,
            None => {
                let genesis = genesis_commit(w, Dialect::MultiClientGroup)?;
                let seed = format!("{client_id}/{now}/{}", genesis.hash());
                let id = chunk_hash(seed.as_bytes()).to_hex()[..16].to_owned();
                let group = ClientGroup::new(genesis.hash(), mutator_names.clone());
                set_client_group(&id, group.clone(), w)?;
                info!(client_group_id = %id, "created client group");
                (id, group)
            }
        },
    };
    set_client(
        client_id,
        Client {
            client_group_id: group_id.clone(),
            head_hash: group.head_hash,
            heartbeat_timestamp_ms: now,
            temp_refresh_hash: None,
        },
        w,
    )?;
    Ok((group_id, group.head_hash))
}
