// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client and client-group records.
//!
//! Both maps live in the perdag as single chunks under the [`CLIENTS_HEAD`] and
//! [`CLIENT_GROUPS_HEAD`] heads. The chunk refs are every commit hash a record
//! points at (`head_hash`, plus `temp_refresh_hash` for clients), so a record
//! keeps its commits alive across garbage collection. Writers stage changes;
//! the caller commits the surrounding chunk transaction.

use std::collections::{BTreeMap, BTreeSet};

use replidag_cas::{Chunk, ChunkHash, ChunkRead, ChunkWrite};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::index::IndexDefinition;
use crate::{ClientGroupId, ClientId, DbError};

/// Head holding the client map.
pub const CLIENTS_HEAD: &str = "clients";
/// Head holding the client-group map.
pub const CLIENT_GROUPS_HEAD: &str = "client-groups";

/// One client as recorded in the perdag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// Group this client belongs to.
    pub client_group_id: ClientGroupId,
    /// Commit this client last adopted from its group.
    pub head_hash: ChunkHash,
    /// Last time the client reported itself alive.
    pub heartbeat_timestamp_ms: u64,
    /// Commit pinned while a refresh is running.
    pub temp_refresh_hash: Option<ChunkHash>,
}

/// A group of clients sharing one head and one server ack sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientGroup {
    /// The group's current commit.
    pub head_hash: ChunkHash,
    /// Highest mutation id each client has produced.
    pub mutation_ids: BTreeMap<ClientId, u64>,
    /// Highest mutation id per client the server has acknowledged.
    pub last_server_ackd_mutation_ids: BTreeMap<ClientId, u64>,
    /// Mutators every client of the group must implement.
    pub mutator_names: BTreeSet<String>,
    /// Index definitions the group's commits carry.
    pub indexes: BTreeMap<String, IndexDefinition>,
    /// Disabled groups are never joined.
    pub disabled: bool,
}

impl ClientGroup {
    /// Fresh group at `head_hash` with no mutations.
    pub fn new(head_hash: ChunkHash, mutator_names: BTreeSet<String>) -> Self {
        Self {
            head_hash,
            mutation_ids: BTreeMap::new(),
            last_server_ackd_mutation_ids: BTreeMap::new(),
            mutator_names,
            indexes: BTreeMap::new(),
            disabled: false,
        }
    }

    /// `true` if some client has mutations the server has not acknowledged.
    pub fn has_pending_mutations(&self) -> bool {
        self.mutation_ids.iter().any(|(client, id)| {
            *id > self
                .last_server_ackd_mutation_ids
                .get(client)
                .copied()
                .unwrap_or(0)
        })
    }
}

/// Map of every client.
pub type ClientMap = BTreeMap<ClientId, Client>;
/// Map of every client group.
pub type ClientGroupMap = BTreeMap<ClientGroupId, ClientGroup>;

fn load_map<R, T>(head: &str, read: &R) -> Result<BTreeMap<String, T>, DbError>
where
    R: ChunkRead + ?Sized,
    T: serde::de::DeserializeOwned,
{
    match read.get_head(head)? {
        None => Ok(BTreeMap::new()),
        Some(hash) => Ok(read.must_get_chunk(&hash)?.decode()?),
    }
}

fn store_map<W, T>(
    head: &str,
    map: &BTreeMap<String, T>,
    refs: Vec<ChunkHash>,
    write: &mut W,
) -> Result<(), DbError>
where
    W: ChunkWrite + ?Sized,
    T: Serialize,
{
    let mut refs = refs;
    refs.sort_unstable();
    refs.dedup();
    let chunk = Chunk::encode(map, refs)?;
    let hash = chunk.hash();
    write.put_chunk(chunk)?;
    write.set_head(head, hash)?;
    Ok(())
}

/// Every client. Empty when the registry was never written.
pub fn get_clients<R: ChunkRead + ?Sized>(read: &R) -> Result<ClientMap, DbError> {
    load_map(CLIENTS_HEAD, read)
}

/// One client, if registered.
pub fn get_client<R: ChunkRead + ?Sized>(
    client_id: &str,
    read: &R,
) -> Result<Option<Client>, DbError> {
    Ok(get_clients(read)?.remove(client_id))
}

/// Replace the whole client map.
pub fn set_clients<W: ChunkWrite + ?Sized>(
    clients: &ClientMap,
    write: &mut W,
) -> Result<(), DbError> {
    let refs = clients
        .values()
        .flat_map(|c| std::iter::once(c.head_hash).chain(c.temp_refresh_hash))
        .collect();
    store_map(CLIENTS_HEAD, clients, refs, write)
}

/// Insert or replace one client.
pub fn set_client<W: ChunkWrite + ?Sized>(
    client_id: &str,
    client: Client,
    write: &mut W,
) -> Result<(), DbError> {
    let mut clients = get_clients(&*write)?;
    clients.insert(client_id.to_owned(), client);
    set_clients(&clients, write)
}

/// Remove clients by id. Returns how many were present.
pub fn delete_clients<W: ChunkWrite + ?Sized>(
    client_ids: &[ClientId],
    write: &mut W,
) -> Result<usize, DbError> {
    let mut clients = get_clients(&*write)?;
    let before = clients.len();
    for id in client_ids {
        clients.remove(id);
    }
    let removed = before - clients.len();
    if removed > 0 {
        set_clients(&clients, write)?;
    }
    Ok(removed)
}

/// Every client group.
pub fn get_client_groups<R: ChunkRead + ?Sized>(read: &R) -> Result<ClientGroupMap, DbError> {
    load_map(CLIENT_GROUPS_HEAD, read)
}

/// One client group, if present.
pub fn get_client_group<R: ChunkRead + ?Sized>(
    client_group_id: &str,
    read: &R,
) -> Result<Option<ClientGroup>, DbError> {
    Ok(get_client_groups(read)?.remove(client_group_id))
}

/// Replace the whole client-group map without regression checks.
pub fn set_client_groups<W: ChunkWrite + ?Sized>(
    groups: &ClientGroupMap,
    write: &mut W,
) -> Result<(), DbError> {
    let refs = groups.values().map(|g| g.head_hash).collect();
    store_map(CLIENT_GROUPS_HEAD, groups, refs, write)
}

fn check_monotonic(
    client_group_id: &str,
    field: &'static str,
    previous: &BTreeMap<ClientId, u64>,
    next: &BTreeMap<ClientId, u64>,
) -> Result<(), DbError> {
    for (client_id, &old) in previous {
        let new = next.get(client_id).copied().unwrap_or(0);
        if new < old {
            return Err(DbError::RegistryRegression {
                client_group_id: client_group_id.to_owned(),
                field,
                client_id: client_id.clone(),
                previous: old,
                next: new,
            });
        }
    }
    Ok(())
}

/// Insert or replace one client group.
///
/// # Errors
///
/// [`DbError::RegistryRegression`] if any mutation id or acknowledged
/// mutation id would move backwards.
pub fn set_client_group<W: ChunkWrite + ?Sized>(
    client_group_id: &str,
    group: ClientGroup,
    write: &mut W,
) -> Result<(), DbError> {
    let mut groups = get_client_groups(&*write)?;
    if let Some(old) = groups.get(client_group_id) {
        check_monotonic(
            client_group_id,
            "mutationIDs",
            &old.mutation_ids,
            &group.mutation_ids,
        )?;
        check_monotonic(
            client_group_id,
            "lastServerAckdMutationIDs",
            &old.last_server_ackd_mutation_ids,
            &group.last_server_ackd_mutation_ids,
        )?;
    }
    groups.insert(client_group_id.to_owned(), group);
    set_client_groups(&groups, write)
}

/// Head commit of the group `client_id` belongs to.
pub fn client_group_head<R: ChunkRead + ?Sized>(
    client_id: &str,
    read: &R,
) -> Result<ChunkHash, DbError> {
    let client =
        get_client(client_id, read)?.ok_or_else(|| DbError::ClientNotFound(client_id.to_owned()))?;
    let group = get_client_group(&client.client_group_id, read)?
        .ok_or(DbError::ClientGroupNotFound(client.client_group_id))?;
    Ok(group.head_hash)
}

/// Record that `client_id` is alive at `now_ms`.
pub fn touch_heartbeat<W: ChunkWrite + ?Sized>(
    client_id: &str,
    now_ms: u64,
    write: &mut W,
) -> Result<(), DbError> {
    let mut client = get_client(client_id, &*write)?
        .ok_or_else(|| DbError::ClientNotFound(client_id.to_owned()))?;
    client.heartbeat_timestamp_ms = now_ms;
    set_client(client_id, client, write)
}

/// Drop clients whose heartbeat is older than `max_inactive_ms`, then every
/// group no remaining client references unless it still has unacknowledged
/// mutations. `keep` is never dropped. Returns the removed client ids.
pub fn collect_stale_clients<W: ChunkWrite + ?Sized>(
    now_ms: u64,
    max_inactive_ms: u64,
    keep: &str,
    write: &mut W,
) -> Result<Vec<ClientId>, DbError> {
    let mut clients = get_clients(&*write)?;
    let stale: Vec<ClientId> = clients
        .iter()
        .filter(|(id, c)| {
            id.as_str() != keep && now_ms.saturating_sub(c.heartbeat_timestamp_ms) > max_inactive_ms
        })
        .map(|(id, _)| id.clone())
        .collect();
    for id in &stale {
        clients.remove(id);
    }

    let mut groups = get_client_groups(&*write)?;
    let referenced: BTreeSet<&str> = clients.values().map(|c| c.client_group_id.as_str()).collect();
    let before = groups.len();
    groups.retain(|id, g| referenced.contains(id.as_str()) || g.has_pending_mutations());
    let dropped_groups = before - groups.len();

    if !stale.is_empty() {
        set_clients(&clients, write)?;
    }
    if dropped_groups > 0 {
        set_client_groups(&groups, write)?;
    }
    if stale.is_empty() && dropped_groups == 0 {
        debug!("no stale clients");
    } else {
        info!(clients = stale.len(), groups = dropped_groups, "collected stale clients");
    }
    Ok(stale)
}

/// An enabled group whose mutator names equal `mutator_names`.
pub fn find_matching_client_group<R: ChunkRead + ?Sized>(
    mutator_names: &BTreeSet<String>,
    read: &R,
) -> Result<Option<(ClientGroupId, ClientGroup)>, DbError> {
    Ok(get_client_groups(read)?
        .into_iter()
        .find(|(_, g)| !g.disabled && &g.mutator_names == mutator_names))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use replidag_cas::{ChunkStore, MemoryStore};

    use super::*;
    use crate::write::init_db;
    use crate::Dialect;

    fn store_with_commit() -> (MemoryStore, ChunkHash) {
        let store = MemoryStore::new();
        let mut w = store.write().unwrap();
        let hash = init_db(&mut w, "anchor", Dialect::MultiClientGroup).unwrap();
        drop(w);
        (store, hash)
    }

    fn client(group: &str, head: ChunkHash, heartbeat: u64) -> Client {
        Client {
            client_group_id: group.to_owned(),
            head_hash: head,
            heartbeat_timestamp_ms: heartbeat,
            temp_refresh_hash: None,
        }
    }

    #[test]
    fn missing_registry_reads_as_empty() {
        let (store, _) = store_with_commit();
        let r = store.read().unwrap();
        assert!(get_clients(&r).unwrap().is_empty());
        assert!(get_client_groups(&r).unwrap().is_empty());
        assert!(matches!(
            client_group_head("nobody", &r),
            Err(DbError::ClientNotFound(_))
        ));
    }

    #[test]
    fn client_group_head_follows_the_group() {
        let (store, head) = store_with_commit();
        let mut w = store.write().unwrap();
        set_client_group("g", ClientGroup::new(head, BTreeSet::new()), &mut w).unwrap();
        set_client("c", client("g", head, 0), &mut w).unwrap();
        w.commit().unwrap();
        assert_eq!(client_group_head("c", &w).unwrap(), head);

        set_client("orphan", client("missing", head, 0), &mut w).unwrap();
        assert!(matches!(
            client_group_head("orphan", &w),
            Err(DbError::ClientGroupNotFound(_))
        ));
    }

    #[test]
    fn registry_chunks_reference_their_heads() {
        let (store, head) = store_with_commit();
        let mut w = store.write().unwrap();
        set_client("c", client("g", head, 0), &mut w).unwrap();
        w.remove_head("anchor").unwrap();
        w.commit().unwrap();
        drop(w);
        store.collect_garbage();
        assert!(store.read().unwrap().has_chunk(&head).unwrap());
    }

    #[test]
    fn set_client_group_rejects_regressions() {
        let (store, head) = store_with_commit();
        let mut w = store.write().unwrap();
        let mut group = ClientGroup::new(head, BTreeSet::new());
        group.mutation_ids.insert("c".into(), 3);
        set_client_group("g", group.clone(), &mut w).unwrap();

        group.mutation_ids.insert("c".into(), 2);
        let err = set_client_group("g", group.clone(), &mut w).unwrap_err();
        assert!(matches!(
            err,
            DbError::RegistryRegression {
                field: "mutationIDs",
                previous: 3,
                next: 2,
                ..
            }
        ));

        group.mutation_ids.insert("c".into(), 4);
        set_client_group("g", group, &mut w).unwrap();
    }

    #[test]
    fn stale_clients_and_orphan_groups_are_collected() {
        let (store, head) = store_with_commit();
        let mut w = store.write().unwrap();
        set_client_group("g1", ClientGroup::new(head, BTreeSet::new()), &mut w).unwrap();
        let mut busy = ClientGroup::new(head, BTreeSet::new());
        busy.mutation_ids.insert("old2".into(), 1);
        set_client_group("g2", busy, &mut w).unwrap();
        set_client("me", client("g1", head, 0), &mut w).unwrap();
        set_client("old1", client("g1", head, 0), &mut w).unwrap();
        set_client("old2", client("g2", head, 0), &mut w).unwrap();
        set_client("fresh", client("g1", head, 900), &mut w).unwrap();

        let removed = collect_stale_clients(1_000, 500, "me", &mut w).unwrap();
        assert_eq!(removed, ["old1", "old2"]);
        let clients = get_clients(&w).unwrap();
        assert_eq!(clients.keys().collect::<Vec<_>>(), ["fresh", "me"]);
        // g2 lost its last client but still has unacknowledged mutations.
        assert!(get_client_group("g2", &w).unwrap().is_some());
    }

    #[test]
    fn heartbeat_and_matching() {
        let (store, head) = store_with_commit();
        let mut w = store.write().unwrap();
        let names: BTreeSet<String> = ["a".to_owned()].into();
        let mut disabled = ClientGroup::new(head, names.clone());
        disabled.disabled = true;
        set_client_group("off", disabled, &mut w).unwrap();
        assert!(find_matching_client_group(&names, &w).unwrap().is_none());
        set_client_group("on", ClientGroup::new(head, names.clone()), &mut w).unwrap();
        let (id, _) = find_matching_client_group(&names, &w).unwrap().unwrap();
        assert_eq!(id, "on");

        set_client("c", client("on", head, 1), &mut w).unwrap();
        touch_heartbeat("c", 77, &mut w).unwrap();
        assert_eq!(get_client("c", &w).unwrap().unwrap().heartbeat_timestamp_ms, 77);
        assert!(touch_heartbeat("x", 1, &mut w).is_err());
    }
}
