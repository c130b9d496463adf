// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client registry seeding.

use std::collections::BTreeSet;

use replidag_cas::{with_write, ChunkHash, ChunkStore, ChunkWrite};
use replidag_core::clients::{set_client, set_client_group, Client, ClientGroup};
use replidag_core::DbError;

/// Register `client_ids` as members of group `client_group_id` headed at
/// `head`, and commit. Heartbeats are 0 and no refresh is pinned.
pub fn register_client_group<S: ChunkStore>(
    store: &S,
    client_group_id: &str,
    client_ids: &[&str],
    head: ChunkHash,
) -> Result<(), DbError> {
    with_write(store, |w| {
        set_client_group(client_group_id, ClientGroup::new(head, BTreeSet::new()), w)?;
        for client_id in client_ids {
            set_client(
                client_id,
                Client {
                    client_group_id: client_group_id.to_owned(),
                    head_hash: head,
                    heartbeat_timestamp_ms: 0,
                    temp_refresh_hash: None,
                },
                w,
            )?;
        }
        w.commit()?;
        Ok(())
    })
}
