// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest::test_runner::{Config as PropConfig, RngAlgorithm, TestRng, TestRunner};

use replidag_cas::{ChunkStore, MemoryStore};
use replidag_core::{
    local_mutations, local_mutations_greater_than, mutation_ids, verify_chain, LastMutationIds,
};
use replidag_dry_tests::ChainBuilder;
use serde_json::json;

const CLIENTS: [&str; 3] = ["a", "b", "c"];

#[derive(Clone, Debug)]
enum Step {
    Local(usize),
    Snapshot,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..CLIENTS.len()).prop_map(Step::Local),
        1 => Just(Step::Snapshot),
    ]
}

#[test]
fn per_client_ids_stay_dense_through_snapshots() {
    const SEED_BYTES: [u8; 32] = [
        0x1d, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0,
    ];
    let rng = TestRng::from_seed(RngAlgorithm::ChaCha, &SEED_BYTES);
    let mut runner = TestRunner::new_with_rng(PropConfig::default(), rng);
    let steps = prop::collection::vec(step(), 1..24);

    runner
        .run(&steps, |steps| {
            let store = MemoryStore::new();
            let mut chain = ChainBuilder::new(&store, "main");
            chain.add_genesis().expect("genesis");
            let mut expected: BTreeMap<String, u64> = BTreeMap::new();
            let mut cookie = 0u64;
            let mut since_snapshot = 0usize;
            for step in &steps {
                match step {
                    Step::Local(i) => {
                        let client = CLIENTS[*i];
                        let commit = chain.add_local(client, &[]).expect("local");
                        let id = expected.entry(client.to_owned()).or_default();
                        *id += 1;
                        prop_assert_eq!(commit.as_local().expect("meta").mutation_id, *id);
                        since_snapshot += 1;
                    }
                    Step::Snapshot => {
                        cookie += 1;
                        chain
                            .add_snapshot(&[], json!(cookie), None)
                            .expect("snapshot");
                        since_snapshot = 0;
                    }
                }
            }

            let tip = chain.head_hash().expect("tip");
            let r = store.read().expect("read");
            verify_chain(&tip, &r).expect("verify");
            let head = replidag_core::commit_from_hash(&tip, &r).expect("head");
            prop_assert_eq!(
                mutation_ids(&head, &r).expect("ids"),
                LastMutationIds::Multi(expected.clone())
            );
            prop_assert_eq!(
                local_mutations(&tip, &r).expect("locals").len(),
                since_snapshot
            );

            // Nothing is pending against the tip's own table.
            let limits: BTreeMap<String, u64> = CLIENTS
                .iter()
                .map(|c| ((*c).to_owned(), expected.get(*c).copied().unwrap_or(0)))
                .collect();
            prop_assert!(local_mutations_greater_than(&head, &limits, &r)
                .expect("pending")
                .is_empty());
            Ok(())
        })
        .expect("mutation ids stay dense");
}
