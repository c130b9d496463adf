// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mutator tables for refresh and rebase tests.

use std::collections::BTreeSet;

use replidag_core::{DbError, MutatorRegistry, MutatorTable, Write};
use serde_json::Value;

/// Name of the mutator [`add_data_mutators`] registers.
pub const ADD_DATA: &str = "addData";

/// Answers to every mutator name: mutator `name` puts its arguments under
/// key `"from <name>"`.
///
/// Pairs with [`ChainBuilder::add_local`](crate::ChainBuilder::add_local):
/// replaying `mutator_name_3` writes `"from mutator_name_3" = [3]`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyMutators;

impl MutatorTable for ProxyMutators {
    fn apply(&self, name: &str, tx: &mut Write<'_>, args: &Value) -> Option<Result<(), DbError>> {
        Some(tx.put(format!("from {name}"), args.clone()))
    }

    fn names(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// Registry with one mutator, [`ADD_DATA`], that puts every field of an
/// object argument.
pub fn add_data_mutators() -> MutatorRegistry {
    MutatorRegistry::new().with(ADD_DATA, |tx, args| {
        let Value::Object(fields) = args else {
            return Err(DbError::mutator(ADD_DATA, "arguments must be an object"));
        };
        for (key, value) in fields {
            tx.put(key.clone(), value.clone())?;
        }
        Ok(())
    })
}
