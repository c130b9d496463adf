// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for replidag crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`chain`] - Commit chain builder over any chunk store
//! - [`clock`] - Hand-driven clock
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`hashes`] - Deterministic hash helpers
//! - [`mutators`] - Mutator tables used by refresh and rebase tests
//! - [`registry`] - Client registry seeding

pub mod chain;
pub mod clock;
pub mod config;
pub mod hashes;
pub mod mutators;
pub mod registry;

// Re-export commonly used items at crate root for convenience
pub use chain::{ChainBuilder, LOCAL_TIMESTAMP};
pub use clock::ManualClock;
pub use config::InMemoryConfigStore;
pub use hashes::{make_hash_from_seed, make_test_hash};
pub use mutators::{add_data_mutators, ProxyMutators, ADD_DATA};
pub use registry::register_client_group;
