// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Hash helpers for tests.
//!
//! These produce deterministic [`ChunkHash`] values for tests that need a hash
//! but not a stored chunk.

use replidag_cas::{chunk_hash, ChunkHash};

/// Generate a test hash from a label.
///
/// # Example
///
/// ```
/// use replidag_dry_tests::make_test_hash;
///
/// assert_eq!(make_test_hash("a"), make_test_hash("a"));
/// assert_ne!(make_test_hash("a"), make_test_hash("b"));
/// ```
pub fn make_test_hash(label: &str) -> ChunkHash {
    chunk_hash(format!("test:{label}").as_bytes())
}

/// Generate a hash from a numeric seed (useful for loops).
pub fn make_hash_from_seed(seed: u64) -> ChunkHash {
    let mut bytes = b"seed:".to_vec();
    bytes.extend_from_slice(&seed.to_le_bytes());
    chunk_hash(&bytes)
}
