// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reachability marking for mark-sweep collection.
//!
//! Roots are the head targets. A chunk survives iff it is reachable from some
//! head through `refs`. Anything that must outlive a head move (a client's
//! pinned refresh hash, for instance) has to be referenced from a chunk that a
//! head reaches.

use std::collections::HashSet;
use std::sync::Arc;

use crate::{ChunkHash, StoreError};

/// Mark every hash reachable from `roots`.
///
/// `refs_of` returns `None` for hashes the backend does not hold locally;
/// traversal stops there (a lazy store does not own its source's chunks).
pub(crate) fn mark<I, F>(roots: I, mut refs_of: F) -> Result<HashSet<ChunkHash>, StoreError>
where
    I: IntoIterator<Item = ChunkHash>,
    F: FnMut(&ChunkHash) -> Result<Option<Arc<[ChunkHash]>>, StoreError>,
{
    let mut marked = HashSet::new();
    let mut stack: Vec<ChunkHash> = roots.into_iter().collect();
    while let Some(hash) = stack.pop() {
        if !marked.insert(hash) {
            continue;
        }
        if let Some(refs) = refs_of(&hash)? {
            stack.extend(refs.iter().copied().filter(|r| !marked.contains(r)));
        }
    }
    Ok(marked)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::chunk_hash;

    #[test]
    fn mark_follows_refs_and_tolerates_cycles_in_input() {
        let a = chunk_hash(b"a");
        let b = chunk_hash(b"b");
        let c = chunk_hash(b"c");
        let orphan = chunk_hash(b"orphan");
        let mut graph: HashMap<ChunkHash, Arc<[ChunkHash]>> = HashMap::new();
        graph.insert(a, Arc::from(vec![b]));
        graph.insert(b, Arc::from(vec![c, a]));
        graph.insert(c, Arc::from(Vec::new()));
        graph.insert(orphan, Arc::from(vec![a]));

        let marked = mark([a], |h| Ok(graph.get(h).cloned())).unwrap();
        assert_eq!(marked.len(), 3);
        assert!(!marked.contains(&orphan));
    }
}
