// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Durable chunk store on the local filesystem.
//!
//! Layout under the store root:
//!
//! ```text
//! chunks/<hex hash>   one file per chunk
//! heads.cbor          CBOR map of head name -> hex hash
//! ```
//!
//! A chunk file is `u32` little-endian ref count, then the refs as raw 32-byte
//! hashes, then the payload. Files are written to a temporary name, synced, and
//! renamed into place. Heads are written last, so a crash mid-commit can leave
//! unreferenced chunk files behind but never a head pointing at a missing chunk.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::gc;
use crate::staging::Staging;
use crate::{Chunk, ChunkHash, ChunkRead, ChunkStore, ChunkWrite, StoreError};

const CHUNKS_DIR: &str = "chunks";
const HEADS_FILE: &str = "heads.cbor";
const TMP_SUFFIX: &str = ".tmp";

/// Filesystem-backed chunk store. Handles are cheap to clone.
///
/// One process should own a store root at a time; the writer lock is
/// per-process.
#[derive(Clone)]
pub struct FsStore {
    inner: Arc<FsInner>,
}

struct FsInner {
    root: PathBuf,
    heads: RwLock<BTreeMap<String, ChunkHash>>,
    writer: Mutex<()>,
}

impl FsStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the directory cannot be created or the heads file
    /// cannot be read; [`StoreError::Codec`] if the heads file is corrupt.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(CHUNKS_DIR))?;
        let heads = match fs::read(root.join(HEADS_FILE)) {
            Ok(bytes) => ciborium::de::from_reader(bytes.as_slice())
                .map_err(|e| StoreError::Codec(format!("heads file: {e}")))?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(root = %root.display(), "opened fs chunk store");
        Ok(Self {
            inner: Arc::new(FsInner {
                root,
                heads: RwLock::new(heads),
                writer: Mutex::new(()),
            }),
        })
    }

    /// Directory this store lives in.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn chunk_path(&self, hash: &ChunkHash) -> PathBuf {
        self.inner.root.join(CHUNKS_DIR).join(hash.to_hex())
    }

    fn head(&self, name: &str) -> Option<ChunkHash> {
        self.inner
            .heads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    /// Committed head names and targets, sorted by name.
    pub fn heads(&self) -> Vec<(String, ChunkHash)> {
        self.inner
            .heads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    fn load(&self, hash: &ChunkHash) -> Result<Option<Chunk>, StoreError> {
        let bytes = match fs::read(self.chunk_path(hash)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (refs, data) = decode_chunk_file(hash, &bytes)?;
        Chunk::from_parts_verified(*hash, data.to_vec(), refs).map(Some)
    }

    fn exists(&self, hash: &ChunkHash) -> bool {
        self.chunk_path(hash).is_file()
    }

    /// Delete chunk files that no head reaches. Returns the number removed.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the chunk directory cannot be listed or a file
    /// cannot be removed.
    pub fn collect_garbage(&self) -> Result<usize, StoreError> {
        let _writer = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let roots: Vec<ChunkHash> = self.heads().into_iter().map(|(_, h)| h).collect();
        let marked = gc::mark(roots, |h| Ok(self.load(h)?.map(|c| c.refs_arc())))?;
        let mut removed = 0;
        for entry in fs::read_dir(self.inner.root.join(CHUNKS_DIR))? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let keep = match ChunkHash::from_hex(name) {
                Ok(hash) => marked.contains(&hash),
                // Stray temp files from an interrupted commit.
                Err(_) => !name.ends_with(TMP_SUFFIX),
            };
            if !keep {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        info!(removed, kept = marked.len(), "fs store gc");
        Ok(removed)
    }
}

fn encode_chunk_file(chunk: &Chunk) -> Result<Vec<u8>, StoreError> {
    let count = u32::try_from(chunk.refs().len())
        .map_err(|_| StoreError::Codec(format!("chunk {} has too many refs", chunk.hash())))?;
    let mut out = Vec::with_capacity(4 + 32 * chunk.refs().len() + chunk.len());
    out.extend_from_slice(&count.to_le_bytes());
    for r in chunk.refs() {
        out.extend_from_slice(r.as_bytes());
    }
    out.extend_from_slice(chunk.data());
    Ok(out)
}

fn decode_chunk_file<'b>(
    hash: &ChunkHash,
    bytes: &'b [u8],
) -> Result<(Vec<ChunkHash>, &'b [u8]), StoreError> {
    let truncated = || StoreError::Codec(format!("chunk file {hash} is truncated"));
    let (count, rest) = bytes.split_first_chunk::<4>().ok_or_else(truncated)?;
    let count = u32::from_le_bytes(*count) as usize;
    let refs_len = count.checked_mul(32).ok_or_else(truncated)?;
    if rest.len() < refs_len {
        return Err(truncated());
    }
    let (ref_bytes, data) = rest.split_at(refs_len);
    let refs = ref_bytes
        .chunks_exact(32)
        .map(|raw| {
            let mut h = [0u8; 32];
            h.copy_from_slice(raw);
            ChunkHash(h)
        })
        .collect();
    Ok((refs, data))
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

impl ChunkStore for FsStore {
    type Read<'a> = FsRead<'a>;
    type Write<'a> = FsWrite<'a>;

    fn read(&self) -> Result<FsRead<'_>, StoreError> {
        Ok(FsRead { store: self })
    }

    fn write(&self) -> Result<FsWrite<'_>, StoreError> {
        let writer = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(FsWrite {
            store: self,
            _writer: writer,
            staging: Staging::default(),
        })
    }
}

/// Read transaction over an [`FsStore`].
pub struct FsRead<'a> {
    store: &'a FsStore,
}

impl ChunkRead for FsRead<'_> {
    fn get_chunk(&self, hash: &ChunkHash) -> Result<Option<Chunk>, StoreError> {
        self.store.load(hash)
    }

    fn get_head(&self, name: &str) -> Result<Option<ChunkHash>, StoreError> {
        Ok(self.store.head(name))
    }

    fn has_chunk(&self, hash: &ChunkHash) -> Result<bool, StoreError> {
        Ok(self.store.exists(hash))
    }
}

/// Write transaction over an [`FsStore`].
pub struct FsWrite<'a> {
    store: &'a FsStore,
    _writer: MutexGuard<'a, ()>,
    staging: Staging,
}

impl ChunkRead for FsWrite<'_> {
    fn get_chunk(&self, hash: &ChunkHash) -> Result<Option<Chunk>, StoreError> {
        if let Some(chunk) = self.staging.chunk(hash) {
            return Ok(Some(chunk.clone()));
        }
        self.store.load(hash)
    }

    fn get_head(&self, name: &str) -> Result<Option<ChunkHash>, StoreError> {
        match self.staging.head(name) {
            Some(staged) => Ok(staged),
            None => Ok(self.store.head(name)),
        }
    }
}

impl ChunkWrite for FsWrite<'_> {
    fn put_chunk(&mut self, chunk: Chunk) -> Result<(), StoreError> {
        self.staging.put_chunk(chunk);
        Ok(())
    }

    fn set_head(&mut self, name: &str, hash: ChunkHash) -> Result<(), StoreError> {
        self.staging.set_head(name, hash);
        Ok(())
    }

    fn remove_head(&mut self, name: &str) -> Result<(), StoreError> {
        self.staging.remove_head(name);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.staging.is_empty() {
            return Ok(());
        }
        let store = self.store;
        self.staging.verify(&|h| Ok(store.exists(h)))?;
        let staged = self.staging.take();

        let mut written = 0usize;
        for chunk in &staged.chunks {
            let path = store.chunk_path(&chunk.hash());
            if path.is_file() {
                continue;
            }
            write_atomically(&path, &encode_chunk_file(chunk)?)?;
            written += 1;
        }

        if !staged.heads.is_empty() {
            let mut next = store
                .inner
                .heads
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for (name, target) in staged.heads {
                match target {
                    Some(hash) => {
                        debug!(head = %name, %hash, "set head");
                        next.insert(name, hash);
                    }
                    None => {
                        debug!(head = %name, "remove head");
                        next.remove(&name);
                    }
                }
            }
            let mut bytes = Vec::new();
            ciborium::ser::into_writer(&next, &mut bytes)
                .map_err(|e| StoreError::Codec(format!("heads file: {e}")))?;
            if let Err(e) = write_atomically(&store.inner.root.join(HEADS_FILE), &bytes) {
                warn!(error = %e, "fs store failed to persist heads; chunks already written");
                return Err(e);
            }
            *store
                .inner
                .heads
                .write()
                .unwrap_or_else(PoisonError::into_inner) = next;
        }
        debug!(chunks = written, "fs store commit");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::chunk_hash;

    #[test]
    fn chunk_file_layout_round_trips() {
        let chunk = Chunk::new(b"body".to_vec(), vec![chunk_hash(b"a"), chunk_hash(b"b")]);
        let bytes = encode_chunk_file(&chunk).unwrap();
        assert_eq!(&bytes[..4], &2u32.to_le_bytes());
        let (refs, data) = decode_chunk_file(&chunk.hash(), &bytes).unwrap();
        assert_eq!(refs, chunk.refs());
        assert_eq!(data, b"body");
    }

    #[test]
    fn truncated_chunk_file_is_codec_error() {
        let h = chunk_hash(b"x");
        assert!(matches!(
            decode_chunk_file(&h, &[5, 0, 0, 0, 1, 2]),
            Err(StoreError::Codec(_))
        ));
        assert!(matches!(decode_chunk_file(&h, &[1]), Err(StoreError::Codec(_))));
    }

    #[test]
    fn tampered_chunk_file_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let chunk = Chunk::new(b"original".to_vec(), Vec::new());
        let mut w = store.write().unwrap();
        w.put_chunk(chunk.clone()).unwrap();
        w.commit().unwrap();
        drop(w);

        let path = store.chunk_path(&chunk.hash());
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let err = store.read().unwrap().get_chunk(&chunk.hash()).unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
    }
}
