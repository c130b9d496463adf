// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use replidag_config::{ConfigError, ConfigStore};

/// In-memory implementation of [`ConfigStore`] for testing.
///
/// Clones share one backing map, so a test can hand a clone to the code under
/// test and inspect the original. Loads and saves are counted, and either can
/// be made to fail.
///
/// # Example
///
/// ```
/// use replidag_config::{load_settings, save_settings, ReplicaSettings};
/// use replidag_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let settings = ReplicaSettings { client_max_inactive_ms: 5, ..Default::default() };
/// save_settings(&store, &settings).unwrap();
/// assert_eq!(load_settings(&store).unwrap(), settings);
/// assert_eq!(store.save_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: BTreeMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Create a new empty in-memory config store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `key` = `json` (raw bytes, not validated).
    pub fn with_raw(key: &str, json: &str) -> Self {
        let store = Self::new();
        store
            .lock()
            .data
            .insert(key.to_owned(), json.as_bytes().to_vec());
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every later load fail.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Make every later save fail.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// Load attempts so far, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Save attempts so far, failed ones included.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().data.keys().cloned().collect()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.load_count += 1;
        if inner.fail_on_load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.save_count += 1;
        if inner.fail_on_save {
            return Err(ConfigError::Other("simulated save failure".into()));
        }
        inner.data.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}
