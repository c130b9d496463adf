// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Settings consumed by a replica.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ConfigError, ConfigStore};
use crate::fs::project_dirs;

/// Config key the settings are stored under.
pub const SETTINGS_KEY: &str = "replica";

/// Tunables for an open replica. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplicaSettings {
    /// Byte budget for perdag chunks cached by the memdag.
    pub memdag_cache_limit_bytes: usize,
    /// Clients whose heartbeat is older than this are collected.
    pub client_max_inactive_ms: u64,
    /// Where the perdag lives. `None` means the platform data directory.
    pub perdag_dir: Option<PathBuf>,
}

impl Default for ReplicaSettings {
    fn default() -> Self {
        Self {
            memdag_cache_limit_bytes: 10 * (1 << 20),
            client_max_inactive_ms: 7 * 24 * 60 * 60 * 1000,
            perdag_dir: None,
        }
    }
}

impl ReplicaSettings {
    /// Resolve the perdag directory, falling back to
    /// `<platform data dir>/perdag`.
    pub fn resolve_perdag_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.perdag_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_dir().join("perdag")),
        }
    }
}

/// Load settings from `store`, or defaults when none are saved.
///
/// An empty blob counts as nothing saved.
pub fn load_settings<S: ConfigStore>(store: S) -> Result<ReplicaSettings, ConfigError> {
    let loaded = match store.load_raw(SETTINGS_KEY) {
        Ok(bytes) if bytes.is_empty() => None,
        Ok(bytes) => Some(serde_json::from_slice::<ReplicaSettings>(&bytes)?),
        Err(ConfigError::NotFound) => None,
        Err(err) => return Err(err),
    };
    debug!(found = loaded.is_some(), "loaded replica settings");
    Ok(loaded.unwrap_or_default())
}

/// Persist settings into `store`.
pub fn save_settings<S: ConfigStore>(
    store: S,
    settings: &ReplicaSettings,
) -> Result<(), ConfigError> {
    let data = serde_json::to_vec_pretty(settings)?;
    store.save_raw(SETTINGS_KEY, &data)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = ReplicaSettings::default();
        assert_eq!(s.memdag_cache_limit_bytes, 10_485_760);
        assert_eq!(s.client_max_inactive_ms, 604_800_000);
        assert!(s.perdag_dir.is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: ReplicaSettings = serde_json::from_str(r#"{"clientMaxInactiveMs": 5}"#).unwrap();
        assert_eq!(s.client_max_inactive_ms, 5);
        assert_eq!(
            s.memdag_cache_limit_bytes,
            ReplicaSettings::default().memdag_cache_limit_bytes
        );
    }

    #[test]
    fn explicit_perdag_dir_wins() {
        let s = ReplicaSettings {
            perdag_dir: Some(PathBuf::from("/tmp/replidag-perdag")),
            ..ReplicaSettings::default()
        };
        assert_eq!(
            s.resolve_perdag_dir().unwrap(),
            PathBuf::from("/tmp/replidag-perdag")
        );
    }
}
