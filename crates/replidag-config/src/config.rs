// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Where replica settings are kept.
//!
//! A [`ConfigStore`] hands out raw bytes per key; [`crate::settings`] owns the
//! JSON encoding on top of it.

use thiserror::Error;

/// Byte storage for settings documents, one blob per key.
pub trait ConfigStore {
    /// Bytes stored under `key`, or [`ConfigError::NotFound`].
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replace the bytes stored under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

impl<S: ConfigStore + ?Sized> ConfigStore for &S {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        (**self).load_raw(key)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        (**self).save_raw(key, data)
    }
}

/// Failure reading or writing settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing stored under the key.
    #[error("[REPLIDAG_CONFIG_NOT_FOUND] not found")]
    NotFound,
    /// Backing storage failed.
    #[error("[REPLIDAG_CONFIG_IO] {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes are not a valid settings document.
    #[error("[REPLIDAG_CONFIG_SERDE] {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else, such as an unresolvable platform directory.
    #[error("[REPLIDAG_CONFIG_OTHER] {0}")]
    Other(String),
}
