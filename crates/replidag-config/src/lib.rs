// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Settings storage and replica settings for replidag.
//! Keeps the core crate free of any particular storage location.

pub mod config;
pub mod fs;
pub mod settings;

pub use config::{ConfigError, ConfigStore};
pub use fs::FsConfigStore;
pub use settings::{load_settings, save_settings, ReplicaSettings, SETTINGS_KEY};
