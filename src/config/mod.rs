//! Configuration Management Module
//!
//! Provisioning settings (timeouts, escape byte, PTY defaults) and their
//! on-disk storage.

pub mod storage;
pub mod types;

pub use storage::{config_dir, config_file, ConfigStorage, StorageError};
pub use types::{ProvisionConfig, CONFIG_VERSION};
