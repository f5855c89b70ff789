//! Configuration Storage
//!
//! Reads and writes the provisioning settings file.
//! Config location: ~/.sflvault on macOS/Linux, %APPDATA%\SFLvault on Windows

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::{ProvisionConfig, CONFIG_VERSION};

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Directory shared with the rest of the vault client
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("SFLvault"));
        }
        dirs::home_dir()
            .map(|home| home.join(".sflvault"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".sflvault"))
            .ok_or(StorageError::NoConfigDir)
    }
}

pub fn config_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("provision.json"))
}

/// The provisioning settings file
///
/// Read once per run by [`Provisioner::from_storage`](crate::Provisioner::from_storage).
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Storage at `~/.sflvault/provision.json`
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self::with_path(config_file()?))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Load settings, falling back to the defaults when the file is missing.
    ///
    /// An unreadable file is moved aside so the next save starts clean.
    pub async fn load(&self) -> Result<ProvisionConfig, StorageError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings at {:?}, using defaults", self.path);
                return Ok(ProvisionConfig::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config = match serde_json::from_slice::<ProvisionConfig>(&raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Settings file {:?} is unreadable: {}", self.path, e);
                let moved = self.quarantine().await?;
                tracing::warn!("Moved it to {:?}, using defaults", moved);
                return Ok(ProvisionConfig::default());
            }
        };

        if config.version > CONFIG_VERSION {
            return Err(StorageError::VersionTooNew {
                found: config.version,
                supported: CONFIG_VERSION,
            });
        }
        Ok(config)
    }

    /// Replace the file atomically
    pub async fn save(&self, config: &ProvisionConfig) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.path, &json).await?;
        tracing::debug!("Settings saved to {:?}", self.path);
        Ok(())
    }

    /// Rename the current file to a timestamped sibling and return its path
    async fn quarantine(&self) -> Result<PathBuf, StorageError> {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let target = self.path.with_extension(format!("json.backup.{}", stamp));
        fs::rename(&self.path, &target).await?;
        Ok(target)
    }
}

/// Write through a sibling temp file, then rename over `path`
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, path).await
}
