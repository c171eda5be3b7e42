//! Token snapshot persistence
//!
//! - [`MemoryTokenStore`]: process-local, used when no cache path is set
//! - [`FileTokenStore`]: one JSON document on disk, replaced atomically

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cadenza_domain::{ApiError, Result, TokenSnapshot};
use parking_lot::Mutex;
use tracing::debug;

use super::traits::TokenStore;

/// In-memory token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    snapshot: Mutex<Option<TokenSnapshot>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: TokenSnapshot) -> Self {
        Self { snapshot: Mutex::new(Some(snapshot)) }
    }

    /// Current contents, without going through the async trait.
    pub fn snapshot(&self) -> Option<TokenSnapshot> {
        self.snapshot.lock().clone()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<TokenSnapshot>> {
        Ok(self.snapshot.lock().clone())
    }

    async fn save(&self, snapshot: &TokenSnapshot) -> Result<()> {
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.snapshot.lock().take();
        Ok(())
    }
}

/// JSON file token store
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write never leaves a truncated snapshot behind.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn storage_error(&self, action: &str, err: impl std::fmt::Display) -> ApiError {
        ApiError::Storage(format!("failed to {action} {}: {err}", self.path.display()))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<TokenSnapshot>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted token snapshot");
                return Ok(None);
            }
            Err(err) => return Err(self.storage_error("read", err)),
        };

        serde_json::from_slice(&contents).map(Some).map_err(|err| self.storage_error("parse", err))
    }

    async fn save(&self, snapshot: &TokenSnapshot) -> Result<()> {
        let contents = serde_json::to_vec_pretty(snapshot).map_err(|err| self.storage_error("encode", err))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|err| self.storage_error("create directory for", err))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, contents).await.map_err(|err| self.storage_error("write", err))?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|err| self.storage_error("replace", err))?;

        debug!(path = %self.path.display(), "persisted token snapshot");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.storage_error("remove", err)),
        }
    }
}
