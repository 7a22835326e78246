//! Payload cache.
//!
//! Downloaded payloads are kept per application so that a later cycle can
//! install without downloading, and so that differential updates have a
//! base to patch against.
//!
//! # Directory Structure
//!
//! ```text
//! cache_dir/
//! ├── <app_id>/
//! │   └── <fingerprint>       # The cached payload
//! └── <other_app_id>/
//!     └── <fingerprint>
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{CategorizedError, UnpackerError};

/// Shared store of payloads keyed by application id and fingerprint.
///
/// Implementations synchronize internally; components never assume
/// exclusive access.
#[async_trait]
pub trait CrxCache: Send + Sync {
    /// Path of the cached payload for `(app_id, fingerprint)`.
    async fn get(&self, app_id: &str, fingerprint: &str) -> Result<PathBuf, CategorizedError>;

    /// Whether a payload for `(app_id, fingerprint)` is cached.
    async fn contains(&self, app_id: &str, fingerprint: &str) -> bool;

    /// Store a copy of `src` as the payload for `(app_id, fingerprint)`,
    /// replacing anything cached for `app_id`.
    async fn put(
        &self,
        src: &Path,
        app_id: &str,
        fingerprint: &str,
    ) -> Result<PathBuf, CategorizedError>;

    /// Drop every payload cached for `app_id`.
    async fn remove_all(&self, app_id: &str);
}

/// Cache backed by a directory tree.
pub struct FileCrxCache {
    /// Root directory of the cache
    cache_dir: PathBuf,
}

impl FileCrxCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn app_dir(&self, app_id: &str) -> Option<PathBuf> {
        is_safe_name(app_id).then(|| self.cache_dir.join(app_id))
    }

    fn entry_path(&self, app_id: &str, fingerprint: &str) -> Option<PathBuf> {
        if !is_safe_name(fingerprint) {
            return None;
        }
        self.app_dir(app_id).map(|dir| dir.join(fingerprint))
    }
}

/// Names become path components and must not escape the cache.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

#[async_trait]
impl CrxCache for FileCrxCache {
    async fn get(&self, app_id: &str, fingerprint: &str) -> Result<PathBuf, CategorizedError> {
        let path = self
            .entry_path(app_id, fingerprint)
            .ok_or_else(|| CategorizedError::unpack(UnpackerError::InvalidParams, 0))?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(CategorizedError::unpack(
                UnpackerError::CrxCacheFileNotCached,
                0,
            )),
        }
    }

    async fn contains(&self, app_id: &str, fingerprint: &str) -> bool {
        self.get(app_id, fingerprint).await.is_ok()
    }

    async fn put(
        &self,
        src: &Path,
        app_id: &str,
        fingerprint: &str,
    ) -> Result<PathBuf, CategorizedError> {
        let (app_dir, dest) = match (self.app_dir(app_id), self.entry_path(app_id, fingerprint)) {
            (Some(app_dir), Some(dest)) => (app_dir, dest),
            _ => return Err(CategorizedError::unpack(UnpackerError::InvalidParams, 0)),
        };

        // Installing straight from the cache.
        if src == dest {
            return Ok(dest);
        }

        // Only the newest payload per application is retained.
        if fs::metadata(&app_dir).await.is_ok() {
            if let Err(e) = fs::remove_dir_all(&app_dir).await {
                warn!(app_id, error = %e, "Failed to clear cached payloads");
            }
        }
        fs::create_dir_all(&app_dir).await.map_err(|e| {
            warn!(app_id, error = %e, "Failed to create cache directory");
            CategorizedError::unpack(UnpackerError::FailedToCreateCacheDir, 0)
        })?;
        fs::copy(src, &dest).await.map_err(|e| {
            warn!(app_id, fingerprint, error = %e, "Failed to add payload to cache");
            CategorizedError::unpack(UnpackerError::FailedToAddToCache, 0)
        })?;

        debug!(app_id, fingerprint, "Cached payload at {:?}", dest);
        Ok(dest)
    }

    async fn remove_all(&self, app_id: &str) {
        let Some(app_dir) = self.app_dir(app_id) else {
            return;
        };
        match fs::remove_dir_all(&app_dir).await {
            Ok(()) => debug!(app_id, "Removed cached payloads"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(app_id, error = %e, "Failed to remove cached payloads"),
        }
    }
}
