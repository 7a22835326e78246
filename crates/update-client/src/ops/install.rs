//! Unpack and install.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::OperationSink;
use crate::cache::CrxCache;
use crate::crx::{CrxFormatRequirement, InstallParams};
use crate::error::{CategorizedError, UnpackerError};
use crate::installer::{CrxInstaller, InstallProgressCallback, InstallerResult};

/// What the unpacker learned about a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackResult {
    /// Public key of the payload, handed to the installer
    pub public_key: String,
}

/// Extracts a payload into a directory.
#[async_trait]
pub trait Unpacker: Send + Sync {
    async fn unpack(
        &self,
        payload: &Path,
        dest: &Path,
        pk_hash: &[u8],
        format: CrxFormatRequirement,
    ) -> Result<UnpackResult, CategorizedError>;
}

/// Treats a payload as an opaque single-file archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyUnpacker;

#[async_trait]
impl Unpacker for CopyUnpacker {
    async fn unpack(
        &self,
        payload: &Path,
        dest: &Path,
        pk_hash: &[u8],
        _format: CrxFormatRequirement,
    ) -> Result<UnpackResult, CategorizedError> {
        let name = payload
            .file_name()
            .ok_or_else(|| CategorizedError::unpack(UnpackerError::InvalidFile, 0))?;
        match tokio::fs::metadata(payload).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(CategorizedError::unpack(UnpackerError::InvalidFile, 0)),
        }

        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|_| CategorizedError::unpack(UnpackerError::UnzipPathError, 0))?;
        tokio::fs::copy(payload, dest.join(name))
            .await
            .map_err(|_| CategorizedError::unpack(UnpackerError::UnzipFailed, 0))?;

        Ok(UnpackResult {
            public_key: hex::encode(pk_hash),
        })
    }
}

/// Everything [`install_operation`] needs about the component.
#[derive(Clone)]
pub struct InstallRequest {
    pub app_id: String,
    pub next_fp: String,
    pub payload: PathBuf,
    pub pk_hash: Vec<u8>,
    pub format: CrxFormatRequirement,
    pub install_params: Option<InstallParams>,
    pub installer: Arc<dyn CrxInstaller>,
}

/// Unpack `request.payload`, cache it when a cache is given, and install it.
///
/// Cache failures are logged and do not fail the install. Install progress
/// is forwarded through `sink`.
pub async fn install_operation(
    unpacker: Arc<dyn Unpacker>,
    cache: Option<Arc<dyn CrxCache>>,
    request: InstallRequest,
    work_dir: PathBuf,
    sink: OperationSink,
) -> InstallerResult {
    let app_id = request.app_id.as_str();

    let io_error = |e: std::io::Error| {
        warn!(app_id, error = %e, "Failed to create unpack directory");
        InstallerResult::from(CategorizedError::unpack(UnpackerError::IoError, 0))
    };
    if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
        return io_error(e);
    }
    let unpack_dir = match tempfile::Builder::new()
        .prefix("unpack_")
        .tempdir_in(&work_dir)
    {
        Ok(dir) => dir,
        Err(e) => return io_error(e),
    };

    let unpacked = match unpacker
        .unpack(
            &request.payload,
            unpack_dir.path(),
            &request.pk_hash,
            request.format,
        )
        .await
    {
        Ok(unpacked) => unpacked,
        Err(e) => {
            warn!(app_id, error = %e, "Unpack failed");
            return InstallerResult::from(e);
        }
    };
    debug!(app_id, "Unpacked payload into {:?}", unpack_dir.path());

    if let Some(cache) = cache {
        if let Err(e) = cache.put(&request.payload, app_id, &request.next_fp).await {
            warn!(app_id, error = %e, "Failed to cache payload");
        }
    }

    let progress: InstallProgressCallback = Arc::new(move |percent| sink.install_progress(percent));
    let result = request
        .installer
        .install(
            unpack_dir.path(),
            &unpacked.public_key,
            request.install_params.clone(),
            progress,
        )
        .await;

    if result.is_success() {
        info!(app_id, "Install complete");
    } else {
        warn!(app_id, error = %result.error, "Install failed");
    }
    result
}
