//! Differential patching.
//!
//! A differential payload is applied to the previous payload taken from the
//! cache, producing a full payload that then goes through the regular
//! install pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{OperationSink, Payload};
use crate::cache::CrxCache;
use crate::error::{CategorizedError, UnpackerError};
use crate::telemetry::{make_event_operation, EVENT_PUFF};

/// Applies a binary patch.
#[async_trait]
pub trait Patcher: Send + Sync {
    /// Write the result of applying `patch` to `old` into `out`.
    ///
    /// Returns the patcher's own error code on failure.
    async fn patch(&self, old: &Path, patch: &Path, out: &Path) -> Result<(), i32>;
}

/// Patch the cached previous payload of `app_id` with `diff_path`.
///
/// The differential payload is deleted whatever the outcome. One patch
/// event is reported through `sink`. The patched payload owns its scratch
/// directory under `work_dir`.
pub async fn puff_operation(
    cache: Option<Arc<dyn CrxCache>>,
    patcher: Option<Arc<dyn Patcher>>,
    app_id: String,
    previous_fp: String,
    diff_path: PathBuf,
    work_dir: PathBuf,
    sink: OperationSink,
) -> Result<Payload, CategorizedError> {
    let result = apply(cache, patcher, &app_id, &previous_fp, &diff_path, &work_dir).await;

    if let Err(e) = tokio::fs::remove_file(&diff_path).await {
        warn!(app_id, error = %e, "Failed to remove differential payload");
    }
    sink.event(make_event_operation(EVENT_PUFF, result.as_ref().map(|_| ())));
    result
}

async fn apply(
    cache: Option<Arc<dyn CrxCache>>,
    patcher: Option<Arc<dyn Patcher>>,
    app_id: &str,
    previous_fp: &str,
    diff_path: &Path,
    work_dir: &Path,
) -> Result<Payload, CategorizedError> {
    let cache =
        cache.ok_or_else(|| CategorizedError::unpack(UnpackerError::CrxCacheNotProvided, 0))?;
    let patcher =
        patcher.ok_or_else(|| CategorizedError::unpack(UnpackerError::PatcherNotProvided, 0))?;

    let previous = cache.get(app_id, previous_fp).await.map_err(|e| {
        warn!(app_id, previous_fp, error = %e, "Previous payload is not cached");
        CategorizedError::unpack(UnpackerError::PuffinMissingPreviousCrx, 0)
    })?;

    let io_error = |e: std::io::Error| {
        warn!(app_id, error = %e, "Failed to prepare patch output");
        CategorizedError::unpack(UnpackerError::IoError, 0)
    };
    tokio::fs::create_dir_all(work_dir).await.map_err(io_error)?;
    let out_dir = tempfile::Builder::new()
        .prefix("puff_")
        .tempdir_in(work_dir)
        .map_err(io_error)?;
    let out = out_dir.path().join(format!("{}.crx", app_id));

    match patcher.patch(&previous, diff_path, &out).await {
        Ok(()) => {
            info!(app_id, "Applied differential update");
            Ok(Payload::in_scratch(out, out_dir))
        }
        Err(code) => {
            warn!(app_id, code, "Differential patch failed");
            if let Err(e) = out_dir.close() {
                warn!(app_id, error = %e, "Failed to remove patch output");
            }
            Err(CategorizedError::unpack(UnpackerError::DeltaOperationFailure, code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCrxCache;
    use crate::ops::{Operation, OperationMessage};
    use tempfile::TempDir;

    /// Concatenates old and patch.
    struct AppendPatcher;

    #[async_trait]
    impl Patcher for AppendPatcher {
        async fn patch(&self, old: &Path, patch: &Path, out: &Path) -> Result<(), i32> {
            let mut data = std::fs::read(old).map_err(|_| 1)?;
            data.extend(std::fs::read(patch).map_err(|_| 2)?);
            std::fs::write(out, data).map_err(|_| 3)
        }
    }

    struct FailingPatcher;

    #[async_trait]
    impl Patcher for FailingPatcher {
        async fn patch(&self, _old: &Path, _patch: &Path, _out: &Path) -> Result<(), i32> {
            Err(42)
        }
    }

    async fn cache_with(temp: &TempDir, fp: &str, content: &[u8]) -> Arc<dyn CrxCache> {
        let cache = FileCrxCache::new(temp.path().join("cache"));
        let src = temp.path().join("seed");
        std::fs::write(&src, content).unwrap();
        cache.put(&src, "app", fp).await.unwrap();
        Arc::new(cache)
    }

    fn write_diff(temp: &TempDir) -> PathBuf {
        let diff = temp.path().join("diff.puff");
        std::fs::write(&diff, b"+diff").unwrap();
        diff
    }

    #[tokio::test]
    async fn test_patch_success_reports_event() {
        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, "fp1", b"base").await;
        let diff = write_diff(&temp);
        let work_dir = temp.path().join("work");

        let diff_for_op = diff.clone();
        let op = Operation::spawn(move |sink| {
            puff_operation(
                Some(cache),
                Some(Arc::new(AppendPatcher)),
                "app".into(),
                "fp1".into(),
                diff_for_op,
                work_dir,
                sink,
            )
        });
        let mut events = Vec::new();
        let out = op
            .drive(|m| {
                if let OperationMessage::Event(e) = m {
                    events.push(e);
                }
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(std::fs::read(out.path()).unwrap(), b"base+diff");
        assert!(!diff.exists());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["eventtype"], EVENT_PUFF);
        assert_eq!(events[0]["eventresult"], 1);
    }

    #[tokio::test]
    async fn test_missing_cache() {
        let temp = TempDir::new().unwrap();
        let diff = write_diff(&temp);
        let err = puff_operation(
            None,
            Some(Arc::new(AppendPatcher)),
            "app".into(),
            "fp1".into(),
            diff.clone(),
            temp.path().to_path_buf(),
            OperationSink::detached(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, UnpackerError::CrxCacheNotProvided.code());
        assert!(!diff.exists());
    }

    #[tokio::test]
    async fn test_missing_patcher() {
        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, "fp1", b"base").await;
        let err = puff_operation(
            Some(cache),
            None,
            "app".into(),
            "fp1".into(),
            write_diff(&temp),
            temp.path().to_path_buf(),
            OperationSink::detached(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, UnpackerError::PatcherNotProvided.code());
    }

    #[tokio::test]
    async fn test_missing_previous_payload() {
        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, "other", b"base").await;
        let err = puff_operation(
            Some(cache),
            Some(Arc::new(AppendPatcher)),
            "app".into(),
            "fp1".into(),
            write_diff(&temp),
            temp.path().to_path_buf(),
            OperationSink::detached(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, UnpackerError::PuffinMissingPreviousCrx.code());
    }

    #[tokio::test]
    async fn test_patch_failure_carries_patcher_code() {
        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, "fp1", b"base").await;
        let err = puff_operation(
            Some(cache),
            Some(Arc::new(FailingPatcher)),
            "app".into(),
            "fp1".into(),
            write_diff(&temp),
            temp.path().join("work"),
            OperationSink::detached(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, UnpackerError::DeltaOperationFailure.code());
        assert_eq!(err.extra, 42);
        assert_eq!(
            std::fs::read_dir(temp.path().join("work")).unwrap().count(),
            0
        );
    }
}
