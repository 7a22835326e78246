//! Directory-copy installer
//!
//! Installs a component by copying the unpacked payload into
//! `<install_root>/<app_id>/current`, replacing whatever was installed
//! before. Install parameters, when the server sent any, are written next
//! to the payload as `install_params.json`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use update_client::{
    CrxInstaller, InstallError, InstallParams, InstallProgressCallback, InstallerResult,
};

const CURRENT_DIR: &str = "current";
const INSTALL_PARAMS_FILE: &str = "install_params.json";

/// Copies unpacked payloads into a per-component directory.
#[derive(Debug, Clone)]
pub struct DirectoryInstaller {
    root: PathBuf,
    app_id: String,
}

impl DirectoryInstaller {
    pub fn new(root: impl Into<PathBuf>, app_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            app_id: app_id.into(),
        }
    }

    /// Directory holding the installed version.
    pub fn install_dir(&self) -> PathBuf {
        self.root.join(&self.app_id).join(CURRENT_DIR)
    }

    async fn copy_payload(&self, unpack_path: &Path, staging: &Path) -> std::io::Result<usize> {
        tokio::fs::create_dir_all(staging).await?;
        let mut copied = 0;
        let mut entries = tokio::fs::read_dir(unpack_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::copy(entry.path(), staging.join(entry.file_name())).await?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    async fn write_params(&self, staging: &Path, params: &InstallParams) -> std::io::Result<()> {
        let content = serde_json::to_vec_pretty(params)?;
        tokio::fs::write(staging.join(INSTALL_PARAMS_FILE), content).await
    }
}

#[async_trait]
impl CrxInstaller for DirectoryInstaller {
    async fn install(
        &self,
        unpack_path: &Path,
        public_key: &str,
        install_params: Option<InstallParams>,
        progress: InstallProgressCallback,
    ) -> InstallerResult {
        let target = self.install_dir();
        let staging = self.root.join(&self.app_id).join(".staging");
        debug!(app_id = %self.app_id, public_key, target = %target.display(), "Installing payload");
        progress(0);

        if tokio::fs::try_exists(&staging).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                warn!(error = %e, "Failed to clear staging directory");
                return InstallerResult::install_error(InstallError::CleanInstallDirFailed);
            }
        }

        match self.copy_payload(unpack_path, &staging).await {
            Ok(0) => {
                warn!(app_id = %self.app_id, "Unpacked payload is empty");
                return InstallerResult::install_error(InstallError::BadManifest);
            }
            Ok(count) => debug!(count, "Copied payload files"),
            Err(e) => {
                warn!(error = %e, "Failed to copy payload");
                return InstallerResult::install_error(InstallError::MoveFilesError);
            }
        }
        progress(50);

        if let Some(params) = &install_params {
            if let Err(e) = self.write_params(&staging, params).await {
                warn!(error = %e, "Failed to write install parameters");
                return InstallerResult::install_error(InstallError::GenericError);
            }
        }

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_dir_all(&target).await {
                warn!(error = %e, "Failed to remove previous install");
                return InstallerResult::install_error(InstallError::CleanInstallDirFailed);
            }
        }
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            warn!(error = %e, "Failed to move staged install into place");
            return InstallerResult::install_error(InstallError::MoveFilesError);
        }

        progress(100);
        info!(app_id = %self.app_id, target = %target.display(), "Installed component");
        let mut result = InstallerResult::success();
        result.installer_cmd_line = install_params
            .filter(|p| !p.run.is_empty())
            .map(|p| format!("{} {}", p.run, p.arguments).trim_end().to_string());
        result
    }

    fn get_installed_file(&self, file: &str) -> Option<PathBuf> {
        let relative = Path::new(file);
        if relative.is_absolute() || relative.components().any(|c| c.as_os_str() == "..") {
            return None;
        }
        let path = self.install_dir().join(relative);
        path.is_file().then_some(path)
    }

    fn on_update_error(&self, error: i32) {
        warn!(app_id = %self.app_id, error, "Update cycle failed");
    }
}
