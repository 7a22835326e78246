//! Installer and action handler interfaces supplied per component.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::crx::InstallParams;
use crate::error::{CategorizedError, ErrorCategory, InstallError};

/// Install progress callback, receives a percentage. Values outside
/// `0..=100` are ignored by the component.
pub type InstallProgressCallback = Arc<dyn Fn(i32) + Send + Sync>;

/// Outcome of an installation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerResult {
    pub error: CategorizedError,
    /// Free-form text returned by the installer
    pub installer_text: Option<String>,
    /// Command line the installer ran, if any
    pub installer_cmd_line: Option<String>,
}

impl InstallerResult {
    pub fn success() -> Self {
        Self {
            error: CategorizedError::new(ErrorCategory::None, 0, 0),
            installer_text: None,
            installer_cmd_line: None,
        }
    }

    /// Installer-reported failure, categorized as [`ErrorCategory::Installer`].
    /// A zero code means the installer succeeded.
    pub fn installer_error(code: i32, extra: i32) -> Self {
        Self::from(CategorizedError::new(ErrorCategory::Installer, code, extra))
    }

    /// Failure raised by the install pipeline around the installer.
    pub fn install_error(error: InstallError) -> Self {
        Self::from(CategorizedError::install(error))
    }

    pub fn is_success(&self) -> bool {
        !self.error.is_error()
    }
}

impl From<CategorizedError> for InstallerResult {
    fn from(error: CategorizedError) -> Self {
        Self {
            error,
            installer_text: None,
            installer_cmd_line: None,
        }
    }
}

/// Installs unpacked payloads for one component.
#[async_trait]
pub trait CrxInstaller: Send + Sync {
    /// Install the unpacked payload found in `unpack_path`.
    async fn install(
        &self,
        unpack_path: &Path,
        public_key: &str,
        install_params: Option<InstallParams>,
        progress: InstallProgressCallback,
    ) -> InstallerResult;

    /// Resolve a file shipped with the currently installed version.
    fn get_installed_file(&self, file: &str) -> Option<PathBuf>;

    /// Called when an update cycle fails.
    fn on_update_error(&self, _error: i32) {}
}

/// Result of running an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionResult {
    pub succeeded: bool,
    pub error_code: i32,
    pub extra_code1: i32,
}

impl ActionResult {
    pub fn succeeded() -> Self {
        Self {
            succeeded: true,
            error_code: 0,
            extra_code1: 0,
        }
    }

    pub fn failed(error_code: i32, extra_code1: i32) -> Self {
        Self {
            succeeded: false,
            error_code,
            extra_code1,
        }
    }
}

/// Runs post-check and post-install actions.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, action: &Path, session_id: &str) -> ActionResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_installer_result_success() {
        let result = InstallerResult::success();
        assert!(result.is_success());
        assert_eq!(result.error.code, 0);
    }

    #[test]
    fn test_installer_result_errors() {
        let result = InstallerResult::installer_error(5, 1);
        assert!(!result.is_success());
        assert_eq!(result.error.category, ErrorCategory::Installer);
        assert_eq!(result.error.extra, 1);

        let result = InstallerResult::install_error(InstallError::MissingInstallParams);
        assert_eq!(result.error.category, ErrorCategory::Install);
        assert_eq!(result.error.code, 17);
    }

    #[test]
    fn test_installer_zero_code_is_success() {
        let result = InstallerResult::installer_error(0, 7);
        assert!(result.is_success());
        assert_eq!(result, InstallerResult::success());
    }
}
