//! Post-install and post-check actions.

use std::sync::Arc;

use tracing::{info, warn};

use crate::installer::{ActionHandler, ActionResult, CrxInstaller};

/// Run `action` through `handler`.
///
/// The action names a file shipped with the installed version and is
/// resolved through the installer.
pub async fn run_action(
    handler: Option<Arc<dyn ActionHandler>>,
    installer: Arc<dyn CrxInstaller>,
    action: String,
    session_id: String,
) -> ActionResult {
    let Some(handler) = handler else {
        warn!(action, "No action handler for component");
        return ActionResult::failed(-1, 0);
    };
    let Some(path) = installer.get_installed_file(&action) else {
        warn!(action, "Action file is not installed");
        return ActionResult::failed(-1, 0);
    };

    let result = handler.handle(&path, &session_id).await;
    info!(
        action,
        succeeded = result.succeeded,
        error_code = result.error_code,
        "Action finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crx::InstallParams;
    use crate::installer::{InstallProgressCallback, InstallerResult};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    struct FixedInstaller {
        root: Option<PathBuf>,
    }

    #[async_trait]
    impl CrxInstaller for FixedInstaller {
        async fn install(
            &self,
            _unpack_path: &Path,
            _public_key: &str,
            _install_params: Option<InstallParams>,
            _progress: InstallProgressCallback,
        ) -> InstallerResult {
            InstallerResult::success()
        }

        fn get_installed_file(&self, file: &str) -> Option<PathBuf> {
            self.root.as_ref().map(|root| root.join(file))
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl ActionHandler for EchoHandler {
        async fn handle(&self, action: &Path, session_id: &str) -> ActionResult {
            if action.ends_with("ok.sh") && session_id == "s1" {
                ActionResult::succeeded()
            } else {
                ActionResult::failed(5, 6)
            }
        }
    }

    #[tokio::test]
    async fn test_missing_handler() {
        let installer = Arc::new(FixedInstaller {
            root: Some(PathBuf::from("/opt/app")),
        });
        let result = run_action(None, installer, "ok.sh".into(), "s1".into()).await;
        assert_eq!(result, ActionResult::failed(-1, 0));
    }

    #[tokio::test]
    async fn test_unresolvable_action() {
        let installer = Arc::new(FixedInstaller { root: None });
        let result =
            run_action(Some(Arc::new(EchoHandler)), installer, "ok.sh".into(), "s1".into()).await;
        assert_eq!(result, ActionResult::failed(-1, 0));
    }

    #[tokio::test]
    async fn test_handler_result_is_returned() {
        let installer: Arc<dyn CrxInstaller> = Arc::new(FixedInstaller {
            root: Some(PathBuf::from("/opt/app")),
        });
        let ok = run_action(
            Some(Arc::new(EchoHandler)),
            installer.clone(),
            "ok.sh".into(),
            "s1".into(),
        )
        .await;
        assert!(ok.succeeded);

        let failed =
            run_action(Some(Arc::new(EchoHandler)), installer, "bad.sh".into(), "s1".into()).await;
        assert_eq!(failed, ActionResult::failed(5, 6));
    }
}
