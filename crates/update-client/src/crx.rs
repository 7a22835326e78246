//! Component descriptors and progress snapshots.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;
use crate::installer::{ActionHandler, CrxInstaller};

/// Archive format the unpacker must enforce for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrxFormatRequirement {
    /// Any supported archive format
    #[default]
    Crx3,
    /// CRX3 with a publisher proof
    Crx3WithPublisherProof,
}

/// Named states of the component state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    #[default]
    New,
    Checking,
    CanUpdate,
    DownloadingDiff,
    Downloading,
    UpdatingDiff,
    Updating,
    Updated,
    UpToDate,
    UpdateError,
    PingOnly,
    Run,
}

impl ComponentState {
    /// Whether the state ends the update cycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Updated | Self::UpToDate | Self::UpdateError | Self::PingOnly
        )
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::CanUpdate => "can_update",
            Self::DownloadingDiff => "downloading_diff",
            Self::Downloading => "downloading",
            Self::UpdatingDiff => "updating_diff",
            Self::Updating => "updating",
            Self::Updated => "updated",
            Self::UpToDate => "up_to_date",
            Self::UpdateError => "update_error",
            Self::PingOnly => "ping_only",
            Self::Run => "run",
        };
        f.write_str(name)
    }
}

/// Command the installer runs after unpacking, resolved from the update
/// check response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallParams {
    pub run: String,
    pub arguments: String,
    /// Server-supplied install data matched by the component's install data
    /// index; empty when nothing matched.
    pub server_install_data: String,
}

/// Everything the caller knows about one updatable unit.
#[derive(Clone)]
pub struct CrxComponent {
    pub app_id: String,
    pub name: String,
    /// Currently installed version; `None` when nothing is installed.
    pub version: Option<Version>,
    pub fingerprint: String,
    /// SHA-256 of the publisher key the payload must be signed with.
    pub pk_hash: Vec<u8>,
    pub installer: Arc<dyn CrxInstaller>,
    pub action_handler: Option<Arc<dyn ActionHandler>>,
    pub install_data_index: String,
    pub crx_format_requirement: CrxFormatRequirement,
    pub allow_cached_copies: bool,
    pub updates_enabled: bool,
    pub allow_updates_on_metered_connection: bool,
}

impl CrxComponent {
    /// Create a descriptor with permissive defaults.
    pub fn new(app_id: impl Into<String>, installer: Arc<dyn CrxInstaller>) -> Self {
        Self {
            app_id: app_id.into(),
            name: String::new(),
            version: None,
            fingerprint: String::new(),
            pk_hash: Vec::new(),
            installer,
            action_handler: None,
            install_data_index: String::new(),
            crx_format_requirement: CrxFormatRequirement::default(),
            allow_cached_copies: true,
            updates_enabled: true,
            allow_updates_on_metered_connection: true,
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    pub fn with_action_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.action_handler = Some(handler);
        self
    }

    pub fn with_install_data_index(mut self, index: impl Into<String>) -> Self {
        self.install_data_index = index.into();
        self
    }
}

impl fmt::Debug for CrxComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrxComponent")
            .field("app_id", &self.app_id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("fingerprint", &self.fingerprint)
            .field("pk_hash", &hex::encode(&self.pk_hash))
            .field("install_data_index", &self.install_data_index)
            .field("crx_format_requirement", &self.crx_format_requirement)
            .field("allow_cached_copies", &self.allow_cached_copies)
            .field("updates_enabled", &self.updates_enabled)
            .field(
                "allow_updates_on_metered_connection",
                &self.allow_updates_on_metered_connection,
            )
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of a component for progress reporting.
#[derive(Debug, Clone, Default)]
pub struct CrxUpdateItem {
    pub state: ComponentState,
    pub id: String,
    pub component: Option<CrxComponent>,
    pub previous_version: Option<Version>,
    pub next_version: Option<Version>,
    pub previous_fp: String,
    pub next_fp: String,
    /// Bytes downloaded so far, -1 when unknown.
    pub downloaded_bytes: i64,
    /// Expected download size, -1 when unknown.
    pub total_bytes: i64,
    /// Install progress in percent, -1 when unknown.
    pub install_progress: i32,
    pub error_category: ErrorCategory,
    pub error_code: i32,
    pub extra_code1: i32,
    pub diff_error_category: ErrorCategory,
    pub diff_error_code: i32,
    pub diff_extra_code1: i32,
    pub custom_updatecheck_data: HashMap<String, String>,
    pub installer_text: Option<String>,
    pub installer_cmd_line: Option<String>,
}

/// Parse a dotted version string, padding missing minor and patch parts.
///
/// Returns `None` for anything that is not a valid version, which callers
/// treat as "no version".
pub fn parse_version(s: &str) -> Option<Version> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(version) = Version::parse(s) {
        return Some(version);
    }
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    Version::parse(&padded).ok()
}
