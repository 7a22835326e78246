//! Update check response model.
//!
//! One [`UpdateCheckResult`] describes what the server said about a single
//! application: its status, an optional action, and (when an update is
//! available) the manifest and the base URLs the payloads are served from.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, UpdateError};

/// A payload advertised in a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Package {
    /// File name of the full payload, resolved against `crx_urls`
    pub name: String,
    /// File name of the differential payload, resolved against `crx_diffurls`
    pub namediff: String,
    pub fingerprint: String,
    pub hash_sha256: String,
    pub hashdiff_sha256: String,
    pub size: i64,
    pub sizediff: i64,
}

/// Manifest of an available update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub version: String,
    /// Command the installer should run, if any
    pub run: String,
    pub arguments: String,
    pub packages: Vec<Package>,
}

/// Install data returned for an install data index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallData {
    pub status: String,
    pub install_data_index: String,
    pub text: String,
}

/// Server response for a single application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateCheckResult {
    pub app_id: String,
    pub status: String,
    /// Action to run after the check or after installation
    pub action_run: String,
    pub custom_attributes: HashMap<String, String>,
    /// Base URLs for full payloads, most general first
    pub crx_urls: Vec<String>,
    /// Base URLs for differential payloads, most general first
    pub crx_diffurls: Vec<String>,
    pub manifest: Manifest,
    pub data: Vec<InstallData>,
}

impl UpdateCheckResult {
    /// A `noupdate` result for `app_id`.
    pub fn no_update(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            status: STATUS_NO_UPDATE.to_string(),
            ..Default::default()
        }
    }

    /// Look up the install data text for `index`. Only entries with an
    /// `ok` status match.
    pub fn install_data_for(&self, index: &str) -> String {
        if index.is_empty() || self.data.is_empty() {
            return String::new();
        }
        self.data
            .iter()
            .find(|d| d.install_data_index == index && d.status == STATUS_OK)
            .map(|d| d.text.clone())
            .unwrap_or_default()
    }
}

pub const STATUS_OK: &str = "ok";
pub const STATUS_NO_UPDATE: &str = "noupdate";

/// Map a status other than `ok`/`noupdate` to its update check error.
pub fn status_to_error(status: &str) -> ProtocolError {
    match status {
        "error-unknownApplication" => ProtocolError::UnknownApplication,
        "restricted" => ProtocolError::RestrictedApplication,
        "error-invalidAppId" => ProtocolError::InvalidAppId,
        "error-osnotsupported" => ProtocolError::OsNotSupported,
        "error-hwnotsupported" => ProtocolError::HwNotSupported,
        _ => ProtocolError::UnknownError,
    }
}

/// Parse a JSON array of results.
pub fn parse_results(data: &[u8]) -> Result<Vec<UpdateCheckResult>, UpdateError> {
    let results: Vec<UpdateCheckResult> = serde_json::from_slice(data)?;
    Ok(results)
}
