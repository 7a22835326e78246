//! Error types for the update client.
//!
//! Two families live here:
//! - [`CategorizedError`]: the `(category, code, extra)` triple carried by
//!   every operation completion and recorded on the component for telemetry.
//! - [`UpdateError`]: failures of the library API itself (configuration,
//!   persistence, misuse of a component).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad class of an update failure, reported as `errorcat` in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCategory {
    #[default]
    None = 0,
    Download = 1,
    Unpack = 2,
    Install = 3,
    Service = 4,
    UpdateCheck = 5,
    Unknown = 6,
    Installer = 7,
}

impl ErrorCategory {
    /// Numeric value used in telemetry.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Download => "download",
            Self::Unpack => "unpack",
            Self::Install => "install",
            Self::Service => "service",
            Self::UpdateCheck => "update check",
            Self::Unknown => "unknown",
            Self::Installer => "installer",
        };
        f.write_str(name)
    }
}

/// Refusals and session-level failures raised by the state machine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ServiceError {
    None = 0,
    ServiceWaitFailed = 1,
    UpdateDisabled = 2,
    Cancelled = 3,
    CheckForUpdateOnly = 4,
    MeteredConnection = 5,
    CrxNotFound = 6,
}

/// Failures while unpacking, patching, or caching payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum UnpackerError {
    None = 0,
    InvalidParams = 1,
    InvalidFile = 2,
    UnzipPathError = 3,
    UnzipFailed = 4,
    BadManifest = 6,
    BadExtension = 7,
    IoError = 9,
    DeltaVerificationFailure = 10,
    DeltaBadCommands = 11,
    DeltaUnsupportedCommand = 12,
    DeltaOperationFailure = 13,
    DeltaPatchProcessFailure = 14,
    DeltaMissingExistingFile = 15,
    PuffinMissingPreviousCrx = 17,
    FailedToAddToCache = 18,
    FailedToCreateCacheDir = 19,
    CrxCacheNotProvided = 20,
    CrxCacheFileNotCached = 21,
    PatcherNotProvided = 22,
}

/// Failures of the payload downloader. HTTP failures use the status code
/// directly instead of one of these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CrxDownloaderError {
    None = 0,
    NoUrl = 10,
    NoHash = 11,
    BadHash = 12,
    BadSize = 14,
    FileWriteError = 15,
    GenericError = -1,
}

/// Failures reported by installers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum InstallError {
    None = 0,
    FingerprintWriteFailed = 2,
    BadManifest = 3,
    GenericError = 9,
    MoveFilesError = 10,
    SetPermissionsFailed = 11,
    InvalidVersion = 12,
    VersionNotUpgraded = 13,
    NoDirComponentUser = 14,
    CleanInstallDirFailed = 15,
    InstallVerificationFailed = 16,
    MissingInstallParams = 17,
    LaunchProcessFailed = 18,
    CustomErrorBase = 100,
}

/// Update-check failures, including server status strings other than
/// `ok` and `noupdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ProtocolError {
    None = 0,
    ParseFailed = -13,
    UpdateResponseNotFound = -14,
    UnknownApplication = -16,
    RestrictedApplication = -17,
    InvalidAppId = -18,
    OsNotSupported = -19,
    HwNotSupported = -20,
    UnknownError = -100,
}

macro_rules! impl_code {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Numeric value stored in the error code fields.
                pub fn code(self) -> i32 {
                    self as i32
                }
            }

            impl From<$ty> for i32 {
                fn from(value: $ty) -> i32 {
                    value as i32
                }
            }
        )*
    };
}

impl_code!(
    ServiceError,
    UnpackerError,
    CrxDownloaderError,
    InstallError,
    ProtocolError,
);

/// An error value produced by download, patch, unpack, and install
/// operations.
///
/// `category == None` if and only if `code == 0`. [`CategorizedError::new`]
/// normalizes its input so every constructor keeps that pairing: a zero
/// code is no error at all, and a non-zero code without a category is
/// [`ErrorCategory::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{category} error {code} (extra {extra})")]
pub struct CategorizedError {
    pub category: ErrorCategory,
    pub code: i32,
    pub extra: i32,
}

impl CategorizedError {
    pub fn new(category: ErrorCategory, code: impl Into<i32>, extra: i32) -> Self {
        let code = code.into();
        if code == 0 {
            return Self {
                category: ErrorCategory::None,
                code: 0,
                extra: 0,
            };
        }
        let category = match category {
            ErrorCategory::None => ErrorCategory::Unknown,
            category => category,
        };
        Self {
            category,
            code,
            extra,
        }
    }

    /// The "no error" triple.
    pub fn none() -> Self {
        Self::new(ErrorCategory::None, 0, 0)
    }

    pub fn is_error(&self) -> bool {
        self.category != ErrorCategory::None || self.code != 0
    }

    pub fn service(error: ServiceError) -> Self {
        Self::new(ErrorCategory::Service, error, 0)
    }

    pub fn unpack(error: UnpackerError, extra: i32) -> Self {
        Self::new(ErrorCategory::Unpack, error, extra)
    }

    pub fn download(code: impl Into<i32>) -> Self {
        Self::new(ErrorCategory::Download, code, 0)
    }

    pub fn install(error: InstallError) -> Self {
        Self::new(ErrorCategory::Install, error, 0)
    }

    pub fn update_check(error: ProtocolError) -> Self {
        Self::new(ErrorCategory::UpdateCheck, error, 0)
    }

    /// The cancellation error used for aborted operations and cancelled
    /// sessions.
    pub fn cancelled() -> Self {
        Self::service(ServiceError::Cancelled)
    }
}

/// Errors returned by the library API.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// A component method was called in a state that does not allow it
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Persisted data could not be read or written
    #[error("persisted data error: {0}")]
    PersistenceError(String),

    /// Version parsing error
    #[error("version parse error: {0}")]
    VersionParseError(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    HttpError(String),
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        UpdateError::HttpError(err.to_string())
    }
}

impl From<semver::Error> for UpdateError {
    fn from(err: semver::Error) -> Self {
        UpdateError::VersionParseError(err.to_string())
    }
}
