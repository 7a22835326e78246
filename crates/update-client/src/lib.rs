//! # update-client
//!
//! Component update state machine.
//!
//! This crate handles:
//! - The per-component update cycle from update check to installation
//! - Full and differential downloads with SHA-256 verification
//! - Differential patching against cached payloads, with fallback to full
//! - Post-install and post-check actions
//! - Update telemetry events for pings
//!
//! ## Driving a component
//!
//! A [`Component`] is driven by calling [`Component::handle`] until
//! [`Component::is_handled`] returns true. The update check result is handed
//! in while the component is checking. [`UpdateEngine`] does all of this for
//! a whole session.

pub mod cache;
pub mod component;
pub mod config;
pub mod context;
pub mod crx;
pub mod engine;
pub mod error;
pub mod installer;
pub mod observer;
pub mod ops;
pub mod persisted;
pub mod protocol;
#[cfg(test)]
mod proptests;
pub mod telemetry;

// Re-export main types for convenience
pub use cache::{CrxCache, FileCrxCache};
pub use component::Component;
pub use config::{NetworkConfig, UpdateConfig};
pub use context::{CancellationFlag, UpdateContext};
pub use crx::{
    parse_version, ComponentState, CrxComponent, CrxFormatRequirement, CrxUpdateItem,
    InstallParams,
};
pub use engine::{
    CheckRequest, ComponentReport, SessionReport, StaticUpdateChecker, UpdateChecker,
    UpdateEngine,
};
pub use error::{
    CategorizedError, CrxDownloaderError, ErrorCategory, InstallError, ProtocolError,
    ServiceError, UnpackerError, UpdateError,
};
pub use installer::{
    ActionHandler, ActionResult, CrxInstaller, InstallProgressCallback, InstallerResult,
};
pub use observer::{ComponentEvent, CrxStateChangeCallback, ObserverCallback};
pub use ops::download::{CrxDownloader, DownloadProgressCallback, HttpDownloader};
pub use ops::install::{CopyUnpacker, UnpackResult, Unpacker};
pub use ops::puff::Patcher;
pub use persisted::{InMemoryPersistedData, JsonFilePersistedData, PersistedData, ProductRecord};
pub use protocol::{parse_results, UpdateCheckResult};
pub use telemetry::{EventDict, PingParams};
