//! Telemetry event construction.
//!
//! Events are flat JSON objects appended to a component in the order they
//! occur; the ping layer uploads them verbatim.

use serde_json::{Map, Value};

use crate::error::{CategorizedError, ErrorCategory};

/// One telemetry event.
pub type EventDict = Map<String, Value>;

pub const EVENT_INSTALL: i32 = 2;
pub const EVENT_UPDATE: i32 = 3;
pub const EVENT_UNINSTALL: i32 = 4;
pub const EVENT_DOWNLOAD: i32 = 14;
pub const EVENT_ACTION_RUN: i32 = 42;
pub const EVENT_PUFF: i32 = 62;

/// Which downloader fetched a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloaderKind {
    None,
    Direct,
}

impl DownloaderKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::None => "unknown",
            Self::Direct => "direct",
        }
    }
}

/// Measurements of a single download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadMetrics {
    pub url: String,
    pub downloader: DownloaderKind,
    pub error: i32,
    pub extra_code1: i32,
    pub downloaded_bytes: i64,
    pub total_bytes: i64,
    pub download_time_ms: u64,
}

/// Parameters for a ping-only cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingParams {
    pub event_type: i32,
    pub result: i32,
    pub error_code: i32,
    pub extra_code1: i32,
}

impl PingParams {
    /// An uninstall ping carrying `reason` as the extra code.
    pub fn uninstall(reason: i32) -> Self {
        Self {
            event_type: EVENT_UNINSTALL,
            result: 1,
            error_code: 0,
            extra_code1: reason,
        }
    }
}

pub fn make_event_download_metrics(metrics: &DownloadMetrics) -> EventDict {
    let mut event = EventDict::new();
    event.insert("eventtype".into(), EVENT_DOWNLOAD.into());
    event.insert("eventresult".into(), i32::from(metrics.error == 0).into());
    event.insert("downloader".into(), metrics.downloader.as_str().into());
    if metrics.error != 0 {
        event.insert("errorcode".into(), metrics.error.into());
    }
    if metrics.extra_code1 != 0 {
        event.insert("extracode1".into(), metrics.extra_code1.into());
    }
    event.insert("url".into(), metrics.url.clone().into());
    // -1 means unknown and is left out.
    if metrics.downloaded_bytes != -1 {
        event.insert("downloaded".into(), metrics.downloaded_bytes.into());
    }
    if metrics.total_bytes != -1 {
        event.insert("total".into(), metrics.total_bytes.into());
    }
    event.insert("download_time_ms".into(), metrics.download_time_ms.into());
    event
}

/// Event for a single pipeline step such as patching.
pub fn make_event_operation(event_type: i32, result: Result<(), &CategorizedError>) -> EventDict {
    let mut event = EventDict::new();
    event.insert("eventtype".into(), event_type.into());
    event.insert("eventresult".into(), i32::from(result.is_ok()).into());
    if let Err(error) = result {
        insert_error_fields(&mut event, error);
    }
    event
}

pub fn make_event_action_run(succeeded: bool, error_code: i32, extra_code1: i32) -> EventDict {
    let mut event = EventDict::new();
    event.insert("eventtype".into(), EVENT_ACTION_RUN.into());
    event.insert("eventresult".into(), i32::from(succeeded).into());
    if error_code != 0 {
        event.insert("errorcode".into(), error_code.into());
    }
    if extra_code1 != 0 {
        event.insert("extracode1".into(), extra_code1.into());
    }
    event
}

pub fn make_event_ping(params: &PingParams) -> EventDict {
    let mut event = EventDict::new();
    event.insert("eventtype".into(), params.event_type.into());
    event.insert("eventresult".into(), params.result.into());
    if params.error_code != 0 {
        event.insert("errorcode".into(), params.error_code.into());
    }
    if params.extra_code1 != 0 {
        event.insert("extracode1".into(), params.extra_code1.into());
    }
    event
}

pub(crate) fn insert_error_fields(event: &mut EventDict, error: &CategorizedError) {
    if error.category != ErrorCategory::None {
        event.insert("errorcat".into(), error.category.code().into());
    }
    if error.code != 0 {
        event.insert("errorcode".into(), error.code.into());
    }
    if error.extra != 0 {
        event.insert("extracode1".into(), error.extra.into());
    }
}
