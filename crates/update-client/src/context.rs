//! Per-session update context shared by every component in a session.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::CrxCache;
use crate::config::UpdateConfig;
use crate::observer::{noop_observer, ComponentEvent, CrxStateChangeCallback, ObserverCallback};
use crate::ops::download::{CrxDownloader, HttpDownloader};
use crate::ops::install::{CopyUnpacker, Unpacker};
use crate::ops::puff::Patcher;
use crate::persisted::{InMemoryPersistedData, PersistedData};

/// Session-wide cancellation flag.
///
/// Components read it at their checkpoints; in-flight operations are not
/// interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read-only configuration and collaborators for one update session.
pub struct UpdateContext {
    pub config: Arc<UpdateConfig>,
    pub session_id: String,
    /// The user is waiting on this session
    pub is_foreground: bool,
    /// Stop after the update check, even if an update is available
    pub is_update_check_only: bool,
    /// The active network connection is metered
    pub metered_connection: bool,
    cancelled: CancellationFlag,
    pub crx_cache: Option<Arc<dyn CrxCache>>,
    pub downloader: Arc<dyn CrxDownloader>,
    pub patcher: Option<Arc<dyn Patcher>>,
    pub unpacker: Arc<dyn Unpacker>,
    pub persisted_data: Arc<dyn PersistedData>,
    notify_observers: ObserverCallback,
    crx_state_change: Option<CrxStateChangeCallback>,
}

impl UpdateContext {
    /// Create a context with the default HTTP downloader, the copy unpacker,
    /// an in-memory version store, and no cache or patcher.
    pub fn new(config: UpdateConfig, session_id: impl Into<String>) -> Self {
        let downloader = HttpDownloader::with_config(&config.network);
        Self {
            config: Arc::new(config),
            session_id: session_id.into(),
            is_foreground: false,
            is_update_check_only: false,
            metered_connection: false,
            cancelled: CancellationFlag::new(),
            crx_cache: None,
            downloader: Arc::new(downloader),
            patcher: None,
            unpacker: Arc::new(CopyUnpacker),
            persisted_data: Arc::new(InMemoryPersistedData::new()),
            notify_observers: noop_observer(),
            crx_state_change: None,
        }
    }

    pub fn with_foreground(mut self, foreground: bool) -> Self {
        self.is_foreground = foreground;
        self
    }

    pub fn with_update_check_only(mut self, check_only: bool) -> Self {
        self.is_update_check_only = check_only;
        self
    }

    pub fn with_metered_connection(mut self, metered: bool) -> Self {
        self.metered_connection = metered;
        self
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancelled = flag;
        self
    }

    pub fn with_crx_cache(mut self, cache: Arc<dyn CrxCache>) -> Self {
        self.crx_cache = Some(cache);
        self
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn CrxDownloader>) -> Self {
        self.downloader = downloader;
        self
    }

    pub fn with_patcher(mut self, patcher: Arc<dyn Patcher>) -> Self {
        self.patcher = Some(patcher);
        self
    }

    pub fn with_unpacker(mut self, unpacker: Arc<dyn Unpacker>) -> Self {
        self.unpacker = unpacker;
        self
    }

    pub fn with_persisted_data(mut self, persisted_data: Arc<dyn PersistedData>) -> Self {
        self.persisted_data = persisted_data;
        self
    }

    pub fn with_observer(mut self, observer: ObserverCallback) -> Self {
        self.notify_observers = observer;
        self
    }

    pub fn with_state_change_callback(mut self, callback: CrxStateChangeCallback) -> Self {
        self.crx_state_change = Some(callback);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    /// Handle that cancels this session when triggered.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancelled.clone()
    }

    /// Scratch directory for this session.
    pub fn work_dir(&self) -> PathBuf {
        self.config.work_dir()
    }

    pub(crate) fn notify(&self, event: ComponentEvent, id: &str) {
        (self.notify_observers)(event, id);
    }

    pub(crate) fn state_change_callback(&self) -> Option<&CrxStateChangeCallback> {
        self.crx_state_change.as_ref()
    }
}
