//! The per-component update state machine.
//!
//! A [`Component`] owns exactly one live state object. Each call to
//! [`Component::handle`] runs the current state to completion, including
//! any operation it starts, and swaps in the state it hands back. When a
//! state hands back nothing, the cycle is over and the component is
//! handled.
//!
//! # Lifecycle
//!
//! ```text
//! New ──► Checking ──► CanUpdate ──► Downloading[Diff] ──► Updating[Diff] ──► Updated
//!  │         │  │          │               │                     │   ▲
//!  │         │  └► Run ────┼───────────────┼──────► UpToDate     └► Run
//!  ▼         ▼             ▼               ▼
//! UpdateError ◄────────────┴───────────────┘
//! ```

mod states;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Url;
use semver::Version;
use tracing::{debug, info};

use crate::context::UpdateContext;
use crate::crx::{parse_version, ComponentState, CrxComponent, CrxUpdateItem, InstallParams};
use crate::error::{CategorizedError, ErrorCategory, UpdateError};
use crate::observer::ComponentEvent;
use crate::ops::{OperationMessage, Payload};
use crate::protocol::UpdateCheckResult;
use crate::telemetry::{
    insert_error_fields, make_event_ping, EventDict, PingParams, EVENT_INSTALL, EVENT_UPDATE,
};

use states::{StateNew, StatePingOnly};

/// One state of the machine.
#[async_trait]
pub(crate) trait State: Send {
    fn state(&self) -> ComponentState;

    /// Do this state's work and decide what comes next.
    async fn handle(&mut self, component: &mut ComponentData) -> Transition;
}

/// What a state hands back when it is done.
pub(crate) struct Transition {
    next: Option<Box<dyn State>>,
    /// Notification fired once the new state is installed
    deferred: Option<ComponentEvent>,
}

impl Transition {
    pub(crate) fn to(next: impl State + 'static) -> Self {
        Self {
            next: Some(Box::new(next)),
            deferred: None,
        }
    }

    /// End the cycle.
    pub(crate) fn end() -> Self {
        Self {
            next: None,
            deferred: None,
        }
    }

    pub(crate) fn then_notify(mut self, event: ComponentEvent) -> Self {
        self.deferred = Some(event);
        self
    }
}

/// Mutable scratch space for one update cycle.
///
/// States read and write these fields directly while they run.
pub(crate) struct ComponentData {
    pub(crate) context: Arc<UpdateContext>,
    pub(crate) id: String,
    pub(crate) crx_component: Option<CrxComponent>,

    pub(crate) state: ComponentState,
    pub(crate) previous_state: ComponentState,
    pub(crate) is_handled: bool,

    /// Stamped when the component starts installing an update
    pub(crate) update_begin: Option<Instant>,

    // Update check response.
    pub(crate) status: String,
    pub(crate) action_run: String,
    pub(crate) custom_attrs: HashMap<String, String>,
    pub(crate) is_update_available: bool,

    pub(crate) previous_version: Option<Version>,
    pub(crate) next_version: Option<Version>,
    pub(crate) previous_fp: String,
    pub(crate) next_fp: String,

    pub(crate) crx_urls: Vec<Url>,
    pub(crate) crx_diffurls: Vec<Url>,
    pub(crate) hash_sha256: String,
    pub(crate) hashdiff_sha256: String,
    pub(crate) size: i64,
    pub(crate) sizediff: i64,
    pub(crate) install_params: Option<InstallParams>,

    /// Downloaded, patched, or cached payload ready to install. Dropping
    /// it removes any scratch directory it owns.
    pub(crate) payload: Option<Payload>,

    pub(crate) downloaded_bytes: i64,
    pub(crate) total_bytes: i64,
    pub(crate) install_progress: i32,

    pub(crate) error: CategorizedError,
    pub(crate) diff_error: CategorizedError,
    pub(crate) installer_text: Option<String>,
    pub(crate) installer_cmd_line: Option<String>,

    pub(crate) events: Vec<EventDict>,
}

impl ComponentData {
    fn new(context: Arc<UpdateContext>, id: String) -> Self {
        Self {
            context,
            id,
            crx_component: None,
            state: ComponentState::New,
            previous_state: ComponentState::New,
            is_handled: false,
            update_begin: None,
            status: String::new(),
            action_run: String::new(),
            custom_attrs: HashMap::new(),
            is_update_available: false,
            previous_version: None,
            next_version: None,
            previous_fp: String::new(),
            next_fp: String::new(),
            crx_urls: Vec::new(),
            crx_diffurls: Vec::new(),
            hash_sha256: String::new(),
            hashdiff_sha256: String::new(),
            size: 0,
            sizediff: 0,
            install_params: None,
            payload: None,
            downloaded_bytes: -1,
            total_bytes: -1,
            install_progress: -1,
            error: CategorizedError::none(),
            diff_error: CategorizedError::none(),
            installer_text: None,
            installer_cmd_line: None,
            events: Vec::new(),
        }
    }

    pub(crate) fn crx_update_item(&self) -> CrxUpdateItem {
        CrxUpdateItem {
            state: self.state,
            id: self.id.clone(),
            component: self.crx_component.clone(),
            previous_version: self.previous_version.clone(),
            next_version: self.next_version.clone(),
            previous_fp: self.previous_fp.clone(),
            next_fp: self.next_fp.clone(),
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            install_progress: self.install_progress,
            error_category: self.error.category,
            error_code: self.error.code,
            extra_code1: self.error.extra,
            diff_error_category: self.diff_error.category,
            diff_error_code: self.diff_error.code,
            diff_extra_code1: self.diff_error.extra,
            custom_updatecheck_data: self.custom_attrs.clone(),
            installer_text: self.installer_text.clone(),
            installer_cmd_line: self.installer_cmd_line.clone(),
        }
    }

    pub(crate) fn notify_observers(&self, event: ComponentEvent) {
        // Wait has no component state to report.
        if event != ComponentEvent::Wait {
            if let Some(callback) = self.context.state_change_callback() {
                callback(self.crx_update_item());
            }
        }
        self.context.notify(event, &self.id);
    }

    pub(crate) fn append_event(&mut self, mut event: EventDict) {
        if let Some(version) = &self.previous_version {
            event.insert("previousversion".into(), version.to_string().into());
        }
        if let Some(version) = &self.next_version {
            event.insert("nextversion".into(), version.to_string().into());
        }
        self.events.push(event);
    }

    /// Apply a message from a running operation.
    pub(crate) fn apply_message(&mut self, message: OperationMessage) {
        match message {
            OperationMessage::DownloadProgress {
                downloaded_bytes,
                total_bytes,
            } => {
                self.downloaded_bytes = downloaded_bytes;
                self.total_bytes = total_bytes;
                self.notify_observers(ComponentEvent::UpdateDownloading);
            }
            OperationMessage::InstallProgress(percent) => {
                if (0..=100).contains(&percent) {
                    self.install_progress = percent;
                }
                self.notify_observers(ComponentEvent::UpdateUpdating);
            }
            OperationMessage::Event(event) => self.append_event(event),
        }
    }

    pub(crate) fn set_error(&mut self, error: CategorizedError) {
        self.error = error;
    }

    pub(crate) fn set_diff_error(&mut self, error: CategorizedError) {
        self.diff_error = error;
    }

    pub(crate) fn has_diff_update(&self) -> bool {
        !self.crx_diffurls.is_empty()
    }

    pub(crate) fn diff_update_failed(&self) -> bool {
        self.diff_error.is_error()
    }

    pub(crate) fn can_try_diff_update(&self) -> bool {
        self.has_diff_update() && !self.diff_update_failed() && self.context.config.enabled_deltas
    }

    pub(crate) fn make_event_update_complete(&self) -> EventDict {
        let mut event = EventDict::new();
        let event_type = if self.context.is_foreground {
            EVENT_INSTALL
        } else {
            EVENT_UPDATE
        };
        event.insert("eventtype".into(), event_type.into());
        event.insert(
            "eventresult".into(),
            i32::from(self.state == ComponentState::Updated).into(),
        );
        insert_error_fields(&mut event, &self.error);

        if self.has_diff_update() {
            event.insert("diffresult".into(), i32::from(!self.diff_update_failed()).into());
        }
        if self.diff_error.category != ErrorCategory::None {
            event.insert("differrorcat".into(), self.diff_error.category.code().into());
        }
        if self.diff_error.code != 0 {
            event.insert("differrorcode".into(), self.diff_error.code.into());
        }
        if self.diff_error.extra != 0 {
            event.insert("diffextracode1".into(), self.diff_error.extra.into());
        }
        if !self.previous_fp.is_empty() {
            event.insert("previousfp".into(), self.previous_fp.clone().into());
        }
        if !self.next_fp.is_empty() {
            event.insert("nextfp".into(), self.next_fp.clone().into());
        }
        event
    }

    fn update_duration_at(&self, now: Instant) -> Duration {
        let Some(begin) = self.update_begin else {
            return Duration::ZERO;
        };
        now.saturating_duration_since(begin)
            .min(self.context.config.max_update_delay())
    }
}

/// Resolve each base URL against `name`, dropping anything that does not
/// form a valid URL.
fn resolve_urls(bases: &[String], name: &str) -> Vec<Url> {
    if name.is_empty() {
        return Vec::new();
    }
    bases
        .iter()
        .filter_map(|base| Url::parse(base).and_then(|base| base.join(name)).ok())
        .collect()
}

/// One updatable unit and its state machine for a single update cycle.
pub struct Component {
    state: Box<dyn State>,
    data: ComponentData,
}

impl Component {
    pub fn new(context: Arc<UpdateContext>, id: impl Into<String>) -> Self {
        Self {
            state: Box::new(StateNew),
            data: ComponentData::new(context, id.into()),
        }
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }

    pub fn state(&self) -> ComponentState {
        self.state.state()
    }

    pub fn previous_state(&self) -> ComponentState {
        self.data.previous_state
    }

    /// Whether the cycle has finished.
    pub fn is_handled(&self) -> bool {
        self.data.is_handled
    }

    pub fn is_update_available(&self) -> bool {
        self.data.is_update_available
    }

    pub fn crx_component(&self) -> Option<&CrxComponent> {
        self.data.crx_component.as_ref()
    }

    /// Supply the component descriptor. The current version and
    /// fingerprint become the cycle's starting point.
    pub fn set_crx_component(&mut self, crx_component: CrxComponent) {
        self.data.previous_version = crx_component.version.clone();
        self.data.previous_fp = crx_component.fingerprint.clone();
        self.data.crx_component = Some(crx_component);
    }

    pub fn previous_version(&self) -> Option<&Version> {
        self.data.previous_version.as_ref()
    }

    pub fn next_version(&self) -> Option<&Version> {
        self.data.next_version.as_ref()
    }

    pub fn previous_fp(&self) -> &str {
        &self.data.previous_fp
    }

    pub fn next_fp(&self) -> &str {
        &self.data.next_fp
    }

    pub fn crx_urls(&self) -> &[Url] {
        &self.data.crx_urls
    }

    pub fn crx_diffurls(&self) -> &[Url] {
        &self.data.crx_diffurls
    }

    pub fn install_params(&self) -> Option<&InstallParams> {
        self.data.install_params.as_ref()
    }

    pub fn error(&self) -> CategorizedError {
        self.data.error
    }

    pub fn diff_error(&self) -> CategorizedError {
        self.data.diff_error
    }

    pub fn action_run(&self) -> &str {
        &self.data.action_run
    }

    /// Run the current state and move to the state it hands back.
    ///
    /// Returns once the transition has happened. Calling this again after
    /// the cycle ended is an error.
    pub async fn handle(&mut self) -> Result<(), UpdateError> {
        if self.data.is_handled {
            return Err(UpdateError::InvalidState(format!(
                "component {} has already been handled",
                self.data.id
            )));
        }

        debug!(component = %self.data.id, state = ?self.data.state, "Handling component");
        let transition = self.state.handle(&mut self.data).await;
        self.change_state(transition).await;
        Ok(())
    }

    async fn change_state(&mut self, transition: Transition) {
        self.data.previous_state = self.state.state();
        match transition.next {
            Some(next) => {
                debug!(
                    component = %self.data.id,
                    from = ?self.data.previous_state,
                    to = ?next.state(),
                    "State transition"
                );
                self.data.state = next.state();
                // The old state, and anything it still owns, is dropped here.
                self.state = next;
            }
            None => {
                info!(
                    component = %self.data.id,
                    state = ?self.data.state,
                    "Component handled"
                );
                self.data.is_handled = true;
            }
        }
        if let Some(event) = transition.deferred {
            self.data.notify_observers(event);
        }
        tokio::task::yield_now().await;
    }

    /// Hand the component its update check outcome.
    ///
    /// Only valid while the component is checking. A failed check carries
    /// its error and no result.
    pub fn set_update_check_result(
        &mut self,
        result: Option<&UpdateCheckResult>,
        error: CategorizedError,
    ) -> Result<(), UpdateError> {
        if self.state() != ComponentState::Checking {
            return Err(UpdateError::InvalidState(format!(
                "update check result for component {} in state {}",
                self.data.id,
                self.state()
            )));
        }
        self.data.set_error(error);
        if let (Some(result), false) = (result, error.is_error()) {
            self.set_parse_result(result);
        }
        Ok(())
    }

    /// Consume one server response entry.
    pub fn set_parse_result(&mut self, result: &UpdateCheckResult) {
        let data = &mut self.data;
        debug_assert!(!data.error.is_error(), "update check already failed");

        data.status = result.status.clone();
        data.action_run = result.action_run.clone();
        data.custom_attrs = result.custom_attributes.clone();

        let Some(package) = result.manifest.packages.first() else {
            return;
        };

        data.next_version = parse_version(&result.manifest.version);
        data.next_fp = package.fingerprint.clone();
        data.crx_urls = resolve_urls(&result.crx_urls, &package.name);
        data.crx_diffurls = resolve_urls(&result.crx_diffurls, &package.namediff);
        data.hash_sha256 = package.hash_sha256.clone();
        data.size = package.size;
        data.hashdiff_sha256 = package.hashdiff_sha256.clone();
        data.sizediff = package.sizediff;

        if !result.manifest.run.is_empty() {
            let index = data
                .crx_component
                .as_ref()
                .map(|crx| crx.install_data_index.as_str())
                .unwrap_or_default();
            data.install_params = Some(InstallParams {
                run: result.manifest.run.clone(),
                arguments: result.manifest.arguments.clone(),
                server_install_data: result.install_data_for(index),
            });
        }
    }

    /// Skip the update cycle and only report `params`.
    ///
    /// Only valid on a fresh component.
    pub fn ping_only(
        &mut self,
        crx_component: CrxComponent,
        params: PingParams,
    ) -> Result<(), UpdateError> {
        if self.state() != ComponentState::New {
            return Err(UpdateError::InvalidState(format!(
                "ping only for component {} in state {}",
                self.data.id,
                self.state()
            )));
        }
        self.set_crx_component(crx_component);
        self.state = Box::new(StatePingOnly);
        self.data.state = ComponentState::PingOnly;
        self.data.append_event(make_event_ping(&params));
        Ok(())
    }

    /// Snapshot of the component for progress reporting.
    pub fn crx_update_item(&self) -> CrxUpdateItem {
        self.data.crx_update_item()
    }

    /// Append `event`, tagged with the cycle's versions.
    pub fn append_event(&mut self, event: EventDict) {
        self.data.append_event(event);
    }

    pub fn events(&self) -> &[EventDict] {
        &self.data.events
    }

    /// Time since the update started, clamped to the configured maximum
    /// update delay.
    pub fn update_duration(&self) -> Duration {
        self.data.update_duration_at(Instant::now())
    }
}

#[cfg(test)]
impl Component {
    pub(crate) fn apply_message(&mut self, message: OperationMessage) {
        self.data.apply_message(message);
    }

    pub(crate) fn duration_since_begin(&mut self, begin: Instant, now: Instant) -> Duration {
        self.data.update_begin = Some(begin);
        self.data.update_duration_at(now)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.data.id)
            .field("state", &self.state())
            .field("previous_state", &self.data.previous_state)
            .field("is_handled", &self.data.is_handled)
            .finish_non_exhaustive()
    }
}
