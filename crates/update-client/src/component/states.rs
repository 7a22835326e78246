//! Concrete states.
//!
//! Terminal states end the cycle by handing back [`Transition::end`]; every
//! other state hands back the state that follows it.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ComponentData, State, Transition};
use crate::cache::CrxCache;
use crate::crx::{ComponentState, CrxComponent};
use crate::error::{CategorizedError, ServiceError, UnpackerError};
use crate::installer::InstallerResult;
use crate::observer::ComponentEvent;
use crate::ops::action::run_action;
use crate::ops::download::download_operation;
use crate::ops::install::{install_operation, InstallRequest};
use crate::ops::puff::puff_operation;
use crate::ops::{CancelHandle, Operation, Payload};
use crate::protocol::{status_to_error, STATUS_NO_UPDATE, STATUS_OK};
use crate::telemetry::make_event_action_run;

/// Route a component whose descriptor went missing to the error state.
fn missing_crx(component: &mut ComponentData) -> Transition {
    component.set_error(CategorizedError::service(ServiceError::CrxNotFound));
    Transition::to(StateUpdateError)
}

/// After a successful install, run the action if the server asked for one.
fn installed(component: &ComponentData) -> Transition {
    if component.action_run.is_empty() {
        Transition::to(StateUpdated)
    } else {
        Transition::to(StateRun)
    }
}

fn install_request(crx: &CrxComponent, component: &ComponentData) -> Option<InstallRequest> {
    Some(InstallRequest {
        app_id: crx.app_id.clone(),
        next_fp: component.next_fp.clone(),
        payload: component.payload.as_ref()?.path().to_path_buf(),
        pk_hash: crx.pk_hash.clone(),
        format: crx.crx_format_requirement,
        install_params: component.install_params.clone(),
        installer: crx.installer.clone(),
    })
}

pub(crate) struct StateNew;

#[async_trait]
impl State for StateNew {
    fn state(&self) -> ComponentState {
        ComponentState::New
    }

    async fn handle(&mut self, component: &mut ComponentData) -> Transition {
        if component.crx_component.is_none() {
            warn!(component = %component.id, "Component is not registered");
            return missing_crx(component);
        }
        // Observers hear about the check only once Checking is installed.
        Transition::to(StateChecking).then_notify(ComponentEvent::CheckingForUpdates)
    }
}

/// Waits for the update check result, handed in before this state runs.
pub(crate) struct StateChecking;

#[async_trait]
impl State for StateChecking {
    fn state(&self) -> ComponentState {
        ComponentState::Checking
    }

    async fn handle(&mut self, component: &mut ComponentData) -> Transition {
        if component.error.is_error() {
            warn!(component = %component.id, error = %component.error, "Update check failed");
            return Transition::to(StateUpdateError);
        }

        if component.context.is_cancelled() {
            component.set_error(CategorizedError::cancelled());
            return Transition::to(StateUpdateError);
        }

        match component.status.as_str() {
            STATUS_OK => Transition::to(StateCanUpdate),
            STATUS_NO_UPDATE if component.action_run.is_empty() => Transition::to(StateUpToDate),
            STATUS_NO_UPDATE => Transition::to(StateRun),
            status => {
                warn!(component = %component.id, status, "Update check returned an error status");
                component.set_error(CategorizedError::update_check(status_to_error(status)));
                Transition::to(StateUpdateError)
            }
        }
    }
}

pub(crate) struct StateCanUpdate;

#[async_trait]
impl State for StateCanUpdate {
    fn state(&self) -> ComponentState {
        ComponentState::CanUpdate
    }

    async fn handle(&mut self, component: &mut ComponentData) -> Transition {
        let Some(crx) = component.crx_component.clone() else {
            return missing_crx(component);
        };

        component.is_update_available = true;
        component.notify_observers(ComponentEvent::UpdateFound);

        let context = component.context.clone();
        let refusal = if !crx.updates_enabled {
            Some(ServiceError::UpdateDisabled)
        } else if context.metered_connection && !crx.allow_updates_on_metered_connection {
            Some(ServiceError::MeteredConnection)
        } else if context.is_cancelled() {
            Some(ServiceError::Cancelled)
        } else if context.is_update_check_only {
            Some(ServiceError::CheckForUpdateOnly)
        } else {
            None
        };
        if let Some(error) = refusal {
            info!(component = %component.id, ?error, "Update refused");
            component.set_error(CategorizedError::service(error));
            return Transition::to(StateUpdateError);
        }

        component.update_begin = Some(Instant::now());

        // Without a cache there is neither a cached payload nor a diff base.
        let Some(cache) = context.crx_cache.clone() else {
            if component.can_try_diff_update() {
                component.set_diff_error(CategorizedError::unpack(
                    UnpackerError::PuffinMissingPreviousCrx,
                    0,
                ));
            }
            return Transition::to(StateDownloading::new(false));
        };

        if let Ok(path) = cache.get(&crx.app_id, &component.next_fp).await {
            debug!(component = %component.id, "Installing cached payload {:?}", path);
            component.payload = Some(Payload::borrowed(path));
            return Transition::to(StateUpdating);
        }

        if !component.can_try_diff_update() {
            return Transition::to(StateDownloading::new(false));
        }

        if cache.contains(&crx.app_id, &component.previous_fp).await {
            Transition::to(StateDownloading::new(true))
        } else {
            debug!(component = %component.id, "No cached base payload for differential update");
            component.set_diff_error(CategorizedError::unpack(
                UnpackerError::PuffinMissingPreviousCrx,
                0,
            ));
            Transition::to(StateDownloading::new(false))
        }
    }
}

/// Downloads the full payload, or the differential payload when `diff`.
pub(crate) struct StateDownloading {
    diff: bool,
    cancel: Option<CancelHandle>,
}

impl StateDownloading {
    pub(crate) fn new(diff: bool) -> Self {
        Self { diff, cancel: None }
    }
}

impl Drop for StateDownloading {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

#[async_trait]
impl State for StateDownloading {
    fn state(&self) -> ComponentState {
        if self.diff {
            ComponentState::DownloadingDiff
        } else {
            ComponentState::Downloading
        }
    }

    async fn handle(&mut self, component: &mut ComponentData) -> Transition {
        component.downloaded_bytes = -1;
        component.total_bytes = -1;
        component.notify_observers(ComponentEvent::UpdateDownloading);

        let (urls, size, hash) = if self.diff {
            (
                component.crx_diffurls.clone(),
                component.sizediff,
                component.hashdiff_sha256.clone(),
            )
        } else {
            (
                component.crx_urls.clone(),
                component.size,
                component.hash_sha256.clone(),
            )
        };
        info!(component = %component.id, diff = self.diff, urls = urls.len(), "Downloading");

        let downloader = component.context.downloader.clone();
        let work_dir = component.context.work_dir();
        let operation = Operation::spawn(move |sink| {
            download_operation(downloader, urls, size, hash, work_dir, sink)
        });
        self.cancel = Some(operation.cancel_handle());

        let result = operation
            .drive(|message| component.apply_message(message))
            .await
            .unwrap_or_else(|_| Err(CategorizedError::cancelled()));
        self.cancel = None;

        match result {
            Ok(payload) => {
                component.payload = Some(payload);
                if self.diff {
                    Transition::to(StateUpdatingDiff)
                } else {
                    Transition::to(StateUpdating)
                }
            }
            Err(error) if self.diff => {
                warn!(component = %component.id, %error, "Differential download failed");
                component.set_diff_error(error);
                Transition::to(StateDownloading::new(false))
            }
            Err(error) => {
                warn!(component = %component.id, %error, "Download failed");
                component.set_error(error);
                Transition::to(StateUpdateError)
            }
        }
    }
}

/// Patches the cached previous payload and installs the result.
pub(crate) struct StateUpdatingDiff;

#[async_trait]
impl State for StateUpdatingDiff {
    fn state(&self) -> ComponentState {
        ComponentState::UpdatingDiff
    }

    async fn handle(&mut self, component: &mut ComponentData) -> Transition {
        let Some(crx) = component.crx_component.clone() else {
            return missing_crx(component);
        };

        component.notify_observers(ComponentEvent::UpdateReady);
        component.install_progress = -1;

        let context = component.context.clone();
        // The differential payload is consumed by the patch.
        let result = match component.payload.take() {
            Some(diff) => {
                let diff_path = diff.path().to_path_buf();
                let cache = context.crx_cache.clone();
                let patcher = context.patcher.clone();
                let app_id = crx.app_id.clone();
                let previous_fp = component.previous_fp.clone();
                let work_dir = context.work_dir();
                let patched = Operation::spawn(move |sink| {
                    puff_operation(cache, patcher, app_id, previous_fp, diff_path, work_dir, sink)
                })
                .drive(|message| component.apply_message(message))
                .await
                .unwrap_or_else(|_| Err(CategorizedError::cancelled()));
                drop(diff);
                patched
            }
            None => Err(CategorizedError::unpack(UnpackerError::InvalidParams, 0)),
        };

        let result = match result {
            Ok(patched) => {
                component.payload = Some(patched);
                install(component, &crx, context.crx_cache.clone()).await
            }
            Err(error) => InstallerResult::from(error),
        };
        component.payload = None;

        component.set_diff_error(result.error);
        component.installer_text = result.installer_text;
        component.installer_cmd_line = result.installer_cmd_line;

        if component.diff_error.is_error() {
            warn!(component = %component.id, error = %component.diff_error, "Differential update failed, falling back");
            return Transition::to(StateDownloading::new(false));
        }
        installed(component)
    }
}

/// Installs the downloaded or cached full payload.
pub(crate) struct StateUpdating;

#[async_trait]
impl State for StateUpdating {
    fn state(&self) -> ComponentState {
        ComponentState::Updating
    }

    async fn handle(&mut self, component: &mut ComponentData) -> Transition {
        let Some(crx) = component.crx_component.clone() else {
            return missing_crx(component);
        };

        component.notify_observers(ComponentEvent::UpdateReady);
        component.install_progress = -1;

        let context = component.context.clone();
        let cache = if crx.allow_cached_copies && context.config.enabled_deltas {
            context.crx_cache.clone()
        } else {
            None
        };
        let result = install(component, &crx, cache).await;
        component.payload = None;

        component.set_error(result.error);
        component.installer_text = result.installer_text;
        component.installer_cmd_line = result.installer_cmd_line;

        if !crx.allow_cached_copies {
            if let Some(cache) = &context.crx_cache {
                cache.remove_all(&crx.app_id).await;
            }
        }

        if component.error.is_error() {
            warn!(component = %component.id, error = %component.error, "Update failed");
            return Transition::to(StateUpdateError);
        }
        installed(component)
    }
}

async fn install(
    component: &mut ComponentData,
    crx: &CrxComponent,
    cache: Option<Arc<dyn CrxCache>>,
) -> InstallerResult {
    let Some(request) = install_request(crx, component) else {
        return InstallerResult::from(CategorizedError::unpack(UnpackerError::InvalidParams, 0));
    };
    let unpacker = component.context.unpacker.clone();
    let work_dir = component.context.work_dir();
    info!(component = %component.id, "Installing {:?}", request.payload);

    Operation::spawn(move |sink| install_operation(unpacker, cache, request, work_dir, sink))
        .drive(|message| component.apply_message(message))
        .await
        .unwrap_or_else(|_| InstallerResult::from(CategorizedError::cancelled()))
}

/// Runs the action named by the server, after a check or an install.
pub(crate) struct StateRun;

#[async_trait]
impl State for StateRun {
    fn state(&self) -> ComponentState {
        ComponentState::Run
    }

    async fn handle(&mut self, component: &mut ComponentData) -> Transition {
        let Some(crx) = component.crx_component.clone() else {
            return missing_crx(component);
        };

        info!(component = %component.id, action = %component.action_run, "Running action");
        let result = run_action(
            crx.action_handler.clone(),
            crx.installer.clone(),
            component.action_run.clone(),
            component.context.session_id.clone(),
        )
        .await;
        component.append_event(make_event_action_run(
            result.succeeded,
            result.error_code,
            result.extra_code1,
        ));

        match component.previous_state {
            ComponentState::Checking => Transition::to(StateUpToDate),
            ComponentState::Updating | ComponentState::UpdatingDiff => {
                Transition::to(StateUpdated)
            }
            other => unreachable!("action run entered from {other}"),
        }
    }
}

pub(crate) struct StateUpToDate;

#[async_trait]
impl State for StateUpToDate {
    fn state(&self) -> ComponentState {
        ComponentState::UpToDate
    }

    async fn handle(&mut self, component: &mut ComponentData) -> Transition {
        info!(component = %component.id, "Component is up to date");
        component.notify_observers(ComponentEvent::AlreadyUpToDate);
        Transition::end()
    }
}

/// Commits the new version and reports completion.
pub(crate) struct StateUpdated;

#[async_trait]
impl State for StateUpdated {
    fn state(&self) -> ComponentState {
        ComponentState::Updated
    }

    async fn handle(&mut self, component: &mut ComponentData) -> Transition {
        let id = component.id.clone();
        let next_version = component.next_version.clone();
        let next_fp = component.next_fp.clone();
        if let Some(crx) = component.crx_component.as_mut() {
            crx.version = next_version.clone();
            crx.fingerprint = next_fp.clone();
        }

        let persisted = component.context.persisted_data.clone();
        if let Some(version) = &next_version {
            if let Err(e) = persisted.set_product_version(&id, version).await {
                warn!(component = %id, error = %e, "Failed to persist product version");
            }
        }
        if let Some(version) = &component.previous_version {
            if let Err(e) = persisted.set_max_previous_product_version(&id, version).await {
                warn!(component = %id, error = %e, "Failed to persist previous version");
            }
        }
        if let Err(e) = persisted.set_fingerprint(&id, &next_fp).await {
            warn!(component = %id, error = %e, "Failed to persist fingerprint");
        }

        info!(component = %id, version = ?next_version, "Component updated");
        let event = component.make_event_update_complete();
        component.append_event(event);
        component.notify_observers(ComponentEvent::Updated);
        Transition::end()
    }
}

pub(crate) struct StateUpdateError;

#[async_trait]
impl State for StateUpdateError {
    fn state(&self) -> ComponentState {
        ComponentState::UpdateError
    }

    async fn handle(&mut self, component: &mut ComponentData) -> Transition {
        debug_assert!(component.error.is_error());

        if let Some(crx) = &component.crx_component {
            crx.installer.on_update_error(component.error.code);
        }

        // A cycle that never found an update has nothing to report.
        if component.is_update_available {
            let event = component.make_event_update_complete();
            component.append_event(event);
        }
        Transition::end().then_notify(ComponentEvent::UpdateError)
    }
}

/// Flushes the ping event recorded on entry.
pub(crate) struct StatePingOnly;

#[async_trait]
impl State for StatePingOnly {
    fn state(&self) -> ComponentState {
        ComponentState::PingOnly
    }

    async fn handle(&mut self, component: &mut ComponentData) -> Transition {
        debug_assert!(component.crx_component.is_some());
        Transition::end()
    }
}
