//! Lifecycle notifications delivered to the embedder.

use std::fmt;
use std::sync::Arc;

use crate::crx::CrxUpdateItem;

/// Lifecycle events observers receive for each component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentEvent {
    CheckingForUpdates,
    UpdateFound,
    UpdateReady,
    UpdateDownloading,
    UpdateUpdating,
    Updated,
    UpdateError,
    AlreadyUpToDate,
    Wait,
}

impl fmt::Display for ComponentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CheckingForUpdates => "COMPONENT_CHECKING_FOR_UPDATES",
            Self::UpdateFound => "COMPONENT_UPDATE_FOUND",
            Self::UpdateReady => "COMPONENT_UPDATE_READY",
            Self::UpdateDownloading => "COMPONENT_UPDATE_DOWNLOADING",
            Self::UpdateUpdating => "COMPONENT_UPDATE_UPDATING",
            Self::Updated => "COMPONENT_UPDATED",
            Self::UpdateError => "COMPONENT_UPDATE_ERROR",
            Self::AlreadyUpToDate => "COMPONENT_ALREADY_UP_TO_DATE",
            Self::Wait => "COMPONENT_WAIT",
        };
        f.write_str(name)
    }
}

/// Receives every lifecycle event with the id of the component it concerns.
pub type ObserverCallback = Arc<dyn Fn(ComponentEvent, &str) + Send + Sync>;

/// Receives a full snapshot for every event except [`ComponentEvent::Wait`].
pub type CrxStateChangeCallback = Arc<dyn Fn(CrxUpdateItem) + Send + Sync>;

/// Observer that drops every event.
pub fn noop_observer() -> ObserverCallback {
    Arc::new(|_, _| {})
}
