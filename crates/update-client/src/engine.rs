//! Session driver.
//!
//! [`UpdateEngine`] runs one update session: it builds a [`Component`] per
//! requested id, performs a single batched update check for all of them,
//! and then drives every component to the end of its cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use semver::Version;
use tracing::{debug, info, warn};

use crate::component::Component;
use crate::context::UpdateContext;
use crate::crx::{ComponentState, CrxComponent, CrxUpdateItem};
use crate::error::{CategorizedError, ProtocolError};
use crate::protocol::UpdateCheckResult;
use crate::telemetry::{EventDict, PingParams};

/// One application in an update check request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub app_id: String,
    pub version: Option<Version>,
    pub fingerprint: String,
}

/// Talks to the update server.
#[async_trait]
pub trait UpdateChecker: Send + Sync {
    /// Check all `requests` in one round trip. A failed check fails every
    /// application in it.
    async fn check_for_updates(
        &self,
        session_id: &str,
        requests: &[CheckRequest],
    ) -> Result<Vec<UpdateCheckResult>, CategorizedError>;
}

/// Answers every check with a fixed set of results.
#[derive(Debug, Clone, Default)]
pub struct StaticUpdateChecker {
    results: Vec<UpdateCheckResult>,
}

impl StaticUpdateChecker {
    pub fn new(results: Vec<UpdateCheckResult>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl UpdateChecker for StaticUpdateChecker {
    async fn check_for_updates(
        &self,
        _session_id: &str,
        requests: &[CheckRequest],
    ) -> Result<Vec<UpdateCheckResult>, CategorizedError> {
        Ok(self
            .results
            .iter()
            .filter(|r| requests.iter().any(|req| req.app_id == r.app_id))
            .cloned()
            .collect())
    }
}

/// Final state of one component after a session.
#[derive(Debug, Clone)]
pub struct ComponentReport {
    pub item: CrxUpdateItem,
    /// Telemetry events, in the order they happened
    pub events: Vec<EventDict>,
    pub update_duration: Duration,
}

/// Outcome of a session.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub session_id: String,
    pub components: Vec<ComponentReport>,
}

impl SessionReport {
    fn from_components(session_id: &str, components: &[Component]) -> Self {
        Self {
            session_id: session_id.to_string(),
            components: components
                .iter()
                .map(|component| ComponentReport {
                    item: component.crx_update_item(),
                    events: component.events().to_vec(),
                    update_duration: component.update_duration(),
                })
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ComponentReport> {
        self.components.iter().find(|c| c.item.id == id)
    }
}

/// Drives update and ping sessions.
pub struct UpdateEngine {
    context: Arc<UpdateContext>,
    checker: Arc<dyn UpdateChecker>,
}

impl UpdateEngine {
    pub fn new(context: Arc<UpdateContext>, checker: Arc<dyn UpdateChecker>) -> Self {
        Self { context, checker }
    }

    pub fn context(&self) -> &Arc<UpdateContext> {
        &self.context
    }

    /// Run one update cycle for each `(id, descriptor)` pair. A missing
    /// descriptor fails that component only.
    pub async fn update(
        &self,
        crx_components: Vec<(String, Option<CrxComponent>)>,
    ) -> SessionReport {
        let session_id = self.context.session_id.as_str();
        info!(session_id, components = crx_components.len(), "Starting update session");

        let mut components = Vec::with_capacity(crx_components.len());
        for (id, crx_component) in crx_components {
            let mut component = Component::new(self.context.clone(), id);
            if let Some(crx_component) = crx_component {
                component.set_crx_component(crx_component);
            }
            if let Err(e) = component.handle().await {
                warn!(component = %component.id(), error = %e, "Failed to start component");
            }
            components.push(component);
        }

        self.check_for_updates(&mut components).await;

        join_all(components.iter_mut().map(drive)).await;

        info!(session_id, "Update session complete");
        SessionReport::from_components(session_id, &components)
    }

    async fn check_for_updates(&self, components: &mut [Component]) {
        let requests: Vec<CheckRequest> = components
            .iter()
            .filter(|c| c.state() == ComponentState::Checking)
            .filter_map(|c| c.crx_component())
            .map(|crx| CheckRequest {
                app_id: crx.app_id.clone(),
                version: crx.version.clone(),
                fingerprint: crx.fingerprint.clone(),
            })
            .collect();
        if requests.is_empty() {
            return;
        }

        // Checking picks up the cancellation itself.
        let outcome = if self.context.is_cancelled() {
            Ok(Vec::new())
        } else {
            debug!(requests = requests.len(), "Checking for updates");
            self.checker
                .check_for_updates(&self.context.session_id, &requests)
                .await
        };
        let cancelled = self.context.is_cancelled();

        for component in components
            .iter_mut()
            .filter(|c| c.state() == ComponentState::Checking)
        {
            let app_id = component
                .crx_component()
                .map(|crx| crx.app_id.clone())
                .unwrap_or_default();
            let (result, error) = match &outcome {
                Ok(_) if cancelled => (None, CategorizedError::none()),
                Ok(results) => match results.iter().find(|r| r.app_id == app_id) {
                    Some(result) => (Some(result), CategorizedError::none()),
                    None => (
                        None,
                        CategorizedError::update_check(ProtocolError::UpdateResponseNotFound),
                    ),
                },
                Err(error) => (None, *error),
            };
            let applied = component.set_update_check_result(result, error);
            if let Err(e) = applied {
                warn!(component = %component.id(), error = %e, "Failed to apply update check result");
            }
        }
    }

    /// Report each `(descriptor, params)` pair without updating.
    pub async fn ping_only(&self, pings: Vec<(CrxComponent, PingParams)>) -> SessionReport {
        let mut components = Vec::with_capacity(pings.len());
        for (crx_component, params) in pings {
            let mut component = Component::new(self.context.clone(), crx_component.app_id.clone());
            match component.ping_only(crx_component, params) {
                Ok(()) => drive(&mut component).await,
                Err(e) => warn!(component = %component.id(), error = %e, "Ping failed"),
            }
            components.push(component);
        }
        SessionReport::from_components(&self.context.session_id, &components)
    }
}

async fn drive(component: &mut Component) {
    while !component.is_handled() {
        if let Err(e) = component.handle().await {
            warn!(component = %component.id(), error = %e, "Component stopped");
            break;
        }
    }
}
