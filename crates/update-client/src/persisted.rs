//! Persisted per-component version data.
//!
//! The state machine writes here only when a component reaches the updated
//! state; the embedder reads it back to fill in the next cycle's
//! descriptors.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::UpdateError;

/// Stored record for one component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    #[serde(default)]
    pub product_version: Option<Version>,
    #[serde(default)]
    pub max_previous_product_version: Option<Version>,
    #[serde(default)]
    pub fingerprint: String,
}

/// Version store keyed by component id.
#[async_trait]
pub trait PersistedData: Send + Sync {
    async fn record(&self, id: &str) -> Option<ProductRecord>;

    async fn set_product_version(&self, id: &str, version: &Version) -> Result<(), UpdateError>;

    /// Record `version` as the highest version ever replaced. Lower values
    /// leave the stored version unchanged.
    async fn set_max_previous_product_version(
        &self,
        id: &str,
        version: &Version,
    ) -> Result<(), UpdateError>;

    async fn set_fingerprint(&self, id: &str, fingerprint: &str) -> Result<(), UpdateError>;
}

fn raise_max_previous(record: &mut ProductRecord, version: &Version) {
    match &record.max_previous_product_version {
        Some(current) if current >= version => {}
        _ => record.max_previous_product_version = Some(version.clone()),
    }
}

/// In-memory store for tests and short-lived sessions.
#[derive(Default)]
pub struct InMemoryPersistedData {
    records: RwLock<HashMap<String, ProductRecord>>,
}

impl InMemoryPersistedData {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistedData for InMemoryPersistedData {
    async fn record(&self, id: &str) -> Option<ProductRecord> {
        self.records.read().await.get(id).cloned()
    }

    async fn set_product_version(&self, id: &str, version: &Version) -> Result<(), UpdateError> {
        let mut records = self.records.write().await;
        records.entry(id.to_string()).or_default().product_version = Some(version.clone());
        Ok(())
    }

    async fn set_max_previous_product_version(
        &self,
        id: &str,
        version: &Version,
    ) -> Result<(), UpdateError> {
        let mut records = self.records.write().await;
        raise_max_previous(records.entry(id.to_string()).or_default(), version);
        Ok(())
    }

    async fn set_fingerprint(&self, id: &str, fingerprint: &str) -> Result<(), UpdateError> {
        let mut records = self.records.write().await;
        records.entry(id.to_string()).or_default().fingerprint = fingerprint.to_string();
        Ok(())
    }
}

/// Store backed by a JSON file, rewritten after every change.
pub struct JsonFilePersistedData {
    path: PathBuf,
    records: RwLock<HashMap<String, ProductRecord>>,
}

impl JsonFilePersistedData {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: PathBuf) -> Result<Self, UpdateError> {
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    async fn update<F>(&self, id: &str, f: F) -> Result<(), UpdateError>
    where
        F: FnOnce(&mut ProductRecord) + Send,
    {
        let mut records = self.records.write().await;
        f(records.entry(id.to_string()).or_default());

        let content = serde_json::to_string_pretty(&*records)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| UpdateError::PersistenceError(format!("{}: {}", self.path.display(), e)))?;
        debug!(id, path = %self.path.display(), "Persisted component data");
        Ok(())
    }
}

#[async_trait]
impl PersistedData for JsonFilePersistedData {
    async fn record(&self, id: &str) -> Option<ProductRecord> {
        self.records.read().await.get(id).cloned()
    }

    async fn set_product_version(&self, id: &str, version: &Version) -> Result<(), UpdateError> {
        let version = version.clone();
        self.update(id, move |r| r.product_version = Some(version)).await
    }

    async fn set_max_previous_product_version(
        &self,
        id: &str,
        version: &Version,
    ) -> Result<(), UpdateError> {
        let version = version.clone();
        self.update(id, move |r| raise_max_previous(r, &version)).await
    }

    async fn set_fingerprint(&self, id: &str, fingerprint: &str) -> Result<(), UpdateError> {
        let fingerprint = fingerprint.to_string();
        self.update(id, move |r| r.fingerprint = fingerprint).await
    }
}
