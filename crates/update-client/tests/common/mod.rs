//! In-process collaborators for driving whole update cycles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Url;
use semver::Version;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use update_client::{
    ActionHandler, ActionResult, CategorizedError, ComponentEvent, CrxCache, CrxComponent,
    CrxDownloader, CrxInstaller, DownloadProgressCallback, FileCrxCache, InMemoryPersistedData,
    InstallParams, InstallProgressCallback, InstallerResult, ObserverCallback, Patcher,
    PersistedData, UpdateCheckResult, UpdateConfig, UpdateContext, UpdateError,
};
use update_client::protocol::{Manifest, Package};

pub const APP_ID: &str = "jebgalgnebhfojomionfpkfelancnnkf";
pub const FULL_PAYLOAD: &[u8] = b"full payload v2";
pub const DIFF_PAYLOAD: &[u8] = b"+v2 patch";
pub const BASE_PAYLOAD: &[u8] = b"base payload v1";

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Serves canned bodies by URL; anything else is a 404.
#[derive(Default)]
pub struct FakeDownloader {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    pub requests: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn serve(&self, url: &str, body: &[u8]) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_vec());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrxDownloader for FakeDownloader {
    async fn download(
        &self,
        url: &Url,
        dest: &Path,
        progress: DownloadProgressCallback,
    ) -> Result<u64, CategorizedError> {
        self.requests.lock().unwrap().push(url.to_string());
        let body = self.bodies.lock().unwrap().get(url.as_str()).cloned();
        let Some(body) = body else {
            return Err(CategorizedError::download(404));
        };
        progress(0, body.len() as i64);
        std::fs::write(dest, &body).unwrap();
        progress(body.len() as i64, body.len() as i64);
        Ok(body.len() as u64)
    }
}

/// Records installs and reports progress 40, then two bogus values, then 100.
#[derive(Default)]
pub struct RecordingInstaller {
    pub installs: Mutex<Vec<(Vec<u8>, Option<InstallParams>)>>,
    pub update_errors: Mutex<Vec<i32>>,
    pub fail_with: Option<InstallerResult>,
    pub installed_root: Option<PathBuf>,
}

impl RecordingInstaller {
    pub fn failing(result: InstallerResult) -> Self {
        Self {
            fail_with: Some(result),
            ..Default::default()
        }
    }

    pub fn install_count(&self) -> usize {
        self.installs.lock().unwrap().len()
    }
}

#[async_trait]
impl CrxInstaller for RecordingInstaller {
    async fn install(
        &self,
        unpack_path: &Path,
        _public_key: &str,
        install_params: Option<InstallParams>,
        progress: InstallProgressCallback,
    ) -> InstallerResult {
        let entry = std::fs::read_dir(unpack_path).unwrap().next().unwrap().unwrap();
        let content = std::fs::read(entry.path()).unwrap();
        self.installs.lock().unwrap().push((content, install_params));

        progress(40);
        progress(-5);
        progress(150);
        match &self.fail_with {
            Some(result) => result.clone(),
            None => {
                progress(100);
                InstallerResult::success()
            }
        }
    }

    fn get_installed_file(&self, file: &str) -> Option<PathBuf> {
        self.installed_root.as_ref().map(|root| root.join(file))
    }

    fn on_update_error(&self, error: i32) {
        self.update_errors.lock().unwrap().push(error);
    }
}

/// Appends the patch to the old payload.
#[derive(Default)]
pub struct FakePatcher {
    pub fail_with: Option<i32>,
}

#[async_trait]
impl Patcher for FakePatcher {
    async fn patch(&self, old: &Path, patch: &Path, out: &Path) -> Result<(), i32> {
        if let Some(code) = self.fail_with {
            return Err(code);
        }
        let mut data = std::fs::read(old).map_err(|_| 1)?;
        data.extend(std::fs::read(patch).map_err(|_| 2)?);
        std::fs::write(out, data).map_err(|_| 3)
    }
}

/// Records the actions it is asked to run.
pub struct RecordingActionHandler {
    pub runs: Mutex<Vec<(PathBuf, String)>>,
    pub result: ActionResult,
}

impl RecordingActionHandler {
    pub fn new(result: ActionResult) -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            result,
        }
    }
}

#[async_trait]
impl ActionHandler for RecordingActionHandler {
    async fn handle(&self, action: &Path, session_id: &str) -> ActionResult {
        self.runs
            .lock()
            .unwrap()
            .push((action.to_path_buf(), session_id.to_string()));
        self.result
    }
}

/// Counts writes on top of the in-memory store.
#[derive(Default)]
pub struct CountingPersistedData {
    inner: InMemoryPersistedData,
    pub product_version_writes: AtomicUsize,
    pub fingerprint_writes: AtomicUsize,
}

impl CountingPersistedData {
    pub fn writes(&self) -> (usize, usize) {
        (
            self.product_version_writes.load(Ordering::SeqCst),
            self.fingerprint_writes.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl PersistedData for CountingPersistedData {
    async fn record(&self, id: &str) -> Option<update_client::ProductRecord> {
        self.inner.record(id).await
    }

    async fn set_product_version(&self, id: &str, version: &Version) -> Result<(), UpdateError> {
        self.product_version_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_product_version(id, version).await
    }

    async fn set_max_previous_product_version(
        &self,
        id: &str,
        version: &Version,
    ) -> Result<(), UpdateError> {
        self.inner.set_max_previous_product_version(id, version).await
    }

    async fn set_fingerprint(&self, id: &str, fingerprint: &str) -> Result<(), UpdateError> {
        self.fingerprint_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_fingerprint(id, fingerprint).await
    }
}

/// Collects observer notifications.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<(ComponentEvent, String)>>>,
}

impl RecordingObserver {
    pub fn callback(&self) -> ObserverCallback {
        let events = self.events.clone();
        Arc::new(move |event, id: &str| events.lock().unwrap().push((event, id.to_string())))
    }

    pub fn events(&self) -> Vec<ComponentEvent> {
        self.events.lock().unwrap().iter().map(|(e, _)| *e).collect()
    }

    pub fn count(&self, event: ComponentEvent) -> usize {
        self.events().into_iter().filter(|e| *e == event).count()
    }
}

/// A scratch directory with a payload cache and recording collaborators.
pub struct Fixture {
    pub temp: TempDir,
    pub cache: Arc<FileCrxCache>,
    pub downloader: Arc<FakeDownloader>,
    pub persisted: Arc<CountingPersistedData>,
    pub observer: RecordingObserver,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let cache = Arc::new(FileCrxCache::new(temp.path().join("cache")));
        Self {
            temp,
            cache,
            downloader: Arc::new(FakeDownloader::default()),
            persisted: Arc::new(CountingPersistedData::default()),
            observer: RecordingObserver::default(),
        }
    }

    pub fn config(&self) -> UpdateConfig {
        UpdateConfig {
            work_dir: Some(self.temp.path().join("work")),
            ..Default::default()
        }
    }

    /// Context wired to the fixture's collaborators and a patcher.
    pub fn context(&self) -> UpdateContext {
        UpdateContext::new(self.config(), "session-1")
            .with_crx_cache(self.cache.clone())
            .with_downloader(self.downloader.clone())
            .with_patcher(Arc::new(FakePatcher::default()))
            .with_persisted_data(self.persisted.clone())
            .with_observer(self.observer.callback())
    }

    /// Seed the cache with the base payload for fingerprint `fp1`.
    pub async fn cache_base_payload(&self) {
        let src = self.temp.path().join("seed.crx");
        std::fs::write(&src, BASE_PAYLOAD).unwrap();
        self.cache.put(&src, APP_ID, "fp1").await.unwrap();
    }

    /// Every file or directory left under the work dir.
    pub fn work_dir_leftovers(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, found);
                }
                found.push(path);
            }
        }
        let mut found = Vec::new();
        walk(&self.temp.path().join("work"), &mut found);
        found
    }

    /// Serve the full payload, and a diff that turns the base into it.
    pub fn serve_payloads(&self) {
        self.downloader
            .serve("https://dl.example/full/app_2.crx", FULL_PAYLOAD);
        self.downloader
            .serve("https://dl.example/diff/app_1_2.puff", DIFF_PAYLOAD);
    }
}

pub fn crx_component(installer: Arc<dyn CrxInstaller>) -> CrxComponent {
    CrxComponent::new(APP_ID, installer)
        .with_version(Version::new(1, 0, 0))
        .with_fingerprint("fp1")
}

/// An `ok` response advertising version 2.0.0 with a full package only.
pub fn full_update_result() -> UpdateCheckResult {
    UpdateCheckResult {
        app_id: APP_ID.into(),
        status: "ok".into(),
        crx_urls: vec!["https://dl.example/full/".into()],
        manifest: Manifest {
            version: "2.0.0".into(),
            packages: vec![Package {
                name: "app_2.crx".into(),
                fingerprint: "fp2".into(),
                hash_sha256: sha256_hex(FULL_PAYLOAD),
                size: FULL_PAYLOAD.len() as i64,
                ..Default::default()
            }],
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Same as [`full_update_result`] plus a differential package whose patched
/// output is `BASE_PAYLOAD + DIFF_PAYLOAD`.
pub fn diff_update_result() -> UpdateCheckResult {
    let mut result = full_update_result();
    result.crx_diffurls = vec!["https://dl.example/diff/".into()];
    let package = &mut result.manifest.packages[0];
    package.namediff = "app_1_2.puff".into();
    package.hashdiff_sha256 = sha256_hex(DIFF_PAYLOAD);
    package.sizediff = DIFF_PAYLOAD.len() as i64;
    result
}

pub fn patched_payload() -> Vec<u8> {
    [BASE_PAYLOAD, DIFF_PAYLOAD].concat()
}
