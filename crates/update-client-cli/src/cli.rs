//! CLI command definitions and argument parsing

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};
use update_client::{
    parse_results, parse_version, ComponentEvent, ComponentReport, ComponentState, CrxComponent,
    EventDict, FileCrxCache, JsonFilePersistedData, PersistedData, PingParams, SessionReport,
    StaticUpdateChecker, UpdateContext, UpdateEngine,
};

use crate::config::CliConfig;
use crate::installer::DirectoryInstaller;
use crate::ExitCode;

/// update-client - drive component update cycles
#[derive(Parser, Debug)]
#[command(name = "update-client")]
#[command(version, about = "Drive component update cycles against an update-check response")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug mode (per-state tracing)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one update cycle for a component
    Update(UpdateArgs),

    /// Send a ping-only event for a component
    Ping(PingArgs),
}

/// Arguments for `update`
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Component id
    #[arg(long)]
    pub id: String,

    /// Application id used in the update-check response (defaults to --id)
    #[arg(long)]
    pub app_id: Option<String>,

    /// Installed version (defaults to the persisted version)
    #[arg(long)]
    pub version: Option<String>,

    /// Installed payload fingerprint (defaults to the persisted fingerprint)
    #[arg(long)]
    pub fingerprint: Option<String>,

    /// Path to the update-check response, a JSON array of results
    #[arg(long)]
    pub response: PathBuf,

    /// The user is waiting on this update
    #[arg(long)]
    pub foreground: bool,

    /// Stop after the update check
    #[arg(long)]
    pub check_only: bool,
}

/// Arguments for `ping`
#[derive(Args, Debug)]
pub struct PingArgs {
    /// Component id
    #[arg(long)]
    pub id: String,

    /// Installed version
    #[arg(long)]
    pub version: Option<String>,

    /// Event type code
    #[arg(long)]
    pub event_type: i32,

    /// Event result code
    #[arg(long)]
    pub result: i32,

    /// Error code
    #[arg(long, default_value_t = 0)]
    pub error_code: i32,

    /// Extra code
    #[arg(long, default_value_t = 0)]
    pub extra_code1: i32,
}

impl Cli {
    /// Execute the CLI command with a pre-loaded configuration
    pub async fn execute_with_config(self, config: CliConfig) -> anyhow::Result<ExitCode> {
        let report = match self.command {
            Commands::Update(args) => args.execute(&config).await?,
            Commands::Ping(args) => args.execute(&config).await?,
        };

        let output = SessionOutput::from(&report);
        println!("{}", serde_json::to_string_pretty(&output)?);

        let failed = report
            .components
            .iter()
            .any(|c| c.item.state == ComponentState::UpdateError);
        Ok(if failed {
            ExitCode::UpdateFailed
        } else {
            ExitCode::Success
        })
    }
}

impl UpdateArgs {
    async fn execute(self, config: &CliConfig) -> anyhow::Result<SessionReport> {
        let data = std::fs::read(&self.response)
            .with_context(|| format!("reading {}", self.response.display()))?;
        let results = parse_results(&data).context("parsing update-check response")?;
        debug!(count = results.len(), "Parsed update-check response");

        let persisted = Arc::new(open_persisted_data(config)?);
        let record = persisted.record(&self.id).await.unwrap_or_default();

        let version = match self.version.as_deref() {
            Some(v) => Some(parse_cli_version(v)?),
            None => record.product_version,
        };
        let fingerprint = self.fingerprint.unwrap_or(record.fingerprint);
        let app_id = self.app_id.unwrap_or_else(|| self.id.clone());

        let installer = Arc::new(DirectoryInstaller::new(config.install_root(), &app_id));
        let mut crx = CrxComponent::new(app_id, installer).with_fingerprint(fingerprint);
        crx.version = version;

        let context = session_context(config, persisted)
            .with_crx_cache(Arc::new(FileCrxCache::new(config.update.cache_dir())))
            .with_foreground(self.foreground)
            .with_update_check_only(self.check_only);
        cancel_on_ctrl_c(&context);

        info!(session = %context.session_id, id = %self.id, "Starting update session");
        let engine = UpdateEngine::new(
            Arc::new(context),
            Arc::new(StaticUpdateChecker::new(results)),
        );
        Ok(engine.update(vec![(self.id, Some(crx))]).await)
    }
}

impl PingArgs {
    async fn execute(self, config: &CliConfig) -> anyhow::Result<SessionReport> {
        let persisted = Arc::new(open_persisted_data(config)?);
        let version = match self.version.as_deref() {
            Some(v) => Some(parse_cli_version(v)?),
            None => persisted
                .record(&self.id)
                .await
                .and_then(|record| record.product_version),
        };

        let installer = Arc::new(DirectoryInstaller::new(config.install_root(), &self.id));
        let mut crx = CrxComponent::new(self.id.clone(), installer);
        crx.version = version;

        let params = PingParams {
            event_type: self.event_type,
            result: self.result,
            error_code: self.error_code,
            extra_code1: self.extra_code1,
        };
        let context = session_context(config, persisted);
        info!(session = %context.session_id, id = %self.id, "Sending ping");
        let engine = UpdateEngine::new(
            Arc::new(context),
            Arc::new(StaticUpdateChecker::default()),
        );
        Ok(engine.ping_only(vec![(crx, params)]).await)
    }
}

fn open_persisted_data(config: &CliConfig) -> anyhow::Result<JsonFilePersistedData> {
    let path = config.persisted_data_path();
    JsonFilePersistedData::open(path.clone())
        .with_context(|| format!("opening persisted data at {}", path.display()))
}

fn session_context(config: &CliConfig, persisted: Arc<JsonFilePersistedData>) -> UpdateContext {
    UpdateContext::new(config.update.clone(), new_session_id())
        .with_persisted_data(persisted)
        .with_observer(Arc::new(|event: ComponentEvent, id: &str| {
            debug!(component = %id, ?event, "Component event");
        }))
}

fn cancel_on_ctrl_c(context: &UpdateContext) {
    let flag = context.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling session");
            flag.cancel();
        }
    });
}

fn parse_cli_version(s: &str) -> anyhow::Result<semver::Version> {
    parse_version(s).with_context(|| format!("invalid version '{s}'"))
}

fn new_session_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{{{nanos:032x}}}")
}

/// JSON view of a finished session.
#[derive(Debug, Serialize)]
pub struct SessionOutput {
    pub session_id: String,
    pub components: Vec<ComponentOutput>,
}

/// JSON view of one finished component.
#[derive(Debug, Serialize)]
pub struct ComponentOutput {
    pub id: String,
    pub state: ComponentState,
    pub previous_version: Option<String>,
    pub next_version: Option<String>,
    pub previous_fp: String,
    pub next_fp: String,
    pub error: ErrorOutput,
    pub diff_error: ErrorOutput,
    pub update_duration_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer_text: Option<String>,
    pub events: Vec<EventDict>,
}

/// Error triple as reported in events.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ErrorOutput {
    pub category: i32,
    pub code: i32,
    pub extra: i32,
}

impl From<&SessionReport> for SessionOutput {
    fn from(report: &SessionReport) -> Self {
        Self {
            session_id: report.session_id.clone(),
            components: report.components.iter().map(ComponentOutput::from).collect(),
        }
    }
}

impl From<&ComponentReport> for ComponentOutput {
    fn from(report: &ComponentReport) -> Self {
        let item = &report.item;
        Self {
            id: item.id.clone(),
            state: item.state,
            previous_version: item.previous_version.as_ref().map(ToString::to_string),
            next_version: item.next_version.as_ref().map(ToString::to_string),
            previous_fp: item.previous_fp.clone(),
            next_fp: item.next_fp.clone(),
            error: ErrorOutput {
                category: item.error_category.code(),
                code: item.error_code,
                extra: item.extra_code1,
            },
            diff_error: ErrorOutput {
                category: item.diff_error_category.code(),
                code: item.diff_error_code,
                extra: item.diff_extra_code1,
            },
            update_duration_secs: report.update_duration.as_secs(),
            installer_text: item.installer_text.clone(),
            events: report.events.clone(),
        }
    }
}
