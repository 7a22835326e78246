//! Property-based tests for update-client.
//!
//! These tests use proptest to verify correctness properties across
//! randomly generated inputs.
//!
//! # Properties Tested
//!
//! - Error triples stay consistent for any constructor input and any server status
//! - Install progress ignores values outside 0..=100
//! - Events carry exactly the versions known when they were appended
//! - Update duration is clamped to the configured maximum

#![cfg(test)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use proptest::prelude::*;
use semver::Version;

use crate::component::Component;
use crate::config::UpdateConfig;
use crate::context::UpdateContext;
use crate::crx::{CrxComponent, InstallParams};
use crate::error::{CategorizedError, ErrorCategory, ServiceError, UnpackerError};
use crate::installer::{CrxInstaller, InstallProgressCallback, InstallerResult};
use crate::ops::OperationMessage;
use crate::protocol::UpdateCheckResult;
use crate::telemetry::EventDict;

// =============================================================================
// Generators
// =============================================================================

struct NullInstaller;

#[async_trait]
impl CrxInstaller for NullInstaller {
    async fn install(
        &self,
        _unpack_path: &Path,
        _public_key: &str,
        _install_params: Option<InstallParams>,
        _progress: InstallProgressCallback,
    ) -> InstallerResult {
        InstallerResult::success()
    }

    fn get_installed_file(&self, _file: &str) -> Option<PathBuf> {
        None
    }
}

/// Generate a random version.
fn arb_version() -> impl Strategy<Value = Version> {
    (0u64..100, 0u64..100, 0u64..100)
        .prop_map(|(major, minor, patch)| Version::new(major, minor, patch))
}

/// Generate a status string, biased towards the ones servers send.
fn arb_status() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("noupdate".to_string()),
        Just("error-unknownApplication".to_string()),
        Just("restricted".to_string()),
        Just("error-invalidAppId".to_string()),
        Just("error-osnotsupported".to_string()),
        Just("error-hwnotsupported".to_string()),
        "[a-z-]{0,16}",
    ]
}

/// Generate any error category.
fn arb_category() -> impl Strategy<Value = ErrorCategory> {
    prop_oneof![
        Just(ErrorCategory::None),
        Just(ErrorCategory::Download),
        Just(ErrorCategory::Unpack),
        Just(ErrorCategory::Install),
        Just(ErrorCategory::Service),
        Just(ErrorCategory::UpdateCheck),
        Just(ErrorCategory::Unknown),
        Just(ErrorCategory::Installer),
    ]
}

/// Generate an error produced by one of the operations.
fn arb_operation_error() -> impl Strategy<Value = CategorizedError> {
    prop_oneof![
        (1i32..600).prop_map(CategorizedError::download),
        Just(CategorizedError::unpack(UnpackerError::DeltaOperationFailure, 3)),
        Just(CategorizedError::unpack(UnpackerError::PuffinMissingPreviousCrx, 0)),
        Just(CategorizedError::service(ServiceError::Cancelled)),
        Just(CategorizedError::service(ServiceError::UpdateDisabled)),
    ]
}

// =============================================================================
// Helper Functions
// =============================================================================

fn context() -> Arc<UpdateContext> {
    Arc::new(UpdateContext::new(UpdateConfig::default(), "proptest"))
}

fn crx(version: Option<Version>) -> CrxComponent {
    let crx = CrxComponent::new("app", Arc::new(NullInstaller));
    match version {
        Some(version) => crx.with_version(version),
        None => crx,
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn assert_consistent(category: ErrorCategory, code: i32) -> Result<(), TestCaseError> {
    prop_assert_eq!(category == ErrorCategory::None, code == 0);
    Ok(())
}

// =============================================================================
// Error triple consistency
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Every operation error has a category exactly when it has a code.
    #[test]
    fn prop_operation_errors_consistent(error in arb_operation_error()) {
        assert_consistent(error.category, error.code)?;
    }

    /// Whatever triple callers hand in, the constructed error is consistent
    /// and agrees with `is_error`.
    #[test]
    fn prop_constructed_errors_consistent(
        category in arb_category(),
        code in prop_oneof![Just(0i32), any::<i32>()],
        extra in any::<i32>(),
    ) {
        let error = CategorizedError::new(category, code, extra);
        assert_consistent(error.category, error.code)?;
        prop_assert_eq!(error.is_error(), code != 0);
        if code != 0 && category != ErrorCategory::None {
            prop_assert_eq!(error.category, category);
        }

        let result = InstallerResult::installer_error(code, extra);
        assert_consistent(result.error.category, result.error.code)?;
        prop_assert_eq!(result.is_success(), code == 0);
    }

    /// Whatever status the server returns, the finished component keeps
    /// both error triples consistent.
    #[test]
    fn prop_status_keeps_error_triples_consistent(status in arb_status()) {
        let item = runtime().block_on(async {
            let mut component = Component::new(context(), "app");
            component.set_crx_component(crx(Some(Version::new(1, 0, 0))));
            component.handle().await.unwrap();

            let result = UpdateCheckResult {
                app_id: "app".into(),
                status,
                ..Default::default()
            };
            component
                .set_update_check_result(Some(&result), CategorizedError::none())
                .unwrap();
            while !component.is_handled() {
                component.handle().await.unwrap();
            }
            component.crx_update_item()
        });

        assert_consistent(item.error_category, item.error_code)?;
        assert_consistent(item.diff_error_category, item.diff_error_code)?;
    }

    /// A failed update check is carried through unchanged.
    #[test]
    fn prop_check_error_reaches_error_state(error in arb_operation_error()) {
        let item = runtime().block_on(async {
            let mut component = Component::new(context(), "app");
            component.set_crx_component(crx(None));
            component.handle().await.unwrap();
            component.set_update_check_result(None, error).unwrap();
            while !component.is_handled() {
                component.handle().await.unwrap();
            }
            component.crx_update_item()
        });

        prop_assert_eq!(item.error_category, error.category);
        prop_assert_eq!(item.error_code, error.code);
        assert_consistent(item.diff_error_category, item.diff_error_code)?;
    }
}

// =============================================================================
// Install progress
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The stored progress is the last value inside 0..=100, or unknown if
    /// there was none.
    #[test]
    fn prop_install_progress_ignores_out_of_range(
        values in prop::collection::vec(-200i32..300, 0..20),
    ) {
        let mut component = Component::new(context(), "app");
        for value in &values {
            component.apply_message(OperationMessage::InstallProgress(*value));
        }
        let expected = values
            .iter()
            .rev()
            .find(|v| (0..=100).contains(*v))
            .copied()
            .unwrap_or(-1);
        prop_assert_eq!(component.crx_update_item().install_progress, expected);
    }
}

// =============================================================================
// Event versions
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Events carry `previousversion`/`nextversion` exactly when the
    /// versions are known.
    #[test]
    fn prop_events_describe_known_versions(
        previous in prop::option::of(arb_version()),
        next in prop::option::of(arb_version()),
    ) {
        let mut component = Component::new(context(), "app");
        component.set_crx_component(crx(previous.clone()));
        if let Some(next) = &next {
            let mut result = UpdateCheckResult::no_update("app");
            result.status = "ok".into();
            result.manifest.version = next.to_string();
            result.manifest.packages.push(Default::default());
            component.set_parse_result(&result);
        }
        component.append_event(EventDict::new());

        let event = &component.events()[0];
        prop_assert_eq!(
            event.get("previousversion").and_then(|v| v.as_str()).map(str::to_string),
            previous.map(|v| v.to_string())
        );
        prop_assert_eq!(
            event.get("nextversion").and_then(|v| v.as_str()).map(str::to_string),
            next.map(|v| v.to_string())
        );
    }
}

// =============================================================================
// Update duration
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The duration never exceeds the maximum delay, and a start time in
    /// the future counts as zero.
    #[test]
    fn prop_update_duration_clamped(
        offset_secs in -100_000i64..100_000,
        max_delay_secs in 0u64..50_000,
    ) {
        let config = UpdateConfig {
            max_update_delay_secs: max_delay_secs,
            ..Default::default()
        };
        let mut component = Component::new(Arc::new(UpdateContext::new(config, "p")), "app");

        let now = Instant::now() + Duration::from_secs(200_000);
        let begin = if offset_secs >= 0 {
            now - Duration::from_secs(offset_secs as u64)
        } else {
            now + Duration::from_secs(offset_secs.unsigned_abs())
        };
        let duration = component.duration_since_begin(begin, now);

        prop_assert!(duration <= Duration::from_secs(max_delay_secs));
        if offset_secs <= 0 {
            prop_assert_eq!(duration, Duration::ZERO);
        } else {
            prop_assert_eq!(
                duration,
                Duration::from_secs((offset_secs as u64).min(max_delay_secs))
            );
        }
    }
}
