//! update-client CLI - drive component updates from the command line
//!
//! This crate provides a command-line interface for:
//! - Running one update cycle against a locally supplied update-check response
//! - Sending ping-only events
//! - Installing payloads into a per-component directory

pub mod cli;
pub mod config;
pub mod installer;

pub use cli::Cli;
pub use config::CliConfig;
pub use installer::DirectoryInstaller;

/// Exit codes for CLI operations
///
/// - 0: Success - every component finished without an update error
/// - 1: General error - the command could not run
/// - 2: Update failed - a component ended in the error state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed successfully (exit code 0)
    Success = 0,
    /// General error (exit code 1)
    GeneralError = 1,
    /// A component ended in the error state (exit code 2)
    UpdateFailed = 2,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::UpdateFailed => "UPDATE_FAILED",
        }
    }
}
