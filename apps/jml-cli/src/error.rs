//! CLI error types and exit codes

use std::path::PathBuf;

use jml_engine::{ConfigError, EngineError};
use thiserror::Error;

/// Exit codes for the CLI
/// - 0: Success
/// - 1: General error
/// - 3: Scenario file could not be read or parsed
/// - 4: Validation error
/// - 5: Engine error while evaluating
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Invalid scenario file {path}: {message}")]
    Scenario { path: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Output error: {0}")]
    Output(String),
}

impl CliError {
    /// Get the exit code for this error
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Io { .. } | CliError::Scenario { .. } => 3,
            CliError::Validation(_) | CliError::Config(_) => 4,
            CliError::Engine(EngineError::Validation { .. }) => 4,
            CliError::Engine(_) => 5,
            CliError::Output(_) => 1,
        }
    }

    /// Print the error to stderr with appropriate formatting
    pub fn print(&self) {
        let use_color = std::env::var("NO_COLOR").is_err();

        if use_color {
            eprintln!("\x1b[31mError:\x1b[0m {self}");
        } else {
            eprintln!("Error: {self}");
        }

        if let Some(suggestion) = self.suggestion() {
            if use_color {
                eprintln!("\n\x1b[33mSuggestion:\x1b[0m {suggestion}");
            } else {
                eprintln!("\nSuggestion: {suggestion}");
            }
        }
    }

    fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::Scenario { .. } => Some("Run 'jml validate-rules <file>' for details."),
            CliError::Config(_) => Some("Run 'jml config' to see the effective settings."),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Output(format!("JSON error: {e}"))
    }
}
