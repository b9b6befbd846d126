//! jml CLI library
//!
//! This library exposes the command implementations for integration testing.
//! The binary in main.rs only parses arguments and dispatches.

pub mod commands;
pub mod error;
pub mod logging;
pub mod scenario;

pub use error::{CliError, CliResult};
pub use scenario::{Scenario, ScenarioReport};
