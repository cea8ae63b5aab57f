//! Configuration loading and schema definitions for multiscan.
//!
//! This module provides types and functions for loading multiscan
//! configuration from TOML files or strings, and for turning the loaded
//! configuration into a validated [`RunRequest`].

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::orchestrator::RunRequest;
use crate::report::OutputType;

/// Invalid combinations of run options.
///
/// These are detected before anything is executed; no partial run is ever
/// attempted with an invalid request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `try_count` was zero.
    #[error("try_count must be at least 1")]
    InvalidTryCount,

    /// `batch_count` was zero.
    #[error("batch_count must be greater than zero")]
    InvalidBatchCount,

    /// `parallel_testrun_count` was zero.
    #[error("parallel_testrun_count must be greater than zero")]
    InvalidParallelCount,

    /// Invocation-based tests have no identifiers to split into batches.
    #[error(
        "can't use invocation_based_tests and batch_count in one run, because the number of tests is unknown"
    )]
    InvocationBasedWithBatchCount,

    /// An entry of `output_types` is not a known format.
    #[error("unknown output type '{0}' (expected html, junit, json or json-compilation-database)")]
    UnknownOutputType(String),

    /// `output_files` does not line up with `output_types`.
    #[error("{files} output file names given for {types} output types")]
    OutputFilesMismatch {
        /// Number of output types requested.
        types: usize,
        /// Number of file names given.
        files: usize,
    },
}

/// Loads multiscan configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or
/// doesn't match the configuration schema.
///
/// # Example
///
/// ```no_run
/// use multiscan::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("multiscan.toml"))?;
/// println!("Try count: {}", config.multiscan.try_count);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads multiscan configuration from a TOML string.
///
/// # Example
///
/// ```
/// use multiscan::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [multiscan]
///     try_count = 3
///     batch_count = 2
///
///     [tool]
///     command = "run-tests {tests}"
/// "#)?;
///
/// assert_eq!(config.multiscan.batch_count, Some(2));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

impl Config {
    /// Builds the immutable run request described by this configuration.
    ///
    /// The request is validated here, so an `Ok` value is safe to hand to
    /// [`RunCoordinator`](crate::orchestrator::RunCoordinator).
    pub fn to_request(&self) -> Result<RunRequest, ConfigError> {
        let settings = &self.multiscan;

        let request = RunRequest {
            tests: settings.only_testing.clone(),
            invocation_based_tests: settings.invocation_based_tests,
            try_count: settings.try_count,
            batch_count: settings.batch_count,
            parallel_testrun_count: settings.parallel_testrun_count,
            output_types: parse_output_types(&settings.output_types)?,
            output_files: settings.output_files.as_deref().map(split_list),
            custom_report_file_name: settings.custom_report_file_name.clone(),
            output_directory: expand_path(&settings.output_directory),
            result_bundle: settings.result_bundle,
            quit_simulators: settings.quit_simulators,
            collate_reports: settings.collate_reports,
        };
        request.validate()?;

        Ok(request)
    }
}

/// Parses a comma separated list of output types.
pub fn parse_output_types(list: &str) -> Result<Vec<OutputType>, ConfigError> {
    split_list(list).iter().map(|s| s.parse()).collect()
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expands a leading `~` in a configured path.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [tool]
        command = "run-tests {tests}"
    "#;

    #[test]
    fn test_defaults() {
        let config = load_config_str(MINIMAL).unwrap();
        let request = config.to_request().unwrap();

        assert_eq!(request.try_count, 1);
        assert_eq!(request.batch_count, None);
        assert_eq!(request.parallel_testrun_count, 1);
        assert_eq!(request.output_types, vec![OutputType::Html, OutputType::Junit]);
        assert_eq!(request.output_directory, PathBuf::from("test_output"));
        assert!(request.quit_simulators);
        assert!(request.collate_reports);
        assert!(config.multiscan.fail_build);
        assert_eq!(config.tool.test_arg, "-only-testing:{test}");
    }

    #[test]
    fn test_full_config() {
        let config = load_config_str(
            r#"
            [multiscan]
            try_count = 3
            batch_count = 4
            parallel_testrun_count = 2
            output_types = "junit, json"
            output_files = "tests.xml,tests.json"
            only_testing = ["AppTests/LoginTests"]
            max_failed_tests = 10

            [tool]
            command = "xcodebuild {tests}"
            timeout_secs = 60

            [devices]
            destinations = ["platform=iOS Simulator,name=iPhone 15"]
            "#,
        )
        .unwrap();
        let request = config.to_request().unwrap();

        assert_eq!(request.try_count, 3);
        assert_eq!(request.batch_count, Some(4));
        assert_eq!(request.output_types, vec![OutputType::Junit, OutputType::Json]);
        assert_eq!(
            request.output_files,
            Some(vec!["tests.xml".to_string(), "tests.json".to_string()])
        );
        assert_eq!(request.tests, vec!["AppTests/LoginTests".to_string()]);
        assert_eq!(config.multiscan.max_failed_tests, Some(10));
        assert_eq!(config.devices.destinations.len(), 1);
        assert_eq!(config.tool.timeout_secs, 60);
    }

    #[test]
    fn test_zero_batch_count_rejected() {
        let mut config = load_config_str(MINIMAL).unwrap();
        config.multiscan.batch_count = Some(0);
        assert_eq!(config.to_request().unwrap_err(), ConfigError::InvalidBatchCount);
    }

    #[test]
    fn test_zero_parallel_rejected() {
        let mut config = load_config_str(MINIMAL).unwrap();
        config.multiscan.parallel_testrun_count = 0;
        assert_eq!(
            config.to_request().unwrap_err(),
            ConfigError::InvalidParallelCount
        );
    }

    #[test]
    fn test_invocation_based_conflicts_with_batch_count() {
        let mut config = load_config_str(MINIMAL).unwrap();
        config.multiscan.invocation_based_tests = true;
        config.multiscan.batch_count = Some(2);
        assert_eq!(
            config.to_request().unwrap_err(),
            ConfigError::InvocationBasedWithBatchCount
        );
    }

    #[test]
    fn test_unknown_output_type() {
        assert_eq!(
            parse_output_types("junit,pdf").unwrap_err(),
            ConfigError::UnknownOutputType("pdf".to_string())
        );
    }

    #[test]
    fn test_output_files_must_match_types() {
        let mut config = load_config_str(MINIMAL).unwrap();
        config.multiscan.output_types = "junit".to_string();
        config.multiscan.output_files = Some("a.xml,b.html".to_string());
        assert_eq!(
            config.to_request().unwrap_err(),
            ConfigError::OutputFilesMismatch { types: 1, files: 2 }
        );
    }

    #[test]
    fn test_missing_tool_section_fails() {
        assert!(load_config_str("[multiscan]\ntry_count = 2\n").is_err());
    }
}
