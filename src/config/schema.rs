//! Configuration schema definitions for multiscan.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── MultiscanConfig        - Retry, batching, parallelism and report settings
//! ├── ToolConfig             - How the external test tool is invoked
//! └── DevicesConfig          - Device destinations bound to parallel slots
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for multiscan.
///
/// # TOML Structure
///
/// ```toml
/// [multiscan]
/// try_count = 3
/// batch_count = 2
/// parallel_testrun_count = 2
///
/// [tool]
/// command = "xcodebuild test-without-building -xctestrun {xctestrun} -destination {destination} {tests}"
///
/// [devices]
/// destinations = ["platform=iOS Simulator,name=iPhone 15"]
/// ```
///
/// # Example
///
/// ```
/// use multiscan::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [multiscan]
///     try_count = 2
///
///     [tool]
///     command = "run-tests {tests}"
/// "#).unwrap();
/// assert_eq!(config.multiscan.try_count, 2);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Core multiscan settings (retries, batching, parallelism, reports).
    #[serde(default)]
    pub multiscan: MultiscanConfig,

    /// External test tool invocation.
    pub tool: ToolConfig,

    /// Device destinations (optional, defaults to the tool's own destination).
    #[serde(default)]
    pub devices: DevicesConfig,
}

/// Core multiscan settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `try_count` | 1 |
/// | `batch_count` | unset (one batch) |
/// | `parallel_testrun_count` | 1 |
/// | `output_types` | `"html,junit"` |
/// | `output_directory` | `test_output` |
/// | `quit_simulators` | true |
/// | `collate_reports` | true |
/// | `fail_build` | true |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MultiscanConfig {
    /// Number of times to run a batch's failing tests before giving up.
    #[serde(default = "default_try_count")]
    pub try_count: usize,

    /// Number of batches the test set is split into.
    ///
    /// Conflicts with `invocation_based_tests`.
    #[serde(default)]
    pub batch_count: Option<usize>,

    /// Set when the suite uses invocation-based tests (e.g. Kiwi), whose
    /// identifiers cannot be listed ahead of time.
    #[serde(default)]
    pub invocation_based_tests: bool,

    /// Number of batches run concurrently, each on its own device.
    #[serde(default = "default_parallel_testrun_count")]
    pub parallel_testrun_count: usize,

    /// Kill stray simulator processes before the run starts.
    #[serde(default = "default_true")]
    pub quit_simulators: bool,

    /// Merge every attempt's junit report into one final report.
    #[serde(default = "default_true")]
    pub collate_reports: bool,

    /// Comma separated output types (html, junit, json, json-compilation-database).
    #[serde(default = "default_output_types")]
    pub output_types: String,

    /// Comma separated file names, matched by position with `output_types`.
    #[serde(default)]
    pub output_files: Option<String>,

    /// File name for the junit report, overriding `output_files`.
    #[serde(default)]
    pub custom_report_file_name: Option<String>,

    /// Directory that receives every report file.
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Tests to run. Empty means every test the tool can list.
    #[serde(default)]
    pub only_testing: Vec<String>,

    /// Ask the tool for a result bundle on every attempt.
    #[serde(default)]
    pub result_bundle: bool,

    /// Exit with a failure status when tests are still failing after all tries.
    #[serde(default = "default_true")]
    pub fail_build: bool,

    /// Abort the whole run once an attempt reports more failures than this.
    #[serde(default)]
    pub max_failed_tests: Option<usize>,
}

impl Default for MultiscanConfig {
    fn default() -> Self {
        Self {
            try_count: default_try_count(),
            batch_count: None,
            invocation_based_tests: false,
            parallel_testrun_count: default_parallel_testrun_count(),
            quit_simulators: true,
            collate_reports: true,
            output_types: default_output_types(),
            output_files: None,
            custom_report_file_name: None,
            output_directory: default_output_directory(),
            only_testing: Vec::new(),
            result_bundle: false,
            fail_build: true,
            max_failed_tests: None,
        }
    }
}

fn default_try_count() -> usize {
    1
}

fn default_parallel_testrun_count() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_output_types() -> String {
    "html,junit".to_string()
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("test_output")
}

/// Configuration for the external test tool.
///
/// The `command` template is run through `shell -c` once per attempt.
/// Supported placeholders:
///
/// | Placeholder | Replaced with |
/// |-------------|---------------|
/// | `{tests}` | one `test_arg` per requested test, or nothing for "run everything" |
/// | `{output_dir}` | the slot's output directory |
/// | `{destination}` | the slot's device destination |
/// | `{junit}`, `{html}`, `{json}`, `{compilation_db}` | per-attempt report paths |
/// | `{result_bundle}` | per-attempt result bundle path |
/// | `{xctestrun}` | the prebuilt test artifact |
///
/// # Example
///
/// ```toml
/// [tool]
/// command = "xcodebuild test-without-building -xctestrun {xctestrun} -destination {destination} {tests} | xcpretty -r junit -o {junit}"
/// test_arg = "-only-testing:{test}"
/// list_command = "./scripts/list-tests.sh"
/// timeout_secs = 3600
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolConfig {
    /// Command template run for every attempt.
    pub command: String,

    /// Template for one requested test inside `{tests}`.
    #[serde(default = "default_test_arg")]
    pub test_arg: String,

    /// Command printing one test identifier per line.
    #[serde(default)]
    pub list_command: Option<String>,

    /// Command run once before any attempt (build for testing).
    #[serde(default)]
    pub build_command: Option<String>,

    /// Prebuilt test artifact substituted for `{xctestrun}`.
    #[serde(default)]
    pub xctestrun: Option<PathBuf>,

    /// Working directory for every command.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Shell used to run the commands.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Timeout for a single attempt in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_test_arg() -> String {
    "-only-testing:{test}".to_string()
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_timeout_secs() -> u64 {
    3600
}

/// Device destinations, one per parallel slot.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DevicesConfig {
    /// Destination specifiers passed to the tool, e.g.
    /// `"platform=iOS Simulator,name=iPhone 15"`.
    #[serde(default)]
    pub destinations: Vec<String>,
}
