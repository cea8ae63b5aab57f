//! The external test tool.
//!
//! multiscan never runs test code itself. Each attempt is one call to a
//! [`TestTool`], which is handed the tests to run, a private output
//! directory, a device, and the report paths it should write. Whatever
//! report files appear afterwards are the attempt's result.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        TestTool                           │
//! │                                                           │
//! │  prepare()            build test artifacts, once          │
//! │  list_tests()         identifiers for batching            │
//! │  run(Invocation) ───► report files on disk + ToolRun      │
//! └───────────────────────────────────────────────────────────┘
//! ```

pub mod command;

pub use command::CommandTool;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::TestId;
use crate::device::Device;
use crate::orchestrator::TestSelection;
use crate::report::{AttemptTag, OutputType};

/// Result type for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors from invoking the test tool.
///
/// A run that starts and exits non-zero is not an error; it is reported
/// through [`ToolRun::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The tool process could not be started.
    #[error("Failed to start test tool: {0}")]
    SpawnFailed(String),

    /// The attempt ran longer than the configured timeout.
    #[error("Test tool timed out after {0:?}")]
    Timeout(Duration),

    /// Listing tests failed.
    #[error("Failed to list tests: {0}")]
    ListFailed(String),

    /// Building the test artifacts failed.
    #[error("Failed to build for testing: {0}")]
    BuildFailed(String),

    /// I/O error while talking to the tool.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the tool needs for one attempt.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub tag: AttemptTag,
    pub selection: &'a TestSelection,
    /// The slot's private output directory.
    pub output_dir: &'a Path,
    pub device: &'a Device,
    /// Where each requested report should be written.
    pub reports: Vec<(OutputType, PathBuf)>,
    /// Where the result bundle should be written, if requested.
    pub result_bundle: Option<PathBuf>,
}

impl Invocation<'_> {
    /// Path the `ty` report should be written to.
    pub fn report_path(&self, ty: OutputType) -> Option<&Path> {
        self.reports
            .iter()
            .find(|(t, _)| *t == ty)
            .map(|(_, path)| path.as_path())
    }
}

/// How a tool invocation ended.
#[derive(Debug, Clone)]
pub struct ToolRun {
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Last lines of standard error, for diagnostics.
    pub stderr_tail: String,
    pub duration: Duration,
}

impl ToolRun {
    /// Whether the tool exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Whether the process died from a signal, either directly or as
    /// reported by the shell (`128 + signal`).
    pub fn crashed(&self) -> bool {
        self.exit_code.is_none_or(|code| code > 128)
    }
}

/// The external tool that actually runs tests.
#[async_trait]
pub trait TestTool: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Prepares test artifacts before any attempt runs.
    async fn prepare(&self) -> ToolResult<()> {
        Ok(())
    }

    /// Lists the identifiers of every runnable test.
    ///
    /// An empty list means the tool cannot enumerate its tests.
    async fn list_tests(&self) -> ToolResult<Vec<TestId>> {
        Ok(Vec::new())
    }

    /// Runs one attempt, returning once the tool has exited.
    async fn run(&self, invocation: &Invocation<'_>) -> ToolResult<ToolRun>;
}

#[async_trait]
impl<T: TestTool + ?Sized> TestTool for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn prepare(&self) -> ToolResult<()> {
        (**self).prepare().await
    }

    async fn list_tests(&self) -> ToolResult<Vec<TestId>> {
        (**self).list_tests().await
    }

    async fn run(&self, invocation: &Invocation<'_>) -> ToolResult<ToolRun> {
        (**self).run(invocation).await
    }
}
