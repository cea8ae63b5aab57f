//! Run orchestration.
//!
//! This module turns a validated [`RunRequest`] into a [`RunOutcome`]:
//! it plans batches, dispatches their retry chains over parallel slots,
//! reports every finished attempt, and collates the results.
//!
//! # Architecture
//!
//! ```text
//!   RunRequest
//!       │ validate()
//!       ▼
//!   RunCoordinator ── quit_simulators() ──► DeviceLifecycle
//!       │
//!       │ prepare() / list_tests()  ──────► TestTool
//!       ▼
//!   plan_batches() ──► Vec<Batch>
//!       │
//!       ▼
//!   ParallelDispatcher ── SlotPool (slot-1 .. slot-N)
//!       │
//!       │ one RetryChain per batch
//!       ▼
//!   RetryController ──► AttemptExecutor ──► TestTool::run()
//!       │                     │
//!       │                     └─ ReportParser reads the junit report
//!       │
//!       └─ AttemptCompleted ──► progress channel ──► completion callback
//!                                                      │ Flow::Abort
//!                                                      ▼
//!                                               CancellationToken
//!       ▼
//!   ReportCollator ──► RunSummary
//! ```
//!
//! # Key Components
//!
//! - [`RunCoordinator`]: main entry point for a run
//! - [`ParallelDispatcher`]: runs chains over a fixed slot pool
//! - [`RetryController`]: drives one batch through its retries
//! - [`AttemptExecutor`]: runs one attempt and reads its reports
//!
//! # Example
//!
//! ```no_run
//! use multiscan::device::NoopLifecycle;
//! use multiscan::orchestrator::{AttemptCompleted, Flow, RunCoordinator, RunRequest};
//! use multiscan::report::JunitParser;
//! use multiscan::tool::CommandTool;
//! # use multiscan::config::ToolConfig;
//!
//! # async fn example(tool_config: ToolConfig) -> anyhow::Result<()> {
//! let request = RunRequest {
//!     try_count: 3,
//!     batch_count: Some(4),
//!     parallel_testrun_count: 2,
//!     ..RunRequest::default()
//! };
//!
//! let outcome = RunCoordinator::new(
//!     request,
//!     CommandTool::new(tool_config),
//!     JunitParser::new(),
//!     NoopLifecycle,
//! )
//! .with_completion_callback(Box::new(|attempt: &AttemptCompleted| {
//!     if attempt.failed.len() > 50 { Flow::Abort } else { Flow::Continue }
//! }))
//! .run()
//! .await?;
//!
//! std::process::exit(outcome.exit_code(true));
//! # }
//! ```

pub mod batch;
pub mod dispatcher;
pub mod executor;
pub mod progress;
pub mod retry;

pub use batch::{Batch, TestSelection, plan_batches};
pub use dispatcher::{ParallelDispatcher, Slot, SlotPool, slot_dir_index, slot_dir_name};
pub use executor::{Attempt, AttemptExecutor};
pub use progress::{
    AttemptCompleted, CompletionCallback, Flow, ProgressReceiver, ProgressSender,
    progress_channel,
};
pub use retry::{ChainState, RetryChain, RetryController};

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TestId;
use crate::config::ConfigError;
use crate::device::{Device, DeviceError, DeviceLifecycle};
use crate::report::{
    OutputType, ReportCollator, ReportNamer, ReportParser, ReportProblem, RunSummary,
};
use crate::tool::{TestTool, ToolError};

/// Parallel runs above this count tend to overload the host.
pub const SOFT_PARALLEL_LIMIT: usize = 6;

/// Immutable description of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Tests to run; empty means the tool's whole suite.
    pub tests: Vec<TestId>,
    /// The tool cannot enumerate tests up front.
    pub invocation_based_tests: bool,
    /// Maximum attempts per batch.
    pub try_count: usize,
    /// Number of batches to split the tests into.
    pub batch_count: Option<usize>,
    /// Number of batches allowed to run at once.
    pub parallel_testrun_count: usize,
    pub output_types: Vec<OutputType>,
    /// Report file names, matched by position with `output_types`.
    pub output_files: Option<Vec<String>>,
    /// Overrides the junit report file name.
    pub custom_report_file_name: Option<String>,
    pub output_directory: PathBuf,
    /// Ask the tool for a result bundle per attempt.
    pub result_bundle: bool,
    /// Quit running simulators before the run starts.
    pub quit_simulators: bool,
    /// Write a merged junit report for the whole run.
    pub collate_reports: bool,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            tests: Vec::new(),
            invocation_based_tests: false,
            try_count: 1,
            batch_count: None,
            parallel_testrun_count: 1,
            output_types: vec![OutputType::Html, OutputType::Junit],
            output_files: None,
            custom_report_file_name: None,
            output_directory: PathBuf::from("test_output"),
            result_bundle: false,
            quit_simulators: true,
            collate_reports: true,
        }
    }
}

impl RunRequest {
    /// Checks the option combination before anything runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.try_count == 0 {
            return Err(ConfigError::InvalidTryCount);
        }
        if self.batch_count == Some(0) {
            return Err(ConfigError::InvalidBatchCount);
        }
        if self.parallel_testrun_count == 0 {
            return Err(ConfigError::InvalidParallelCount);
        }
        if self.invocation_based_tests && self.batch_count.is_some() {
            return Err(ConfigError::InvocationBasedWithBatchCount);
        }
        self.namer().map(|_| ())
    }

    /// Report namer for this request's output options.
    pub fn namer(&self) -> Result<ReportNamer, ConfigError> {
        ReportNamer::new(
            &self.output_types,
            self.output_files.as_deref(),
            self.custom_report_file_name.as_deref(),
            self.result_bundle,
        )
    }
}

/// Errors that stop a run before any result can be produced.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The device lifecycle service is unreachable.
    #[error("Device service unavailable: {0}")]
    Environment(String),

    #[error("Failed to prepare tests: {0}")]
    Prepare(#[source] ToolError),

    #[error("Failed to list tests: {0}")]
    Discovery(#[source] ToolError),

    #[error("Failed to prepare output directory {}: {source}", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    /// Reports that could not be read or written.
    pub problems: Vec<ReportProblem>,
    /// `true` if a completion callback aborted the run.
    pub aborted: bool,
    /// One chain per batch, in batch order.
    pub chains: Vec<RetryChain>,
    pub duration: Duration,
}

impl RunOutcome {
    /// Process exit code for this outcome.
    ///
    /// An aborted run always fails; failing tests fail the process only
    /// when `fail_build` is set.
    pub fn exit_code(&self, fail_build: bool) -> i32 {
        if self.aborted || (fail_build && !self.summary.result) {
            1
        } else {
            0
        }
    }
}

/// Coordinates a whole run.
///
/// # Type Parameters
///
/// - `T`: the test tool
/// - `P`: the report parser
/// - `L`: the device lifecycle service
pub struct RunCoordinator<T, P, L> {
    request: RunRequest,
    tool: T,
    parser: P,
    lifecycle: L,
    devices: Vec<Device>,
    callback: Option<CompletionCallback>,
}

impl<T, P, L> RunCoordinator<T, P, L>
where
    T: TestTool,
    P: ReportParser,
    L: DeviceLifecycle,
{
    /// Creates a coordinator for one run.
    ///
    /// The request is only validated when [`run`](Self::run) is called.
    pub fn new(request: RunRequest, tool: T, parser: P, lifecycle: L) -> Self {
        Self {
            request,
            tool,
            parser,
            lifecycle,
            devices: Vec::new(),
            callback: None,
        }
    }

    /// Binds slots to these devices, one device per slot.
    pub fn with_devices(mut self, devices: Vec<Device>) -> Self {
        self.devices = devices;
        self
    }

    /// Sets the callback invoked after every attempt.
    pub fn with_completion_callback(mut self, callback: CompletionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Executes the run.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid request, an unreachable device
    /// service, or a tool that cannot prepare or list its tests. Failing
    /// tests are not an error; they are reported in the outcome.
    pub async fn run(self) -> Result<RunOutcome, RunError> {
        let Self {
            request,
            tool,
            parser,
            lifecycle,
            devices,
            callback,
        } = self;
        let start = Instant::now();

        request.validate()?;
        let namer = request.namer()?;

        if request.parallel_testrun_count > SOFT_PARALLEL_LIMIT {
            warn!(
                "Running {} test runs in parallel may overload this machine",
                request.parallel_testrun_count
            );
        }

        if request.quit_simulators {
            match lifecycle.quit_simulators().await {
                Ok(()) => {}
                Err(DeviceError::Unavailable(msg)) => return Err(RunError::Environment(msg)),
                Err(e) => warn!("{}", e),
            }
        }

        prepare_output_dir(&request.output_directory).await?;
        tool.prepare().await.map_err(RunError::Prepare)?;

        let batches = plan(&request, &tool).await?;
        let slot_count = slot_count(&request, batches.len(), &devices);
        info!(
            "Running {} batch(es) on {} slot(s), up to {} tries each",
            batches.len(),
            slot_count,
            request.try_count
        );

        let cancel = CancellationToken::new();
        let (progress, receiver) = progress_channel();
        let controller = RetryController::new(
            AttemptExecutor::new(&tool, &parser, &namer),
            request.try_count,
            progress,
            cancel.clone(),
        );
        let dispatcher = ParallelDispatcher::new(SlotPool::with_devices(
            slot_count,
            &devices,
            &request.output_directory,
        ));

        let dispatch = async {
            // dropping the controller closes the progress channel
            let controller = controller;
            dispatcher.dispatch(&batches, &controller).await
        };
        let (chains, ()) = tokio::join!(dispatch, receiver.drive(callback, cancel.clone()));

        let collation = ReportCollator::new(
            &namer,
            &request.output_directory,
            request.collate_reports,
        )
        .collate(&chains);

        for problem in &collation.problems {
            warn!("{}: {}", problem.path.display(), problem.message);
        }

        let aborted = cancel.is_cancelled();
        let summary = collation.summary;
        info!(
            "{} of {} tests passing, {} retries{}",
            summary.passing_testcount,
            summary.total_tests,
            summary.total_retry_count,
            if aborted { ", aborted" } else { "" }
        );

        Ok(RunOutcome {
            summary,
            problems: collation.problems,
            aborted,
            chains,
            duration: start.elapsed(),
        })
    }
}

/// Decides the batches of a run.
async fn plan<T: TestTool>(request: &RunRequest, tool: &T) -> Result<Vec<Batch>, RunError> {
    if request.invocation_based_tests {
        let selection = if request.tests.is_empty() {
            TestSelection::All
        } else {
            TestSelection::Only(request.tests.clone())
        };
        return Ok(vec![Batch {
            index: 1,
            selection,
        }]);
    }

    let tests = if request.tests.is_empty() {
        tool.list_tests().await.map_err(RunError::Discovery)?
    } else {
        request.tests.clone()
    };

    if tests.is_empty() {
        if request.batch_count.is_some_and(|count| count > 1) {
            warn!("No test list available, running the whole suite as one batch");
        }
        return Ok(vec![Batch::everything(1)]);
    }

    let batches = plan_batches(&tests, request.batch_count.unwrap_or(1));
    debug!("Planned {} tests into {} batch(es)", tests.len(), batches.len());
    Ok(batches)
}

fn slot_count(request: &RunRequest, batches: usize, devices: &[Device]) -> usize {
    let mut count = request.parallel_testrun_count.min(batches).max(1);
    if !devices.is_empty() && devices.len() < count {
        warn!(
            "Only {} device(s) configured, running {} batch(es) at a time",
            devices.len(),
            devices.len()
        );
        count = devices.len();
    }
    count
}

/// Creates the output directory and removes slot directories left over
/// from an earlier run.
async fn prepare_output_dir(dir: &Path) -> Result<(), RunError> {
    let io_error = |source| RunError::OutputDirectory {
        path: dir.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(dir).await.map_err(io_error)?;

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let is_slot_dir = entry
            .file_name()
            .to_str()
            .and_then(slot_dir_index)
            .is_some();

        if is_slot_dir && entry.file_type().await.map_err(io_error)?.is_dir() {
            debug!("Removing stale {}", entry.path().display());
            tokio::fs::remove_dir_all(entry.path()).await.map_err(io_error)?;
        }
    }
    Ok(())
}
