//! multiscan: run a flaky, possibly huge, Xcode-style test suite until it
//! gives a trustworthy verdict.
//!
//! The suite is split into batches, batches run in parallel on their own
//! devices, and each batch re-runs only the tests that failed in its
//! previous attempt until they pass or the try budget runs out. Every
//! attempt's reports are then merged into a single [`RunSummary`].
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Orchestrator**: batch planning, the parallel dispatcher, retry chains
//!   and the top-level [`RunCoordinator`]
//! - **Report**: report naming, junit parsing and collation
//! - **Tool**: the external test tool invoked once per attempt
//! - **Device**: device destinations and simulator cleanup
//!
//! # Example
//!
//! ```no_run
//! use multiscan::config::load_config;
//! use multiscan::device::SimulatorKiller;
//! use multiscan::orchestrator::RunCoordinator;
//! use multiscan::report::JunitParser;
//! use multiscan::tool::CommandTool;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("multiscan.toml"))?;
//!     let request = config.to_request()?;
//!
//!     let outcome = RunCoordinator::new(
//!         request,
//!         CommandTool::new(config.tool.clone()),
//!         JunitParser::new(),
//!         SimulatorKiller::default(),
//!     )
//!     .run()
//!     .await?;
//!
//!     println!("passed: {}", outcome.summary.result);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod orchestrator;
pub mod report;
pub mod tool;

#[cfg(test)]
pub(crate) mod testing;

/// Stable name of one test case, e.g. `AtomicBoyTests/LoginTests/testLogin`.
///
/// Compared by exact string match.
pub type TestId = String;

// Re-export commonly used types
pub use config::{Config, ConfigError, load_config};
pub use orchestrator::{RunCoordinator, RunOutcome, RunRequest};
pub use report::{ReportNamer, RunSummary};
pub use tool::TestTool;
