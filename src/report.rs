//! Test reporting: report naming, junit parsing, collation and console
//! output.
//!
//! ```text
//!   attempt ──► ReportNamer picks file names ──► tool writes reports
//!                                                     │
//!                                       ReportParser reads junit
//!                                                     │
//!   RunSummary ◄── ReportCollator merges every attempt's results
//! ```

pub mod collator;
pub mod junit;
pub mod namer;

pub use collator::{Collation, ReportCollator};
pub use junit::{JunitParser, ParsedReport, ReportError, ReportParser};
pub use namer::{AttemptTag, OutputType, ReportNamer};

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::TestId;

/// Final verdict and statistics of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// `true` when no test is left failing.
    pub result: bool,
    pub total_tests: usize,
    pub passing_testcount: usize,
    pub failed_testcount: usize,
    /// Sorted identifiers of the tests still failing.
    pub failed_tests: Vec<TestId>,
    /// Failure detail per still-failing test.
    pub failure_details: BTreeMap<TestId, String>,
    /// Sum over all batches of the attempts after the first.
    pub total_retry_count: usize,
    /// Absolute paths of every report file produced during the run.
    pub report_files: Vec<PathBuf>,
}

/// A report that could not be used, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportProblem {
    pub path: PathBuf,
    pub message: String,
}

impl From<&ReportError> for ReportProblem {
    fn from(err: &ReportError) -> Self {
        let path = match err {
            ReportError::Read { path, .. } | ReportError::Malformed { path, .. } => path.clone(),
        };
        Self {
            path,
            message: err.to_string(),
        }
    }
}

/// Prints a summary of the run to the console.
pub fn print_summary(summary: &RunSummary, aborted: bool) {
    println!();
    println!("Test Results:");
    println!("  Total:   {}", summary.total_tests);
    println!("  Passed:  {}", console::style(summary.passing_testcount).green());
    println!("  Failed:  {}", console::style(summary.failed_testcount).red());

    if summary.total_retry_count > 0 {
        println!("  Retries: {}", console::style(summary.total_retry_count).yellow());
    }

    if !summary.failed_tests.is_empty() {
        println!();
        println!("Failing tests:");
        for test in &summary.failed_tests {
            println!("  {}", console::style(test).red());
            if let Some(detail) = summary.failure_details.get(test)
                && let Some(first_line) = detail.lines().next()
            {
                println!("    {}", console::style(first_line).dim());
            }
        }
    }

    if !summary.report_files.is_empty() {
        println!();
        println!("Reports:");
        for path in &summary.report_files {
            println!("  {}", path.display());
        }
    }

    println!();
    if aborted {
        println!("{}", console::style("Run aborted.").red().bold());
    } else if summary.result {
        println!("{}", console::style("All tests passed!").green().bold());
    } else {
        println!("{}", console::style("Some tests failed.").red().bold());
    }
}
