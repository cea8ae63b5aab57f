//! Runs a single attempt and turns its reports into an [`Attempt`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Slot, TestSelection};
use crate::TestId;
use crate::report::{AttemptTag, OutputType, ReportNamer, ReportParser, ReportProblem};
use crate::tool::{Invocation, TestTool};

/// Result of one tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub tag: AttemptTag,
    /// What the attempt was asked to run.
    pub requested: TestSelection,
    pub passed: BTreeSet<TestId>,
    pub failed: BTreeSet<TestId>,
    pub failure_details: BTreeMap<TestId, String>,
    /// Absolute paths of the report files this attempt produced.
    pub report_files: Vec<PathBuf>,
    /// Why the attempt did not complete normally, if it didn't.
    ///
    /// Set when the tool could not run or crashed, produced no readable
    /// junit report, or exited non-zero without reporting a failing test.
    pub incomplete: Option<String>,
    #[serde(skip)]
    pub problems: Vec<ReportProblem>,
}

impl Attempt {
    /// An attempt with no results yet.
    pub fn new(tag: AttemptTag, requested: TestSelection) -> Self {
        Self {
            tag,
            requested,
            passed: BTreeSet::new(),
            failed: BTreeSet::new(),
            failure_details: BTreeMap::new(),
            report_files: Vec::new(),
            incomplete: None,
            problems: Vec::new(),
        }
    }

    /// Whether the attempt broke down instead of finishing its run.
    pub fn is_incomplete(&self) -> bool {
        self.incomplete.is_some()
    }

    /// What the next attempt of this batch should run, or `None` when the
    /// batch is done.
    ///
    /// A whole-suite attempt that broke down reruns everything, since its
    /// reports may be missing tests that never ran.
    pub fn next_selection(&self) -> Option<TestSelection> {
        if self.incomplete.is_some() && self.requested.is_all() {
            return Some(TestSelection::All);
        }
        if !self.failed.is_empty() {
            return Some(TestSelection::Only(self.failed.iter().cloned().collect()));
        }
        None
    }
}

/// Runs attempts through a test tool and reads back their reports.
pub struct AttemptExecutor<'a, T, P> {
    tool: &'a T,
    parser: &'a P,
    namer: &'a ReportNamer,
}

impl<'a, T: TestTool, P: ReportParser> AttemptExecutor<'a, T, P> {
    /// Borrows the collaborators shared by every attempt of a run.
    pub fn new(tool: &'a T, parser: &'a P, namer: &'a ReportNamer) -> Self {
        Self {
            tool,
            parser,
            namer,
        }
    }

    /// Runs `selection` on `slot` as attempt `tag`.
    ///
    /// Never fails: anything that goes wrong is recorded on the attempt.
    pub async fn execute(&self, tag: AttemptTag, selection: &TestSelection, slot: &Slot) -> Attempt {
        let mut attempt = Attempt::new(tag, selection.clone());
        let mut incomplete: Option<String> = None;

        if let Err(e) = tokio::fs::create_dir_all(&slot.output_dir).await {
            warn!(
                "[{}] Failed to create {}: {}",
                tag,
                slot.output_dir.display(),
                e
            );
        }

        let reports: Vec<(OutputType, PathBuf)> = self
            .namer
            .attempt_files(tag)
            .into_iter()
            .map(|(ty, name)| (ty, slot.output_dir.join(name)))
            .collect();
        let result_bundle = self
            .namer
            .attempt_result_bundle(tag)
            .map(|name| slot.output_dir.join(name));

        let invocation = Invocation {
            tag,
            selection,
            output_dir: &slot.output_dir,
            device: &slot.device,
            reports: reports.clone(),
            result_bundle: result_bundle.clone(),
        };

        info!("[{}] Running {} on {}", tag, selection, slot.device);
        let run = self.tool.run(&invocation).await;
        match &run {
            Ok(run) => debug!(
                "[{}] {} exited with {:?} after {:?}",
                tag,
                self.tool.name(),
                run.exit_code,
                run.duration
            ),
            Err(e) => {
                warn!("[{}] {}", tag, e);
                incomplete = Some(e.to_string());
            }
        }

        for path in reports.iter().map(|(_, p)| p).chain(result_bundle.iter()) {
            if path.exists() {
                attempt.report_files.push(absolute(path));
            }
        }

        let junit = reports
            .iter()
            .find(|(ty, _)| *ty == OutputType::Junit)
            .map(|(_, p)| p.as_path());
        match junit.filter(|p| p.exists()) {
            Some(path) => match self.parser.parse(path) {
                Ok(parsed) => {
                    attempt.passed = parsed.passed;
                    // a skipped test never needs a retry
                    attempt.passed.extend(parsed.skipped);
                    attempt.failed = parsed.failed;
                    attempt.failure_details = parsed.failure_details;
                }
                Err(e) => {
                    warn!("[{}] {}", tag, e);
                    attempt.problems.push(ReportProblem::from(&e));
                    incomplete.get_or_insert_with(|| e.to_string());
                }
            },
            None => {
                incomplete.get_or_insert_with(|| "no junit report was produced".to_string());
            }
        }

        if let Ok(run) = &run
            && incomplete.is_none()
        {
            let reason = if run.crashed() {
                Some(match run.exit_code {
                    Some(code) => format!("{} crashed with exit code {}", self.tool.name(), code),
                    None => format!("{} was killed before finishing", self.tool.name()),
                })
            } else if let Some(code) = run
                .exit_code
                .filter(|_| !run.success() && attempt.failed.is_empty())
            {
                Some(format!(
                    "{} exited with code {} but reported no failures",
                    self.tool.name(),
                    code
                ))
            } else {
                None
            };
            incomplete = reason.map(|mut reason| {
                if !run.stderr_tail.is_empty() {
                    reason.push('\n');
                    reason.push_str(&run.stderr_tail);
                }
                reason
            });
        }

        // Requested tests the reports say nothing about never ran.
        if let TestSelection::Only(requested) = selection {
            let reason = incomplete
                .clone()
                .unwrap_or_else(|| format!("{} reported no result for this test", self.tool.name()));
            for id in requested {
                if !is_resolved(id, &attempt) {
                    attempt.failed.insert(id.clone());
                    attempt
                        .failure_details
                        .entry(id.clone())
                        .or_insert_with(|| reason.clone());
                }
            }
        }

        attempt.incomplete = incomplete;
        attempt
    }
}

/// Whether the attempt's reports say anything about `requested`.
///
/// A requested class or target is resolved by any observed test inside it.
fn is_resolved(requested: &str, attempt: &Attempt) -> bool {
    attempt
        .passed
        .iter()
        .chain(attempt.failed.iter())
        .any(|observed| {
            observed == requested
                || observed
                    .strip_prefix(requested)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
