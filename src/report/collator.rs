//! Merges every attempt of every batch into one [`RunSummary`].
//!
//! Within a batch, the last attempt that ran a test decides its status.
//! Across batches a test is failing if it is failing in any batch. The
//! result does not depend on the order batches finished in.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::junit::{JunitCase, write_report};
use super::{ReportNamer, ReportProblem, RunSummary};
use crate::TestId;
use crate::orchestrator::{RetryChain, slot_dir_index};

/// Summary plus the reports that could not be used.
#[derive(Debug, Clone, Default)]
pub struct Collation {
    pub summary: RunSummary,
    pub problems: Vec<ReportProblem>,
}

/// Final status of one test within one batch.
enum Status {
    Passed,
    Failed(String),
}

/// Merges retry chains into a summary and optional collated report.
pub struct ReportCollator<'a> {
    namer: &'a ReportNamer,
    output_dir: &'a Path,
    collate_reports: bool,
}

impl<'a> ReportCollator<'a> {
    /// Creates a collator for reports under `output_dir`.
    ///
    /// With `collate_reports` set, a merged junit report is also written.
    pub fn new(namer: &'a ReportNamer, output_dir: &'a Path, collate_reports: bool) -> Self {
        Self {
            namer,
            output_dir,
            collate_reports,
        }
    }

    /// Collates all chains of a run.
    pub fn collate(&self, chains: &[RetryChain]) -> Collation {
        let mut passing: BTreeSet<TestId> = BTreeSet::new();
        let mut failing: BTreeSet<TestId> = BTreeSet::new();
        let mut details: BTreeMap<TestId, BTreeSet<String>> = BTreeMap::new();
        let mut files: BTreeSet<PathBuf> = BTreeSet::new();
        let mut problems = Vec::new();
        let mut total_retry_count = 0;

        for chain in chains {
            total_retry_count += chain.retry_count();

            for (id, status) in final_statuses(chain) {
                match status {
                    Status::Passed => {
                        passing.insert(id);
                    }
                    Status::Failed(detail) => {
                        if !detail.is_empty() {
                            details.entry(id.clone()).or_default().insert(detail);
                        }
                        failing.insert(id);
                    }
                }
            }

            for attempt in &chain.attempts {
                files.extend(attempt.report_files.iter().cloned());
                problems.extend(attempt.problems.iter().cloned());
            }
        }

        passing.retain(|id| !failing.contains(id));

        match self.discover_reports() {
            Ok(found) => files.extend(found),
            Err(problem) => problems.push(problem),
        }

        let failure_details: BTreeMap<TestId, String> = failing
            .iter()
            .map(|id| {
                let merged = details
                    .remove(id)
                    .map(|set| set.into_iter().collect::<Vec<_>>().join("\n"))
                    .unwrap_or_default();
                (id.clone(), merged)
            })
            .collect();

        if self.collate_reports {
            match self.write_collated(&passing, &failure_details, total_retry_count) {
                Ok(path) => {
                    files.insert(path);
                }
                Err(problem) => problems.push(problem),
            }
        }

        let summary = RunSummary {
            result: failing.is_empty(),
            total_tests: passing.len() + failing.len(),
            passing_testcount: passing.len(),
            failed_testcount: failing.len(),
            failed_tests: failing.into_iter().collect(),
            failure_details,
            total_retry_count,
            report_files: files.into_iter().collect(),
        };

        Collation { summary, problems }
    }

    /// Finds every report in the slot directories matching the namer's
    /// globs. A glob matching nothing is not an error.
    ///
    /// Only `slot-N` directories are searched, since anything else under
    /// the output directory may be left over from an earlier run.
    fn discover_reports(&self) -> Result<Vec<PathBuf>, ReportProblem> {
        if !self.output_dir.exists() {
            return Ok(Vec::new());
        }

        let globs = self.glob_set()?;
        let found: Vec<PathBuf> = WalkDir::new(self.output_dir)
            .into_iter()
            .filter_entry(|entry| entry.depth() != 1 || is_slot_dir(entry))
            .filter_map(Result::ok)
            .filter(|entry| entry.depth() > 1 && globs.is_match(entry.file_name()))
            .map(|entry| absolute(entry.path()))
            .collect();

        debug!(
            "Found {} report files under {}",
            found.len(),
            self.output_dir.display()
        );
        Ok(found)
    }

    fn glob_set(&self) -> Result<GlobSet, ReportProblem> {
        let problem = |message: String| ReportProblem {
            path: self.output_dir.to_path_buf(),
            message,
        };

        let mut builder = GlobSetBuilder::new();
        for pattern in self.namer.discovery_globs() {
            let glob = Glob::new(&pattern)
                .map_err(|e| problem(format!("Invalid report glob '{}': {}", pattern, e)))?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| problem(format!("Failed to build report globs: {}", e)))
    }

    fn write_collated(
        &self,
        passing: &BTreeSet<TestId>,
        failure_details: &BTreeMap<TestId, String>,
        retries: usize,
    ) -> Result<PathBuf, ReportProblem> {
        let path = self.output_dir.join(self.namer.junit_file_name());

        let cases: Vec<JunitCase> = passing
            .iter()
            .map(JunitCase::passed)
            .chain(
                failure_details
                    .iter()
                    .map(|(id, detail)| JunitCase::failed(id, detail)),
            )
            .collect();

        write_report(&path, &cases, retries).map_err(|e| {
            warn!("Failed to write collated report: {:#}", e);
            ReportProblem {
                path: path.clone(),
                message: format!("{:#}", e),
            }
        })?;

        Ok(absolute(&path))
    }
}

/// Status of every test the chain observed, decided by its last attempt
/// that ran the test.
fn final_statuses(chain: &RetryChain) -> BTreeMap<TestId, Status> {
    let mut statuses = BTreeMap::new();

    for attempt in &chain.attempts {
        for id in &attempt.passed {
            statuses.insert(id.clone(), Status::Passed);
        }
        for id in &attempt.failed {
            let detail = attempt.failure_details.get(id).cloned().unwrap_or_default();
            statuses.insert(id.clone(), Status::Failed(detail));
        }
    }

    // A whole-batch attempt that broke down may have skipped tests nobody
    // knows about.
    if let Some(last) = chain.attempts.last()
        && last.requested.is_all()
        && let Some(reason) = &last.incomplete
    {
        statuses.insert(batch_placeholder(chain.batch), Status::Failed(reason.clone()));
    }

    statuses
}

fn is_slot_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .and_then(slot_dir_index)
            .is_some()
}

/// Identifier standing in for a batch whose tests are unknown.
pub fn batch_placeholder(batch: usize) -> TestId {
    format!("<batch {}>", batch)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
