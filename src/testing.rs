//! Test doubles for the tool and device collaborators.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::TestId;
use crate::device::{DeviceError, DeviceLifecycle};
use crate::orchestrator::TestSelection;
use crate::report::AttemptTag;
use crate::report::OutputType;
use crate::report::junit::{JunitCase, write_report};
use crate::tool::{Invocation, TestTool, ToolError, ToolResult, ToolRun};

/// A tool whose per-test outcomes are scripted.
///
/// Each test passes unless it has queued outcomes; every run of a test
/// consumes one outcome.
pub(crate) struct ScriptedTool {
    tests: Vec<TestId>,
    outcomes: Mutex<HashMap<TestId, VecDeque<bool>>>,
    crashes: HashSet<AttemptTag>,
    partial: HashMap<AttemptTag, (usize, Option<i32>)>,
    delay: Duration,
    invocations: Mutex<Vec<(AttemptTag, TestSelection)>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedTool {
    pub fn new(tests: &[&str]) -> Self {
        Self {
            tests: tests.iter().map(|t| t.to_string()).collect(),
            outcomes: Mutex::new(HashMap::new()),
            crashes: HashSet::new(),
            partial: HashMap::new(),
            delay: Duration::ZERO,
            invocations: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Queues pass (`true`) or fail (`false`) outcomes for `test`.
    pub fn with_outcomes(self, test: &str, outcomes: &[bool]) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(test.to_string(), outcomes.iter().copied().collect());
        self
    }

    /// Makes the attempt `tag` fail without writing any report.
    pub fn crash_on(mut self, tag: AttemptTag) -> Self {
        self.crashes.insert(tag);
        self
    }

    /// Makes the attempt `tag` report only its first `reported` tests and
    /// then die with `SIGABRT`.
    pub fn abort_after(mut self, tag: AttemptTag, reported: usize) -> Self {
        self.partial.insert(tag, (reported, Some(134)));
        self
    }

    /// Makes the attempt `tag` silently leave everything after its first
    /// `reported` tests out of the report.
    pub fn report_first(mut self, tag: AttemptTag, reported: usize) -> Self {
        self.partial.insert(tag, (reported, None));
        self
    }

    /// Makes every run take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invocations(&self) -> Vec<(AttemptTag, TestSelection)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, test: &str) -> bool {
        self.outcomes
            .lock()
            .unwrap()
            .get_mut(test)
            .and_then(VecDeque::pop_front)
            .unwrap_or(true)
    }
}

#[async_trait]
impl TestTool for ScriptedTool {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn list_tests(&self) -> ToolResult<Vec<TestId>> {
        Ok(self.tests.clone())
    }

    async fn run(&self, invocation: &Invocation<'_>) -> ToolResult<ToolRun> {
        self.invocations
            .lock()
            .unwrap()
            .push((invocation.tag, invocation.selection.clone()));

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.crashes.contains(&invocation.tag) {
            return Err(ToolError::SpawnFailed("simulated crash".to_string()));
        }

        let mut tests = match invocation.selection {
            TestSelection::All => self.tests.clone(),
            TestSelection::Only(ids) => ids.clone(),
        };
        let partial = self.partial.get(&invocation.tag).copied();
        if let Some((reported, _)) = partial {
            tests.truncate(reported);
        }
        let cases: Vec<JunitCase> = tests
            .iter()
            .map(|id| {
                if self.next_outcome(id) {
                    JunitCase::passed(id)
                } else {
                    JunitCase::failed(id, format!("{} failed in {}", id, invocation.tag))
                }
            })
            .collect();
        let failed = cases.iter().any(|c| c.failure.is_some());

        if let Some(path) = invocation.report_path(OutputType::Junit) {
            write_report(path, &cases, 0).map_err(|e| ToolError::SpawnFailed(e.to_string()))?;
        }

        let exit_code = match partial.and_then(|(_, code)| code) {
            Some(code) => code,
            None if failed => 65,
            None => 0,
        };
        Ok(ToolRun {
            exit_code: Some(exit_code),
            stderr_tail: String::new(),
            duration: self.delay,
        })
    }
}

/// Lifecycle that counts calls and can pretend to be unreachable.
#[derive(Default)]
pub(crate) struct RecordingLifecycle {
    pub calls: AtomicUsize,
    pub unavailable: bool,
}

#[async_trait]
impl DeviceLifecycle for RecordingLifecycle {
    async fn quit_simulators(&self) -> Result<(), DeviceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(DeviceError::Unavailable("simctl not found".to_string()));
        }
        Ok(())
    }
}
