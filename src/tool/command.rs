//! Shell command test tool.
//!
//! Runs a configured command template through the shell for every attempt.
//! This is how `xcodebuild`, `fastlane scan`, or a wrapper script is
//! plugged in.
//!
//! # Example Configuration
//!
//! ```toml
//! [tool]
//! command = "xcodebuild test-without-building -xctestrun {xctestrun} -destination {destination} -resultBundlePath {result_bundle} {tests} | xcpretty -r junit -o {junit}"
//! test_arg = "-only-testing:{test}"
//! list_command = "./scripts/list-tests.sh"
//! build_command = "xcodebuild build-for-testing -scheme AtomicBoy -derivedDataPath build"
//! xctestrun = "build/Build/Products/AtomicBoy.xctestrun"
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use super::{Invocation, TestTool, ToolError, ToolResult, ToolRun};
use crate::TestId;
use crate::config::{ToolConfig, expand_path};
use crate::orchestrator::TestSelection;
use crate::report::OutputType;

/// Number of stderr lines kept for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Test tool driven by shell command templates.
pub struct CommandTool {
    config: ToolConfig,
}

impl CommandTool {
    /// Creates a tool running the commands in `config`.
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    /// Renders the attempt command for `invocation`.
    ///
    /// Substituted values are shell-quoted.
    pub fn render(&self, invocation: &Invocation<'_>) -> String {
        let tests = match invocation.selection {
            TestSelection::All => String::new(),
            TestSelection::Only(ids) => ids
                .iter()
                .map(|id| shell_words::quote(&self.config.test_arg.replace("{test}", id)).into_owned())
                .collect::<Vec<_>>()
                .join(" "),
        };

        let report = |ty: OutputType| {
            invocation
                .report_path(ty)
                .map(quote_path)
                .unwrap_or_default()
        };

        let xctestrun = self
            .config
            .xctestrun
            .as_deref()
            .map(|p| quote_path(&expand_path(p)))
            .unwrap_or_default();

        let destination = invocation
            .device
            .destination
            .as_deref()
            .map(|d| shell_words::quote(d).into_owned())
            .unwrap_or_default();

        self.config
            .command
            .replace("{tests}", &tests)
            .replace("{output_dir}", &quote_path(invocation.output_dir))
            .replace("{destination}", &destination)
            .replace("{junit}", &report(OutputType::Junit))
            .replace("{html}", &report(OutputType::Html))
            .replace("{json}", &report(OutputType::Json))
            .replace("{compilation_db}", &report(OutputType::JsonCompilationDatabase))
            .replace(
                "{result_bundle}",
                &invocation
                    .result_bundle
                    .as_deref()
                    .map(quote_path)
                    .unwrap_or_default(),
            )
            .replace("{xctestrun}", &xctestrun)
    }

    fn shell(&self, script: &str) -> tokio::process::Command {
        let mut process = tokio::process::Command::new(&self.config.shell);
        process.arg("-c").arg(script);

        if let Some(dir) = &self.config.working_dir {
            process.current_dir(expand_path(dir));
        }
        for (key, value) in &self.config.env {
            process.env(key, value);
        }

        process.kill_on_drop(true);
        process
    }

    /// Runs a helper command to completion, capturing its output.
    async fn run_captured(&self, script: &str) -> ToolResult<std::process::Output> {
        let output = self
            .shell(script)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ToolError::SpawnFailed(e.to_string()))?;
        Ok(output)
    }

    fn parse_list_output(output: &str) -> Vec<TestId> {
        output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl TestTool for CommandTool {
    fn name(&self) -> &str {
        "command"
    }

    async fn prepare(&self) -> ToolResult<()> {
        let Some(build_command) = &self.config.build_command else {
            return Ok(());
        };

        debug!("Building for testing: {}", build_command);
        let output = self.run_captured(build_command).await?;
        if !output.status.success() {
            return Err(ToolError::BuildFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn list_tests(&self) -> ToolResult<Vec<TestId>> {
        let Some(list_command) = &self.config.list_command else {
            return Ok(Vec::new());
        };

        let output = self.run_captured(list_command).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(ToolError::ListFailed(stderr.trim().to_string()));
        }

        let tests = Self::parse_list_output(&stdout);
        if tests.is_empty() {
            warn!("List command printed no tests. stderr: {}", stderr);
        }
        Ok(tests)
    }

    async fn run(&self, invocation: &Invocation<'_>) -> ToolResult<ToolRun> {
        let script = self.render(invocation);
        let tag = invocation.tag;
        debug!("[{}] {}", tag, script);

        let start = Instant::now();
        let mut child = self
            .shell(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::SpawnFailed(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::SpawnFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolError::SpawnFailed("stderr not captured".to_string()))?;

        let stdout_stream = tokio_stream::wrappers::LinesStream::new(BufReader::new(stdout).lines())
            .map(|line: Result<String, std::io::Error>| OutputLine::Stdout(line.unwrap_or_default()));
        let stderr_stream = tokio_stream::wrappers::LinesStream::new(BufReader::new(stderr).lines())
            .map(|line: Result<String, std::io::Error>| OutputLine::Stderr(line.unwrap_or_default()));

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let finished = tokio::time::timeout(timeout, async move {
            let mut lines = stream::select(stdout_stream, stderr_stream);
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Some(line) = lines.next().await {
                match line {
                    OutputLine::Stdout(s) => debug!("[{}] {}", tag, s),
                    OutputLine::Stderr(s) => {
                        debug!("[{}] stderr: {}", tag, s);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(s);
                    }
                }
            }

            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, tail))
        })
        .await;

        match finished {
            Err(_) => Err(ToolError::Timeout(timeout)),
            Ok(Err(e)) => Err(ToolError::Io(e)),
            Ok(Ok((status, tail))) => Ok(ToolRun {
                exit_code: status.code(),
                stderr_tail: Vec::from(tail).join("\n"),
                duration: start.elapsed(),
            }),
        }
    }
}

fn quote_path(path: &Path) -> String {
    shell_words::quote(&path.to_string_lossy()).into_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;
    use crate::device::Device;
    use crate::report::AttemptTag;

    fn config(command: &str) -> ToolConfig {
        ToolConfig {
            command: command.to_string(),
            test_arg: "-only-testing:{test}".to_string(),
            list_command: None,
            build_command: None,
            xctestrun: None,
            working_dir: None,
            shell: "/bin/sh".to_string(),
            env: HashMap::new(),
            timeout_secs: 30,
        }
    }

    fn tag() -> AttemptTag {
        AttemptTag {
            batch: 1,
            retry: 0,
            slot: 1,
        }
    }

    #[test]
    fn test_render_selected_tests() {
        let tool = CommandTool::new(config("xcodebuild {tests} -destination {destination}"));
        let selection = TestSelection::Only(vec![
            "AppTests/LoginTests/testLogin".to_string(),
            "AppTests/Odd Tests/testSpace".to_string(),
        ]);
        let device = Device::new("platform=iOS Simulator,name=iPhone 15");
        let invocation = Invocation {
            tag: tag(),
            selection: &selection,
            output_dir: Path::new("out/slot-1"),
            device: &device,
            reports: vec![],
            result_bundle: None,
        };

        assert_eq!(
            tool.render(&invocation),
            "xcodebuild -only-testing:AppTests/LoginTests/testLogin \
             '-only-testing:AppTests/Odd Tests/testSpace' \
             -destination 'platform=iOS Simulator,name=iPhone 15'"
        );
    }

    #[test]
    fn test_render_all_tests_and_reports() {
        let tool = CommandTool::new(config("run {tests}--junit {junit} --html {html}"));
        let selection = TestSelection::All;
        let device = Device::default();
        let invocation = Invocation {
            tag: tag(),
            selection: &selection,
            output_dir: Path::new("out"),
            device: &device,
            reports: vec![(OutputType::Junit, PathBuf::from("out/report.junit"))],
            result_bundle: None,
        };

        assert_eq!(tool.render(&invocation), "run --junit out/report.junit --html ");
    }

    #[tokio::test]
    async fn test_run_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let junit = dir.path().join("report.junit");
        let tool = CommandTool::new(config("printf '<testsuites/>' > {junit}"));
        let selection = TestSelection::All;
        let device = Device::default();
        let invocation = Invocation {
            tag: tag(),
            selection: &selection,
            output_dir: dir.path(),
            device: &device,
            reports: vec![(OutputType::Junit, junit.clone())],
            result_bundle: None,
        };

        let run = tool.run(&invocation).await.unwrap();
        assert!(run.success());
        assert!(junit.exists());
    }

    #[tokio::test]
    async fn test_run_reports_exit_code_and_stderr() {
        let tool = CommandTool::new(config("echo broken >&2; exit 65"));
        let selection = TestSelection::All;
        let device = Device::default();
        let invocation = Invocation {
            tag: tag(),
            selection: &selection,
            output_dir: Path::new("."),
            device: &device,
            reports: vec![],
            result_bundle: None,
        };

        let run = tool.run(&invocation).await.unwrap();
        assert_eq!(run.exit_code, Some(65));
        assert_eq!(run.stderr_tail, "broken");
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let mut cfg = config("sleep 5");
        cfg.timeout_secs = 1;
        let tool = CommandTool::new(cfg);
        let selection = TestSelection::All;
        let device = Device::default();
        let invocation = Invocation {
            tag: tag(),
            selection: &selection,
            output_dir: Path::new("."),
            device: &device,
            reports: vec![],
            result_bundle: None,
        };

        let err = tool.run(&invocation).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_list_tests() {
        let mut cfg = config("true");
        cfg.list_command = Some("printf 'A/B/test1\\n# comment\\n\\nA/B/test2\\n'".to_string());
        let tool = CommandTool::new(cfg);

        assert_eq!(
            tool.list_tests().await.unwrap(),
            vec!["A/B/test1".to_string(), "A/B/test2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_list_tests_without_command() {
        let tool = CommandTool::new(config("true"));
        assert!(tool.list_tests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_build() {
        let mut cfg = config("true");
        cfg.build_command = Some("echo 'no scheme' >&2; exit 1".to_string());
        let tool = CommandTool::new(cfg);

        let err = tool.prepare().await.unwrap_err();
        assert!(matches!(err, ToolError::BuildFailed(msg) if msg == "no scheme"));
    }
}
