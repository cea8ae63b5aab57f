//! JUnit XML reading and writing.
//!
//! [`JunitParser`] is the report-parsing collaborator: it turns one junit
//! file into passed/failed test identifiers plus failure details. The
//! writer half produces the collated report.
//!
//! Test identifiers are rebuilt from the `classname` and `name` attributes
//! the way Xcode test tooling writes them:
//!
//! ```xml
//! <testcase classname="AtomicBoyTests.LoginTests" name="testLogin"/>
//! ```
//!
//! becomes `AtomicBoyTests/LoginTests/testLogin`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::TestId;

/// Errors from reading one report file.
///
/// These stay attached to the offending file; other reports are still
/// collated.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The report file could not be read.
    #[error("Failed to read report {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The report file is not well-formed junit XML.
    #[error("Malformed report {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },
}

/// Tests described by one report file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReport {
    pub passed: BTreeSet<TestId>,
    pub failed: BTreeSet<TestId>,
    pub skipped: BTreeSet<TestId>,
    /// Failure detail per failed test.
    pub failure_details: BTreeMap<TestId, String>,
}

impl ParsedReport {
    fn record(&mut self, case: CaseState) {
        let id = test_id(&case.classname, &case.name);
        if let Some(detail) = case.failure {
            self.passed.remove(&id);
            self.failed.insert(id.clone());
            self.failure_details
                .entry(id)
                .and_modify(|existing| {
                    if !existing.contains(&detail) {
                        existing.push('\n');
                        existing.push_str(&detail);
                    }
                })
                .or_insert(detail);
        } else if case.skipped {
            self.skipped.insert(id);
        } else if !self.failed.contains(&id) {
            self.passed.insert(id);
        }
    }
}

/// Parses structured report files into test results.
///
/// Implementations must be idempotent and must accept a report that
/// describes zero tests.
pub trait ReportParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<ParsedReport, ReportError>;
}

/// Parser for junit XML reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct JunitParser;

impl JunitParser {
    /// Creates a parser.
    pub fn new() -> Self {
        Self
    }

    /// Parses junit XML content.
    pub fn parse_str(&self, content: &str) -> Result<ParsedReport, String> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);

        let mut report = ParsedReport::default();
        let mut current: Option<CaseState> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => match e.name().as_ref() {
                    b"testcase" => current = Some(CaseState::from_element(&e)?),
                    b"failure" | b"error" => {
                        if let Some(case) = current.as_mut() {
                            case.begin_failure(&e)?;
                        }
                    }
                    b"skipped" => {
                        if let Some(case) = current.as_mut() {
                            case.skipped = true;
                        }
                    }
                    _ => {}
                },
                Ok(Event::Empty(e)) => match e.name().as_ref() {
                    b"testcase" => report.record(CaseState::from_element(&e)?),
                    b"failure" | b"error" => {
                        if let Some(case) = current.as_mut() {
                            case.begin_failure(&e)?;
                            case.in_failure = false;
                        }
                    }
                    b"skipped" => {
                        if let Some(case) = current.as_mut() {
                            case.skipped = true;
                        }
                    }
                    _ => {}
                },
                Ok(Event::Text(t)) => {
                    if let Some(case) = current.as_mut()
                        && case.in_failure
                    {
                        let text = t.unescape().map_err(|e| e.to_string())?;
                        case.push_failure_text(&text);
                    }
                }
                Ok(Event::CData(t)) => {
                    if let Some(case) = current.as_mut()
                        && case.in_failure
                    {
                        let bytes = t.into_inner();
                        case.push_failure_text(String::from_utf8_lossy(&bytes).trim());
                    }
                }
                Ok(Event::End(e)) => match e.name().as_ref() {
                    b"failure" | b"error" => {
                        if let Some(case) = current.as_mut() {
                            case.in_failure = false;
                        }
                    }
                    b"testcase" => {
                        if let Some(case) = current.take() {
                            report.record(case);
                        }
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(format!(
                        "error at position {}: {}",
                        reader.error_position(),
                        e
                    ));
                }
                _ => {}
            }
        }

        Ok(report)
    }
}

impl ReportParser for JunitParser {
    fn parse(&self, path: &Path) -> Result<ParsedReport, ReportError> {
        let content = std::fs::read_to_string(path).map_err(|source| ReportError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        self.parse_str(&content)
            .map_err(|message| ReportError::Malformed {
                path: path.to_path_buf(),
                message,
            })
    }
}

/// A `<testcase>` being read.
struct CaseState {
    classname: String,
    name: String,
    failure: Option<String>,
    skipped: bool,
    in_failure: bool,
}

impl CaseState {
    fn from_element(e: &BytesStart<'_>) -> Result<Self, String> {
        let name = attribute(e, b"name")?
            .ok_or_else(|| "testcase without a name attribute".to_string())?;
        Ok(Self {
            classname: attribute(e, b"classname")?.unwrap_or_default(),
            name,
            failure: None,
            skipped: false,
            in_failure: false,
        })
    }

    fn begin_failure(&mut self, e: &BytesStart<'_>) -> Result<(), String> {
        let message = attribute(e, b"message")?.unwrap_or_default();
        let detail = match self.failure.take() {
            Some(previous) if !message.is_empty() => format!("{previous}\n{message}"),
            Some(previous) => previous,
            None => message,
        };
        self.failure = Some(detail);
        self.in_failure = true;
        Ok(())
    }

    fn push_failure_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let detail = self.failure.get_or_insert_with(String::new);
        if !detail.is_empty() {
            detail.push('\n');
        }
        detail.push_str(text);
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        if attr.key.as_ref() == key {
            let value = attr.unescape_value().map_err(|err| err.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Builds a test identifier from junit `classname` and `name`.
pub fn test_id(classname: &str, name: &str) -> TestId {
    if classname.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", classname.replace('.', "/"), name)
    }
}

/// Splits a test identifier back into junit `classname` and `name`.
pub fn id_parts(id: &str) -> (String, String) {
    match id.rsplit_once('/') {
        Some((prefix, name)) => (prefix.replace('/', "."), name.to_string()),
        None => (String::new(), id.to_string()),
    }
}

/// One test's final outcome in a written report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunitCase {
    pub id: TestId,
    /// Failure detail, `None` when the test passed.
    pub failure: Option<String>,
}

impl JunitCase {
    pub fn passed(id: impl Into<TestId>) -> Self {
        Self {
            id: id.into(),
            failure: None,
        }
    }

    pub fn failed(id: impl Into<TestId>, detail: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            failure: Some(detail.into()),
        }
    }
}

/// Generates junit XML for `cases`, one `<testsuite>` per class.
pub fn generate_xml(cases: &[JunitCase], retries: usize) -> anyhow::Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut suites: BTreeMap<String, Vec<(String, Option<&str>)>> = BTreeMap::new();
    for case in cases {
        let (classname, name) = id_parts(&case.id);
        suites
            .entry(classname)
            .or_default()
            .push((name, case.failure.as_deref()));
    }

    let failures = cases.iter().filter(|c| c.failure.is_some()).count();

    let mut testsuites = BytesStart::new("testsuites");
    testsuites.push_attribute(("tests", cases.len().to_string().as_str()));
    testsuites.push_attribute(("failures", failures.to_string().as_str()));
    testsuites.push_attribute(("retries", retries.to_string().as_str()));
    writer.write_event(Event::Start(testsuites))?;

    for (classname, suite_cases) in &suites {
        let suite_failures = suite_cases.iter().filter(|(_, f)| f.is_some()).count();

        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", classname.as_str()));
        testsuite.push_attribute(("tests", suite_cases.len().to_string().as_str()));
        testsuite.push_attribute(("failures", suite_failures.to_string().as_str()));
        writer.write_event(Event::Start(testsuite))?;

        for (name, failure) in suite_cases {
            let mut testcase = BytesStart::new("testcase");
            testcase.push_attribute(("classname", classname.as_str()));
            testcase.push_attribute(("name", name.as_str()));

            match failure {
                None => writer.write_event(Event::Empty(testcase))?,
                Some(detail) => {
                    writer.write_event(Event::Start(testcase))?;

                    let (message, body) = match detail.split_once('\n') {
                        Some((first, rest)) => (first, Some(rest)),
                        None => (*detail, None),
                    };
                    let mut element = BytesStart::new("failure");
                    element.push_attribute(("message", message));
                    match body {
                        Some(body) => {
                            writer.write_event(Event::Start(element))?;
                            writer.write_event(Event::Text(BytesText::new(body)))?;
                            writer.write_event(Event::End(BytesEnd::new("failure")))?;
                        }
                        None => writer.write_event(Event::Empty(element))?,
                    }

                    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
                }
            }
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let xml = String::from_utf8(writer.into_inner())?;
    Ok(xml)
}

/// Writes junit XML for `cases` to `path`, creating parent directories.
pub fn write_report(path: &Path, cases: &[JunitCase], retries: usize) -> anyhow::Result<()> {
    let xml = generate_xml(cases, retries)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, xml)
        .with_context(|| format!("Failed to write junit report {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const XCPRETTY_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites name="AtomicBoyTests.xctest" tests="3" failures="1">
  <testsuite name="AtomicBoyTests.AtomicBoyTests" tests="3" failures="1">
    <testcase classname="AtomicBoyTests.AtomicBoyTests" name="testExample"/>
    <testcase classname="AtomicBoyTests.AtomicBoyTests" name="testExample2">
      <failure message="XCTAssertTrue failed - &quot;ok&quot;">AtomicBoyTests.swift:39</failure>
    </testcase>
    <testcase classname="AtomicBoyTests.AtomicBoyTests" name="testSkipped">
      <skipped/>
    </testcase>
  </testsuite>
</testsuites>
"#;

    #[test]
    fn test_parse_xcpretty_report() {
        let report = JunitParser::new().parse_str(XCPRETTY_REPORT).unwrap();

        assert_eq!(
            report.passed.iter().collect::<Vec<_>>(),
            vec!["AtomicBoyTests/AtomicBoyTests/testExample"]
        );
        assert_eq!(
            report.failed.iter().collect::<Vec<_>>(),
            vec!["AtomicBoyTests/AtomicBoyTests/testExample2"]
        );
        assert!(report.skipped.contains("AtomicBoyTests/AtomicBoyTests/testSkipped"));
        assert_eq!(
            report.failure_details["AtomicBoyTests/AtomicBoyTests/testExample2"],
            "XCTAssertTrue failed - \"ok\"\nAtomicBoyTests.swift:39"
        );
    }

    #[test]
    fn test_parse_error_element_counts_as_failure() {
        let xml = r#"<testsuite><testcase classname="T.C" name="testCrash"><error message="crashed"/></testcase></testsuite>"#;
        let report = JunitParser::new().parse_str(xml).unwrap();
        assert!(report.failed.contains("T/C/testCrash"));
        assert_eq!(report.failure_details["T/C/testCrash"], "crashed");
    }

    #[test]
    fn test_parse_empty_report() {
        let parser = JunitParser::new();
        assert_eq!(parser.parse_str("").unwrap(), ParsedReport::default());
        assert_eq!(
            parser.parse_str(r#"<?xml version="1.0"?><testsuites tests="0"/>"#).unwrap(),
            ParsedReport::default()
        );
    }

    #[test]
    fn test_parse_malformed_report() {
        let result = JunitParser::new().parse_str("<testsuites><testcase name=\"a\"></testsuite>");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.junit");
        std::fs::write(&path, XCPRETTY_REPORT).unwrap();

        let parser = JunitParser::new();
        let first = parser.parse(&path).unwrap();
        let second = parser.parse(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_missing_file() {
        let err = JunitParser::new()
            .parse(Path::new("/nonexistent/report.junit"))
            .unwrap_err();
        assert!(matches!(err, ReportError::Read { .. }));
    }

    #[test]
    fn test_written_report_parses_back() {
        let cases = vec![
            JunitCase::passed("AppTests/LoginTests/testLogin"),
            JunitCase::failed("AppTests/LoginTests/testLogout", "expected <1>\nLoginTests.swift:12"),
            JunitCase::failed("AppTests/CartTests/testEmpty", "nil & empty"),
        ];
        let xml = generate_xml(&cases, 2).unwrap();
        assert!(xml.contains(r#"retries="2""#));

        let report = JunitParser::new().parse_str(&xml).unwrap();
        assert!(report.passed.contains("AppTests/LoginTests/testLogin"));
        assert_eq!(
            report.failure_details["AppTests/LoginTests/testLogout"],
            "expected <1>\nLoginTests.swift:12"
        );
        assert_eq!(
            report.failure_details["AppTests/CartTests/testEmpty"],
            "nil & empty"
        );
    }

    #[test]
    fn test_id_parts() {
        assert_eq!(
            id_parts("AppTests/LoginTests/testLogin"),
            ("AppTests.LoginTests".to_string(), "testLogin".to_string())
        );
        assert_eq!(id_parts("testAlone"), (String::new(), "testAlone".to_string()));
        assert_eq!(test_id("", "testAlone"), "testAlone");
    }
}
