//! Report file naming.
//!
//! The [`ReportNamer`] decides what every report file is called. Each
//! attempt writes its reports under a name that carries the attempt's
//! batch, try and slot, so concurrent attempts never overwrite each other,
//! and the per-format globs find all of them again afterwards.
//!
//! | Format | Default file | Glob |
//! |--------|--------------|------|
//! | junit | `report.junit` | `report*.junit` |
//! | html | `report.html` | `report*.html` |
//! | json | `report.json` | `report*.json` |
//! | json-compilation-database | `compile_commands.json` | `compile_commands*.json` |
//!
//! # Example
//!
//! ```
//! use multiscan::report::{AttemptTag, OutputType, ReportNamer};
//!
//! let namer = ReportNamer::new(&[OutputType::Html], None, None, false).unwrap();
//! let tag = AttemptTag { batch: 2, retry: 1, slot: 1 };
//!
//! assert!(namer.includes_html());
//! assert_eq!(namer.junit_fileglob(), "report*.junit");
//! assert_eq!(
//!     namer.attempt_file_name(OutputType::Junit, tag).as_deref(),
//!     Some("report-batch2-try2-slot1.junit")
//! );
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Glob matching result bundles produced by the tool.
pub const RESULT_BUNDLE_GLOB: &str = "*.xcresult";

/// A report format the test tool can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputType {
    /// JUnit XML. Always produced, since pass/fail is read from it.
    Junit,
    /// Human readable HTML report.
    Html,
    /// JSON report.
    Json,
    /// Compilation database.
    JsonCompilationDatabase,
}

impl OutputType {
    /// Name used in configuration and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::Junit => "junit",
            OutputType::Html => "html",
            OutputType::Json => "json",
            OutputType::JsonCompilationDatabase => "json-compilation-database",
        }
    }

    fn default_file_name(&self) -> &'static str {
        match self {
            OutputType::Junit => "report.junit",
            OutputType::Html => "report.html",
            OutputType::Json => "report.json",
            OutputType::JsonCompilationDatabase => "compile_commands.json",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "junit" => Ok(OutputType::Junit),
            "html" => Ok(OutputType::Html),
            "json" => Ok(OutputType::Json),
            "json-compilation-database" => Ok(OutputType::JsonCompilationDatabase),
            other => Err(ConfigError::UnknownOutputType(other.to_string())),
        }
    }
}

/// Identifies one attempt: which batch, which try, which slot.
///
/// Batches and slots are numbered from 1; `retry` is 0 for the first run
/// of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AttemptTag {
    /// 1-based batch number.
    pub batch: usize,
    /// 0-based retry index.
    pub retry: usize,
    /// 1-based slot number.
    pub slot: usize,
}

impl fmt::Display for AttemptTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} try {} (slot {})",
            self.batch,
            self.retry + 1,
            self.slot
        )
    }
}

/// Derives report file names and discovery globs.
///
/// Pure function of the requested output types and naming overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportNamer {
    files: Vec<(OutputType, String)>,
    result_bundle: bool,
}

impl ReportNamer {
    /// Creates a namer for the requested output types.
    ///
    /// `output_files` are matched by position with `output_types`;
    /// `custom_report_file_name` overrides the junit file name. Junit is
    /// added when it was not requested.
    pub fn new(
        output_types: &[OutputType],
        output_files: Option<&[String]>,
        custom_report_file_name: Option<&str>,
        result_bundle: bool,
    ) -> Result<Self, ConfigError> {
        if let Some(names) = output_files
            && names.len() != output_types.len()
        {
            return Err(ConfigError::OutputFilesMismatch {
                types: output_types.len(),
                files: names.len(),
            });
        }

        let mut files: Vec<(OutputType, String)> = Vec::new();
        for (i, ty) in output_types.iter().enumerate() {
            if files.iter().any(|(t, _)| t == ty) {
                continue;
            }
            let name = output_files
                .and_then(|names| names.get(i))
                .cloned()
                .unwrap_or_else(|| ty.default_file_name().to_string());
            files.push((*ty, name));
        }

        if !files.iter().any(|(t, _)| *t == OutputType::Junit) {
            files.push((
                OutputType::Junit,
                OutputType::Junit.default_file_name().to_string(),
            ));
        }

        if let Some(custom) = custom_report_file_name
            && let Some(entry) = files.iter_mut().find(|(t, _)| *t == OutputType::Junit)
        {
            entry.1 = custom.to_string();
        }

        Ok(Self {
            files,
            result_bundle,
        })
    }

    /// Output types this namer produces names for, junit included.
    pub fn output_types(&self) -> impl Iterator<Item = OutputType> + '_ {
        self.files.iter().map(|(t, _)| *t)
    }

    /// Returns `true` if `ty` was requested.
    pub fn includes(&self, ty: OutputType) -> bool {
        self.files.iter().any(|(t, _)| *t == ty)
    }

    /// Returns `true` if an HTML report was requested.
    pub fn includes_html(&self) -> bool {
        self.includes(OutputType::Html)
    }

    /// Returns `true` if a JSON report was requested.
    pub fn includes_json(&self) -> bool {
        self.includes(OutputType::Json)
    }

    /// Returns `true` if result bundles were requested.
    pub fn includes_result_bundle(&self) -> bool {
        self.result_bundle
    }

    /// Base file name for `ty`, if requested.
    pub fn file_name(&self, ty: OutputType) -> Option<&str> {
        self.files
            .iter()
            .find(|(t, _)| *t == ty)
            .map(|(_, name)| name.as_str())
    }

    /// Base file name of the junit report.
    pub fn junit_file_name(&self) -> &str {
        self.file_name(OutputType::Junit)
            .unwrap_or(OutputType::Junit.default_file_name())
    }

    /// Glob matching every report of type `ty`, if requested.
    pub fn fileglob(&self, ty: OutputType) -> Option<String> {
        self.file_name(ty).map(|name| {
            let (stem, ext) = split_extension(name);
            format!("{stem}*{ext}")
        })
    }

    /// Glob matching every junit report. Junit is always produced, so
    /// unlike [`fileglob`](Self::fileglob) this never comes back empty.
    pub fn junit_fileglob(&self) -> String {
        let (stem, ext) = split_extension(self.junit_file_name());
        format!("{stem}*{ext}")
    }

    /// Every glob a finished run's reports can be found with.
    pub fn discovery_globs(&self) -> Vec<String> {
        let mut globs: Vec<String> = self
            .output_types()
            .filter_map(|ty| self.fileglob(ty))
            .collect();
        if self.includes_result_bundle() {
            globs.push(RESULT_BUNDLE_GLOB.to_string());
        }
        globs
    }

    /// Suffix that makes an attempt's file names unique.
    pub fn attempt_suffix(&self, tag: AttemptTag) -> String {
        format!("-batch{}-try{}-slot{}", tag.batch, tag.retry + 1, tag.slot)
    }

    /// File name the attempt `tag` writes its `ty` report to.
    pub fn attempt_file_name(&self, ty: OutputType, tag: AttemptTag) -> Option<String> {
        self.file_name(ty).map(|name| self.with_suffix(name, tag))
    }

    /// All report file names for the attempt `tag`, junit included.
    pub fn attempt_files(&self, tag: AttemptTag) -> Vec<(OutputType, String)> {
        self.files
            .iter()
            .map(|(ty, name)| (*ty, self.with_suffix(name, tag)))
            .collect()
    }

    /// Result bundle name for the attempt `tag`, if bundles were requested.
    pub fn attempt_result_bundle(&self, tag: AttemptTag) -> Option<String> {
        if !self.includes_result_bundle() {
            return None;
        }
        let (stem, _) = split_extension(self.junit_file_name());
        Some(format!("{stem}{}.xcresult", self.attempt_suffix(tag)))
    }

    fn with_suffix(&self, name: &str, tag: AttemptTag) -> String {
        let (stem, ext) = split_extension(name);
        format!("{stem}{}{ext}", self.attempt_suffix(tag))
    }
}

/// Splits `report.junit` into `("report", ".junit")`.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(batch: usize, retry: usize, slot: usize) -> AttemptTag {
        AttemptTag { batch, retry, slot }
    }

    #[test]
    fn test_junit_always_included() {
        let namer = ReportNamer::new(&[OutputType::Html], None, None, false).unwrap();
        assert!(namer.includes(OutputType::Junit));
        assert!(namer.includes_html());
        assert!(!namer.includes_json());
        assert_eq!(namer.junit_file_name(), "report.junit");
    }

    #[test]
    fn test_output_files_by_position() {
        let names = vec!["ui.html".to_string(), "ui.xml".to_string()];
        let namer =
            ReportNamer::new(&[OutputType::Html, OutputType::Junit], Some(names.as_slice()), None, false)
                .unwrap();
        assert_eq!(namer.file_name(OutputType::Html), Some("ui.html"));
        assert_eq!(namer.junit_fileglob(), "ui*.xml");
    }

    #[test]
    fn test_custom_report_file_name_overrides_junit() {
        let namer = ReportNamer::new(
            &[OutputType::Junit, OutputType::Json],
            None,
            Some("atomic_report.xml"),
            false,
        )
        .unwrap();
        assert_eq!(namer.junit_file_name(), "atomic_report.xml");
        assert_eq!(namer.fileglob(OutputType::Json).as_deref(), Some("report*.json"));
    }

    #[test]
    fn test_attempt_names_are_unique() {
        let namer = ReportNamer::new(&[OutputType::Junit], None, None, false).unwrap();
        let a = namer.attempt_file_name(OutputType::Junit, tag(1, 0, 1));
        let b = namer.attempt_file_name(OutputType::Junit, tag(1, 1, 1));
        let c = namer.attempt_file_name(OutputType::Junit, tag(2, 0, 2));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
        assert_eq!(a.as_deref(), Some("report-batch1-try1-slot1.junit"));
    }

    #[test]
    fn test_attempt_names_match_globs() {
        let namer =
            ReportNamer::new(&[OutputType::Html, OutputType::Junit], None, None, false).unwrap();
        for (ty, name) in namer.attempt_files(tag(3, 2, 1)) {
            let glob = globset::Glob::new(&namer.fileglob(ty).unwrap())
                .unwrap()
                .compile_matcher();
            assert!(glob.is_match(&name), "{name} should match the {ty} glob");
        }
    }

    #[test]
    fn test_result_bundle() {
        let namer = ReportNamer::new(&[OutputType::Junit], None, None, true).unwrap();
        assert!(namer.includes_result_bundle());
        assert_eq!(
            namer.attempt_result_bundle(tag(1, 0, 2)).as_deref(),
            Some("report-batch1-try1-slot2.xcresult")
        );
        assert!(namer.discovery_globs().contains(&RESULT_BUNDLE_GLOB.to_string()));

        let without = ReportNamer::new(&[OutputType::Junit], None, None, false).unwrap();
        assert!(!without.includes_result_bundle());
        assert_eq!(without.attempt_result_bundle(tag(1, 0, 2)), None);
        assert!(!without.discovery_globs().contains(&RESULT_BUNDLE_GLOB.to_string()));
    }

    #[test]
    fn test_duplicate_types_collapse() {
        let namer =
            ReportNamer::new(&[OutputType::Junit, OutputType::Junit], None, None, false).unwrap();
        assert_eq!(namer.output_types().count(), 1);
    }

    #[test]
    fn test_extensionless_name() {
        assert_eq!(split_extension("report"), ("report", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
        assert_eq!(split_extension("a.b.xml"), ("a.b", ".xml"));
    }
}
