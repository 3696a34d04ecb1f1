//! src/services/report.rs
//!
//! Collects findings from SARIF files produced by the scanners that run
//! against this fixture and writes them out as `findings.csv` plus a
//! Markdown summary with one table per SARIF file.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

const TOP_RULES: usize = 10;
const SECTION_ROWS: usize = 60;
const MESSAGE_WIDTH: usize = 120;
const FILE_WIDTH: usize = 45;
const SKIPPED_DIRS: [&str; 3] = [".git", "node_modules", "target"];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not valid SARIF: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// One result of one scanner run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub source_sarif: String,
    pub tool: String,
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    pub level: String,
    pub severity: String,
    pub message: String,
    pub file: String,
    pub line: Option<u64>,
    pub col: Option<u64>,
    #[serde(rename = "endLine")]
    pub end_line: Option<u64>,
}

impl Finding {
    /// The recorded severity, else one derived from the SARIF level.
    pub fn severity_bucket(&self) -> String {
        if !self.severity.is_empty() && self.severity != "None" {
            return self.severity.clone();
        }
        match self.level.to_ascii_lowercase().as_str() {
            "error" => "HIGH",
            "warning" => "MEDIUM",
            "note" => "LOW",
            _ => "UNKNOWN",
        }
        .to_string()
    }
}

#[derive(Debug, Default)]
pub struct Report {
    pub files: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub findings: Vec<Finding>,
}

impl Report {
    /// Scan `root` recursively for `*.sarif` files. Files that fail to parse
    /// are logged and listed in `skipped`.
    pub fn collect(root: &Path) -> ReportResult<Self> {
        let mut report = Report::default();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_skipped_dir(entry));

        for entry in walker {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some("sarif")
            {
                continue;
            }

            match parse_sarif(path) {
                Ok(findings) => {
                    debug!("{}: {} findings", path.display(), findings.len());
                    report.findings.extend(findings);
                    report.files.push(path.to_path_buf());
                }
                Err(err) => {
                    warn!("skipping {}: {}", path.display(), err);
                    report.skipped.push(path.to_path_buf());
                }
            }
        }

        Ok(report)
    }

    /// `(bucket, count)` sorted by count, then name.
    pub fn severity_distribution(&self) -> Vec<(String, usize)> {
        ranked(self.findings.iter().map(Finding::severity_bucket))
    }

    pub fn top_rules(&self) -> Vec<(String, usize)> {
        let mut rules = ranked(self.findings.iter().map(|f| f.rule_id.clone()));
        rules.truncate(TOP_RULES);
        rules
    }

    pub fn write_csv(&self, path: &Path) -> ReportResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for finding in &self.findings {
            writer.serialize(finding)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn summary_markdown(&self) -> String {
        MarkdownSummary {
            report: self,
            generated: Utc::now(),
        }
        .to_string()
    }

    /// Findings grouped by the SARIF file they came from, in file name order.
    pub fn by_source(&self) -> BTreeMap<&str, Vec<&Finding>> {
        let mut groups: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
        for finding in &self.findings {
            groups
                .entry(finding.source_sarif.as_str())
                .or_default()
                .push(finding);
        }
        groups
    }

    /// Write `findings.csv` and `summary.md` into `out_dir`.
    pub fn write_outputs(&self, out_dir: &Path) -> ReportResult<(PathBuf, PathBuf)> {
        fs::create_dir_all(out_dir)?;
        let csv_path = out_dir.join("findings.csv");
        let summary_path = out_dir.join("summary.md");
        self.write_csv(&csv_path)?;
        fs::write(&summary_path, self.summary_markdown())?;
        Ok((csv_path, summary_path))
    }
}

struct MarkdownSummary<'a> {
    report: &'a Report,
    generated: DateTime<Utc>,
}

impl fmt::Display for MarkdownSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        writeln!(f, "# Security Findings Report\n")?;
        writeln!(
            f,
            "Generated: {}\n",
            self.generated.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        writeln!(f, "SARIF files: {}", report.files.len())?;
        if !report.skipped.is_empty() {
            writeln!(f, "Unreadable SARIF files: {}", report.skipped.len())?;
        }

        if report.findings.is_empty() {
            return writeln!(f, "\nNo findings found in provided SARIF files.");
        }

        writeln!(f, "Total findings: **{}**\n", report.findings.len())?;
        writeln!(f, "## Severity distribution\n")?;
        writeln!(f, "| Severity | Count |\n|---|---|")?;
        for (severity, count) in report.severity_distribution() {
            writeln!(f, "| {} | {} |", severity, count)?;
        }
        writeln!(f, "\n## Top rules\n")?;
        writeln!(f, "| Rule | Count |\n|---|---|")?;
        for (rule, count) in report.top_rules() {
            writeln!(f, "| {} | {} |", rule, count)?;
        }

        for (source, findings) in report.by_source() {
            writeln!(
                f,
                "\n## Findings from: {} (count: {})\n",
                source,
                findings.len()
            )?;
            writeln!(
                f,
                "| tool | ruleId | level | severity | file | line | message |\n|---|---|---|---|---|---|---|"
            )?;
            for finding in findings.iter().take(SECTION_ROWS) {
                writeln!(
                    f,
                    "| {} | {} | {} | {} | {} | {} | {} |",
                    table_cell(&finding.tool),
                    table_cell(&finding.rule_id),
                    table_cell(&finding.level),
                    table_cell(&finding.severity),
                    table_cell(&shorten_path(&finding.file, FILE_WIDTH)),
                    finding.line.map(|line| line.to_string()).unwrap_or_default(),
                    table_cell(&truncate(&finding.message, MESSAGE_WIDTH)),
                )?;
            }
            if findings.len() > SECTION_ROWS {
                writeln!(
                    f,
                    "\n_Table truncated to the first {} rows._",
                    SECTION_ROWS
                )?;
            }
        }
        Ok(())
    }
}

/// Keep at most `width` characters, ending in `...` when cut.
fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut out: String = value.chars().take(width - 3).collect();
    out.push_str("...");
    out
}

/// Keep the tail of a long path, prefixed with `...`.
fn shorten_path(value: &str, width: usize) -> String {
    let len = value.chars().count();
    if len <= width {
        return value.to_string();
    }
    let tail: String = value.chars().skip(len - (width - 3)).collect();
    format!("...{}", tail)
}

fn table_cell(value: &str) -> String {
    value.replace('|', "\\|")
}

/// Parse one SARIF log into findings.
pub fn parse_sarif(path: &Path) -> ReportResult<Vec<Finding>> {
    let raw = fs::read_to_string(path).map_err(|source| ReportError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let data: Value = serde_json::from_str(&raw).map_err(|source| ReportError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut findings = Vec::new();
    for run in array_at(&data, &["runs"]) {
        let tool = str_at(run, &["tool", "driver", "name"]).unwrap_or(file_name.as_str());
        for result in array_at(run, &["results"]) {
            let location = array_at(result, &["locations"])
                .first()
                .and_then(|loc| loc.get("physicalLocation"));
            let region = location.and_then(|loc| loc.get("region"));
            let properties = result.get("properties");
            let severity = properties
                .and_then(|props| {
                    ["severity", "security-severity", "cvss"]
                        .iter()
                        .find_map(|key| {
                            props.get(*key).filter(|value| is_truthy(value))
                        })
                })
                .map(scalar_to_string)
                .unwrap_or_default();

            findings.push(Finding {
                source_sarif: file_name.clone(),
                tool: tool.to_string(),
                rule_id: str_at(result, &["ruleId"]).unwrap_or_default().to_string(),
                level: str_at(result, &["level"]).unwrap_or_default().to_string(),
                severity,
                message: str_at(result, &["message", "text"])
                    .unwrap_or_default()
                    .replace('\n', " ")
                    .trim()
                    .to_string(),
                file: location
                    .and_then(|loc| str_at(loc, &["artifactLocation", "uri"]))
                    .unwrap_or_default()
                    .to_string(),
                line: region.and_then(|r| r.get("startLine")).and_then(Value::as_u64),
                col: region.and_then(|r| r.get("startColumn")).and_then(Value::as_u64),
                end_line: region.and_then(|r| r.get("endLine")).and_then(Value::as_u64),
            });
        }
    }
    Ok(findings)
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

fn value_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    value_at(value, path).and_then(Value::as_str)
}

fn array_at<'a>(value: &'a Value, path: &[&str]) -> &'a [Value] {
    value_at(value, path)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Null, `false`, zero and empty values do not count as a severity.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn ranked(items: impl Iterator<Item = String>) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for item in items {
        *counts.entry(item).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}
