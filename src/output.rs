//! GitHub Actions Output Module
//!
//! Writes step outputs to the file named by `GITHUB_OUTPUT` and prints
//! workflow commands (`::notice::`, `::warning::`, `::error::`) to stdout.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::summarizer::SummaryReport;

const GENERATOR: &str = "infra-lens";

// == Summary Metadata ==
/// Context published alongside the summary as the `metadata` output.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryMetadata {
    pub generator: &'static str,
    pub version: &'static str,
    /// Model that produced the summary, `none` when no model was involved
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub repository: String,
    pub source: &'static str,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl SummaryMetadata {
    /// Builds metadata for a finished run.
    ///
    /// # Arguments
    /// * `report` - Pipeline result
    /// * `model` - Configured model identifier
    /// * `repository` - `owner/name`, if known
    pub fn new(report: &SummaryReport, model: &str, repository: Option<&str>) -> Self {
        use crate::summarizer::SummarySource;

        let model = match report.source {
            SummarySource::NoChanges => "none".to_string(),
            _ => model.to_string(),
        };
        Self {
            generator: GENERATOR,
            version: env!("CARGO_PKG_VERSION"),
            model,
            timestamp: Utc::now(),
            repository: repository.unwrap_or("Unknown").to_string(),
            source: report.source.as_str(),
            attempts: report.attempts,
            fingerprint: report.fingerprint.clone(),
        }
    }
}

// == Action Outputs ==
/// Appends step outputs to the `GITHUB_OUTPUT` file.
///
/// Without a path every write is a logged no-op, which is what happens when
/// running outside of GitHub Actions.
#[derive(Debug, Clone, Default)]
pub struct ActionOutputs {
    path: Option<PathBuf>,
}

impl ActionOutputs {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends one `name=value` output using the heredoc form, which is safe
    /// for multi-line values.
    pub fn set(&self, name: &str, value: &str) -> io::Result<()> {
        let Some(path) = &self.path else {
            debug!("Output {} not written: GITHUB_OUTPUT is not set", name);
            return Ok(());
        };

        let delimiter = delimiter_for(value);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}<<{}", name, delimiter)?;
        writeln!(file, "{}", value)?;
        writeln!(file, "{}", delimiter)?;
        Ok(())
    }

    // == Write Report ==
    /// Publishes a pipeline result as the step's outputs.
    ///
    /// # Arguments
    /// * `report` - Pipeline result
    /// * `issue_number` - PR or issue the summary was posted to, if any
    /// * `metadata` - Published as JSON under `metadata`
    pub fn write_report(
        &self,
        report: &SummaryReport,
        issue_number: Option<u64>,
        metadata: &SummaryMetadata,
    ) -> io::Result<()> {
        self.set("summary", &report.summary)?;
        self.set("success", if report.is_success() { "true" } else { "false" })?;
        self.set("source", report.source.as_str())?;
        if let Some(number) = issue_number {
            self.set("issue-number", &number.to_string())?;
        }
        let metadata = serde_json::to_string(metadata).map_err(io::Error::from)?;
        self.set("metadata", &metadata)
    }

    /// Publishes a failure that happened before any summary was produced.
    pub fn write_error(&self, message: &str) -> io::Result<()> {
        self.set("success", "false")?;
        self.set("error", message)
    }
}

fn delimiter_for(value: &str) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let delimiter = format!("ghadelimiter_{:016x}", rng.gen::<u64>());
        if !value.contains(&delimiter) {
            return delimiter;
        }
    }
}

// == Workflow Commands ==
fn escape_data(message: &str) -> String {
    message
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Formats a workflow command line such as `::notice::message`.
pub fn workflow_command(command: &str, message: &str) -> String {
    format!("::{}::{}", command, escape_data(message))
}

pub fn notice(message: &str) {
    println!("{}", workflow_command("notice", message));
}

pub fn warning(message: &str) {
    println!("{}", workflow_command("warning", message));
}

pub fn error(message: &str) {
    println!("{}", workflow_command("error", message));
}
