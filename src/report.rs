//! Report files and console output.
//!
//! A report file is a JSON list of record descriptions, used by the
//! `hippod-report` binary to build [`TestRecord`]s without writing Rust:
//!
//! ```json
//! [
//!   {
//!     "submitter": "anonymous",
//!     "title": "Snippet Test Item",
//!     "categories": ["team:foo"],
//!     "description": { "format": "markdown", "text": "# Heading" },
//!     "result": "passed",
//!     "tags": ["nightly"],
//!     "attachments": [
//!       { "path": "graph.png" },
//!       { "path": "snippet.py", "kind": "x-snippet-python3-matplot-png" }
//!     ],
//!     "achievement": {
//!       "test_date": "2024-01-01T00:00:00Z",
//!       "attachments": [ { "path": "output.log", "tags": ["stdout"] } ]
//!     }
//!   }
//! ]
//! ```
//!
//! Attachment paths are resolved relative to the report file. Every field
//! is optional in the file; completeness is checked like any other record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Error;
use crate::model::{AchievementResult, AttachmentStore, TestRecord, ValidationError, push_unique};
use crate::sync::SyncReport;

/// One record as described in a report file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordSpec {
    pub submitter: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub description: Option<DescriptionSpec>,
    pub result: Option<AchievementResult>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentSpec>,
    #[serde(default)]
    pub achievement: AchievementSpec,
}

/// Description with its format.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "format", content = "text", rename_all = "lowercase")]
pub enum DescriptionSpec {
    Plain(String),
    Markdown(String),
}

/// Achievement-level fields of a record description.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AchievementSpec {
    pub test_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentSpec>,
}

/// A file to attach.
///
/// Without `kind` the content type is inferred from the extension.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentSpec {
    pub path: PathBuf,
    pub kind: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RecordSpec {
    /// Builds a record, reading attachments relative to `base_dir`.
    ///
    /// # Errors
    ///
    /// Fails on malformed categories or unreadable attachment files.
    pub fn build(&self, base_dir: &Path) -> std::result::Result<TestRecord, Error> {
        let mut record = TestRecord::new();
        if let Some(submitter) = &self.submitter {
            record.submitter_set(submitter);
        }
        if let Some(title) = &self.title {
            record.title_set(title);
        }
        if !self.categories.is_empty() {
            record.categories_set(&self.categories)?;
        }
        match &self.description {
            Some(DescriptionSpec::Plain(text)) => record.description_plain_set(text),
            Some(DescriptionSpec::Markdown(text)) => record.description_markdown_set(text),
            None => {}
        }
        record.attachment.tags_add(&self.tags);
        add_attachments(&mut record.attachment, &self.attachments, base_dir)?;

        record.achievement.result = self.result;
        if let Some(date) = self.achievement.test_date {
            record.achievement.test_date_set(date);
        }
        record.achievement.attachment.tags_add(&self.achievement.tags);
        add_attachments(
            &mut record.achievement.attachment,
            &self.achievement.attachments,
            base_dir,
        )?;

        Ok(record)
    }
}

fn add_attachments(
    store: &mut AttachmentStore,
    specs: &[AttachmentSpec],
    base_dir: &Path,
) -> std::result::Result<(), Error> {
    for spec in specs {
        let path = base_dir.join(&spec.path);
        let attachment = match &spec.kind {
            Some(kind) => store.snippet_file_add(&path, kind)?,
            None => store.file_add(&path)?,
        };
        for tag in &spec.tags {
            push_unique(&mut attachment.tags, tag);
        }
    }
    Ok(())
}

/// Reads a report file and builds its records.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if a record
/// cannot be built.
pub fn load_report(path: &Path) -> Result<Vec<TestRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report file: {}", path.display()))?;
    let specs: Vec<RecordSpec> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse report file: {}", path.display()))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            spec.build(base_dir)
                .with_context(|| format!("Invalid record #{} in {}", i, path.display()))
        })
        .collect()
}

/// Checks every record for completeness and returns the problems found.
pub fn validate_records(records: &[TestRecord]) -> Vec<ValidationError> {
    records.iter().filter_map(|r| r.validate().err()).collect()
}

/// Prints a summary of a sync call to the console.
pub fn print_summary(report: &SyncReport) {
    println!();
    println!("Upload Results:");
    println!("  Records:      {}", report.attempted.len());
    println!(
        "  Acknowledged: {}",
        console::style(report.acknowledged.len()).green()
    );
    if !report.rejected.is_empty() {
        println!("  Rejected:     {}", console::style(report.rejected.len()).red());
    }
    println!("  Requests:     {}", report.exchanges);

    println!();
    if report.is_noop() {
        println!("{}", console::style("Nothing to upload.").yellow().bold());
    } else if report.rejected.is_empty() {
        println!("{}", console::style("All records uploaded!").green().bold());
    }
}

/// Prints the records refused by the service.
pub fn print_rejections(err: &Error) {
    for rejection in err.rejections() {
        println!(
            "  {} {}",
            console::style(rejection.id).red(),
            console::style(&rejection.reason).dim()
        );
    }
}
