//! The outcome of a test and the evidence produced while evaluating it.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attachment::{Attachment, AttachmentStore};
use crate::error::Result;

/// Outcome reported for a test.
///
/// | Result | Meaning |
/// |--------|---------|
/// | `passed` | The test ran and met its expectations |
/// | `failed` | The test ran and did not meet its expectations |
/// | `nonapplicable` | The test does not apply to the tested configuration |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementResult {
    /// The test passed.
    Passed,
    /// The test failed.
    Failed,
    /// The test does not apply.
    Nonapplicable,
}

impl AchievementResult {
    /// Returns the wire token for this result.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Nonapplicable => "nonapplicable",
        }
    }
}

impl fmt::Display for AchievementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AchievementResult {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "nonapplicable" => Ok(Self::Nonapplicable),
            other => Err(format!(
                "unknown result '{}', expected passed, failed or nonapplicable",
                other
            )),
        }
    }
}

/// The single outcome record owned by a [`TestRecord`].
///
/// `result` starts out unset. A record whose achievement has no result is
/// rejected when it is about to be transmitted; there is no default outcome.
///
/// [`TestRecord`]: super::TestRecord
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Achievement {
    /// Outcome of the test, required before upload.
    pub result: Option<AchievementResult>,

    /// When the test was executed. Defaults to the creation time.
    pub test_date: DateTime<Utc>,

    /// Evidence generated during evaluation.
    pub attachment: AttachmentStore,
}

impl Default for Achievement {
    fn default() -> Self {
        Self {
            result: None,
            test_date: Utc::now(),
            attachment: AttachmentStore::default(),
        }
    }
}

impl Achievement {
    /// Sets the outcome.
    pub fn result_set(&mut self, result: AchievementResult) {
        self.result = Some(result);
    }

    /// Overrides the execution date.
    pub fn test_date_set(&mut self, date: DateTime<Utc>) {
        self.test_date = date;
    }

    /// Reads a file into the achievement's store. See
    /// [`AttachmentStore::file_add`].
    pub fn file_add(&mut self, path: impl AsRef<Path>) -> Result<&mut Attachment> {
        self.attachment.file_add(path)
    }

    /// Reads a snippet file into the achievement's store. See
    /// [`AttachmentStore::snippet_file_add`].
    pub fn snippet_file_add(
        &mut self,
        path: impl AsRef<Path>,
        kind: impl Into<String>,
    ) -> Result<&mut Attachment> {
        self.attachment.snippet_file_add(path, kind)
    }
}
