//! Test records: the reportable unit sent to the service.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::achievement::Achievement;
use super::attachment::{Attachment, AttachmentStore};
use super::{LocalId, ValidationError, ValidationResult, push_unique};
use crate::error::Result;

static CATEGORY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^:\s]+:\S(?:.*\S)?$").expect("category pattern is a valid regex")
});

/// Description text with its markup format.
///
/// A record carries at most one description; setting a new one replaces the
/// previous text and its format together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Description {
    /// Plain text, rendered verbatim.
    Plain(String),
    /// Markdown, rendered as rich text.
    Markdown(String),
}

impl Description {
    /// Returns the wire token for the format.
    pub fn format(&self) -> &'static str {
        match self {
            Self::Plain(_) => "plain",
            Self::Markdown(_) => "markdown",
        }
    }

    /// Returns the description text.
    pub fn text(&self) -> &str {
        match self {
            Self::Plain(text) | Self::Markdown(text) => text,
        }
    }
}

/// One reportable test with metadata, evidence and exactly one outcome.
///
/// Fields can be set in any order. Whether the record is complete is only
/// checked when it is about to be transmitted (see [`validate`]).
///
/// # Example
///
/// ```
/// use hippod_client::model::{AchievementResult, TestRecord};
///
/// let mut t = TestRecord::new();
/// t.submitter_set("anonymous");
/// t.title_set("random title");
/// t.categories_set(["team:foo"])?;
/// t.description_markdown_set("# Heading");
/// t.achievement.result = Some(AchievementResult::Passed);
///
/// assert!(t.validate().is_ok());
/// # Ok::<(), hippod_client::model::ValidationError>(())
/// ```
///
/// [`validate`]: Self::validate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    id: LocalId,
    submitter: Option<String>,
    title: Option<String>,
    categories: Vec<String>,
    description: Option<Description>,

    /// Test-level evidence.
    pub attachment: AttachmentStore,

    /// The outcome of this test.
    pub achievement: Achievement,
}

impl Default for TestRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRecord {
    /// Creates an empty record with a fresh local identifier.
    pub fn new() -> Self {
        Self {
            id: LocalId::generate(),
            submitter: None,
            title: None,
            categories: Vec::new(),
            description: None,
            attachment: AttachmentStore::default(),
            achievement: Achievement::default(),
        }
    }

    /// Returns the local identifier assigned at creation.
    pub fn id(&self) -> LocalId {
        self.id
    }

    /// Sets the submitter.
    pub fn submitter_set(&mut self, submitter: impl Into<String>) {
        self.submitter = Some(submitter.into());
    }

    /// Sets the title. Titles need not be unique.
    pub fn title_set(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    /// Replaces the categories with the given `namespace:value` tokens.
    ///
    /// Duplicates are collapsed, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedCategory`] for the first token
    /// without a namespace separator, or [`ValidationError::EmptyCategories`]
    /// if no token was given. The current categories are left unchanged in
    /// both cases.
    pub fn categories_set<I, S>(&mut self, tokens: I) -> ValidationResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parsed = parse_categories(tokens)?;
        if parsed.is_empty() {
            return Err(ValidationError::EmptyCategories);
        }
        self.categories = parsed;
        Ok(())
    }

    /// Appends categories to the current set.
    ///
    /// All tokens are checked before any is added.
    pub fn categories_add<I, S>(&mut self, tokens: I) -> ValidationResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for category in parse_categories(tokens)? {
            push_unique(&mut self.categories, category);
        }
        Ok(())
    }

    /// Sets a plain-text description, replacing any previous one.
    pub fn description_plain_set(&mut self, text: impl Into<String>) {
        self.description = Some(Description::Plain(text.into()));
    }

    /// Sets a markdown description, replacing any previous one.
    ///
    /// Common leading indentation and surrounding blank lines are removed,
    /// so indented string literals render as written.
    pub fn description_markdown_set(&mut self, text: impl AsRef<str>) {
        self.description = Some(Description::Markdown(dedent(text.as_ref())));
    }

    /// Reads a file into the test-level store. See
    /// [`AttachmentStore::file_add`].
    pub fn file_add(&mut self, path: impl AsRef<Path>) -> Result<&mut Attachment> {
        self.attachment.file_add(path)
    }

    /// Reads a snippet file into the test-level store. See
    /// [`AttachmentStore::snippet_file_add`].
    pub fn snippet_file_add(
        &mut self,
        path: impl AsRef<Path>,
        kind: impl Into<String>,
    ) -> Result<&mut Attachment> {
        self.attachment.snippet_file_add(path, kind)
    }

    pub fn submitter(&self) -> Option<&str> {
        self.submitter.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn description(&self) -> Option<&Description> {
        self.description.as_ref()
    }

    /// Checks that the record has everything the service requires.
    ///
    /// Required: a non-blank submitter and title, at least one category,
    /// and an achievement result.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Incomplete`] listing every missing field.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut missing = Vec::new();
        if is_blank(self.submitter.as_deref()) {
            missing.push("submitter");
        }
        if is_blank(self.title.as_deref()) {
            missing.push("title");
        }
        if self.categories.is_empty() {
            missing.push("categories");
        }
        if self.achievement.result.is_none() {
            missing.push("achievement.result");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Incomplete {
                id: self.id,
                missing,
            })
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn parse_categories<I, S>(tokens: I) -> ValidationResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut parsed = Vec::new();
    for token in tokens {
        let token = token.into();
        let token = token.trim();
        if !CATEGORY_PATTERN.is_match(token) {
            return Err(ValidationError::MalformedCategory(token.to_string()));
        }
        push_unique(&mut parsed, token);
    }
    Ok(parsed)
}

/// Removes the common leading run of spaces and tabs, plus surrounding
/// blank lines.
///
/// Only an identical prefix is removed: a tab and spaces never cancel out,
/// and other whitespace (e.g. NBSP) is content.
fn dedent(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let margin = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let rest = l.trim_start_matches([' ', '\t']);
            &l[..l.len() - rest.len()]
        })
        .reduce(common_prefix)
        .unwrap_or("");

    let body: Vec<&str> = lines
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                ""
            } else {
                l.strip_prefix(margin).unwrap_or(l)
            }
        })
        .collect();

    let start = body.iter().position(|l| !l.trim().is_empty());
    let end = body.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(start), Some(end)) => body[start..=end]
            .iter()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Longest common prefix of two runs of ASCII spaces and tabs.
fn common_prefix<'a>(a: &'a str, b: &'a str) -> &'a str {
    let len = a
        .bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    &a[..len]
}
