//! In-memory report model.
//!
//! This module holds the object graph a caller builds before uploading:
//! [`TestRecord`]s, each owning an [`Achievement`] and an
//! [`AttachmentStore`], and the achievement owning a store of its own.
//!
//! ```text
//! TestRecord (LocalId)
//! ├── submitter, title, categories, description
//! ├── AttachmentStore      - test-level evidence (snippets, images, data)
//! └── Achievement
//!     ├── result           - passed | failed | nonapplicable
//!     ├── test_date
//!     └── AttachmentStore  - evidence produced while evaluating
//! ```
//!
//! # Validation
//!
//! Validation is split in two:
//!
//! - **Structural** checks run immediately in the setter that receives the
//!   value (e.g. a category token without a `namespace:` prefix).
//! - **Completeness** checks run once, when a record is about to be
//!   transmitted ([`TestRecord::validate`]). Fields may be set in any order.
//!
//! Builder setters never perform network I/O. Attachment file adds read the
//! file into memory at call time and fail immediately if it cannot be read.

pub mod achievement;
pub mod attachment;
pub mod record;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use achievement::{Achievement, AchievementResult};
pub use attachment::{Attachment, AttachmentStore};
pub use record::{Description, TestRecord};

/// Result type for builder and validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Errors raised when a record or container operation is structurally invalid.
///
/// Structural errors (`MalformedCategory`, `EmptyCategories`) are raised by
/// the setter that received the bad value. `Incomplete` is raised at
/// transmission time. The remaining variants come from [`Container`]
/// bookkeeping.
///
/// [`Container`]: crate::container::Container
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A category token is not of the form `namespace:value`.
    #[error("Malformed category '{0}': expected 'namespace:value'")]
    MalformedCategory(String),

    /// `categories_set` was called without any token.
    #[error("At least one category is required")]
    EmptyCategories,

    /// A record is missing fields required for transmission.
    #[error("Record {id} is incomplete, missing: {}", missing.join(", "))]
    Incomplete {
        /// Local identifier of the offending record.
        id: LocalId,
        /// Names of the missing fields, in declaration order.
        missing: Vec<&'static str>,
    },

    /// The same record (by local identifier) was added twice.
    #[error("Record {0} was already added to this container")]
    DuplicateRecord(LocalId),

    /// A record was modified after the service acknowledged it.
    #[error("Record {0} is acknowledged and can no longer be modified")]
    AlreadyAcknowledged(LocalId),

    /// A record was modified while a transmission containing it was running.
    #[error("Record {0} is being transmitted and cannot be modified")]
    InFlight(LocalId),

    /// The container does not hold a record with this identifier.
    #[error("Unknown record {0}")]
    UnknownRecord(LocalId),

    /// The configured endpoint is not a usable URL.
    #[error("Invalid endpoint URL '{0}'")]
    InvalidUrl(String),

    /// `sync` was called before an endpoint was configured.
    #[error("No endpoint URL configured")]
    NoEndpoint,
}

/// Client-assigned identifier of a [`TestRecord`].
///
/// Generated once when the record is created and used to track
/// acknowledgment independently of user-visible fields such as the title.
/// Clones of a record share its identifier.
///
/// # Example
///
/// ```
/// use hippod_client::model::TestRecord;
///
/// let a = TestRecord::new();
/// let b = TestRecord::new();
/// assert_ne!(a.id(), b.id());
/// assert_eq!(a.clone().id(), a.id());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(uuid::Uuid);

impl LocalId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for LocalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

/// Appends `value` to `set` unless it is already present.
///
/// Keeps the first-insertion order, which the service uses for rendering.
pub(crate) fn push_unique(set: &mut Vec<String>, value: impl Into<String>) {
    let value = value.into();
    if !set.contains(&value) {
        set.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_id_roundtrip_through_string() {
        let id = LocalId::generate();
        let parsed: LocalId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_push_unique_keeps_first_order() {
        let mut set = Vec::new();
        push_unique(&mut set, "b");
        push_unique(&mut set, "a");
        push_unique(&mut set, "b");
        assert_eq!(set, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_incomplete_message_lists_fields() {
        let id = LocalId::generate();
        let err = ValidationError::Incomplete {
            id,
            missing: vec!["title", "categories"],
        };
        let msg = err.to_string();
        assert!(msg.contains("title, categories"));
        assert!(msg.contains(&id.to_string()));
    }
}
