//! Crate-level error type.
//!
//! Errors are grouped by where they surface:
//!
//! | Variant | Raised by | Effect on state |
//! |---------|-----------|-----------------|
//! | `Validation` | setters, `add`, `update`, start of `sync` | none |
//! | `Io` | attachment file adds | store unchanged |
//! | `Transport` | `sync` / `upload` | failed records stay pending |
//! | `Rejected` | `sync` / `upload` | accepted records acknowledged, rejected stay pending |
//!
//! Transmission errors are raised after the container has recorded every
//! per-record outcome of the attempt, so a caller handling the error sees
//! up-to-date pending and acknowledged sets.

use std::fmt;
use std::path::PathBuf;

use crate::model::{LocalId, ValidationError};
use crate::transport::TransportError;

/// Result type for fallible crate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A record the service explicitly refused, with its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Local identifier of the rejected record.
    pub id: LocalId,
    /// Reason given by the service.
    pub reason: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.reason)
    }
}

/// Errors returned by the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A structural or completeness check failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An attachment file could not be read when it was added.
    #[error("Failed to read attachment {}: {source}", path.display())]
    Io {
        /// Path that was being read.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The exchange with the service failed.
    ///
    /// Every record of the failed exchange is left pending. Use
    /// [`Error::is_retryable`] to decide whether calling `sync` again can help.
    /// Rejections received from batches answered before the failure are
    /// kept in `rejected`.
    #[error("Transmission failed, {pending} record(s) left pending: {source}")]
    Transport {
        #[source]
        source: TransportError,
        /// Number of records of this attempt that were not acknowledged.
        pending: usize,
        /// Records refused by earlier batches of the same attempt.
        rejected: Vec<Rejection>,
    },

    /// The service refused one or more records.
    #[error("Service rejected {} record(s): {}", .0.len(), join_rejections(.0))]
    Rejected(Vec<Rejection>),
}

impl Error {
    /// Returns `true` if retrying the same call may succeed.
    ///
    /// Only connection failures, timeouts and server-side errors qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns the rejections carried by this error, if any.
    ///
    /// A transport failure also carries the rejections of the batches that
    /// were answered before it.
    pub fn rejections(&self) -> &[Rejection] {
        match self {
            Self::Rejected(rejections) => rejections,
            Self::Transport { rejected, .. } => rejected,
            _ => &[],
        }
    }
}

fn join_rejections(rejections: &[Rejection]) -> String {
    rejections
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_message_names_each_record() {
        let a = LocalId::generate();
        let b = LocalId::generate();
        let err = Error::Rejected(vec![
            Rejection {
                id: a,
                reason: "missing anchor".into(),
            },
            Rejection {
                id: b,
                reason: "bad category".into(),
            },
        ]);

        let msg = err.to_string();
        assert!(msg.starts_with("Service rejected 2 record(s)"));
        assert!(msg.contains(&format!("{}: missing anchor", a)));
        assert!(msg.contains(&format!("{}: bad category", b)));
        assert_eq!(err.rejections().len(), 2);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_retryability_is_forwarded() {
        let err = Error::Transport {
            source: TransportError::Timeout("30s elapsed".into()),
            pending: 3,
            rejected: Vec::new(),
        };
        assert!(err.is_retryable());

        let err = Error::Transport {
            source: TransportError::MalformedResponse("not json".into()),
            pending: 3,
            rejected: Vec::new(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_error_exposes_earlier_rejections() {
        let id = LocalId::generate();
        let err = Error::Transport {
            source: TransportError::Connection("refused".into()),
            pending: 2,
            rejected: vec![Rejection {
                id,
                reason: "bad".into(),
            }],
        };

        assert!(err.is_retryable());
        assert_eq!(err.rejections().len(), 1);
        assert_eq!(err.rejections()[0].id, id);
    }
}
