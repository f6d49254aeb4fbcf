//! Transport abstraction between the sync controller and the service.
//!
//! A transmission is split into two narrow steps so each can be replaced
//! independently:
//!
//! - [`Codec`] turns a batch of records into an [`EncodedRequest`] and turns
//!   the service's [`RawResponse`] back into per-record outcomes.
//! - [`Transport`] carries one encoded request to the endpoint and returns
//!   the raw response.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Codec                                 │
//! │  encode(&[&TestRecord]) ───► EncodedRequest (ordered parts)  │
//! └───────────────────────────────────┬──────────────────────────┘
//!                                     ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Transport                              │
//! │  send(&Target, EncodedRequest) ───► RawResponse              │
//! └───────────────────────────────────┬──────────────────────────┘
//!                                     ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Codec                                 │
//! │  decode(ids, &RawResponse) ───► LocalId → RecordOutcome      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Implementations
//!
//! | Type | Module | Description |
//! |------|--------|-------------|
//! | [`MultipartCodec`] | [`codec`] | JSON manifest plus one binary part per attachment |
//! | [`HttpTransport`] | [`http`] | `multipart/form-data` POST via reqwest |
//!
//! # Error Handling
//!
//! All operations return [`TransportResult<T>`]. Errors are categorized so
//! the caller can decide whether a retry makes sense:
//! - **Retryable**: `Connection`, `Timeout`, 5xx/408/429 `Status`
//! - **Fatal**: other `Status`, `MalformedResponse`, `Encode`

pub mod codec;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use crate::model::LocalId;

pub use codec::{Codec, MultipartCodec, RecordOutcome};
pub use http::HttpTransport;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur while exchanging a batch with the service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established or broke mid-exchange.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The exchange did not complete within the configured timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The service answered with a non-success HTTP status.
    #[error("Unexpected HTTP status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The service answered with a body that could not be interpreted.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The batch could not be encoded into a request.
    #[error("Failed to encode request: {0}")]
    Encode(String),
}

impl TransportError {
    /// Returns `true` for failures where the same request may succeed later.
    ///
    /// # Example
    ///
    /// ```
    /// use hippod_client::transport::TransportError;
    ///
    /// assert!(TransportError::Connection("refused".into()).is_retryable());
    /// assert!(TransportError::Status { status: 503, body: String::new() }.is_retryable());
    /// assert!(!TransportError::Status { status: 400, body: String::new() }.is_retryable());
    /// assert!(!TransportError::MalformedResponse("eof".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::MalformedResponse(_) | Self::Encode(_) => false,
        }
    }
}

/// One section of an encoded request, in transmission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// A textual field.
    Text {
        /// Form field name.
        name: String,
        /// Field value.
        value: String,
        /// MIME type of the value.
        content_type: String,
    },
    /// A binary section carrying attachment content.
    File {
        /// Form field name, encoding the owning record and position.
        name: String,
        /// Attachment name.
        file_name: String,
        /// Declared content-type token of the attachment.
        kind: String,
        /// Raw content.
        content: Vec<u8>,
    },
}

impl Part {
    /// Returns the form field name.
    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::File { name, .. } => name,
        }
    }
}

/// A transport-independent description of one request.
///
/// Produced by a [`Codec`]. Field order is deterministic for a given input,
/// which keeps transmissions reproducible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRequest {
    /// Identifiers of the records represented in this request, in order.
    pub record_ids: Vec<LocalId>,

    /// Ordered request sections.
    pub parts: Vec<Part>,
}

/// What the service sent back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Returns `true` for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Where and how long to send a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Base endpoint URL of the service.
    pub url: Url,
    /// Upper bound for a single exchange.
    pub timeout: Duration,
}

/// Carries encoded requests to the service.
///
/// Implementations must not retry on their own: a failed exchange is
/// reported to the sync controller, which leaves the affected records
/// pending for the caller's next `sync` call.
///
/// # Thread Safety
///
/// Transports must be `Send + Sync` so a container can be shared across
/// tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and returns the raw response.
    ///
    /// A non-success status is not an error at this level; interpreting the
    /// status is the codec's job.
    ///
    /// # Errors
    ///
    /// - `TransportError::Connection` - connection refused or broken
    /// - `TransportError::Timeout` - `target.timeout` elapsed
    async fn send(&self, target: &Target, request: EncodedRequest)
    -> TransportResult<RawResponse>;
}
