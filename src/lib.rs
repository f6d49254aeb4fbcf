//! hippod-client: submit test reports to a hippod test-result service.
//!
//! A caller builds [`TestRecord`]s in memory, adds them to a [`Container`],
//! and calls [`Container::sync`] (or its alias [`Container::upload`]) to
//! transmit whatever has not been acknowledged yet. Calls can be repeated
//! at any time: only new or previously failed records are sent.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Model**: Records, achievements and attachments ([`model`])
//! - **Container**: Records of a session and their states ([`container`])
//! - **Sync**: Pending selection, batching and reconciliation ([`sync`])
//! - **Transport**: Wire encoding and HTTP exchange ([`transport`])
//!
//! # Example
//!
//! ```no_run
//! use hippod_client::{AchievementResult, Container, TestRecord};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let container = Container::with_url("http://127.0.0.1/")?;
//!
//!     let mut t = TestRecord::new();
//!     t.submitter_set("anonymous");
//!     t.title_set("Snippet Test Item");
//!     t.description_plain_set("Simple Description");
//!     t.categories_set(["team:foo"])?;
//!     t.snippet_file_add("snippet.py", "x-snippet-python3-matplot-png")?;
//!     t.achievement.result = Some(AchievementResult::Nonapplicable);
//!
//!     container.add(t)?;
//!     container.upload().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod model;
pub mod report;
pub mod sync;
pub mod transport;

// Re-export commonly used types
pub use config::{ClientConfig, Config, load_config};
pub use container::Container;
pub use error::{Error, Rejection, Result};
pub use model::{
    Achievement, AchievementResult, Attachment, AttachmentStore, Description, LocalId,
    TestRecord, ValidationError,
};
pub use sync::{RecordState, SyncReport};
pub use transport::{Codec, HttpTransport, MultipartCodec, Transport, TransportError};
