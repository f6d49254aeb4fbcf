//! Configuration schema definitions for hippod-client.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! └── ClientConfig [hippod]  - Endpoint, timeout and batching
//! ```

use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// # TOML Structure
///
/// ```toml
/// [hippod]
/// url = "http://127.0.0.1/"
/// timeout_secs = 30
/// max_batch_records = 32
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Client settings. Optional, every field has a default.
    #[serde(default)]
    pub hippod: ClientConfig,
}

/// Settings for talking to a hippod service.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `url` | None (must be set before syncing) |
/// | `timeout_secs` | 30 |
/// | `max_batch_records` | 32 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Base URL of the service.
    ///
    /// The upload endpoint is resolved relative to it.
    pub url: Option<String>,

    /// Timeout for a single HTTP exchange in seconds.
    ///
    /// An exchange that takes longer fails with a retryable timeout error
    /// and leaves its records pending.
    ///
    /// Default: 30
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum number of records sent in one request.
    ///
    /// Larger reports are split over several requests. Values below 1 are
    /// treated as 1.
    ///
    /// Default: 32
    #[serde(default = "default_max_batch_records")]
    pub max_batch_records: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout(),
            max_batch_records: default_max_batch_records(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_max_batch_records() -> usize {
    32
}
