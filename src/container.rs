//! The container: records of one reporting session and where to send them.
//!
//! A [`Container`] owns every [`TestRecord`] added to it, remembers which
//! ones the service has acknowledged, and transmits the rest on
//! [`sync`](Container::sync) / [`upload`](Container::upload).
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
//!     t.title_set("random title");
//!     t.categories_set(["team:foo"])?;
//!     t.achievement.result = Some(AchievementResult::Passed);
//!
//!     let id = container.add(t)?;
//!     container.upload().await?;
//!     assert!(container.state(&id).unwrap().is_acknowledged());
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! All methods take `&self`, so a container can be shared through an `Arc`.
//! Calls to `sync`/`upload` are serialized: at most one transmission per
//! container runs at a time, and a second caller waits for the first to
//! finish before computing what is still pending. No background task is
//! spawned; the transmission runs inside the caller's future.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::model::{LocalId, TestRecord, ValidationError, ValidationResult};
use crate::sync::{Ledger, RecordState, SyncController, SyncReport, lock};
use crate::transport::{Codec, HttpTransport, MultipartCodec, Target, Transport};

/// Default timeout for a single exchange with the service.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum number of records per request.
pub const DEFAULT_MAX_BATCH_RECORDS: usize = 32;

#[derive(Debug, Clone)]
struct Settings {
    url: Option<Url>,
    timeout: Duration,
    max_batch_records: usize,
}

/// Client-side aggregate of test records plus endpoint configuration.
pub struct Container {
    settings: Mutex<Settings>,
    ledger: Mutex<Ledger>,
    flight: tokio::sync::Mutex<()>,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("settings", &self.settings())
            .field("records", &self.len())
            .finish()
    }
}

impl Container {
    /// Creates a container using HTTP, without an endpoint yet.
    ///
    /// Call [`set_url`](Self::set_url) before syncing.
    pub fn new() -> Result<Self> {
        let transport = HttpTransport::new().map_err(|source| crate::Error::Transport {
            source,
            pending: 0,
            rejected: Vec::new(),
        })?;
        Ok(Self::with_transport(transport))
    }

    /// Creates a container using HTTP and the given endpoint.
    pub fn with_url(url: &str) -> Result<Self> {
        let container = Self::new()?;
        container.set_url(url)?;
        Ok(container)
    }

    /// Creates a container from loaded configuration.
    pub fn with_config(config: &ClientConfig) -> Result<Self> {
        let container = Self::new()?;
        container.apply_config(config)?;
        Ok(container)
    }

    /// Creates a container over a custom transport and the default codec.
    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self::with_parts(Arc::new(transport), Arc::new(MultipartCodec))
    }

    /// Creates a container over a custom transport and codec.
    pub fn with_parts(transport: Arc<dyn Transport>, codec: Arc<dyn Codec>) -> Self {
        Self {
            settings: Mutex::new(Settings {
                url: None,
                timeout: DEFAULT_TIMEOUT,
                max_batch_records: DEFAULT_MAX_BATCH_RECORDS,
            }),
            ledger: Mutex::new(Ledger::default()),
            flight: tokio::sync::Mutex::new(()),
            transport,
            codec,
        }
    }

    /// Applies endpoint, timeout and batch size from configuration.
    pub fn apply_config(&self, config: &ClientConfig) -> ValidationResult<()> {
        if let Some(url) = &config.url {
            self.set_url(url)?;
        }
        self.set_timeout(Duration::from_secs(config.timeout_secs));
        self.set_max_batch_records(config.max_batch_records);
        Ok(())
    }

    /// Sets the endpoint. The last call wins.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidUrl`] if `url` is not an absolute
    /// `http` or `https` URL. The previous endpoint is kept.
    pub fn set_url(&self, url: &str) -> ValidationResult<()> {
        let parsed = Url::parse(url).map_err(|_| ValidationError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidUrl(url.to_string()));
        }
        self.settings_mut(|s| s.url = Some(parsed));
        Ok(())
    }

    /// Returns the configured endpoint.
    pub fn url(&self) -> Option<Url> {
        self.settings().url
    }

    /// Sets the timeout applied to each exchange.
    pub fn set_timeout(&self, timeout: Duration) {
        self.settings_mut(|s| s.timeout = timeout);
    }

    /// Sets the maximum number of records per request (at least 1).
    pub fn set_max_batch_records(&self, max: usize) {
        self.settings_mut(|s| s.max_batch_records = max.max(1));
    }

    /// Adds a record and returns its local identifier.
    ///
    /// Completeness is not checked here but when the record is transmitted.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DuplicateRecord`] if a record with the same
    /// identifier (the same record, or a clone of it) was already added.
    pub fn add(&self, record: TestRecord) -> ValidationResult<LocalId> {
        let id = lock(&self.ledger).insert(record)?;
        debug!("Added record {}", id);
        Ok(id)
    }

    /// Modifies a record that has not been acknowledged yet.
    ///
    /// Acknowledged records are immutable: the service already stored them,
    /// and changing the local copy would not be reflected remotely.
    ///
    /// # Errors
    ///
    /// - `ValidationError::UnknownRecord` - no record with this identifier
    /// - `ValidationError::AlreadyAcknowledged` - the record was acknowledged
    /// - `ValidationError::InFlight` - the record is being transmitted
    ///
    /// # Example
    ///
    /// ```
    /// use hippod_client::{AchievementResult, Container, TestRecord};
    ///
    /// let container = Container::new()?;
    /// let id = container.add(TestRecord::new())?;
    /// container.update(&id, |t| t.achievement.result = Some(AchievementResult::Failed))?;
    /// # Ok::<(), hippod_client::Error>(())
    /// ```
    pub fn update<F, R>(&self, id: &LocalId, f: F) -> ValidationResult<R>
    where
        F: FnOnce(&mut TestRecord) -> R,
    {
        let mut ledger = lock(&self.ledger);
        let record = ledger.record_mut(id)?;
        Ok(f(record))
    }

    /// Returns a copy of a record.
    pub fn record(&self, id: &LocalId) -> Option<TestRecord> {
        lock(&self.ledger).get(id).map(|e| e.record.clone())
    }

    /// Returns the transmission state of a record.
    pub fn state(&self, id: &LocalId) -> Option<RecordState> {
        lock(&self.ledger).get(id).map(|e| e.state.clone())
    }

    /// Identifiers of records not acknowledged yet, in insertion order.
    pub fn pending_ids(&self) -> Vec<LocalId> {
        self.ids_where(|s| !s.is_acknowledged())
    }

    /// Identifiers of acknowledged records, in insertion order.
    pub fn acknowledged_ids(&self) -> Vec<LocalId> {
        self.ids_where(RecordState::is_acknowledged)
    }

    /// Number of records ever added.
    pub fn len(&self) -> usize {
        lock(&self.ledger).len()
    }

    /// Returns `true` if no record was added.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transmits every record that has not been acknowledged.
    ///
    /// Incremental: only records added or failed since the last successful
    /// call are sent, and a call with nothing pending performs no exchange.
    /// Records are acknowledged strictly from the service's per-record
    /// answer.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` - no endpoint, or a pending record is
    ///   incomplete; nothing is sent
    /// - `Error::Transport` - an exchange failed; its records stay pending
    /// - `Error::Rejected` - some records were refused; the others are
    ///   acknowledged
    ///
    /// In every case the container's state is updated before the error is
    /// returned.
    pub async fn sync(&self) -> Result<SyncReport> {
        let _flight = self.flight.lock().await;

        let settings = self.settings();
        let url = settings.url.ok_or(ValidationError::NoEndpoint)?;

        SyncController {
            ledger: &self.ledger,
            transport: self.transport.as_ref(),
            codec: self.codec.as_ref(),
            target: Target {
                url,
                timeout: settings.timeout,
            },
            max_batch_records: settings.max_batch_records,
        }
        .run()
        .await
    }

    /// Same as [`sync`](Self::sync).
    ///
    /// Calling `upload` repeatedly without adding records sends each record
    /// once; later calls are no-ops.
    pub async fn upload(&self) -> Result<SyncReport> {
        self.sync().await
    }

    fn ids_where(&self, keep: impl Fn(&RecordState) -> bool) -> Vec<LocalId> {
        lock(&self.ledger)
            .entries()
            .filter(|e| keep(&e.state))
            .map(|e| e.record.id())
            .collect()
    }

    fn settings(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn settings_mut(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = self
            .settings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut settings);
    }
}
