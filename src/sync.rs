//! Synchronization of a container's records with the service.
//!
//! # Record States
//!
//! ```text
//!            add()
//!              │
//!              ▼
//!           Unsent ──────┐
//!                        │ sync()
//!   ┌───────────────► InFlight ─────────────┐
//!   │                    │                  │ explicit per-record success
//!   │ sync()             │ transport error, │
//!   │                    │ rejection,       ▼
//!   └──────────────── Pending      Acknowledged (terminal)
//!                      abandoned call
//! ```
//!
//! Only `Unsent` and `Pending` records are transmitted, which makes `sync`
//! incremental: calling it again after everything was acknowledged is a
//! no-op without any network exchange.
//!
//! # Batching
//!
//! Records are sent in batches of at most `max_batch_records`, in the order
//! they were added. Each record of a sync call is part of exactly one
//! request. Batches are sent one after another; the first transport failure
//! ends the call. Outcomes of batches that were already answered are kept,
//! the failed batch and any batch not yet sent stay pending.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{Error, Rejection, Result};
use crate::model::{LocalId, TestRecord, ValidationError, ValidationResult};
use crate::transport::codec::NOT_ACKNOWLEDGED;
use crate::transport::{Codec, RecordOutcome, Target, Transport};

/// Reason recorded when a sync call is dropped before its exchange finished.
const ABANDONED: &str = "transmission abandoned before a response was received";

/// Transmission state of a record inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    /// Added but never transmitted.
    Unsent,
    /// Part of a request whose response has not been processed yet.
    InFlight,
    /// Transmitted without acknowledgment; will be sent again.
    ///
    /// Holds the reason of the last failed attempt.
    Pending(String),
    /// Stored by the service. Never left once reached.
    Acknowledged,
}

impl RecordState {
    /// Returns `true` if the next sync call will transmit the record.
    pub fn is_transmittable(&self) -> bool {
        matches!(self, Self::Unsent | Self::Pending(_))
    }

    /// Returns `true` once the service has acknowledged the record.
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged)
    }
}

/// Summary of one sync call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records selected for transmission, in order.
    pub attempted: Vec<LocalId>,

    /// Records acknowledged during this call.
    pub acknowledged: Vec<LocalId>,

    /// Records the service refused during this call.
    pub rejected: Vec<Rejection>,

    /// Number of HTTP exchanges performed.
    pub exchanges: usize,
}

impl SyncReport {
    /// Returns `true` if nothing needed to be sent.
    pub fn is_noop(&self) -> bool {
        self.attempted.is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) record: TestRecord,
    pub(crate) state: RecordState,
}

/// Ordered records of a container together with their states.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    entries: Vec<Entry>,
    index: HashMap<LocalId, usize>,
}

impl Ledger {
    pub(crate) fn insert(&mut self, record: TestRecord) -> ValidationResult<LocalId> {
        let id = record.id();
        if self.index.contains_key(&id) {
            return Err(ValidationError::DuplicateRecord(id));
        }
        self.index.insert(id, self.entries.len());
        self.entries.push(Entry {
            record,
            state: RecordState::Unsent,
        });
        Ok(id)
    }

    pub(crate) fn get(&self, id: &LocalId) -> Option<&Entry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    fn get_mut(&mut self, id: &LocalId) -> Option<&mut Entry> {
        self.index.get(id).map(|&i| &mut self.entries[i])
    }

    /// Gives mutable access to a record that has not been acknowledged.
    pub(crate) fn record_mut(&mut self, id: &LocalId) -> ValidationResult<&mut TestRecord> {
        let entry = self
            .get_mut(id)
            .ok_or(ValidationError::UnknownRecord(*id))?;
        match entry.state {
            RecordState::Acknowledged => Err(ValidationError::AlreadyAcknowledged(*id)),
            RecordState::InFlight => Err(ValidationError::InFlight(*id)),
            _ => Ok(&mut entry.record),
        }
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn transmittable(&self) -> Vec<LocalId> {
        self.entries
            .iter()
            .filter(|e| e.state.is_transmittable())
            .map(|e| e.record.id())
            .collect()
    }

    fn set_state(&mut self, id: &LocalId, state: RecordState) {
        if let Some(entry) = self.get_mut(id) {
            if entry.state.is_acknowledged() {
                warn!("Ignoring state change of acknowledged record {}", id);
                return;
            }
            entry.state = state;
        }
    }
}

pub(crate) fn lock(ledger: &Mutex<Ledger>) -> MutexGuard<'_, Ledger> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records of one request that are waiting for their outcome.
///
/// If dropped without being settled, e.g. because the sync future was
/// cancelled mid-exchange, the records fall back to `Pending`.
struct InFlight<'a> {
    ledger: &'a Mutex<Ledger>,
    ids: Vec<LocalId>,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn begin(ledger: &'a Mutex<Ledger>, guard: &mut Ledger, ids: &[LocalId]) -> Self {
        for id in ids {
            guard.set_state(id, RecordState::InFlight);
        }
        Self {
            ledger,
            ids: ids.to_vec(),
            settled: false,
        }
    }

    /// Applies decoded outcomes. Returns (acknowledged, rejected).
    fn settle(
        mut self,
        outcomes: BTreeMap<LocalId, RecordOutcome>,
    ) -> (Vec<LocalId>, Vec<Rejection>) {
        let mut acknowledged = Vec::new();
        let mut rejected = Vec::new();
        let mut ledger = lock(self.ledger);

        for id in &self.ids {
            match outcomes.get(id) {
                Some(RecordOutcome::Acknowledged) => {
                    ledger.set_state(id, RecordState::Acknowledged);
                    acknowledged.push(*id);
                }
                Some(RecordOutcome::Rejected(reason)) => {
                    ledger.set_state(id, RecordState::Pending(reason.clone()));
                    rejected.push(Rejection {
                        id: *id,
                        reason: reason.clone(),
                    });
                }
                None => {
                    ledger.set_state(id, RecordState::Pending(NOT_ACKNOWLEDGED.to_string()));
                    rejected.push(Rejection {
                        id: *id,
                        reason: NOT_ACKNOWLEDGED.to_string(),
                    });
                }
            }
        }

        self.settled = true;
        (acknowledged, rejected)
    }

    fn fail(mut self, reason: &str) {
        let mut ledger = lock(self.ledger);
        for id in &self.ids {
            ledger.set_state(id, RecordState::Pending(reason.to_string()));
        }
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut ledger = lock(self.ledger);
        for id in &self.ids {
            ledger.set_state(id, RecordState::Pending(ABANDONED.to_string()));
        }
    }
}

/// Runs one sync call against a ledger.
///
/// The caller is responsible for serializing calls on the same ledger.
pub(crate) struct SyncController<'a> {
    pub(crate) ledger: &'a Mutex<Ledger>,
    pub(crate) transport: &'a dyn Transport,
    pub(crate) codec: &'a dyn Codec,
    pub(crate) target: Target,
    pub(crate) max_batch_records: usize,
}

impl SyncController<'_> {
    /// Transmits every transmittable record and reconciles the outcomes.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` - a pending record is incomplete; nothing is sent
    /// - `Error::Transport` - an exchange failed; its records stay pending
    /// - `Error::Rejected` - the service refused some records
    pub(crate) async fn run(self) -> Result<SyncReport> {
        let ids = {
            let ledger = lock(self.ledger);
            let ids = ledger.transmittable();
            for id in &ids {
                if let Some(entry) = ledger.get(id) {
                    entry.record.validate()?;
                }
            }
            ids
        };

        let mut report = SyncReport {
            attempted: ids.clone(),
            ..Default::default()
        };

        if ids.is_empty() {
            debug!("Nothing to sync");
            return Ok(report);
        }

        let batch_size = self.max_batch_records.max(1);
        info!(
            "Syncing {} record(s) in {} request(s) to {}",
            ids.len(),
            ids.len().div_ceil(batch_size),
            self.target.url
        );

        for batch in ids.chunks(batch_size) {
            let (request, in_flight) = {
                let mut ledger = lock(self.ledger);
                let encoded = {
                    let records: Vec<&TestRecord> = batch
                        .iter()
                        .filter_map(|id| ledger.get(id).map(|e| &e.record))
                        .collect();
                    self.codec.encode(&records)
                };
                let request = match encoded {
                    Ok(request) => request,
                    Err(source) => {
                        return Err(Error::Transport {
                            source,
                            pending: ids.len() - report.acknowledged.len(),
                            rejected: report.rejected,
                        });
                    }
                };
                let in_flight = InFlight::begin(self.ledger, &mut ledger, batch);
                (request, in_flight)
            };

            report.exchanges += 1;
            let response = self.transport.send(&self.target, request).await;
            let outcomes = response.and_then(|r| self.codec.decode(batch, &r));

            match outcomes {
                Ok(outcomes) => {
                    let (acknowledged, rejected) = in_flight.settle(outcomes);
                    debug!(
                        "Batch done: {} acknowledged, {} rejected",
                        acknowledged.len(),
                        rejected.len()
                    );
                    report.acknowledged.extend(acknowledged);
                    report.rejected.extend(rejected);
                }
                Err(source) => {
                    warn!("Sync failed after {} exchange(s): {}", report.exchanges, source);
                    in_flight.fail(&source.to_string());
                    for rejection in &report.rejected {
                        warn!("Record {} rejected: {}", rejection.id, rejection.reason);
                    }
                    return Err(Error::Transport {
                        source,
                        pending: ids.len() - report.acknowledged.len(),
                        rejected: report.rejected,
                    });
                }
            }
        }

        if report.rejected.is_empty() {
            info!("Synced {} record(s)", report.acknowledged.len());
            Ok(report)
        } else {
            warn!(
                "{} record(s) acknowledged, {} rejected",
                report.acknowledged.len(),
                report.rejected.len()
            );
            Err(Error::Rejected(report.rejected))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AchievementResult;

    fn complete(title: &str) -> TestRecord {
        let mut t = TestRecord::new();
        t.submitter_set("anonymous");
        t.title_set(title);
        t.categories_set(["team:foo"]).unwrap();
        t.achievement.result = Some(AchievementResult::Passed);
        t
    }

    #[test]
    fn test_ledger_rejects_duplicate_identity() {
        let mut ledger = Ledger::default();
        let t = complete("a");
        let copy = t.clone();

        ledger.insert(t).unwrap();
        assert_eq!(
            ledger.insert(copy.clone()).unwrap_err(),
            ValidationError::DuplicateRecord(copy.id())
        );
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_acknowledged_is_terminal() {
        let mut ledger = Ledger::default();
        let id = ledger.insert(complete("a")).unwrap();

        ledger.set_state(&id, RecordState::Acknowledged);
        ledger.set_state(&id, RecordState::Pending("late".into()));

        assert_eq!(ledger.get(&id).unwrap().state, RecordState::Acknowledged);
        assert!(ledger.transmittable().is_empty());
        assert_eq!(
            ledger.record_mut(&id).unwrap_err(),
            ValidationError::AlreadyAcknowledged(id)
        );
    }

    #[test]
    fn test_dropped_in_flight_reverts_to_pending() {
        let ledger = Mutex::new(Ledger::default());
        let id = lock(&ledger).insert(complete("a")).unwrap();

        {
            let mut guard = lock(&ledger);
            let in_flight = InFlight::begin(&ledger, &mut guard, &[id]);
            drop(guard);
            assert_eq!(lock(&ledger).get(&id).unwrap().state, RecordState::InFlight);
            drop(in_flight);
        }

        let state = lock(&ledger).get(&id).unwrap().state.clone();
        assert_eq!(state, RecordState::Pending(ABANDONED.into()));
        assert!(state.is_transmittable());
    }

    #[test]
    fn test_in_flight_record_cannot_be_modified() {
        let ledger = Mutex::new(Ledger::default());
        let id = lock(&ledger).insert(complete("a")).unwrap();

        let mut guard = lock(&ledger);
        let in_flight = InFlight::begin(&ledger, &mut guard, &[id]);
        assert_eq!(
            guard.record_mut(&id).unwrap_err(),
            ValidationError::InFlight(id)
        );
        drop(guard);
        in_flight.fail("test");
    }
}
