//! Scan history — fetched records, search filter, refresh.
//!
//! Key properties:
//! - `visible` is a stable projection of `records`, recomputed on every fetch
//!   and query change; service order is never re-sorted
//! - A failed refresh keeps the previously loaded records
//! - At most one fetch is outstanding; a refresh requested meanwhile is skipped
//! - The fetch slot is released when its ticket drops, so a refresh future that
//!   is cancelled mid-fetch does not block later refreshes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client::AnalysisService;
use crate::errors::TransportError;
use crate::models::ScanRecord;

/// Outcome of a refresh that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Records replaced; carries the new total.
    Replaced(usize),
    /// Another fetch was already outstanding.
    AlreadyInFlight,
    /// The ticket belongs to another store; nothing was applied.
    ForeignTicket,
}

/// Holds a store's fetch slot. Dropping it, finished or not, frees the slot.
#[derive(Debug)]
#[must_use = "a started refresh must be finished"]
pub struct RefreshTicket {
    slot: Arc<AtomicBool>,
}

impl Drop for RefreshTicket {
    fn drop(&mut self) {
        self.slot.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub struct HistoryStore {
    records: Vec<ScanRecord>,
    query: String,
    /// Indices into `records`, ascending.
    visible: Vec<usize>,
    /// Set while a ticket is alive. Its address identifies this store.
    in_flight: Arc<AtomicBool>,
    /// False until a fetch resolves either way.
    loaded: bool,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ScanRecord] {
        &self.records
    }

    /// Fetched total, regardless of query.
    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn visible(&self) -> impl Iterator<Item = &ScanRecord> + '_ {
        self.visible.iter().map(move |&i| &self.records[i])
    }

    pub fn visible_len(&self) -> usize {
        self.visible.len()
    }

    /// No fetch has resolved yet.
    pub fn is_loading(&self) -> bool {
        !self.loaded
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn find(&self, id: i64) -> Option<&ScanRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
        self.recompute();
    }

    /// Case-insensitive substring match on patient name or prediction.
    fn recompute(&mut self) {
        let needle = self.query.to_lowercase();
        self.visible = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                needle.is_empty()
                    || r.patient_name.to_lowercase().contains(&needle)
                    || r.prediction.to_lowercase().contains(&needle)
            })
            .map(|(i, _)| i)
            .collect();
    }

    /// Claim the fetch slot. `None` when a fetch is already outstanding.
    pub fn begin_refresh(&mut self) -> Option<RefreshTicket> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(RefreshTicket {
            slot: Arc::clone(&self.in_flight),
        })
    }

    /// Apply a fetch outcome. Records are replaced only on success, and only
    /// with a ticket this store issued.
    pub fn finish_refresh(
        &mut self,
        ticket: RefreshTicket,
        outcome: Result<Vec<ScanRecord>, TransportError>,
    ) -> Result<RefreshOutcome, TransportError> {
        if !Arc::ptr_eq(&ticket.slot, &self.in_flight) {
            tracing::warn!("Refresh ticket from another history store ignored");
            return Ok(RefreshOutcome::ForeignTicket);
        }
        drop(ticket);
        self.loaded = true;

        match outcome {
            Ok(records) => {
                self.records = records;
                self.recompute();
                tracing::debug!(count = self.records.len(), visible = self.visible.len(), "History replaced");
                Ok(RefreshOutcome::Replaced(self.records.len()))
            }
            Err(e) => {
                tracing::error!(kept = self.records.len(), "History refresh failed: {e}");
                Err(e)
            }
        }
    }

    /// Fetch and apply in one step when the store is owned exclusively.
    pub async fn refresh(
        &mut self,
        service: &dyn AnalysisService,
    ) -> Result<RefreshOutcome, TransportError> {
        let Some(ticket) = self.begin_refresh() else {
            return Ok(RefreshOutcome::AlreadyInFlight);
        };
        let outcome = service.fetch_history().await;
        self.finish_refresh(ticket, outcome)
    }

    /// Refresh a shared store without holding the lock across the fetch, so
    /// readers and searches keep working while it is outstanding.
    pub async fn refresh_shared(
        store: &Mutex<HistoryStore>,
        service: &dyn AnalysisService,
    ) -> Result<RefreshOutcome, TransportError> {
        let Some(ticket) = store.lock().await.begin_refresh() else {
            tracing::debug!("History refresh already in flight, skipping");
            return Ok(RefreshOutcome::AlreadyInFlight);
        };
        let outcome = service.fetch_history().await;
        store.lock().await.finish_refresh(ticket, outcome)
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
