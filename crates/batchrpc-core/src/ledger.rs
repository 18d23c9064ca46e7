//! The sent ledger: requests handed to the transport and still awaiting a
//! correlated response.
//!
//! Shared between the queue (inserts on flush, removes on send failure or
//! deadline) and the response router (removes on delivery). Every operation
//! holds the lock for its whole duration and never across an `.await`, so no
//! task can observe a half-applied insert or removal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::call::QueuedRequest;

struct LedgerEntry {
    request: QueuedRequest,
    /// When the entry was recorded.
    recorded_at: Instant,
}

/// Map of in-flight requests keyed by id.
#[derive(Clone, Default)]
pub struct SentLedger {
    entries: Arc<Mutex<HashMap<u64, LedgerEntry>>>,
}

impl SentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, LedgerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a batch of requests in one step.
    ///
    /// Ids are unique by construction; a duplicate would replace the older
    /// entry, whose caller then resolves with `Closed`.
    pub fn insert_all(&self, requests: impl IntoIterator<Item = QueuedRequest>) {
        let now = Instant::now();
        let mut entries = self.lock();
        for request in requests {
            let id = request.id();
            if let Some(old) = entries.insert(id, LedgerEntry { request, recorded_at: now }) {
                tracing::error!(id, method = old.request.method(), "duplicate in-flight request id");
            }
        }
    }

    /// Remove and return the request with this id, if it is still in flight.
    pub fn take(&self, id: u64) -> Option<QueuedRequest> {
        self.take_timed(id).map(|(request, _)| request)
    }

    /// Like [`take`](Self::take), also returning how long the request was in flight.
    pub fn take_timed(&self, id: u64) -> Option<(QueuedRequest, Duration)> {
        self.lock()
            .remove(&id)
            .map(|entry| (entry.request, entry.recorded_at.elapsed()))
    }

    /// Remove every in-flight request.
    pub fn take_all(&self) -> Vec<QueuedRequest> {
        self.lock().drain().map(|(_, entry)| entry.request).collect()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of requests in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SentLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentLedger")
            .field("in_flight", &self.len())
            .finish()
    }
}
