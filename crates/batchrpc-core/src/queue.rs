//! Request queue and batcher.
//!
//! Calls accumulate in a pending buffer until a flush drains it. A flush is
//! triggered by the size threshold inside [`RequestQueue::call`], by the
//! client's interval timer, or explicitly. Draining moves every buffered
//! request into the [`SentLedger`] under the buffer lock, so a concurrent
//! append always lands in the next batch and an id is never in both places.
//! Sending happens afterwards, once the transport reports it is ready.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time;

use crate::call::{Completion, PendingCall, QueuedRequest};
use crate::config::ClientConfig;
use crate::error::CallError;
use crate::id::IdGenerator;
use crate::ledger::SentLedger;
use crate::request::RpcParam;
use crate::transport::RpcTransport;

#[derive(Default)]
struct PendingBuffer {
    requests: Vec<QueuedRequest>,
    ids: HashSet<u64>,
}

/// A drained batch: already in the ledger, not yet on the wire.
struct Batch {
    items: Vec<BatchItem>,
}

struct BatchItem {
    id: u64,
    method: String,
    payload: String,
}

/// Outcome of handing one batch to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Ids accepted by the transport, now awaiting a response.
    pub sent: Vec<u64>,
    /// Ids the transport refused. Their callers were failed with `SendFailed`.
    pub failed: Vec<u64>,
}

impl FlushReport {
    /// Returns `true` if the flush had nothing to send.
    pub fn is_empty(&self) -> bool {
        self.sent.is_empty() && self.failed.is_empty()
    }

    /// Total requests attempted.
    pub fn len(&self) -> usize {
        self.sent.len() + self.failed.len()
    }
}

/// Buffers calls and flushes them to the transport in batches.
pub struct RequestQueue {
    transport: Arc<dyn RpcTransport>,
    pending: Mutex<PendingBuffer>,
    ledger: SentLedger,
    ids: IdGenerator,
    max_batch_size: Option<usize>,
    request_timeout: Option<Duration>,
}

impl RequestQueue {
    pub fn new(transport: Arc<dyn RpcTransport>, ledger: SentLedger, config: &ClientConfig) -> Self {
        Self::with_ids(transport, ledger, config, IdGenerator::new())
    }

    pub(crate) fn with_ids(
        transport: Arc<dyn RpcTransport>,
        ledger: SentLedger,
        config: &ClientConfig,
        ids: IdGenerator,
    ) -> Self {
        Self {
            transport,
            pending: Mutex::new(PendingBuffer::default()),
            ledger,
            ids,
            max_batch_size: config.size_threshold(),
            request_timeout: config.request_timeout(),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingBuffer> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a call and return the future its response resolves.
    ///
    /// If the buffer reaches the size threshold, it is drained before this
    /// returns and the batch is sent from a background task. Must be called
    /// from within a Tokio runtime.
    pub fn call(
        self: &Arc<Self>,
        method: impl Into<String>,
        params: Vec<RpcParam>,
        completion: Option<Completion>,
    ) -> PendingCall {
        let method = method.into();
        let (call, batch) = {
            let mut pending = self.lock_pending();
            let id = self
                .ids
                .next_free(|id| pending.ids.contains(&id) || self.ledger.contains(id));
            let (request, call) = QueuedRequest::new(id, method, params, completion);
            tracing::trace!(id, method = request.method(), "request queued");
            pending.ids.insert(id);
            pending.requests.push(request);

            let batch = match self.max_batch_size {
                Some(max) if pending.requests.len() >= max => Some(self.drain(&mut pending)),
                _ => None,
            };
            (call, batch)
        };

        if let Some(batch) = batch {
            self.spawn_dispatch(batch, "size-triggered");
        }
        call
    }

    /// Send everything currently buffered.
    ///
    /// Returns once every request has been handed to the transport; does not
    /// wait for responses. An empty buffer returns immediately without touching
    /// the transport.
    pub async fn flush(&self) -> Result<FlushReport, CallError> {
        let batch = {
            let mut pending = self.lock_pending();
            if pending.requests.is_empty() {
                return Ok(FlushReport::default());
            }
            self.drain(&mut pending)
        };
        self.dispatch(batch).await
    }

    /// Drain the buffer now and send it from a background task.
    ///
    /// The send outlives whatever task called this, so cancelling the caller
    /// never strands a drained batch. Returns `false` if the buffer was empty.
    pub fn flush_detached(self: &Arc<Self>) -> bool {
        let batch = {
            let mut pending = self.lock_pending();
            if pending.requests.is_empty() {
                return false;
            }
            self.drain(&mut pending)
        };
        self.spawn_dispatch(batch, "timed");
        true
    }

    fn spawn_dispatch(self: &Arc<Self>, batch: Batch, trigger: &'static str) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = queue.dispatch(batch).await {
                tracing::error!(error = %e, trigger, "flush failed");
            }
        });
    }

    /// Number of calls waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.lock_pending().requests.len()
    }

    pub fn ledger(&self) -> &SentLedger {
        &self.ledger
    }

    /// Empty the buffer into the ledger. Caller holds the buffer lock.
    fn drain(&self, pending: &mut PendingBuffer) -> Batch {
        let requests = std::mem::take(&mut pending.requests);
        pending.ids.clear();

        let mut items = Vec::with_capacity(requests.len());
        let mut ledgered = Vec::with_capacity(requests.len());
        for request in requests {
            match request.to_wire() {
                Ok(payload) => {
                    items.push(BatchItem {
                        id: request.id(),
                        method: request.method().to_string(),
                        payload,
                    });
                    ledgered.push(request);
                }
                Err(e) => {
                    tracing::warn!(id = request.id(), error = %e, "request could not be serialized");
                    request.fail(CallError::Deserialization(e));
                }
            }
        }
        self.ledger.insert_all(ledgered);
        Batch { items }
    }

    async fn dispatch(&self, batch: Batch) -> Result<FlushReport, CallError> {
        if let Err(e) = self.transport.ready().await {
            tracing::error!(
                error = %e,
                url = %self.transport.url(),
                requests = batch.items.len(),
                "transport unavailable, failing batch"
            );
            for item in &batch.items {
                if let Some(request) = self.ledger.take(item.id) {
                    request.fail(CallError::Transport(e.clone()));
                }
            }
            return Err(CallError::Transport(e));
        }

        let mut report = FlushReport::default();
        for item in batch.items {
            match self.transport.send_request(item.payload) {
                Ok(()) => {
                    tracing::debug!(id = item.id, method = %item.method, "request sent");
                    report.sent.push(item.id);
                    if let Some(timeout) = self.request_timeout {
                        self.arm_deadline(item.id, timeout);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        id = item.id,
                        method = %item.method,
                        error = %e,
                        "send failed, request dropped"
                    );
                    report.failed.push(item.id);
                    if let Some(request) = self.ledger.take(item.id) {
                        request.fail(CallError::SendFailed {
                            id: item.id,
                            method: item.method,
                            reason: e,
                        });
                    }
                }
            }
        }

        tracing::debug!(
            sent = report.sent.len(),
            failed = report.failed.len(),
            in_flight = self.ledger.len(),
            "batch flushed"
        );
        Ok(report)
    }

    /// Evict `id` from the ledger after `timeout` unless it was answered first.
    fn arm_deadline(&self, id: u64, timeout: Duration) {
        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            time::sleep(timeout).await;
            if let Some(request) = ledger.take(id) {
                let ms = timeout.as_millis() as u64;
                tracing::warn!(id, method = request.method(), timeout_ms = ms, "request timed out");
                request.fail(CallError::Timeout { id, ms });
            }
        });
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("url", &self.transport.url())
            .field("pending", &self.pending_len())
            .field("in_flight", &self.ledger.len())
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use serde_json::json;

    fn queue(config: ClientConfig) -> (Arc<RequestQueue>, crate::memory::MemoryNode) {
        let (transport, node) = MemoryTransport::ready();
        let queue = RequestQueue::with_ids(
            transport,
            SentLedger::new(),
            &config,
            IdGenerator::starting_at(1),
        );
        (Arc::new(queue), node)
    }

    #[tokio::test]
    async fn manual_flush_moves_buffer_to_ledger() {
        let (queue, mut node) = queue(ClientConfig::default());
        let _a = queue.call("system_health", vec![], None);
        let _b = queue.call("system_chain", vec![], None);
        assert_eq!(queue.pending_len(), 2);
        assert!(queue.ledger().is_empty());

        let report = queue.flush().await.unwrap();
        assert_eq!(report.sent, vec![1, 2]);
        assert!(report.failed.is_empty());
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.ledger().len(), 2);

        let first: serde_json::Value = serde_json::from_str(&node.try_next_request().unwrap()).unwrap();
        assert_eq!(first["method"], "system_health");
        assert_eq!(first["id"], 1);
    }

    #[tokio::test]
    async fn empty_flush_touches_nothing() {
        let (queue, mut node) = queue(ClientConfig::default());
        let report = queue.flush().await.unwrap();
        assert!(report.is_empty());
        assert_eq!(node.sent_count(), 0);
        assert!(node.try_next_request().is_none());
    }

    #[tokio::test]
    async fn detached_flush_survives_its_caller() {
        let (queue, mut node) = queue(ClientConfig::default());
        assert!(!queue.flush_detached());

        let call = queue.call("system_health", vec![], None);
        let caller = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.flush_detached() })
        };
        assert!(caller.await.unwrap());
        assert_eq!(queue.pending_len(), 0);

        let req: serde_json::Value = serde_json::from_str(&node.next_request().await.unwrap()).unwrap();
        assert_eq!(req["id"], call.id());
        assert!(queue.ledger().contains(call.id()));
    }

    #[tokio::test]
    async fn threshold_drains_synchronously() {
        let (queue, _node) = queue(ClientConfig::default().with_max_batch_size(2));
        let _a = queue.call("a", vec![], None);
        assert_eq!(queue.pending_len(), 1);
        let _b = queue.call("b", vec![json!(1)], None);
        // Drained inside call(), before the background send runs.
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.ledger().len(), 2);
    }

    #[tokio::test]
    async fn send_failure_rejects_caller() {
        let (queue, node) = queue(ClientConfig::default());
        node.reject_sends(true);
        let call = queue.call("system_health", vec![], None);
        let report = queue.flush().await.unwrap();
        assert_eq!(report.failed, vec![1]);
        assert!(queue.ledger().is_empty());
        assert!(matches!(call.await, Err(CallError::SendFailed { id: 1, .. })));
    }

    #[tokio::test]
    async fn ids_skip_in_flight_requests() {
        let (queue, _node) = queue(ClientConfig::default());
        let first = queue.call("a", vec![], None);
        queue.flush().await.unwrap();
        let second = queue.call("b", vec![], None);
        assert_ne!(first.id(), second.id());
        assert!(queue.ledger().contains(first.id()));
    }
}
