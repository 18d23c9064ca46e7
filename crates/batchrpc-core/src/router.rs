//! Response router: drains the transport's response stream and delivers each
//! response to the request that produced it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time;

use crate::error::CallError;
use crate::ledger::SentLedger;
use crate::request::response_id;
use crate::transport::RpcTransport;

/// Pause after a transient transport read error before reading again.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Result of routing one raw payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteSummary {
    /// Responses delivered to a waiting request.
    pub delivered: usize,
    /// Responses with no matching in-flight request.
    pub missed: usize,
}

/// Correlates inbound responses with the sent ledger.
#[derive(Debug, Clone)]
pub struct ResponseRouter {
    ledger: SentLedger,
}

impl ResponseRouter {
    pub fn new(ledger: SentLedger) -> Self {
        Self { ledger }
    }

    /// Route one raw payload.
    ///
    /// A JSON array is treated as a batch reply and each element is routed on
    /// its own. Anything that is not valid JSON is returned as an error; a
    /// response without a matching in-flight request counts as a miss.
    pub fn on_response(&self, raw: String) -> Result<RouteSummary, serde_json::Error> {
        let parsed: Value = serde_json::from_str(&raw)?;
        let mut summary = RouteSummary::default();
        match parsed {
            Value::Array(items) => {
                for item in items {
                    let item_raw = item.to_string();
                    self.route_one(item_raw, item, &mut summary);
                }
            }
            single => self.route_one(raw, single, &mut summary),
        }
        Ok(summary)
    }

    fn route_one(&self, raw: String, parsed: Value, summary: &mut RouteSummary) {
        let Some(id) = response_id(&parsed) else {
            tracing::debug!(payload = %raw, "response without a usable id, discarding");
            summary.missed += 1;
            return;
        };
        let entry = id.as_number().and_then(|n| self.ledger.take_timed(n));
        match entry {
            Some((request, elapsed)) => {
                tracing::debug!(
                    id = %id,
                    method = request.method(),
                    latency_ms = elapsed.as_millis() as u64,
                    "response correlated"
                );
                request.complete(raw, parsed);
                summary.delivered += 1;
            }
            None => {
                tracing::debug!(id = %id, "no in-flight request for response, discarding");
                summary.missed += 1;
            }
        }
    }

    /// Read responses until the transport closes.
    ///
    /// Once it closes, every request still in flight fails with
    /// [`CallError::Closed`].
    ///
    /// A malformed or unmatched response is logged and skipped; it never stops
    /// the loop.
    pub async fn run(self, transport: Arc<dyn RpcTransport>) {
        tracing::debug!(url = %transport.url(), "response router started");
        loop {
            match transport.next_response().await {
                Ok(raw) => {
                    if let Err(e) = self.on_response(raw) {
                        tracing::warn!(error = %e, "discarding unparseable response");
                    }
                }
                Err(e) if e.is_terminal() => {
                    tracing::info!(
                        error = %e,
                        in_flight = self.ledger.len(),
                        "transport closed, response router stopping"
                    );
                    // No response can arrive any more.
                    for request in self.ledger.take_all() {
                        request.fail(CallError::Closed);
                    }
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read response");
                    time::sleep(READ_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Run the router on a background task.
    pub fn spawn(self, transport: Arc<dyn RpcTransport>) -> JoinHandle<()> {
        tokio::spawn(self.run(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::QueuedRequest;
    use crate::memory::MemoryTransport;
    use serde_json::json;

    fn ledger_with(ids: &[u64]) -> (SentLedger, Vec<crate::call::PendingCall>) {
        let ledger = SentLedger::new();
        let mut calls = Vec::new();
        let mut requests = Vec::new();
        for &id in ids {
            let (req, call) = QueuedRequest::new(id, "system_health".into(), vec![], None);
            requests.push(req);
            calls.push(call);
        }
        ledger.insert_all(requests);
        (ledger, calls)
    }

    #[tokio::test]
    async fn delivers_matching_response() {
        let (ledger, mut calls) = ledger_with(&[10]);
        let router = ResponseRouter::new(ledger.clone());

        let summary = router
            .on_response(r#"{"jsonrpc":"2.0","id":10,"result":{"peers":3}}"#.into())
            .unwrap();
        assert_eq!(summary, RouteSummary { delivered: 1, missed: 0 });
        assert!(ledger.is_empty());

        let resp = calls.remove(0).await.unwrap();
        assert_eq!(resp.result, Some(json!({"peers": 3})));
    }

    #[tokio::test]
    async fn duplicate_response_is_a_miss() {
        let (ledger, _calls) = ledger_with(&[4]);
        let router = ResponseRouter::new(ledger);
        let raw = r#"{"id":4,"result":"ok"}"#.to_string();
        assert_eq!(router.on_response(raw.clone()).unwrap().delivered, 1);
        assert_eq!(router.on_response(raw).unwrap(), RouteSummary { delivered: 0, missed: 1 });
    }

    #[tokio::test]
    async fn batch_reply_routes_each_element() {
        let (ledger, calls) = ledger_with(&[1, 2]);
        let router = ResponseRouter::new(ledger);
        let summary = router
            .on_response(r#"[{"id":2,"result":"b"},{"id":99,"result":"x"},{"id":1,"result":"a"}]"#.into())
            .unwrap();
        assert_eq!(summary, RouteSummary { delivered: 2, missed: 1 });

        let mut results = Vec::new();
        for call in calls {
            results.push(call.await.unwrap().result.unwrap());
        }
        assert_eq!(results, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let router = ResponseRouter::new(SentLedger::new());
        assert!(router.on_response("not json".into()).is_err());
    }

    #[test]
    fn notification_without_id_is_a_miss() {
        let router = ResponseRouter::new(SentLedger::new());
        let summary = router
            .on_response(r#"{"jsonrpc":"2.0","method":"chain_newHead","params":{"result":{}}}"#.into())
            .unwrap();
        assert_eq!(summary.missed, 1);
    }

    #[tokio::test]
    async fn unparseable_result_shape_fails_the_call() {
        let (ledger, mut calls) = ledger_with(&[6]);
        let router = ResponseRouter::new(ledger);
        // Matches by id but `error` is not a JSON-RPC error object.
        router
            .on_response(r#"{"id":6,"error":"boom"}"#.into())
            .unwrap();
        assert!(matches!(
            calls.remove(0).await,
            Err(CallError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn closed_transport_fails_in_flight_calls() {
        let (ledger, calls) = ledger_with(&[7, 8]);
        let (transport, node) = MemoryTransport::ready();
        let router = ResponseRouter::new(ledger.clone()).spawn(transport);

        drop(node);
        router.await.unwrap();
        assert!(ledger.is_empty());
        for call in calls {
            assert!(matches!(call.await, Err(CallError::Closed)));
        }
    }
}
