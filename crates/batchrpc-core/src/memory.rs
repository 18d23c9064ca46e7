//! In-process transport.
//!
//! [`MemoryTransport`] is the client side; [`MemoryNode`] is the handle that
//! plays the node: it reads the requests the client sent, injects responses in
//! any order, and controls when the transport becomes ready.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};

use crate::error::TransportError;
use crate::transport::RpcTransport;

/// Initialisation state of the simulated engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Starting,
    Ready,
    Failed(String),
}

#[derive(Debug, Default)]
struct SendControl {
    reject: AtomicBool,
    sent: AtomicUsize,
}

/// Client side of an in-process transport.
pub struct MemoryTransport {
    url: String,
    state: watch::Receiver<ReadyState>,
    control: Arc<SendControl>,
    requests: mpsc::UnboundedSender<String>,
    responses: Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Node side of an in-process transport.
pub struct MemoryNode {
    state: watch::Sender<ReadyState>,
    control: Arc<SendControl>,
    requests: mpsc::UnboundedReceiver<String>,
    responses: mpsc::UnboundedSender<String>,
}

impl MemoryTransport {
    /// A transport that accepts requests immediately.
    pub fn ready() -> (Arc<Self>, MemoryNode) {
        Self::with_state(ReadyState::Ready)
    }

    /// A transport that rejects sends until [`MemoryNode::set_ready`] is called.
    pub fn starting() -> (Arc<Self>, MemoryNode) {
        Self::with_state(ReadyState::Starting)
    }

    fn with_state(initial: ReadyState) -> (Arc<Self>, MemoryNode) {
        let (state_tx, state_rx) = watch::channel(initial);
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let control = Arc::new(SendControl::default());

        let transport = Arc::new(Self {
            url: "memory://".into(),
            state: state_rx,
            control: control.clone(),
            requests: req_tx,
            responses: Mutex::new(resp_rx),
        });
        let node = MemoryNode {
            state: state_tx,
            control,
            requests: req_rx,
            responses: resp_tx,
        };
        (transport, node)
    }
}

#[async_trait]
impl RpcTransport for MemoryTransport {
    fn send_request(&self, payload: String) -> Result<(), TransportError> {
        match &*self.state.borrow() {
            ReadyState::Ready => {}
            ReadyState::Starting => {
                return Err(TransportError::NotReady("engine still starting".into()))
            }
            ReadyState::Failed(reason) => return Err(TransportError::InitFailed(reason.clone())),
        }
        if self.control.reject.load(Ordering::Relaxed) {
            return Err(TransportError::Other("send rejected by node".into()));
        }
        self.requests
            .send(payload)
            .map_err(|_| TransportError::Closed)?;
        self.control.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn next_response(&self) -> Result<String, TransportError> {
        self.responses
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    async fn ready(&self) -> Result<(), TransportError> {
        let mut state = self.state.clone();
        loop {
            let current = state.borrow_and_update().clone();
            match current {
                ReadyState::Ready => return Ok(()),
                ReadyState::Failed(reason) => return Err(TransportError::InitFailed(reason)),
                ReadyState::Starting => {}
            }
            state.changed().await.map_err(|_| TransportError::Closed)?;
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

impl MemoryNode {
    /// Finish initialisation; pending `ready()` waits resolve.
    pub fn set_ready(&self) {
        self.state.send_replace(ReadyState::Ready);
    }

    /// Fail initialisation for good.
    pub fn fail(&self, reason: impl Into<String>) {
        self.state.send_replace(ReadyState::Failed(reason.into()));
    }

    /// Make every subsequent send fail (or succeed again).
    pub fn reject_sends(&self, reject: bool) {
        self.control.reject.store(reject, Ordering::Relaxed);
    }

    /// Number of requests the transport accepted so far.
    pub fn sent_count(&self) -> usize {
        self.control.sent.load(Ordering::Relaxed)
    }

    /// Wait for the next request the client sent. `None` once the client is gone.
    pub async fn next_request(&mut self) -> Option<String> {
        self.requests.recv().await
    }

    /// The next request already sent, if any.
    pub fn try_next_request(&mut self) -> Option<String> {
        self.requests.try_recv().ok()
    }

    /// Push a raw payload onto the response stream.
    pub fn respond(&self, raw: impl Into<String>) -> Result<(), TransportError> {
        self.responses
            .send(raw.into())
            .map_err(|_| TransportError::Closed)
    }

    /// Answer `request` (a payload read from this node) with `result`.
    pub fn reply(&self, request: &str, result: Value) -> Result<(), TransportError> {
        let parsed: Value =
            serde_json::from_str(request).map_err(|e| TransportError::Other(e.to_string()))?;
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": parsed["id"],
            "result": result,
        });
        self.respond(response.to_string())
    }
}
