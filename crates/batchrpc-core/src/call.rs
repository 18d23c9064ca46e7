//! Queued calls and the futures their callers await.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::CallError;
use crate::request::{JsonRpcRequest, JsonRpcResponse, RpcParam};

/// Callback invoked at most once with the raw response payload.
pub type Completion = Box<dyn FnOnce(String) + Send + 'static>;

type Reply = Result<JsonRpcResponse, CallError>;

/// One RPC call waiting in the pending buffer or the sent ledger.
///
/// Consumed by exactly one of [`complete`](Self::complete) or
/// [`fail`](Self::fail), so neither the completion nor the caller's future can
/// fire twice.
pub struct QueuedRequest {
    id: u64,
    request: JsonRpcRequest,
    completion: Option<Completion>,
    reply: oneshot::Sender<Reply>,
}

impl QueuedRequest {
    pub(crate) fn new(
        id: u64,
        method: String,
        params: Vec<RpcParam>,
        completion: Option<Completion>,
    ) -> (Self, PendingCall) {
        let (reply, rx) = oneshot::channel();
        let queued = Self {
            id,
            request: JsonRpcRequest::new(id, method, params),
            completion,
            reply,
        };
        (queued, PendingCall { id, rx })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    /// The wire form of this request. Never contains the completion.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.request)
    }

    /// Deliver a correlated response.
    ///
    /// The completion runs on the blocking pool so a slow callback cannot stall
    /// the task that routed the response.
    pub(crate) fn complete(self, raw: String, parsed: Value) {
        let reply = serde_json::from_value::<JsonRpcResponse>(parsed).map_err(CallError::from);
        if let Some(completion) = self.completion {
            tokio::task::spawn_blocking(move || completion(raw));
        }
        // The caller may have dropped its future; that is not an error.
        let _ = self.reply.send(reply);
    }

    /// Resolve the caller's future with an error. The completion is dropped
    /// without being invoked.
    pub(crate) fn fail(self, err: CallError) {
        let _ = self.reply.send(Err(err));
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("method", &self.request.method)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

/// Future returned by `call()`; resolves with the correlated response.
///
/// Resolves with [`CallError::Closed`] if the client is dropped first. Never
/// resolves for a request whose response is lost and that has no deadline.
#[must_use = "the response is delivered through this future"]
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<Reply>,
}

impl PendingCall {
    /// Id the request was issued under, for caller-side timeouts or logging.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingCall {
    type Output = Result<JsonRpcResponse, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CallError::Closed)))
    }
}
