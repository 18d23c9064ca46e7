//! `BatchRpcClient`: the request queue, its flush timer and the response
//! router wired to one transport.
//!
//! # Usage
//! ```rust,no_run
//! use batchrpc_core::{BatchRpcClient, ClientConfig, MemoryTransport};
//!
//! # async fn run() -> Result<(), batchrpc_core::CallError> {
//! let (transport, _node) = MemoryTransport::ready();
//! let client = BatchRpcClient::new(transport, ClientConfig::default().with_max_batch_size(10));
//! let health: serde_json::Value = client.request("system_health", vec![]).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::call::{Completion, PendingCall};
use crate::config::ClientConfig;
use crate::error::{CallError, TransportError};
use crate::ledger::SentLedger;
use crate::queue::{FlushReport, RequestQueue};
use crate::request::RpcParam;
use crate::router::ResponseRouter;
use crate::transport::RpcTransport;

/// Batching JSON-RPC client over an unordered transport.
///
/// Construction spawns the response router and, if `batch_interval_ms` is
/// set, the flush timer, so it must happen inside a Tokio runtime. Dropping
/// the client stops both; outstanding calls then resolve with
/// [`CallError::Closed`].
pub struct BatchRpcClient {
    transport: Arc<dyn RpcTransport>,
    queue: Arc<RequestQueue>,
    config: ClientConfig,
    timer: Mutex<Option<JoinHandle<()>>>,
    router: JoinHandle<()>,
}

impl BatchRpcClient {
    /// Wire a client to `transport`.
    pub fn new(transport: Arc<dyn RpcTransport>, config: ClientConfig) -> Self {
        let queue = Arc::new(RequestQueue::new(transport.clone(), SentLedger::new(), &config));
        Self::assemble(transport, queue, config)
    }

    fn assemble(transport: Arc<dyn RpcTransport>, queue: Arc<RequestQueue>, config: ClientConfig) -> Self {
        tracing::info!(
            url = %transport.url(),
            network = %config.network,
            chain = config.network.chain(),
            relay_chain = config.network.relay_chain(),
            max_batch_size = ?config.size_threshold(),
            batch_interval_ms = ?config.batch_interval_ms,
            "starting batch RPC client"
        );

        let router = ResponseRouter::new(queue.ledger().clone()).spawn(transport.clone());
        let timer = config
            .batch_interval()
            .map(|interval| spawn_flush_timer(queue.clone(), interval));

        Self {
            transport,
            queue,
            config,
            timer: Mutex::new(timer),
            router,
        }
    }

    /// Queue a call; the returned future resolves with its response.
    pub fn call(&self, method: impl Into<String>, params: Vec<RpcParam>) -> PendingCall {
        self.queue.call(method, params, None)
    }

    /// Queue a call whose raw response payload is also handed to `completion`.
    ///
    /// The completion runs at most once, on the blocking pool. It never runs if
    /// the request fails to send or times out.
    pub fn call_with<F>(&self, method: impl Into<String>, params: Vec<RpcParam>, completion: F) -> PendingCall
    where
        F: FnOnce(String) + Send + 'static,
    {
        let completion: Completion = Box::new(completion);
        self.queue.call(method, params, Some(completion))
    }

    /// Call `method` and deserialize its `result` into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<RpcParam>,
    ) -> Result<T, CallError> {
        let resp = self.call(method, params).await?;
        let result = resp.into_result().map_err(CallError::Rpc)?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send everything currently queued. See [`RequestQueue::flush`].
    pub async fn flush(&self) -> Result<FlushReport, CallError> {
        self.queue.flush().await
    }

    /// Stop the periodic flush timer. Queued and in-flight calls are left as
    /// they are; call [`flush`](Self::flush) first to send what is queued.
    /// Calling this more than once is a no-op.
    pub fn destroy(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = timer {
            handle.abort();
            tracing::debug!(url = %self.transport.url(), "flush timer stopped");
        }
    }

    /// Resolve once the transport can accept requests.
    pub async fn ready(&self) -> Result<(), TransportError> {
        self.transport.ready().await
    }

    /// Calls waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    /// Calls sent and still awaiting a response.
    pub fn in_flight_len(&self) -> usize {
        self.queue.ledger().len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }
}

impl Drop for BatchRpcClient {
    fn drop(&mut self) {
        self.destroy();
        self.router.abort();
    }
}

impl std::fmt::Debug for BatchRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRpcClient")
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish()
    }
}

fn spawn_flush_timer(queue: Arc<RequestQueue>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            // The batch is sent from its own task, so aborting the timer
            // cannot strand it half-dispatched.
            if queue.flush_detached() {
                tracing::trace!("timed flush");
            }
        }
    })
}
