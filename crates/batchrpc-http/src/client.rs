//! HTTP transport backed by `reqwest`.
//!
//! Every payload handed to `send_request` is POSTed from its own task, so
//! replies land on the response stream in completion order, not send order.
//! When a POST fails the transport answers on the node's behalf with a
//! JSON-RPC error carrying the request's id, so the caller is not left waiting.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};

use batchrpc_core::error::TransportError;
use batchrpc_core::transport::RpcTransport;

/// Error code used for replies synthesized after an HTTP failure.
pub const HTTP_FAILURE_CODE: i64 = -32000;

/// Configuration for `HttpTransport`.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub request_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP JSON-RPC transport.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    replies_tx: mpsc::UnboundedSender<String>,
    replies_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl HttpTransport {
    /// Create a transport for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpTransportConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::InitFailed(e.to_string()))?;
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();

        Ok(Self {
            url: url.into(),
            http,
            replies_tx,
            replies_rx: Mutex::new(replies_rx),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpTransportConfig::default())
    }
}

async fn post_once(http: &reqwest::Client, url: &str, payload: String) -> Result<String, TransportError> {
    let resp = http
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(payload)
        .send()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;
    if !status.is_success() {
        return Err(TransportError::Http(format!("HTTP {}: {body}", status.as_u16())));
    }
    Ok(body)
}

/// The reply a node would have sent had the POST gone through.
fn failure_reply(payload: &str, error: &TransportError) -> Option<String> {
    let request: Value = serde_json::from_str(payload).ok()?;
    let id = request.get("id")?.clone();
    let reply = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": HTTP_FAILURE_CODE, "message": error.to_string()},
    });
    Some(reply.to_string())
}

#[async_trait]
impl RpcTransport for HttpTransport {
    fn send_request(&self, payload: String) -> Result<(), TransportError> {
        let runtime = Handle::try_current().map_err(|e| TransportError::NotReady(e.to_string()))?;
        let http = self.http.clone();
        let url = self.url.clone();
        let replies = self.replies_tx.clone();

        runtime.spawn(async move {
            let reply = match post_once(&http, &url, payload.clone()).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "HTTP request failed");
                    match failure_reply(&payload, &e) {
                        Some(reply) => reply,
                        None => return,
                    }
                }
            };
            let _ = replies.send(reply);
        });
        Ok(())
    }

    async fn next_response(&self) -> Result<String, TransportError> {
        self.replies_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    fn url(&self) -> &str {
        &self.url
    }
}
