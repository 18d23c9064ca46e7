//! WebSocket transport with auto-reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;

use batchrpc_core::error::TransportError;
use batchrpc_core::transport::RpcTransport;

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    /// Reconnect backoff starting duration.
    pub reconnect_initial: Duration,
    /// Maximum reconnect backoff.
    pub reconnect_max: Duration,
    /// Give up after this many consecutive failed connects. `None` = never.
    pub max_connect_attempts: Option<u32>,
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
            max_connect_attempts: None,
        }
    }
}

impl WsTransportConfig {
    /// Delay after `backoff`: doubled, capped at `reconnect_max`.
    fn next_backoff(&self, backoff: Duration) -> Duration {
        (backoff * 2).min(self.reconnect_max)
    }
}

/// Connection state published by the background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Failed(String),
}

/// WebSocket transport.
///
/// A background task owns the socket: it writes every payload handed to
/// [`send_request`](RpcTransport::send_request) and forwards every inbound
/// text frame to the response stream. Payloads sent while the link is down are
/// rejected; the task reconnects with exponential backoff.
pub struct WsTransport {
    url: String,
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    link: watch::Receiver<LinkState>,
    task: JoinHandle<()>,
}

impl WsTransport {
    /// Start connecting to `url` in the background. Use
    /// [`ready`](RpcTransport::ready) to wait for the first connection.
    pub fn connect(url: impl Into<String>, config: WsTransportConfig) -> Arc<Self> {
        let url = url.into();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let (link_tx, link_rx) = watch::channel(LinkState::Connecting);

        let task = tokio::spawn(ws_task(url.clone(), out_rx, in_tx, link_tx, config));

        Arc::new(Self {
            url,
            outbound: out_tx,
            inbound: Mutex::new(in_rx),
            link: link_rx,
            task,
        })
    }

    /// Current connection state.
    pub fn link_state(&self) -> LinkState {
        self.link.borrow().clone()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl RpcTransport for WsTransport {
    fn send_request(&self, payload: String) -> Result<(), TransportError> {
        match &*self.link.borrow() {
            LinkState::Connected => {}
            LinkState::Connecting => {
                return Err(TransportError::NotReady(format!("{} not connected", self.url)))
            }
            LinkState::Failed(reason) => return Err(TransportError::InitFailed(reason.clone())),
        }
        self.outbound
            .send(payload)
            .map_err(|_| TransportError::WebSocket("WS task closed".into()))
    }

    async fn next_response(&self) -> Result<String, TransportError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    async fn ready(&self) -> Result<(), TransportError> {
        let mut link = self.link.clone();
        loop {
            let state = link.borrow_and_update().clone();
            match state {
                LinkState::Connected => return Ok(()),
                LinkState::Failed(reason) => return Err(TransportError::InitFailed(reason)),
                LinkState::Connecting => {}
            }
            link.changed().await.map_err(|_| TransportError::Closed)?;
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Background task that owns the WebSocket connection.
async fn ws_task(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<String>,
    link: watch::Sender<LinkState>,
    config: WsTransportConfig,
) {
    let mut backoff = config.reconnect_initial;
    let mut failed_attempts = 0u32;

    loop {
        tracing::info!(url = %url, "connecting via WebSocket");

        let (ws_stream, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                failed_attempts += 1;
                if config.max_connect_attempts.is_some_and(|max| failed_attempts >= max) {
                    tracing::error!(url = %url, error = %e, attempts = failed_attempts, "giving up on WebSocket connect");
                    link.send_replace(LinkState::Failed(e.to_string()));
                    return;
                }
                tracing::warn!(error = %e, "WS connect failed, retrying in {backoff:?}");
                time::sleep(backoff).await;
                backoff = config.next_backoff(backoff);
                continue;
            }
        };

        backoff = config.reconnect_initial;
        failed_attempts = 0;
        link.send_replace(LinkState::Connected);
        let (mut sink, mut stream) = ws_stream.split();

        loop {
            tokio::select! {
                payload = outbound.recv() => {
                    let Some(payload) = payload else {
                        // Transport dropped.
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    };
                    if let Err(e) = sink.send(Message::Text(payload.into())).await {
                        tracing::warn!(error = %e, "WS send error");
                        break;
                    }
                }
                msg = stream.next() => {
                    let text = match msg {
                        None => break,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WS receive error");
                            break;
                        }
                        Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                tracing::debug!(len = bytes.len(), "ignoring non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        Some(Ok(Message::Close(_))) => break,
                        Some(Ok(_)) => continue,
                    };
                    if inbound.send(text).is_err() {
                        return;
                    }
                }
            }
        }

        link.send_replace(LinkState::Connecting);
        tracing::warn!(url = %url, "WS disconnected, reconnecting in {backoff:?}");
        time::sleep(backoff).await;
        backoff = config.next_backoff(backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let config = WsTransportConfig {
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(2),
            max_connect_attempts: None,
        };
        let b1 = config.next_backoff(config.reconnect_initial);
        let b2 = config.next_backoff(b1);
        let b3 = config.next_backoff(b2);
        assert_eq!(b1, Duration::from_secs(1));
        assert_eq!(b2, Duration::from_secs(2));
        assert_eq!(b3, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        // Nothing listens on port 1.
        let transport = WsTransport::connect(
            "ws://127.0.0.1:1",
            WsTransportConfig {
                reconnect_initial: Duration::from_millis(1),
                reconnect_max: Duration::from_millis(2),
                max_connect_attempts: Some(2),
            },
        );
        assert!(matches!(
            transport.send_request("{}".into()),
            Err(TransportError::NotReady(_))
        ));
        let ready = time::timeout(Duration::from_secs(10), transport.ready()).await.unwrap();
        assert!(matches!(ready, Err(TransportError::InitFailed(_))));
        assert!(matches!(transport.link_state(), LinkState::Failed(_)));
    }
}
