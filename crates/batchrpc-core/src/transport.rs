//! The `RpcTransport` trait: the two primitives the batching core relies on.

use async_trait::async_trait;

use crate::error::TransportError;

/// An unordered, message-oriented JSON-RPC transport.
///
/// Requests go out one serialized payload at a time through
/// [`send_request`](Self::send_request); responses come back on a single
/// shared stream through [`next_response`](Self::next_response), in arrival
/// order, with no relation to the order requests were sent in.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Hand one serialized request to the transport.
    ///
    /// Must not block. Fails if the transport is not ready or has been closed.
    fn send_request(&self, payload: String) -> Result<(), TransportError>;

    /// Wait for the next raw response.
    ///
    /// Returns [`TransportError::Closed`] once the transport is torn down; any
    /// other error is treated as transient by the caller.
    async fn next_response(&self) -> Result<String, TransportError>;

    /// Resolve once the transport can accept requests.
    ///
    /// Returns an error if initialisation failed for good.
    async fn ready(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Return the transport's identifier (URL or name).
    fn url(&self) -> &str;
}
