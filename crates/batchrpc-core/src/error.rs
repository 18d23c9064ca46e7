//! Error types for transports and queued calls.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors raised by an [`RpcTransport`](crate::transport::RpcTransport) primitive.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The underlying engine has not finished initialising.
    #[error("transport not ready: {0}")]
    NotReady(String),

    /// Initialisation failed for good; nothing will ever be sent.
    #[error("transport initialisation failed: {0}")]
    InitFailed(String),

    /// The transport has been torn down and will yield no more responses.
    #[error("transport closed")]
    Closed,

    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if the transport can never deliver again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::InitFailed(_))
    }
}

/// Errors surfaced to the caller of a queued RPC call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The batch containing this call could not reach the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The serialized request was rejected by the transport.
    #[error("request {id} ({method}) could not be sent: {reason}")]
    SendFailed {
        id: u64,
        method: String,
        reason: TransportError,
    },

    /// No correlated response arrived before the configured deadline.
    #[error("request {id} timed out after {ms}ms")]
    Timeout { id: u64, ms: u64 },

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request or response could not be (de)serialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The client was dropped before a response arrived.
    #[error("client closed before a response arrived")]
    Closed,
}

impl CallError {
    /// Returns `true` if this is a node-side execution error.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` if the request never made it onto the wire.
    pub fn is_unsent(&self) -> bool {
        matches!(self, Self::SendFailed { .. } | Self::Transport(_))
    }
}
