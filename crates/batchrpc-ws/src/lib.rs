//! batchrpc-ws — WebSocket transport for BatchRPC.
//!
//! # Features
//! - Background task owns the socket; sends never block the caller
//! - Inbound text frames become the unordered response stream
//! - Auto-reconnect on disconnect (exponential backoff)
//! - Ready signal that resolves on the first successful connect

pub mod client;

pub use client::{LinkState, WsTransport, WsTransportConfig};
