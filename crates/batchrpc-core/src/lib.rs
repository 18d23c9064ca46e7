//! batchrpc-core — request batching and response correlation for JSON-RPC.
//!
//! # Overview
//!
//! Application code issues calls one at a time; the client buffers them and
//! flushes them to the transport when a size threshold or a timer fires.
//! Responses come back on one shared, unordered stream and are matched to
//! their requests by id. The crate defines:
//!
//! - [`RpcTransport`] — the two transport primitives plus a ready signal
//! - [`BatchRpcClient`] — queue, flush timer and router wired together
//! - [`RequestQueue`] / [`ResponseRouter`] / [`SentLedger`] — the pieces
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] — wire types
//! - [`CallError`] / [`TransportError`] — structured error types
//! - [`MemoryTransport`] — in-process transport for tests and offline use

pub mod call;
pub mod client;
pub mod config;
pub mod error;
pub mod id;
pub mod ledger;
pub mod memory;
pub mod queue;
pub mod request;
pub mod router;
pub mod transport;

pub use call::{Completion, PendingCall};
pub use client::BatchRpcClient;
pub use config::{ClientConfig, NetworkSelector};
pub use error::{CallError, TransportError};
pub use ledger::SentLedger;
pub use memory::{MemoryNode, MemoryTransport};
pub use queue::{FlushReport, RequestQueue};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam};
pub use router::{ResponseRouter, RouteSummary};
pub use transport::RpcTransport;
