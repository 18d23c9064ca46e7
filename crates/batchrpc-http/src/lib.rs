//! batchrpc-http — HTTP transport for BatchRPC.
//!
//! Each request is POSTed independently; reply bodies are merged into one
//! response stream in the order they complete.

pub mod client;

pub use client::{HttpTransport, HttpTransportConfig, HTTP_FAILURE_CODE};
