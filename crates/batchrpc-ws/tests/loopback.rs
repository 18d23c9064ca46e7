//! Batching client over a real WebSocket to a local node stub.

use std::time::Duration;

use batchrpc_core::{BatchRpcClient, ClientConfig};
use batchrpc_ws::{WsTransport, WsTransportConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Accept one connection and answer every request after collecting `batch`
/// of them, in reverse order.
async fn spawn_node(batch: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let mut held = Vec::new();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let req: Value = serde_json::from_str(text.as_str()).unwrap();
            held.push(req);
            if held.len() == batch {
                for req in held.drain(..).rev() {
                    let resp = json!({"jsonrpc": "2.0", "id": req["id"], "result": req["method"]});
                    ws.send(Message::Text(resp.to_string().into())).await.unwrap();
                }
            }
        }
    });
    format!("ws://{addr}")
}

#[tokio::test]
async fn batched_calls_over_websocket() {
    let url = spawn_node(3).await;
    let transport = WsTransport::connect(url, WsTransportConfig::default());
    let client = BatchRpcClient::new(transport, ClientConfig::default().with_max_batch_size(3));
    tokio::time::timeout(Duration::from_secs(5), client.ready())
        .await
        .unwrap()
        .unwrap();

    let a = client.call("system_name", vec![]);
    let b = client.call("system_version", vec![]);
    let c = client.call("system_chain", vec![]);

    for (call, method) in [(a, "system_name"), (b, "system_version"), (c, "system_chain")] {
        let resp = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.result, Some(json!(method)));
    }
    assert_eq!(client.in_flight_len(), 0);
}
