//! batchrpc CLI — send batched JSON-RPC calls to a node from the terminal.
//!
//! Usage:
//! ```bash
//! # Two calls in one batch over WebSocket
//! batchrpc call --url ws://127.0.0.1:9944 --method system_health --method system_chain
//!
//! # Size/time policy and a per-call deadline
//! batchrpc call --url http://127.0.0.1:9933 --method chain_getBlockHash --params '[0]' \
//!     --max-batch-size 10 --batch-interval-ms 100 --timeout-ms 5000
//!
//! # Offline: an in-process node that echoes each request back
//! batchrpc call --url memory --method system_health
//! ```

mod logging;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use batchrpc_core::{
    BatchRpcClient, ClientConfig, MemoryNode, MemoryTransport, NetworkSelector, RpcTransport,
};
use batchrpc_http::HttpTransport;
use batchrpc_ws::{WsTransport, WsTransportConfig};
use serde_json::{json, Value};

use crate::logging::{init_tracing, LogConfig};

/// How long to wait for the transport to come up.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "call" => cmd_call(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("batchrpc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("batchrpc {}", env!("CARGO_PKG_VERSION"));
    println!("Batch JSON-RPC calls to a blockchain node\n");
    println!("USAGE:");
    println!("    batchrpc <COMMAND>\n");
    println!("COMMANDS:");
    println!("    call       Send one or more JSON-RPC calls as a batch");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("CALL FLAGS:");
    println!("    --url <URL>                ws://, wss://, http://, https:// or `memory`  [required]");
    println!("    --method <NAME>            RPC method, repeatable                        [required]");
    println!("    --params <JSON>            JSON array of params applied to every call");
    println!("    --max-batch-size <N>       Flush when N calls are queued");
    println!("    --batch-interval-ms <MS>   Flush a non-empty queue every MS milliseconds");
    println!("    --timeout-ms <MS>          Fail calls with no response after MS milliseconds");
    println!("    --network <NAME>           mainnet | testnet  (default: mainnet)");
    println!("    --log-json                 Emit JSON logs on stderr (level via RUST_LOG)");
}

async fn cmd_call(args: &[String]) -> Result<(), String> {
    init_tracing(&LogConfig {
        json: has_flag(args, "--log-json"),
        ..LogConfig::default()
    });

    let url = parse_flag(args, "--url").ok_or("--url is required")?;
    let methods = parse_flags(args, "--method");
    if methods.is_empty() {
        return Err("--method is required".into());
    }
    let params = match parse_flag(args, "--params") {
        Some(raw) => parse_params(&raw)?,
        None => vec![],
    };
    let config = parse_config(args)?;

    let transport = open_transport(&url)?;
    let client = BatchRpcClient::new(transport, config);
    tokio::time::timeout(READY_TIMEOUT, client.ready())
        .await
        .map_err(|_| format!("{url} not ready after {}s", READY_TIMEOUT.as_secs()))?
        .map_err(|e| e.to_string())?;

    let calls: Vec<_> = methods
        .iter()
        .map(|method| (method.clone(), client.call(method.as_str(), params.clone())))
        .collect();
    // Send whatever the size trigger left behind.
    client.flush().await.map_err(|e| e.to_string())?;

    let mut failures = 0usize;
    for (method, call) in calls {
        match call.await {
            Ok(resp) => {
                let body = serde_json::to_value(&resp).unwrap_or(Value::Null);
                println!("{method}: {}", serde_json::to_string_pretty(&body).unwrap_or_default());
            }
            Err(e) => {
                failures += 1;
                eprintln!("{method}: {e}");
            }
        }
    }
    client.destroy();

    if failures > 0 {
        return Err(format!("{failures} call(s) failed"));
    }
    Ok(())
}

fn parse_config(args: &[String]) -> Result<ClientConfig, String> {
    let network = match parse_flag(args, "--network") {
        Some(name) => name.parse::<NetworkSelector>()?,
        None => NetworkSelector::default(),
    };
    Ok(ClientConfig {
        max_batch_size: parse_number(args, "--max-batch-size")?,
        batch_interval_ms: parse_number(args, "--batch-interval-ms")?,
        request_timeout_ms: parse_number(args, "--timeout-ms")?,
        network,
    })
}

fn open_transport(url: &str) -> Result<Arc<dyn RpcTransport>, String> {
    if url == "memory" {
        let (transport, node) = MemoryTransport::ready();
        tokio::spawn(echo_node(node));
        let transport: Arc<dyn RpcTransport> = transport;
        return Ok(transport);
    }
    if url.starts_with("ws://") || url.starts_with("wss://") {
        let transport: Arc<dyn RpcTransport> = WsTransport::connect(url, WsTransportConfig::default());
        return Ok(transport);
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        let transport: Arc<dyn RpcTransport> =
            Arc::new(HttpTransport::default_for(url).map_err(|e| e.to_string())?);
        return Ok(transport);
    }
    Err(format!("unsupported URL scheme: {url}"))
}

/// Answer every request with its own method and params.
async fn echo_node(mut node: MemoryNode) {
    while let Some(raw) = node.next_request().await {
        let Ok(req) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        let echo = json!({"method": req["method"], "params": req["params"]});
        if node.reply(&raw, echo).is_err() {
            break;
        }
    }
}

fn parse_params(raw: &str) -> Result<Vec<Value>, String> {
    match serde_json::from_str::<Value>(raw).map_err(|e| format!("--params: {e}"))? {
        Value::Array(items) => Ok(items),
        other => Ok(vec![other]),
    }
}

fn parse_number<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<Option<T>, String> {
    parse_flag(args, flag)
        .map(|v| v.parse::<T>().map_err(|_| format!("{flag}: invalid number '{v}'")))
        .transpose()
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn parse_flags(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
        .collect()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
