//! Toolgate process entrypoint: loads configuration, starts logging, brings
//! every configured upstream up, and serves a newline-delimited JSON-RPC
//! loop over stdio to the downstream client. The outer transport the
//! downstream talks over (one stdio pipe vs. exposing the proxy itself as an
//! HTTP/SSE/websocket server) is out of scope (SPEC_FULL.md §1); this is the
//! minimal consumer that exercises the coordinator end to end.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, Instrument};

use toolgate_core::jsonrpc::{JsonRpcId, JsonRpcRequest, JsonRpcResponse};
use toolgate_gateway::ProxyCoordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => toolgate_gateway::config_loader::load(path)?,
        None => toolgate_gateway::config_loader::default_config(),
    };

    let (_logging_guard, run_id) = toolgate_gateway::logging::init(&config.log);
    let root_span = tracing::info_span!("toolgate", run_id = %run_id);

    run(config).instrument(root_span).await
}

async fn run(config: toolgate_core::ProxyConfig) -> anyhow::Result<()> {
    info!(upstreams = config.upstreams.len(), "starting toolgate");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let coordinator = ProxyCoordinator::build(&config, events_tx);
    coordinator.initialize().await;

    tokio::spawn(
        async move {
            while let Some(event) = events_rx.recv().await {
                tracing::debug!(?event, "domain event");
            }
        }
        .in_current_span(),
    );

    serve_stdio(coordinator.clone()).await?;

    coordinator.shutdown().await;
    Ok(())
}

/// Reads one JSON-RPC request per line from stdin, dispatches it through the
/// coordinator, and writes one JSON-RPC response per line to stdout.
/// Terminates cleanly on EOF or `Ctrl-C`.
async fn serve_stdio(coordinator: Arc<ProxyCoordinator>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }
            line = lines.next_line() => {
                match line? {
                    None => return Ok(()),
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        let response = handle_line(&coordinator, &line).await;
                        let serialized = serde_json::to_string(&response)?;
                        stdout.write_all(serialized.as_bytes()).await?;
                        stdout.write_all(b"\n").await?;
                        stdout.flush().await?;
                    }
                }
            }
        }
    }
}

async fn handle_line(coordinator: &Arc<ProxyCoordinator>, line: &str) -> JsonRpcResponse {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return JsonRpcResponse::failure(
                JsonRpcId::String("0".to_string()),
                toolgate_core::jsonrpc::JsonRpcError::invalid_params(e.to_string()),
            )
        }
    };

    let id = request.id.clone().unwrap_or_else(|| JsonRpcId::String("0".to_string()));
    match coordinator
        .handle(&request.method, request.params.unwrap_or(serde_json::Value::Null))
        .await
    {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(err) => JsonRpcResponse::failure(id, err.to_jsonrpc_error()),
    }
}
