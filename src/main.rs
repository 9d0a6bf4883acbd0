//! GDB/MI Bridge
//!
//! Sits between an IDE debug engine and GDB running in MI mode. Commands are
//! tagged with sequence ids, responses are matched back to their commands and
//! reformatted by per-command parsing instructions. The IDE talks to the
//! bridge with newline-delimited JSON-RPC (MCP framing) over stdio.
//!
//! Configuration is read from the JSON file named by `GDB_MI_BRIDGE_CONFIG`.
//!
//! Usage:
//!   ```json
//!   {
//!     "mcpServers": {
//!       "gdb-mi-bridge": {
//!         "command": "/path/to/gdb-mi-bridge",
//!         "env": { "GDB_MI_BRIDGE_CONFIG": "/path/to/bridge.json" }
//!       }
//!     }
//!   }
//!   ```

mod bridge;
mod mcp;

use crate::bridge::BridgeConfig;
use crate::mcp::protocol::*;
use crate::mcp::BridgeMcpServer;
use anyhow::Result;
use serde::Serialize;
use std::io::{BufRead, BufReader, Write};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// MCP Server state
struct ServerState {
    server: BridgeMcpServer,
    initialized: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting GDB/MI bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = BridgeConfig::from_env()?;
    config.validate()?;
    debug!("Configuration: {:?}", config);

    let state = RwLock::new(ServerState {
        server: BridgeMcpServer::new(config),
        initialized: false,
    });

    // Read from stdin, write to stdout
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();

    let reader = BufReader::new(stdin);

    info!("GDB/MI bridge ready, listening on stdin");

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Error reading from stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received: {}", line);

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                write_message(&mut stdout, &JsonRpcErrorResponse::new(None, JsonRpcError::parse_error()))?;
                continue;
            }
        };

        let id = request.id.clone();
        match handle_request(&state, request).await {
            Ok(Some(result)) => {
                write_message(&mut stdout, &JsonRpcResponse::new(id, result))?;
            }
            Ok(None) => {
                // Notification, no response needed
            }
            Err(error) => {
                error!("Error handling request: {}", error.message);
                write_message(&mut stdout, &JsonRpcErrorResponse::new(id, error))?;
            }
        }
    }

    state.read().await.server.shutdown().await?;
    info!("GDB/MI bridge shutting down");
    Ok(())
}

fn write_message(stdout: &mut impl Write, message: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string(message)?;
    debug!("Sending: {}", text);
    writeln!(stdout, "{}", text)?;
    stdout.flush()?;
    Ok(())
}

/// Handle a JSON-RPC request, returning its result or `None` for notifications
async fn handle_request(
    state: &RwLock<ServerState>,
    request: JsonRpcRequest,
) -> std::result::Result<Option<serde_json::Value>, JsonRpcError> {
    let method = request.method.as_str();

    debug!("Handling method: {}", method);

    let internal = |e: anyhow::Error| JsonRpcError::internal_error(&e.to_string());

    match method {
        // MCP Protocol methods
        "initialize" => {
            let mut state = state.write().await;
            state.initialized = true;
            let result = state.server.handle_initialize(request.params).await.map_err(internal)?;
            Ok(Some(result))
        }
        "initialized" | "notifications/initialized" => Ok(None),
        "ping" => Ok(Some(serde_json::json!({}))),
        "tools/list" => {
            let state = state.read().await;
            let result = state.server.handle_tools_list().await.map_err(internal)?;
            Ok(Some(result))
        }
        "tools/call" => {
            let state = state.read().await;
            if !state.initialized {
                warn!("tools/call before initialize");
            }
            let result = state.server.handle_tools_call(request.params).await.map_err(internal)?;
            Ok(Some(result))
        }
        "resources/list" => Ok(Some(serde_json::json!({"resources": []}))),
        "prompts/list" => Ok(Some(serde_json::json!({"prompts": []}))),
        "logging/setLevel" => {
            // Acknowledge but ignore
            Ok(Some(serde_json::json!({})))
        }
        _ => {
            warn!("Unknown method: {}", method);
            Err(JsonRpcError::method_not_found(method))
        }
    }
}
