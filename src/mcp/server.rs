//! MCP Server Handler Implementation

use crate::bridge::{
    list_processes, parse_text, BridgeConfig, DebuggerConsole, InstructionTable, LaunchPlan,
    ProcessConsole, Session, SessionStatus, SYNC_WINDOW,
};
use crate::mcp::protocol::*;
use crate::mcp::tools::get_all_tools;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

type Arguments = Option<serde_json::Map<String, serde_json::Value>>;

/// GDB/MI bridge MCP Server
pub struct BridgeMcpServer {
    session: Arc<RwLock<Option<Arc<Session>>>>,
    config: BridgeConfig,
}

impl BridgeMcpServer {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            session: Arc::new(RwLock::new(None)),
            config,
        }
    }

    /// Get server info
    pub fn get_info(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: Implementation {
                name: "gdb-mi-bridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "GDB/MI bridge: correlates MI commands with their responses and returns them parsed.\n\n\
                 Start with 'bridge_launch'. Queue commands with 'bridge_submit_command' and collect their \
                 parsed responses in order with 'bridge_next_response', or run one command to completion with \
                 'bridge_parse_command'. Finish with 'bridge_end_session'.".to_string()
            ),
        }
    }

    /// Handle initialize request
    pub async fn handle_initialize(&self, _params: Option<serde_json::Value>) -> Result<serde_json::Value> {
        let info = self.get_info();
        Ok(serde_json::to_value(info)?)
    }

    /// Handle tools/list request
    pub async fn handle_tools_list(&self) -> Result<serde_json::Value> {
        let tools: Vec<Tool> = get_all_tools()
            .into_iter()
            .map(|t| Tool {
                name: t.name,
                description: Some(t.description),
                input_schema: t.input_schema,
            })
            .collect();

        let result = ListToolsResult {
            tools,
            next_cursor: None,
        };

        Ok(serde_json::to_value(result)?)
    }

    /// Handle tools/call request
    pub async fn handle_tools_call(&self, params: Option<serde_json::Value>) -> Result<serde_json::Value> {
        let params = params.ok_or_else(|| anyhow::anyhow!("Missing params"))?;
        let request: CallToolRequest = serde_json::from_value(params)?;

        debug!("Calling tool: {}", request.name);

        let result = match request.name.as_str() {
            "bridge_launch" => self.handle_launch(request.arguments).await,
            "bridge_list_processes" => self.handle_list_processes(request.arguments).await,
            "bridge_submit_command" => self.handle_submit_command(request.arguments).await,
            "bridge_parse_command" => self.handle_parse_command(request.arguments).await,
            "bridge_next_response" => self.handle_next_response(request.arguments).await,
            "bridge_queue_empty" => self.handle_queue_empty().await,
            "bridge_end_session" => self.handle_end_session().await,
            "bridge_parse_text" => self.handle_parse_text(request.arguments),
            "bridge_status" => self.handle_status().await,
            _ => Ok(CallToolResult::error_text(format!("Unknown tool: {}", request.name))),
        };

        Ok(serde_json::to_value(result?)?)
    }

    /// Running session, if any
    async fn current(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .await
            .as_ref()
            .filter(|session| session.is_running())
            .cloned()
    }

    /// End any session still running, e.g. when the client goes away
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(session) = self.session.write().await.take() {
            info!("Ending session {} on shutdown", session.id());
            tokio::task::spawn_blocking(move || session.end_session()).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    async fn install(&self, session: Session) -> Result<()> {
        let mut guard = self.session.write().await;
        replace_session(&mut guard, session).await
    }

    // ========================================================================
    // Tool Handlers
    // ========================================================================

    async fn handle_launch(&self, args: Arguments) -> Result<CallToolResult> {
        let executable = str_arg(&args, "executable")
            .ok_or_else(|| anyhow::anyhow!("executable is required"))?;

        let mut guard = self.session.write().await;
        if guard.as_ref().is_some_and(|session| session.is_running()) {
            return Ok(CallToolResult::error_text("A bridge session is already running. Use bridge_end_session first."));
        }

        let mut config = self.config.clone();
        if let Some(gdb_path) = str_arg(&args, "gdb_path") {
            config.gdb_path = gdb_path;
        }
        if let Some(path) = str_arg(&args, "instructions_path") {
            config.instructions_path = PathBuf::from(path);
        }
        if let Some(path) = str_arg(&args, "raw_log_path") {
            config.raw_log_path = Some(PathBuf::from(path));
        }
        config.validate()?;

        let plan = LaunchPlan {
            target: str_arg(&args, "target"),
            executable,
            pid: u64_arg(&args, "pid").and_then(|pid| u32::try_from(pid).ok()),
        };

        info!("Launching bridge session for {}", plan.executable);

        let launched = tokio::task::spawn_blocking(move || -> crate::bridge::Result<Session> {
            let table = InstructionTable::load(&config.instructions_path)?;
            debug!("Loaded {} instructions from {}", table.len(), config.instructions_path.display());
            let console = ProcessConsole::spawn(&config)?;
            debug!("Debugger running as pid {}", console.pid());
            let console: Arc<dyn DebuggerConsole> = Arc::new(console);
            Session::launch(config, console, table, &plan)
        })
        .await?;

        match launched {
            Ok(session) => {
                let id = session.id();
                replace_session(&mut guard, session).await?;
                Ok(CallToolResult::text(format!("Bridge session {} started.", id)))
            }
            Err(e) => Ok(CallToolResult::error_text(format!("Launch failed: {}", e))),
        }
    }

    async fn handle_list_processes(&self, args: Arguments) -> Result<CallToolResult> {
        let target = str_arg(&args, "target")
            .ok_or_else(|| anyhow::anyhow!("target is required"))?;
        let timeout = u64_arg(&args, "timeout_secs")
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.connect_timeout());
        let config = self.config.clone();

        info!("Listing processes on {}", target);

        let text = tokio::task::spawn_blocking(move || -> Result<String> {
            let console = ProcessConsole::spawn(&config)?;
            Ok(list_processes(&config, &console, &target, timeout))
        })
        .await??;

        Ok(CallToolResult::text(text))
    }

    async fn handle_submit_command(&self, args: Arguments) -> Result<CallToolResult> {
        let command = str_arg(&args, "command")
            .ok_or_else(|| anyhow::anyhow!("command is required"))?;
        let Some(session) = self.current().await else {
            return Ok(no_session());
        };

        let queued = tokio::task::spawn_blocking(move || session.submit_command(&command)).await?;
        if queued {
            Ok(CallToolResult::text("Command queued."))
        } else {
            Ok(CallToolResult::error_text("Session stopped before the command was queued."))
        }
    }

    async fn handle_parse_command(&self, args: Arguments) -> Result<CallToolResult> {
        let command = str_arg(&args, "command")
            .ok_or_else(|| anyhow::anyhow!("command is required"))?;
        let Some(id) = sync_id(&args)? else {
            return Err(anyhow::anyhow!("id is required"));
        };
        let Some(session) = self.current().await else {
            return Ok(no_session());
        };

        let parsed = tokio::task::spawn_blocking(move || session.parse_command(&command, id)).await?;
        Ok(CallToolResult::text(parsed))
    }

    async fn handle_next_response(&self, args: Arguments) -> Result<CallToolResult> {
        let id = sync_id(&args)?;
        let Some(session) = self.current().await else {
            return Ok(no_session());
        };

        let text = match id {
            Some(id) => session.next_sync_response(id),
            None => tokio::task::spawn_blocking(move || session.next_async_response()).await?,
        };
        Ok(CallToolResult::text(text))
    }

    async fn handle_queue_empty(&self) -> Result<CallToolResult> {
        let Some(session) = self.current().await else {
            return Ok(no_session());
        };
        Ok(CallToolResult::text(session.is_command_queue_empty().to_string()))
    }

    async fn handle_end_session(&self) -> Result<CallToolResult> {
        info!("Ending bridge session");

        let Some(session) = self.session.write().await.take() else {
            return Ok(CallToolResult::error_text("No bridge session is running."));
        };
        tokio::task::spawn_blocking(move || session.end_session()).await?;
        Ok(CallToolResult::text("Bridge session ended."))
    }

    fn handle_parse_text(&self, args: Arguments) -> Result<CallToolResult> {
        let response = str_arg(&args, "response")
            .ok_or_else(|| anyhow::anyhow!("response is required"))?;
        let instruction = str_arg(&args, "instruction")
            .ok_or_else(|| anyhow::anyhow!("instruction is required"))?;
        Ok(CallToolResult::text(parse_text(&response, &instruction)))
    }

    async fn handle_status(&self) -> Result<CallToolResult> {
        let guard = self.session.read().await;
        let status = match guard.as_ref() {
            Some(session) => session.status(),
            None => SessionStatus::default(),
        };
        Ok(CallToolResult::text(serde_json::to_string_pretty(&status)?))
    }
}

/// Store `session`, ending the one it replaces on the blocking pool
async fn replace_session(slot: &mut Option<Arc<Session>>, session: Session) -> Result<()> {
    if let Some(stale) = slot.replace(Arc::new(session)) {
        debug!("Ending replaced session {}", stale.id());
        tokio::task::spawn_blocking(move || stale.end_session()).await?;
    }
    Ok(())
}

fn str_arg(args: &Arguments, key: &str) -> Option<String> {
    args.as_ref()
        .and_then(|a| a.get(key))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn u64_arg(args: &Arguments, key: &str) -> Option<u64> {
    args.as_ref().and_then(|a| a.get(key)).and_then(|v| v.as_u64())
}

/// Optional `id` argument, which must name a synchronous slot
fn sync_id(args: &Arguments) -> Result<Option<u32>> {
    match u64_arg(args, "id") {
        None => Ok(None),
        Some(id) if id < u64::from(SYNC_WINDOW) => Ok(Some(id as u32)),
        Some(id) => Err(anyhow::anyhow!("id must be below {}, got {}", SYNC_WINDOW, id)),
    }
}

fn no_session() -> CallToolResult {
    CallToolResult::error_text("No bridge session is running. Use bridge_launch first.")
}
