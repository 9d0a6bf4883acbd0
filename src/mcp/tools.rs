//! MCP Tool Definitions for the GDB/MI bridge

use serde::{Deserialize, Serialize};

/// MCP Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Tool: Launch a debug session
pub fn tool_launch() -> ToolDefinition {
    ToolDefinition {
        name: "bridge_launch".to_string(),
        description: "Start GDB, run the launch handshake (pending breakpoints, optional remote target, executable, optional attach) and begin correlating commands with responses.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "executable": {
                    "type": "string",
                    "description": "Executable to load with -file-exec-and-symbols"
                },
                "target": {
                    "type": "string",
                    "description": "Remote target for -target-select (e.g., 'remote localhost:1234')"
                },
                "pid": {
                    "type": "integer",
                    "description": "Process id to attach to"
                },
                "gdb_path": {
                    "type": "string",
                    "description": "Path to GDB executable (overrides configuration)"
                },
                "instructions_path": {
                    "type": "string",
                    "description": "Instruction source file (overrides configuration)"
                },
                "raw_log_path": {
                    "type": "string",
                    "description": "Write a timestamped copy of all debugger I/O to this file"
                }
            },
            "required": ["executable"]
        }),
    }
}

/// Tool: List processes on a remote target
pub fn tool_list_processes() -> ToolDefinition {
    ToolDefinition {
        name: "bridge_list_processes".to_string(),
        description: "Connect a short-lived GDB to a remote target and return the raw 'info pidlist' output, or TIMEOUT! if the target does not answer.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "target": {
                    "type": "string",
                    "description": "Remote target for -target-select"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Connection timeout in seconds (default from configuration)"
                }
            },
            "required": ["target"]
        }),
    }
}

/// Tool: Queue a command
pub fn tool_submit_command() -> ToolDefinition {
    ToolDefinition {
        name: "bridge_submit_command".to_string(),
        description: "Queue a GDB/MI command. Untagged commands get the next asynchronous sequence id; their parsed responses are read with bridge_next_response.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "MI command, e.g. '-exec-next' or '-break-insert main.c:12'"
                }
            },
            "required": ["command"]
        }),
    }
}

/// Tool: Run a command synchronously
pub fn tool_parse_command() -> ToolDefinition {
    ToolDefinition {
        name: "bridge_parse_command".to_string(),
        description: "Send a command under a synchronous id (0-49) and wait for its parsed response.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "MI command"
                },
                "id": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": 49,
                    "description": "Synchronous sequence id"
                }
            },
            "required": ["command", "id"]
        }),
    }
}

/// Tool: Poll for a parsed response
pub fn tool_next_response() -> ToolDefinition {
    ToolDefinition {
        name: "bridge_next_response".to_string(),
        description: "Return the next parsed asynchronous response, or the synchronous response for 'id' if given. Empty text means nothing has arrived yet.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": 49,
                    "description": "Synchronous sequence id to take instead of the next async response"
                }
            },
            "required": []
        }),
    }
}

/// Tool: Check the command queue
pub fn tool_queue_empty() -> ToolDefinition {
    ToolDefinition {
        name: "bridge_queue_empty".to_string(),
        description: "Report whether every queued command has been dispatched to GDB.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        }),
    }
}

/// Tool: End the session
pub fn tool_end_session() -> ToolDefinition {
    ToolDefinition {
        name: "bridge_end_session".to_string(),
        description: "Stop GDB and the bridge worker threads.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        }),
    }
}

/// Tool: Run an instruction on given text
pub fn tool_parse_text() -> ToolDefinition {
    ToolDefinition {
        name: "bridge_parse_text".to_string(),
        description: "Run a parsing instruction against a response text without a debugger. Useful for developing instruction sources.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "response": {
                    "type": "string",
                    "description": "Raw debugger response"
                },
                "instruction": {
                    "type": "string",
                    "description": "Parsing instruction, e.g. '?value=\";@\";'"
                }
            },
            "required": ["response", "instruction"]
        }),
    }
}

/// Tool: Session status
pub fn tool_status() -> ToolDefinition {
    ToolDefinition {
        name: "bridge_status".to_string(),
        description: "Get the current session status: id, whether it is running, queued commands and responses still awaited.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        }),
    }
}

/// Get all available tools
pub fn get_all_tools() -> Vec<ToolDefinition> {
    vec![
        tool_launch(),
        tool_list_processes(),
        tool_submit_command(),
        tool_parse_command(),
        tool_next_response(),
        tool_queue_empty(),
        tool_end_session(),
        tool_parse_text(),
        tool_status(),
    ]
}
