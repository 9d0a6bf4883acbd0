//! Bridge error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Cannot open instruction source {path}: {source}")]
    InstructionSource {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid instruction pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Command not present in the instruction table: {0}")]
    UnknownCommand(String),
    #[error("Failed to start debugger {path}: {source}")]
    Spawn {
        path: String,
        source: std::io::Error,
    },
    #[error("Debugger console is closed")]
    ConsoleClosed,
    #[error("Interrupt delivery failed: {0}")]
    Interrupt(String),
    #[error("Interrupting the debugger is not supported on this platform")]
    InterruptUnsupported,
    #[error("Launch step '{step}' failed: {response:?}")]
    LaunchStep {
        step: &'static str,
        response: String,
    },
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
