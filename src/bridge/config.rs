//! Bridge configuration

use crate::bridge::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a JSON configuration file
pub const CONFIG_ENV: &str = "GDB_MI_BRIDGE_CONFIG";

/// Where parsing instructions run for each classified response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseStrategy {
    /// Parse on the response loop itself
    Inline,
    /// Spawn a short-lived worker per response
    PerResponseThread,
}

/// Instruction codes used while launching a session.
///
/// Each handshake step is parsed with the instruction at the given line of
/// the instruction source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeCodes {
    pub startup: usize,
    pub target_select: usize,
    pub attach: usize,
    pub exec_and_symbols: usize,
    pub pending_breakpoints: usize,
}

impl Default for HandshakeCodes {
    fn default() -> Self {
        Self {
            startup: 2,
            target_select: 3,
            attach: 6,
            exec_and_symbols: 7,
            pending_breakpoints: 8,
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub gdb_path: String,
    pub gdb_args: Vec<String>,
    pub instructions_path: PathBuf,
    /// Optional raw I/O diagnostic log, truncated at session start
    pub raw_log_path: Option<PathBuf>,
    pub parse_strategy: ParseStrategy,
    pub poll_interval_ms: u64,
    /// How long an async poll waits for new output
    pub wait_time_ms: u64,
    /// Reads tolerated for an unclassifiable response before it is
    /// published as an asynchronous event
    pub unknown_response_retries: u32,
    /// Repeated `-exec-interrupt` commands absorbed as bare signals
    pub interrupt_debounce: u32,
    pub connect_timeout_secs: u64,
    /// Terminate commands with CRLF instead of LF
    pub crlf_commands: bool,
    /// Rewrite bare LF from the debugger as CRLF
    pub normalize_line_endings: bool,
    pub handshake: HandshakeCodes,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gdb_path: "gdb".to_string(),
            gdb_args: vec!["--interpreter=mi2".to_string()],
            instructions_path: PathBuf::from("Instructions.txt"),
            raw_log_path: None,
            parse_strategy: ParseStrategy::Inline,
            poll_interval_ms: 10,
            wait_time_ms: 1000,
            unknown_response_retries: 10,
            interrupt_debounce: 5,
            connect_timeout_secs: 30,
            crlf_commands: cfg!(windows),
            normalize_line_endings: !cfg!(windows),
            handshake: HandshakeCodes::default(),
        }
    }
}

impl BridgeConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Load from the file named by `GDB_MI_BRIDGE_CONFIG`, or use defaults
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn line_ending(&self) -> &'static str {
        if self.crlf_commands {
            "\r\n"
        } else {
            "\n"
        }
    }

    /// Reject unusable values
    pub fn validate(&self) -> Result<()> {
        if self.gdb_path.trim().is_empty() {
            return Err(BridgeError::Config(serde::de::Error::custom(
                "gdb_path must not be empty",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.wait_time(), Duration::from_millis(1000));
        assert_eq!(config.unknown_response_retries, 10);
        assert_eq!(config.interrupt_debounce, 5);
        assert_eq!(config.parse_strategy, ParseStrategy::Inline);
        assert_eq!(config.handshake.startup, 2);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: BridgeConfig = serde_json::from_str(
            r#"{"gdb_path": "gdb-multiarch", "parse_strategy": "per-response-thread", "handshake": {"attach": 9}}"#,
        )
        .unwrap();
        assert_eq!(config.gdb_path, "gdb-multiarch");
        assert_eq!(config.parse_strategy, ParseStrategy::PerResponseThread);
        assert_eq!(config.handshake.attach, 9);
        assert_eq!(config.handshake.startup, 2);
        assert_eq!(config.poll_interval_ms, 10);
    }

    #[test]
    fn test_validate_rejects_empty_gdb_path() {
        let config = BridgeConfig {
            gdb_path: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_line_ending() {
        let config = BridgeConfig {
            crlf_commands: true,
            ..Default::default()
        };
        assert_eq!(config.line_ending(), "\r\n");
    }
}
