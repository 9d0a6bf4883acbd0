//! GDB/MI bridge
//!
//! Correlates commands sent to a GDB/MI debugger with the responses it
//! prints, and turns each response into IDE-ready text with a small
//! instruction language.

pub mod buffers;
pub mod classify;
pub mod config;
pub mod console;
pub(crate) mod dispatch;
pub mod error;
pub mod instructions;
pub mod interpreter;
pub(crate) mod listener;
pub mod session;
pub mod types;

pub use config::BridgeConfig;
pub use console::{DebuggerConsole, ProcessConsole};
pub use error::{BridgeError, Result};
pub use instructions::InstructionTable;
pub use interpreter::parse as parse_text;
pub use session::{list_processes, LaunchPlan, Session};
pub use types::*;
