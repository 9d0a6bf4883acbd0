//! GDB/MI bridge type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence ids below this value are synchronous and addressed directly
pub const SYNC_WINDOW: u32 = 50;

/// First auto-assigned sequence id; auto ids wrap within `[50, 100)`
pub const ASYNC_BASE: u32 = 50;

/// Number of slots in the correlation and output tables
pub const TABLE_SLOTS: usize = 100;

/// Capacity of the outbound command queue
pub const COMMAND_SLOTS: usize = 50;

/// Longest parsed response handed to the IDE, in bytes
pub const MAX_PARSED_LEN: usize = 8191;

/// Marker delivered in place of a response that parsed to nothing
pub const PARSED_EMPTY: &str = "$#@EMPTY@#$";

/// Value returned by the bounded wait when the debugger stays silent
pub const TIMEOUT_MARKER: &str = "TIMEOUT!";

/// Prompt printed by the debugger after each complete response
pub const PROMPT: &str = "(gdb)";

/// Instruction applied to asynchronous events
pub const ASYNC_INSTRUCTION: usize = 0;

/// Instruction applied to `=breakpoint-modified` notices
pub const BREAKPOINT_MODIFIED_INSTRUCTION: usize = 1;

/// Map a sequence id onto its correlation/output slot.
pub fn slot_for(seq_id: u32) -> usize {
    if seq_id < SYNC_WINDOW {
        seq_id as usize
    } else {
        ((seq_id % SYNC_WINDOW) + ASYNC_BASE) as usize
    }
}

/// Next auto-assigned sequence id after `seq_id`.
pub fn next_auto_id(seq_id: u32) -> u32 {
    ((seq_id + 1) % SYNC_WINDOW) + ASYNC_BASE
}

/// Classification of one raw response chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTag {
    /// Result record carrying the sequence id of the command it answers
    Command(u32),
    /// `*running` / `*stopped` exec record
    Async,
    /// `=breakpoint-modified` notice
    BreakpointModified,
    /// Nothing recognisable yet, more output is needed
    Incomplete,
}

impl ResponseTag {
    /// Instruction for out-of-band responses that have no correlation entry
    pub fn fixed_instruction(&self) -> Option<usize> {
        match self {
            ResponseTag::Async => Some(ASYNC_INSTRUCTION),
            ResponseTag::BreakpointModified => Some(BREAKPOINT_MODIFIED_INSTRUCTION),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseTag::Command(id) => write!(f, "command {}", id),
            ResponseTag::Async => write!(f, "async"),
            ResponseTag::BreakpointModified => write!(f, "breakpoint-modified"),
            ResponseTag::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// Pending command awaiting its response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationEntry {
    pub seq_id: u32,
    pub instruction: usize,
    /// Command arguments replayed into the response before parsing
    pub params: Option<String>,
}

/// A parsed response waiting in the output table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    Text(String),
    /// The instruction ran but produced nothing
    Empty,
}

impl ParsedResponse {
    pub fn from_text(text: String) -> Self {
        if text.is_empty() {
            ParsedResponse::Empty
        } else {
            ParsedResponse::Text(text)
        }
    }

    /// Text as delivered to the IDE, with the parsed-empty marker
    pub fn into_wire(self) -> String {
        match self {
            ParsedResponse::Text(text) => text,
            ParsedResponse::Empty => PARSED_EMPTY.to_string(),
        }
    }

    /// Text with an empty parse mapped to ""
    pub fn into_text(self) -> String {
        match self {
            ParsedResponse::Text(text) => text,
            ParsedResponse::Empty => String::new(),
        }
    }
}

/// Snapshot of a running session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: Option<String>,
    pub running: bool,
    pub queued_commands: usize,
    pub pending_correlations: usize,
    pub debugger_closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_folding() {
        assert_eq!(slot_for(0), 0);
        assert_eq!(slot_for(49), 49);
        assert_eq!(slot_for(50), 50);
        assert_eq!(slot_for(99), 99);
        assert_eq!(slot_for(100), 50);
        assert_eq!(slot_for(173), 73);
    }

    #[test]
    fn test_auto_id_wraps_inside_window() {
        assert_eq!(next_auto_id(50), 51);
        assert_eq!(next_auto_id(98), 99);
        assert_eq!(next_auto_id(99), 50);
    }

    #[test]
    fn test_parsed_response_wire_forms() {
        assert_eq!(ParsedResponse::from_text(String::new()), ParsedResponse::Empty);
        assert_eq!(ParsedResponse::Empty.into_wire(), PARSED_EMPTY);
        assert_eq!(ParsedResponse::Empty.into_text(), "");
        assert_eq!(ParsedResponse::from_text("x".to_string()).into_wire(), "x");
    }

    #[test]
    fn test_fixed_instructions() {
        assert_eq!(ResponseTag::Async.fixed_instruction(), Some(0));
        assert_eq!(ResponseTag::BreakpointModified.fixed_instruction(), Some(1));
        assert_eq!(ResponseTag::Command(3).fixed_instruction(), None);
        assert_eq!(ResponseTag::Incomplete.to_string(), "incomplete");
    }
}
