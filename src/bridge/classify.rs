//! Response classification and chunk splitting

use crate::bridge::interpreter::atoi;
use crate::bridge::types::{ResponseTag, PROMPT};

/// Result markers, in priority order
const RESULT_MARKERS: [&str; 4] = ["^done", "^running", "^error", "^connected"];

/// Markers within this distance of the chunk start need no delimiter search
const SHORT_PREFIX: usize = 15;

const RUNNING: &str = "*running";
const STOPPED: &str = "*stopped";
const BREAKPOINT_MODIFIED: &str = "=breakpoint-modified";

/// Determine which command, if any, a raw response chunk answers
pub fn classify(chunk: &str) -> ResponseTag {
    let marker = RESULT_MARKERS
        .iter()
        .find_map(|marker| chunk.find(marker));

    let Some(end) = marker else {
        if chunk.contains(RUNNING) || chunk.contains(STOPPED) {
            return ResponseTag::Async;
        }
        if chunk.starts_with(BREAKPOINT_MODIFIED) {
            return ResponseTag::BreakpointModified;
        }
        return ResponseTag::Incomplete;
    };

    let bytes = chunk.as_bytes();
    let begin = if end < SHORT_PREFIX {
        0
    } else {
        bytes[..end]
            .iter()
            .rposition(|&b| b == b'"' || b == b'}')
            .map_or(0, |p| p + 1)
    };

    match u32::try_from(atoi(&bytes[begin..end])) {
        Ok(seq_id) => ResponseTag::Command(seq_id),
        Err(_) => ResponseTag::Incomplete,
    }
}

/// Where the next response ends and how much input it consumes.
///
/// A response ends at the debugger prompt, whose line is consumed with it.
/// Without a prompt, anything longer than a stray line ending is offered
/// whole. When one response holds both `*running` and `*stopped`, it is cut
/// at the later marker and the rest is left for the next pass.
pub fn next_response(buffer: &str) -> Option<(usize, usize)> {
    let (end, consumed) = match buffer.find(PROMPT) {
        Some(at) => (at, at + prompt_line_len(&buffer[at..])),
        None if buffer.len() > 3 => (buffer.len(), buffer.len()),
        None => return None,
    };

    let chunk = &buffer[..end];
    if let (Some(running), Some(stopped)) = (chunk.find(RUNNING), chunk.find(STOPPED)) {
        let cut = running.max(stopped);
        return Some((cut, cut));
    }
    Some((end, consumed))
}

/// Drop prompt lines at the start of `buffer`
pub fn strip_leading_prompts(buffer: &mut String) {
    while buffer.starts_with(PROMPT) {
        let len = prompt_line_len(buffer);
        buffer.drain(..len);
    }
}

/// Length of the prompt, trailing blanks and one line ending
fn prompt_line_len(text: &str) -> usize {
    let rest = &text[PROMPT.len()..];
    let blanks = rest.len() - rest.trim_start_matches(' ').len();
    let rest = &rest[blanks..];
    let eol = if rest.starts_with("\r\n") {
        2
    } else if rest.starts_with('\n') {
        1
    } else {
        0
    };
    PROMPT.len() + blanks + eol
}

/// True once `text` ends with a complete prompt line
pub fn ends_with_prompt(text: &str) -> bool {
    text.trim_end().ends_with(PROMPT)
}
