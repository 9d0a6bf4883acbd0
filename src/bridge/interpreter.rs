//! Parsing instruction interpreter
//!
//! An instruction is a string of single-character operators evaluated left to
//! right against one raw debugger response. The interpreter keeps a cursor
//! into the response, a search limit, and ten scratch variables, and builds
//! the formatted output the IDE expects.
//!
//! | Operator              | Effect                                                    |
//! |-----------------------|-----------------------------------------------------------|
//! | `?[%][<][N?]text;`    | move the cursor past the N-th match of `text`             |
//! | `?text;{then}{else}`  | run `then` if the search succeeds, `else` otherwise       |
//! | `@[N@]text;`          | append everything from the cursor up to `text`            |
//! | `#text;`              | append `text`                                             |
//! | `~text;`              | searches may not pass the next occurrence of `text`       |
//! | `(body):sep;`         | repeat `body` while it matches, joining results with sep  |
//! | `0;`                  | rewind the cursor to where the enclosing run started      |
//! | `%`                   | drop the next anchored extraction from the response       |
//! | `$N=body$$;`          | store the result of `body` in variable N                  |
//! | `$END$` / `$EOR$`     | stop here / move the cursor to the end of the response    |
//!
//! `$N$` inside search and literal text expands to variable N and `$EOL$` to
//! CRLF. A backslash makes the next character literal.

use crate::bridge::types::{ParsedResponse, MAX_PARSED_LEN};
use std::ops::ControlFlow;

const VARIABLE_SLOTS: usize = 10;
const CRLF: &[u8] = b"\r\n";
const DEFAULT_SEPARATOR: &[u8] = b"#";

/// Run `instruction` against `response`.
///
/// Returns "" when nothing matched. The result is capped at
/// [`MAX_PARSED_LEN`] bytes.
pub fn parse(response: &str, instruction: &str) -> String {
    let mut output = Interpreter::new(response).run(instruction.as_bytes());
    output.truncate(MAX_PARSED_LEN);
    String::from_utf8_lossy(&output).into_owned()
}

/// [`parse`], tagging an empty result so it can be told apart from "no output yet".
pub fn parse_response(response: &str, instruction: &str) -> ParsedResponse {
    ParsedResponse::from_text(parse(response, instruction))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchOp {
    Anchor,
    Extract,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteMark {
    Off,
    /// Set by `%`, waiting for the next successful anchor
    Armed,
    /// Start of the span the next extraction removes
    At(usize),
}

/// How a run of instructions ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    /// `$END$`
    End,
    /// An anchor without a conditional block found nothing
    Missed,
    /// An extraction or assignment failed; the run's output is void
    Failed,
}

/// Evaluation state of one run: the top level, a group iteration or an
/// assignment body. Conditional blocks share their parent's frame.
#[derive(Debug)]
struct Frame {
    output: Vec<u8>,
    cursor: usize,
    home: usize,
    limit: usize,
    found: bool,
    mark: DeleteMark,
    drop_selection: bool,
}

impl Frame {
    fn new(start: usize, limit: usize) -> Self {
        Self {
            output: Vec::new(),
            cursor: start,
            home: start,
            limit,
            found: false,
            mark: DeleteMark::Off,
            drop_selection: false,
        }
    }
}

struct Interpreter {
    response: Vec<u8>,
    vars: [Vec<u8>; VARIABLE_SLOTS],
}

impl Interpreter {
    fn new(response: &str) -> Self {
        Self {
            response: response.as_bytes().to_vec(),
            vars: Default::default(),
        }
    }

    fn run(&mut self, instruction: &[u8]) -> Vec<u8> {
        let mut frame = Frame::new(0, self.response.len());
        match self.exec(instruction, &mut frame) {
            Flow::Failed => Vec::new(),
            _ => frame.output,
        }
    }

    fn exec(&mut self, instr: &[u8], frame: &mut Frame) -> Flow {
        let mut pp = 0;
        while pp < instr.len() {
            let step = match instr[pp] {
                b'(' => self.group(instr, pp, frame),
                b'?' => self.anchor(instr, pp, frame),
                b'@' => self.extract(instr, pp, frame),
                b'#' => self.literal(instr, pp, frame),
                b'~' => self.limit(instr, pp, frame),
                b'$' => self.variable(instr, pp, frame),
                b'0' if instr.get(pp + 1) == Some(&b';') => {
                    frame.cursor = frame.home;
                    ControlFlow::Continue(pp + 2)
                }
                b'%' => {
                    frame.drop_selection = true;
                    frame.mark = DeleteMark::Armed;
                    ControlFlow::Continue(pp + 1)
                }
                _ => ControlFlow::Continue(pp + 1),
            };
            match step {
                ControlFlow::Continue(next) => pp = next,
                ControlFlow::Break(flow) => return flow,
            }
        }
        Flow::Next
    }

    /// Run a conditional block in the current frame
    fn nested(&mut self, body: &[u8], frame: &mut Frame) -> ControlFlow<Flow> {
        match self.exec(body, frame) {
            Flow::Next => ControlFlow::Continue(()),
            flow => ControlFlow::Break(flow),
        }
    }

    fn group(&mut self, instr: &[u8], pp: usize, frame: &mut Frame) -> ControlFlow<Flow, usize> {
        let close = find_closing(instr, pp + 1, b'(', b')');
        let body = &instr[pp + 1..close];
        let mut next = (close + 1).min(instr.len());

        let mut separator = DEFAULT_SEPARATOR.to_vec();
        if instr.get(next) == Some(&b':') {
            let end = find_unescaped(instr, b';', next + 1);
            separator = unescape_semicolons(&instr[next + 1..end]);
            next = (end + 1).min(instr.len());
        }
        if separator == b"$EOL$" {
            separator = CRLF.to_vec();
        }

        let joined = self.repeat(body, frame.cursor, &separator);
        frame.output.extend_from_slice(&joined);
        ControlFlow::Continue(next)
    }

    /// Evaluate `body` from `start` until an iteration stops matching.
    ///
    /// Each iteration resumes where the previous one left the cursor. An
    /// iteration whose anchor misses ends the group. A failed extraction or
    /// assignment empties the whole group.
    fn repeat(&mut self, body: &[u8], start: usize, separator: &[u8]) -> Vec<u8> {
        let mut joined = Vec::new();
        let mut cursor = start;

        loop {
            let before = (cursor, self.response.len());
            let mut pass = Frame::new(cursor, self.response.len());
            pass.home = start;

            let flow = self.exec(body, &mut pass);
            match flow {
                Flow::Failed => return Vec::new(),
                Flow::Missed => break,
                _ => {}
            }
            if !pass.output.is_empty() {
                if !joined.is_empty() {
                    joined.extend_from_slice(separator);
                }
                joined.append(&mut pass.output);
            }

            let stalled = (pass.cursor, self.response.len()) == before;
            if flow == Flow::End || !pass.found || stalled {
                break;
            }
            cursor = pass.cursor;
        }

        joined
    }

    fn anchor(&mut self, instr: &[u8], pp: usize, frame: &mut Frame) -> ControlFlow<Flow, usize> {
        let mut at = pp + 1;
        if instr.get(at) == Some(&b'%') {
            frame.mark = DeleteMark::Armed;
            at += 1;
        }
        let direction = if instr.get(at) == Some(&b'<') {
            at += 1;
            Direction::Backward
        } else {
            Direction::Forward
        };
        let (times, text_start) = occurrence_count(instr, at, b'?');
        let end = find_unescaped(instr, b';', text_start);
        let needle = unescape(&self.substitute(&instr[text_start..end]));
        let mut next = (end + 1).min(instr.len());

        let branches = if instr.get(next) == Some(&b'{') {
            let (then_body, else_body, after) = conditional_blocks(instr, next);
            next = after;
            Some((then_body, else_body))
        } else {
            None
        };

        let hit = search(
            &self.response,
            &needle,
            frame.cursor,
            times,
            direction,
            SearchOp::Anchor,
        )
        .filter(|&pos| pos <= frame.limit);

        match (hit, branches) {
            (Some(pos), branches) => {
                frame.cursor = pos;
                frame.found = true;
                if frame.mark == DeleteMark::Armed {
                    frame.mark = pos
                        .checked_sub(needle.len())
                        .map_or(DeleteMark::Off, DeleteMark::At);
                }
                if let Some((then_body, _)) = branches {
                    if let ControlFlow::Break(flow) = self.nested(then_body, frame) {
                        return ControlFlow::Break(flow);
                    }
                }
                ControlFlow::Continue(next)
            }
            (None, Some((_, else_body))) => {
                frame.mark = DeleteMark::Off;
                if let Some(else_body) = else_body {
                    if let ControlFlow::Break(flow) = self.nested(else_body, frame) {
                        return ControlFlow::Break(flow);
                    }
                }
                ControlFlow::Continue(next)
            }
            (None, None) => {
                frame.mark = DeleteMark::Off;
                frame.drop_selection = false;
                ControlFlow::Break(Flow::Missed)
            }
        }
    }

    fn extract(&mut self, instr: &[u8], pp: usize, frame: &mut Frame) -> ControlFlow<Flow, usize> {
        let (times, text_start) = occurrence_count(instr, pp + 1, b'@');
        let end = find_unescaped(instr, b';', text_start);
        let needle = unescape(&self.substitute(&instr[text_start..end]));
        let next = (end + 1).min(instr.len());

        let hit = search(
            &self.response,
            &needle,
            frame.cursor,
            times,
            Direction::Forward,
            SearchOp::Extract,
        )
        .filter(|&pos| pos <= frame.limit);
        let Some(stop) = hit else {
            frame.output.clear();
            return ControlFlow::Break(Flow::Failed);
        };

        if !frame.drop_selection && stop > frame.cursor {
            frame
                .output
                .extend_from_slice(&self.response[frame.cursor..stop]);
        }
        frame.cursor = stop;

        if let DeleteMark::At(from) = frame.mark {
            let to = (stop + needle.len()).min(self.response.len());
            if from < to {
                self.response.drain(from..to);
            }
            frame.cursor = from.min(self.response.len());
            frame.limit = frame.limit.min(self.response.len());
            frame.mark = DeleteMark::Off;
            frame.drop_selection = false;
        }
        ControlFlow::Continue(next)
    }

    fn literal(&mut self, instr: &[u8], pp: usize, frame: &mut Frame) -> ControlFlow<Flow, usize> {
        let end = find_unescaped(instr, b';', pp + 1);
        let text = self.substitute(&unescape(&instr[pp + 1..end]));
        frame.output.extend_from_slice(&text);
        ControlFlow::Continue((end + 1).min(instr.len()))
    }

    fn limit(&mut self, instr: &[u8], pp: usize, frame: &mut Frame) -> ControlFlow<Flow, usize> {
        let end = find_unescaped(instr, b';', pp + 1);
        let needle = unescape(&instr[pp + 1..end]);
        frame.limit = search(
            &self.response,
            &needle,
            frame.cursor,
            1,
            Direction::Forward,
            SearchOp::Limit,
        )
        .unwrap_or(self.response.len());
        ControlFlow::Continue((end + 1).min(instr.len()))
    }

    fn variable(&mut self, instr: &[u8], pp: usize, frame: &mut Frame) -> ControlFlow<Flow, usize> {
        let rest = &instr[pp..];
        if rest.starts_with(b"$END$") {
            return ControlFlow::Break(Flow::End);
        }
        if rest.starts_with(b"$EOR$") {
            frame.cursor = self.response.len().saturating_sub(1);
            return ControlFlow::Continue(pp + 5);
        }

        let equals = find_unescaped(instr, b'=', pp + 1);
        let dollar = find_unescaped(instr, b'$', pp + 1);
        if equals >= dollar {
            return ControlFlow::Continue(pp + 1);
        }

        let slot = atoi(&instr[pp + 1..equals]);
        let Some(close) = find_bytes(instr, b"$$;", equals + 1) else {
            return ControlFlow::Break(Flow::End);
        };

        // Assignments evaluate at the cursor without moving it
        let mut sub = Frame::new(frame.cursor, self.response.len());
        let flow = self.exec(&instr[equals + 1..close], &mut sub);
        if flow == Flow::Failed || sub.output.is_empty() {
            frame.output.clear();
            return ControlFlow::Break(Flow::Failed);
        }
        if let Some(var) = usize::try_from(slot).ok().and_then(|s| self.vars.get_mut(s)) {
            *var = sub.output;
        }
        ControlFlow::Continue(close + 3)
    }

    /// Expand `$N$` and `$EOL$`. Inserted values are not rescanned.
    fn substitute(&self, text: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len());
        let mut i = 0;
        while i < text.len() {
            if text[i] != b'$' {
                out.push(text[i]);
                i += 1;
                continue;
            }
            let Some(close) = text[i + 1..].iter().position(|&b| b == b'$') else {
                out.extend_from_slice(&text[i..]);
                break;
            };
            let close = close + i + 1;
            let name = &text[i + 1..close];
            if name == b"EOL" {
                out.extend_from_slice(CRLF);
            } else if let Some(value) = usize::try_from(atoi(name))
                .ok()
                .and_then(|slot| self.vars.get(slot))
            {
                out.extend_from_slice(value);
            }
            i = close + 1;
        }
        out
    }
}

/// Position after searching `needle` `times` times from `start`.
///
/// Forward searches step past every intermediate match. The final match
/// leaves the cursor past it for anchors and at its start for extractions
/// and limits. Backward searches land past the final match and one byte
/// before every intermediate one.
fn search(
    hay: &[u8],
    needle: &[u8],
    start: usize,
    times: usize,
    direction: Direction,
    op: SearchOp,
) -> Option<usize> {
    let mut cursor = start;
    let mut remaining = times;

    while remaining > 0 {
        if cursor >= hay.len() {
            return None;
        }
        match direction {
            Direction::Forward => {
                // A line-start pattern matches the very first line too
                if cursor == 0
                    && needle.len() > CRLF.len()
                    && needle.starts_with(CRLF)
                    && hay.starts_with(&needle[CRLF.len()..])
                {
                    remaining -= 1;
                    continue;
                }
                let at = find_bytes(hay, needle, cursor)?;
                cursor = if remaining != 1 || op == SearchOp::Anchor {
                    at + needle.len()
                } else {
                    at
                };
            }
            Direction::Backward => match rfind_bytes(hay, needle, cursor) {
                Some(at) if remaining == 1 => cursor = at + needle.len(),
                Some(at) => cursor = at.checked_sub(1)?,
                None if needle.starts_with(CRLF) => return Some(2),
                None => return None,
            },
        }
        remaining -= 1;
    }

    Some(cursor)
}

/// Parse the optional `N<sigil>` occurrence count after an operator.
/// Returns the count and where the operand text starts.
fn occurrence_count(instr: &[u8], at: usize, sigil: u8) -> (usize, usize) {
    if instr.get(at) == Some(&sigil) {
        return (1, at + 1);
    }
    let digits = instr
        .get(at..)
        .map_or(0, |rest| rest.iter().take_while(|b| b.is_ascii_digit()).count());
    if digits > 0 && instr.get(at + digits) == Some(&sigil) {
        let times = usize::try_from(atoi(&instr[at..at + digits])).unwrap_or(0);
        (times, at + digits + 1)
    } else {
        (1, at.min(instr.len()))
    }
}

/// Split `{then}{else};` starting at the opening brace.
fn conditional_blocks(instr: &[u8], open: usize) -> (&[u8], Option<&[u8]>, usize) {
    let close = find_closing(instr, open + 1, b'{', b'}');
    let then_body = &instr[open + 1..close];
    let mut after = (close + 1).min(instr.len());

    let mut else_body = None;
    if instr.get(after) == Some(&b'{') {
        let close = find_closing(instr, after + 1, b'{', b'}');
        else_body = Some(&instr[after + 1..close]);
        after = (close + 1).min(instr.len());
    }
    if instr.get(after) == Some(&b';') {
        after += 1;
    }
    (then_body, else_body, after)
}

/// Index of the `close` matching an already consumed `open`, or the end.
fn find_closing(instr: &[u8], from: usize, open: u8, close: u8) -> usize {
    let mut depth = 1usize;
    let mut i = from;
    while i < instr.len() {
        match instr[i] {
            b'\\' => i += 1,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
        i += 1;
    }
    instr.len()
}

/// Next `byte` at or after `from` that is not escaped, or the end.
fn find_unescaped(hay: &[u8], byte: u8, from: usize) -> usize {
    let mut i = from;
    while i < hay.len() {
        if hay[i] == b'\\' {
            i += 2;
            continue;
        }
        if hay[i] == byte {
            return i;
        }
        i += 1;
    }
    hay.len()
}

fn unescape(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut bytes = text.iter();
    while let Some(&b) = bytes.next() {
        if b == b'\\' {
            if let Some(&escaped) = bytes.next() {
                out.push(escaped);
            }
        } else {
            out.push(b);
        }
    }
    out
}

fn unescape_semicolons(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if text[i] == b'\\' && text.get(i + 1) == Some(&b';') {
            out.push(b';');
            i += 2;
        } else {
            out.push(text[i]);
            i += 1;
        }
    }
    out
}

fn find_bytes(hay: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > hay.len() {
        return None;
    }
    if needle.is_empty() {
        return Some(from);
    }
    hay[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|p| p + from)
}

/// Last match of `needle` starting at or before `at`
fn rfind_bytes(hay: &[u8], needle: &[u8], at: usize) -> Option<usize> {
    let last = hay.len().checked_sub(needle.len())?.min(at);
    (0..=last)
        .rev()
        .find(|&i| &hay[i..i + needle.len()] == needle)
}

/// C-style integer prefix: leading whitespace, optional sign, digits.
pub(crate) fn atoi(text: &[u8]) -> i64 {
    let mut bytes = text.iter().skip_while(|b| b.is_ascii_whitespace()).peekable();
    let negative = match bytes.peek() {
        Some(b'-') => {
            bytes.next();
            true
        }
        Some(b'+') => {
            bytes.next();
            false
        }
        _ => false,
    };
    let mut value: i64 = 0;
    for b in bytes.take_while(|b| b.is_ascii_digit()) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }
    if negative {
        -value
    } else {
        value
    }
}
