//! Response loop
//!
//! Reads debugger output, splits it into responses, matches each response
//! with the command it answers and publishes the parsed result.

use crate::bridge::classify::{classify, next_response, strip_leading_prompts};
use crate::bridge::config::ParseStrategy;
use crate::bridge::console::wait_for_prompt;
use crate::bridge::interpreter::parse_response;
use crate::bridge::session::Shared;
use crate::bridge::types::{
    next_auto_id, ParsedResponse, ResponseTag, ASYNC_BASE, ASYNC_INSTRUCTION, SYNC_WINDOW,
};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, trace, warn, Span};

pub(crate) struct ResponseLoop {
    shared: Arc<Shared>,
    buffer: String,
    /// Next asynchronous output slot
    stamp: u32,
    retries_left: u32,
}

pub(crate) fn run(shared: Arc<Shared>) {
    info!("Response loop started");
    let mut responses = ResponseLoop::new(shared);
    while responses.shared.is_running() {
        if !responses.poll() {
            break;
        }
    }
    info!("Response loop stopped");
}

impl ResponseLoop {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let retries_left = shared.config.unknown_response_retries;
        Self {
            shared,
            buffer: String::new(),
            stamp: ASYNC_BASE,
            retries_left,
        }
    }

    /// Read once and handle every complete response. Returns false once the
    /// debugger has gone away.
    pub(crate) fn poll(&mut self) -> bool {
        let poll = self.shared.config.poll_interval();
        let data = wait_for_prompt(self.shared.console.as_ref(), false, poll);
        if data.is_empty() {
            if self.shared.console.is_closed() {
                self.process_buffer();
                warn!("Debugger output closed, stopping session");
                self.shared.stop();
                return false;
            }
            thread::sleep(poll);
        } else {
            trace!("Read {} bytes", data.len());
            self.buffer.push_str(&data);
        }
        self.process_buffer();
        true
    }

    pub(crate) fn process_buffer(&mut self) {
        loop {
            strip_leading_prompts(&mut self.buffer);
            let Some((end, consumed)) = next_response(&self.buffer) else {
                // Keep a partial response for the next read; drop a stray line ending
                if self.buffer.trim().is_empty() {
                    self.buffer.clear();
                }
                return;
            };

            let chunk = &self.buffer[..end];
            let tag = classify(chunk);
            let resolved = match tag {
                ResponseTag::Command(seq_id) => self
                    .shared
                    .correlations
                    .take(seq_id)
                    .map(|entry| (entry.instruction, entry.params)),
                other => other.fixed_instruction().map(|code| (code, None)),
            };

            let (instruction, params) = match resolved {
                Some(resolved) => resolved,
                None => {
                    self.retries_left = self.retries_left.saturating_sub(1);
                    if self.retries_left > 0 {
                        return;
                    }
                    warn!("Unrecognised response after retries, treating as async: {:?}", chunk);
                    (ASYNC_INSTRUCTION, None)
                }
            };

            let mut text = chunk.to_string();
            if let Some(params) = params {
                let trimmed = text.trim_end_matches(['\r', '\n']).len();
                text.truncate(trimmed);
                text.push_str(&params);
                text.push_str("\r\n");
            }

            let slot = match tag {
                ResponseTag::Command(seq_id) if seq_id < SYNC_WINDOW => seq_id,
                _ => {
                    let slot = self.stamp;
                    self.stamp = next_auto_id(self.stamp);
                    slot
                }
            };

            debug!("Response for {} -> slot {} (instruction {})", tag, slot, instruction);
            self.deliver(slot, instruction, text);
            self.buffer.drain(..consumed);
            self.retries_left = self.shared.config.unknown_response_retries;
        }
    }

    fn deliver(&self, slot: u32, instruction: usize, text: String) {
        match self.shared.config.parse_strategy {
            ParseStrategy::Inline => interpret_and_publish(&self.shared, slot, instruction, &text),
            ParseStrategy::PerResponseThread => {
                let shared = Arc::clone(&self.shared);
                let span = Span::current();
                let spawned = thread::Builder::new()
                    .name("gdb-mi-parse".to_string())
                    .spawn(move || {
                        let _entered = span.enter();
                        interpret_and_publish(&shared, slot, instruction, &text);
                    });
                if let Err(e) = spawned {
                    warn!("Failed to start parse worker: {}", e);
                }
            }
        }
    }
}

fn interpret_and_publish(shared: &Shared, slot: u32, instruction: usize, text: &str) {
    let parsed = parse_response(text, shared.table.instruction(instruction));
    publish(shared, slot, parsed);
}

/// Publish into the output buffer, waiting for the slot to be consumed
fn publish(shared: &Shared, slot: u32, mut response: ParsedResponse) {
    loop {
        match shared.outputs.publish(slot, response) {
            Ok(()) => return,
            Err(rejected) => {
                if !shared.is_running() {
                    return;
                }
                response = rejected;
                shared.backoff();
            }
        }
    }
}
