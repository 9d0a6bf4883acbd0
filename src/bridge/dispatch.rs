//! Command dispatch loop
//!
//! Pulls commands from the command buffer, assigns sequence ids, records
//! what their responses need for parsing and writes them to the debugger.

use crate::bridge::error::BridgeError;
use crate::bridge::instructions::split_command;
use crate::bridge::interpreter::atoi;
use crate::bridge::listener;
use crate::bridge::session::Shared;
use crate::bridge::types::{next_auto_id, CorrelationEntry, ASYNC_BASE};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn, Span};

const INTERRUPT: &str = "-exec-interrupt";
const CONTINUE: &str = "-exec-continue";
const EXIT: &str = "-gdb-exit";

enum Step {
    Continue,
    Exit,
}

struct Dispatcher {
    shared: Arc<Shared>,
    /// Sequence id for the next untagged command
    seq_id: u32,
    last_command: String,
    interrupt_repeats: u32,
}

/// Run the dispatch loop until `-gdb-exit`, a fatal error or shutdown.
///
/// Starts the response loop and stops it again on the way out.
pub(crate) fn run(shared: Arc<Shared>) {
    let listener = {
        let shared = Arc::clone(&shared);
        let span = Span::current();
        thread::Builder::new()
            .name("gdb-mi-listener".to_string())
            .spawn(move || {
                let _entered = span.enter();
                listener::run(shared);
            })
    };
    let listener = match listener {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start response loop: {}", e);
            shared.stop();
            shared.console.shutdown();
            return;
        }
    };

    info!("Dispatch loop started");
    let mut dispatcher = Dispatcher {
        shared: Arc::clone(&shared),
        seq_id: ASYNC_BASE,
        last_command: String::new(),
        interrupt_repeats: 0,
    };

    let wait = shared.config.wait_time();
    while shared.is_running() {
        let Some(command) = shared.commands.pop_timeout(wait) else {
            continue;
        };
        if let Step::Exit = dispatcher.dispatch(command) {
            break;
        }
    }

    shared.stop();
    if listener.join().is_err() {
        error!("Response loop panicked");
    }
    shared.console.shutdown();
    info!("Dispatch loop stopped");
}

impl Dispatcher {
    fn dispatch(&mut self, command: String) -> Step {
        let shared = Arc::clone(&self.shared);

        // A leading two-digit tag selects a synchronous id for this command only
        let mut command = command.as_str();
        let mut restore = None;
        if command.starts_with(|c: char| ('0'..='4').contains(&c)) {
            if let (Some(tag), Some(rest)) = (command.get(..2), command.get(2..)) {
                restore = Some(self.seq_id);
                self.seq_id = u32::try_from(atoi(tag.as_bytes())).unwrap_or(0);
                command = rest;
            }
        }

        if command.starts_with(INTERRUPT) {
            if self.last_command == command
                && self.interrupt_repeats < shared.config.interrupt_debounce
                && !shared.correlations.is_empty()
            {
                self.interrupt_repeats += 1;
                debug!("Repeated interrupt {}, signalling only", self.interrupt_repeats);
                self.signal_interrupt();
                if let Some(seq_id) = restore {
                    self.seq_id = seq_id;
                }
                return Step::Continue;
            }
            self.interrupt_repeats = 0;
            self.drain_pending();
            self.signal_interrupt();
        }

        if command.starts_with(EXIT) {
            info!("Exit requested");
            return Step::Exit;
        }

        let is_continue = command.starts_with(CONTINUE);
        if is_continue {
            self.drain_pending();
        }

        let (name, params) = split_command(command);
        let Some(instruction) = shared.table.lookup(name) else {
            error!("{}, ending session", BridgeError::UnknownCommand(name.to_string()));
            return Step::Exit;
        };

        let entry = CorrelationEntry {
            seq_id: self.seq_id,
            instruction: instruction.code,
            params: params.filter(|_| instruction.replay_params),
        };
        if !self.record(entry) {
            return Step::Exit;
        }

        let line = format!("{}{}{}", self.seq_id, command, shared.config.line_ending());
        debug!("Sending {}", line.trim_end());
        if let Err(e) = shared.console.send_command(&line) {
            error!("Failed to send command: {}", e);
            return Step::Exit;
        }

        if is_continue {
            self.drain_pending();
        }

        self.last_command = command.to_string();
        self.seq_id = match restore {
            Some(seq_id) => seq_id,
            None => next_auto_id(self.seq_id),
        };
        Step::Continue
    }

    /// Store the correlation entry, waiting while its slot is still in use
    fn record(&self, entry: CorrelationEntry) -> bool {
        let mut warned = false;
        while !self.shared.correlations.insert(entry.clone()) {
            if !self.shared.is_running() {
                return false;
            }
            if !warned {
                warn!("Correlation slot for id {} still pending, waiting", entry.seq_id);
                warned = true;
            }
            self.shared.backoff();
        }
        true
    }

    /// Wait until every sent command has been answered
    fn drain_pending(&self) {
        while !self.shared.correlations.is_empty() && self.shared.is_running() {
            self.shared.backoff();
        }
    }

    fn signal_interrupt(&self) {
        if let Err(e) = self.shared.console.interrupt() {
            warn!("Interrupt not delivered: {}", e);
        }
    }
}
