//! Debug session
//!
//! A [`Session`] owns the buffers shared by the dispatch and response loops
//! and exposes the calls the IDE makes: submit a command, poll for parsed
//! responses, end the session.

use crate::bridge::buffers::{CommandBuffer, CorrelationBuffer, OutputBuffer};
use crate::bridge::config::BridgeConfig;
use crate::bridge::console::{wait_for_prompt, wait_for_prompt_timeout, DebuggerConsole};
use crate::bridge::dispatch;
use crate::bridge::error::{BridgeError, Result};
use crate::bridge::instructions::InstructionTable;
use crate::bridge::interpreter::parse;
use crate::bridge::types::{SessionStatus, COMMAND_SLOTS, TIMEOUT_MARKER};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Span};
use uuid::Uuid;

const EXIT_COMMAND: &str = "-gdb-exit";

/// State shared by the API and both worker loops
pub(crate) struct Shared {
    pub(crate) config: BridgeConfig,
    pub(crate) table: InstructionTable,
    pub(crate) console: Arc<dyn DebuggerConsole>,
    pub(crate) commands: CommandBuffer,
    pub(crate) correlations: CorrelationBuffer,
    pub(crate) outputs: OutputBuffer,
    running: AtomicBool,
}

impl Shared {
    pub(crate) fn new(
        config: BridgeConfig,
        console: Arc<dyn DebuggerConsole>,
        table: InstructionTable,
    ) -> Self {
        Self {
            config,
            table,
            console,
            commands: CommandBuffer::new(COMMAND_SLOTS),
            correlations: CorrelationBuffer::new(),
            outputs: OutputBuffer::new(),
            running: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Raise the termination flag for both loops
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Give the other side a chance to drain a busy buffer
    pub(crate) fn backoff(&self) {
        thread::yield_now();
        thread::sleep(self.config.poll_interval());
    }

    pub(crate) fn clean_buffers(&self) {
        self.commands.clear();
        self.correlations.clear();
        self.outputs.clear();
    }
}

/// What to attach to during launch
#[derive(Debug, Clone, Default)]
pub struct LaunchPlan {
    /// Remote target for `-target-select`, if any
    pub target: Option<String>,
    pub executable: String,
    /// Process to attach to, if any
    pub pid: Option<u32>,
}

pub struct Session {
    id: Uuid,
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl Session {
    /// Start the worker loops on an already prepared debugger
    pub fn start(
        config: BridgeConfig,
        console: Arc<dyn DebuggerConsole>,
        table: InstructionTable,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let span = info_span!("session", id = %id);
        let shared = Arc::new(Shared::new(config, console, table));
        shared.clean_buffers();

        let handle = {
            let shared = Arc::clone(&shared);
            let span = span.clone();
            thread::Builder::new()
                .name("gdb-mi-dispatch".to_string())
                .spawn(move || {
                    let _entered = span.enter();
                    dispatch::run(shared);
                })?
        };

        span.in_scope(|| info!("Session started"));
        Ok(Self {
            id,
            shared,
            dispatcher: Mutex::new(Some(handle)),
            span,
        })
    }

    /// Run the launch handshake on `console`, then start the worker loops.
    ///
    /// Every step is parsed with its configured instruction; an empty result
    /// or one starting with `!` aborts the launch.
    pub fn launch(
        config: BridgeConfig,
        console: Arc<dyn DebuggerConsole>,
        table: InstructionTable,
        plan: &LaunchPlan,
    ) -> Result<Self> {
        let handshake = Handshake {
            config: &config,
            console: console.as_ref(),
            table: &table,
        };

        let result = handshake.run(plan);
        if let Err(e) = result {
            error!("Launch failed: {}", e);
            console.shutdown();
            return Err(e);
        }

        info!("Launch handshake complete");
        Self::start(config, console, table)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Queue a command, waiting while the queue is full.
    ///
    /// Returns false only once the session has stopped.
    pub fn submit_command(&self, command: &str) -> bool {
        let _entered = self.span.enter();
        loop {
            if !self.shared.is_running() {
                warn!("Session stopped, dropping {}", command);
                return false;
            }
            if self.shared.commands.push(command) {
                debug!("Queued {}", command);
                return true;
            }
            self.shared.backoff();
        }
    }

    pub fn is_command_queue_empty(&self) -> bool {
        self.shared.commands.is_empty()
    }

    /// Next asynchronous or untagged response.
    ///
    /// Waits up to the configured wait time and returns "" if nothing
    /// arrived. A response that parsed to nothing is delivered as
    /// [`PARSED_EMPTY`](crate::bridge::types::PARSED_EMPTY).
    pub fn next_async_response(&self) -> String {
        self.shared
            .outputs
            .wait_async(self.shared.config.wait_time())
            .map(|response| response.into_wire())
            .unwrap_or_default()
    }

    /// Take the synchronous response for `id` if it has arrived
    pub fn next_sync_response(&self, id: u32) -> String {
        self.shared
            .outputs
            .take_sync(id)
            .map(|response| response.into_wire())
            .unwrap_or_default()
    }

    /// Send `command` under synchronous id `id` and wait for its parsed response
    pub fn parse_command(&self, command: &str, id: u32) -> String {
        let tagged = format!("{:02}{}", id, command);
        if !self.submit_command(&tagged) {
            return String::new();
        }
        loop {
            if let Some(response) = self.shared.outputs.take_sync(id) {
                return response.into_text();
            }
            if !self.shared.is_running() {
                return String::new();
            }
            self.shared.backoff();
        }
    }

    /// Stop the debugger and both loops. Further calls do nothing.
    pub fn end_session(&self) {
        let _entered = self.span.enter();
        let Some(handle) = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        if self.shared.is_running() {
            // The dispatch loop may be waiting on a debugger that never answers
            let deadline = Instant::now() + self.shared.config.wait_time() * 5;
            let mut queued = false;
            while !handle.is_finished() && Instant::now() < deadline {
                if !queued {
                    queued = self.shared.commands.push(EXIT_COMMAND);
                }
                thread::sleep(self.shared.config.poll_interval());
            }
            if !handle.is_finished() {
                if !queued {
                    warn!("Command queue stayed full, exit request not queued");
                }
                warn!("Dispatch loop did not stop in time, forcing shutdown");
            }
        }

        self.shared.stop();
        if handle.join().is_err() {
            error!("Dispatch loop panicked");
        }
        self.shared.console.shutdown();
        self.shared.clean_buffers();
        info!("Session ended");
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: Some(self.id.to_string()),
            running: self.shared.is_running(),
            queued_commands: self.shared.commands.len(),
            pending_correlations: self.shared.correlations.pending(),
            debugger_closed: self.shared.console.is_closed(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.end_session();
    }
}

struct Handshake<'a> {
    config: &'a BridgeConfig,
    console: &'a dyn DebuggerConsole,
    table: &'a InstructionTable,
}

impl Handshake<'_> {
    fn run(&self, plan: &LaunchPlan) -> Result<()> {
        let codes = &self.config.handshake;
        self.step("startup", None, codes.startup)?;
        self.step(
            "pending breakpoints",
            Some("1-gdb-set breakpoint pending on"),
            codes.pending_breakpoints,
        )?;
        if let Some(target) = &plan.target {
            self.step(
                "target select",
                Some(format!("4-target-select {}", target).as_str()),
                codes.target_select,
            )?;
        }
        self.step(
            "load executable",
            Some(format!("5-file-exec-and-symbols {}", plan.executable).as_str()),
            codes.exec_and_symbols,
        )?;
        if let Some(pid) = plan.pid {
            self.step(
                "attach",
                Some(format!("6-target-attach {}", pid).as_str()),
                codes.attach,
            )?;
        }
        Ok(())
    }

    fn step(&self, step: &'static str, command: Option<&str>, instruction: usize) -> Result<()> {
        if let Some(command) = command {
            info!("Launch step '{}': {}", step, command);
            self.console
                .send_command(&format!("{}{}", command, self.config.line_ending()))?;
        }
        let raw = wait_for_prompt(self.console, true, self.config.poll_interval());
        let parsed = parse(&raw, self.table.instruction(instruction));
        debug!("Launch step '{}' parsed: {:?}", step, parsed);
        if parsed.is_empty() || parsed.starts_with('!') {
            return Err(BridgeError::LaunchStep {
                step,
                response: parsed,
            });
        }
        Ok(())
    }
}

/// Ask a freshly started debugger for the processes on `target`.
///
/// Returns the raw debugger text, [`TIMEOUT_MARKER`] if the target does not
/// answer within `timeout`, or "" if the debugger cannot be written to. The
/// debugger is shut down afterwards.
pub fn list_processes(
    config: &BridgeConfig,
    console: &dyn DebuggerConsole,
    target: &str,
    timeout: Duration,
) -> String {
    let poll = config.poll_interval();
    let ending = config.line_ending();
    wait_for_prompt(console, true, poll);

    let text = query_processes(console, target, timeout, poll, ending).unwrap_or_else(|e| {
        warn!("Process listing failed: {}", e);
        String::new()
    });

    console.shutdown();
    text
}

fn query_processes(
    console: &dyn DebuggerConsole,
    target: &str,
    timeout: Duration,
    poll: Duration,
    ending: &str,
) -> Result<String> {
    console.send_command(&format!("1-target-select {}{}", target, ending))?;
    let reply = wait_for_prompt_timeout(console, timeout, poll);
    if reply == TIMEOUT_MARKER || reply.contains("1^error,msg=") {
        return Ok(reply);
    }
    console.send_command(&format!("info pidlist{}", ending))?;
    Ok(wait_for_prompt(console, true, poll))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::config::ParseStrategy;
    use crate::bridge::console::testing::ScriptedConsole;
    use crate::bridge::types::PARSED_EMPTY;

    /// Line numbers are instruction codes
    const TABLE: &str = "\
-async-event:->:@$EOL$;
-breakpoint-modified:->:?number=\";#bkpt ;@\";
-startup:->:#started;
-target-select:->:?^connected;{#connected;}{#!failed;}
-break-insert:->:?number=\";@\";
$-var-assign:->:?value=\";@\";#=;?\"\\;;@$EOL$;
-target-attach:->:?^done;{#attached;}{#!attach;}
-file-exec-and-symbols:->:?^done;{#loaded;}{#!load;}
-gdb-set:->:?^done;{#set;}{#!set;}
-exec-next:->:?^running;{#next;}
-exec-continue:->:?^running;{#running;}
-exec-interrupt:->:?^done;{#interrupted;}
-data-evaluate-expression:->:?value=\";@\";
-gdb-show:->:?nothing-matches;";

    fn config() -> BridgeConfig {
        BridgeConfig {
            poll_interval_ms: 1,
            wait_time_ms: 200,
            crlf_commands: false,
            ..Default::default()
        }
    }

    fn table() -> InstructionTable {
        InstructionTable::parse(TABLE).unwrap()
    }

    /// Answer `<id>-cmd` with `<id><result>` followed by a prompt
    fn reply(line: &str, result: &str) -> String {
        let id: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
        format!("{}{}\r\n(gdb) \r\n", id, result)
    }

    fn gdb(line: &str) -> Option<String> {
        let command = line.trim_start_matches(|c: char| c.is_ascii_digit());
        let name = command.split(' ').next().unwrap_or("");
        let result = match name {
            "-break-insert" => "^done,bkpt={number=\"1\",type=\"breakpoint\"}",
            "-data-evaluate-expression" => "^done,value=\"42\"",
            "-var-assign" => "^done,value=\"7\"",
            "-exec-next" | "-exec-continue" => "^running",
            "-exec-interrupt" => "^done",
            "-gdb-show" => "^done,value=\"off\"",
            "-gdb-set" | "-file-exec-and-symbols" | "-target-attach" => "^done",
            "-target-select" => "^connected",
            _ => return None,
        };
        Some(reply(line, result))
    }

    fn start(console: &Arc<ScriptedConsole>, config: BridgeConfig) -> Session {
        let console: Arc<dyn DebuggerConsole> = console.clone();
        Session::start(config, console, table()).unwrap()
    }

    fn next_async(session: &Session) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let response = session.next_async_response();
            if !response.is_empty() || Instant::now() > deadline {
                return response;
            }
        }
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_parse_command_round_trip() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());

        assert_eq!(session.parse_command("-break-insert main", 3), "1");
        assert_eq!(session.parse_command("-data-evaluate-expression x", 12), "42");
        assert_eq!(
            console.sent(),
            vec!["3-break-insert main", "12-data-evaluate-expression x"]
        );
        session.end_session();
    }

    #[test]
    fn test_parse_command_maps_empty_parse_to_empty_string() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());
        assert_eq!(session.parse_command("-gdb-show confirm", 7), "");
        session.end_session();
    }

    #[test]
    fn test_untagged_commands_get_sequential_ids() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());

        assert!(session.submit_command("-exec-next"));
        assert!(session.submit_command("-break-insert foo.c:12"));
        assert!(session.submit_command("-exec-next"));

        assert_eq!(next_async(&session), "next");
        assert_eq!(next_async(&session), "1");
        assert_eq!(next_async(&session), "next");
        assert_eq!(
            console.sent(),
            vec!["50-exec-next", "51-break-insert foo.c:12", "52-exec-next"]
        );
        session.end_session();
    }

    #[test]
    fn test_sync_tag_does_not_advance_auto_ids() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());

        assert!(session.submit_command("-exec-next"));
        assert_eq!(next_async(&session), "next");
        assert_eq!(session.parse_command("-break-insert main", 2), "1");
        assert!(session.submit_command("-exec-next"));
        assert_eq!(next_async(&session), "next");

        assert_eq!(
            console.sent(),
            vec!["50-exec-next", "2-break-insert main", "51-exec-next"]
        );
        session.end_session();
    }

    #[test]
    fn test_async_events_use_fixed_instructions() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());

        console.push_output(
            "*stopped,reason=\"end-stepping-range\",thread-id=\"1\"\r\n(gdb) \r\n",
        );
        assert_eq!(
            next_async(&session),
            "*stopped,reason=\"end-stepping-range\",thread-id=\"1\""
        );

        console.push_output("=breakpoint-modified,bkpt={number=\"4\",times=\"1\"}\r\n(gdb) \r\n");
        assert_eq!(next_async(&session), "bkpt 4");
        session.end_session();
    }

    #[test]
    fn test_running_and_stopped_in_one_read_are_split() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());

        console.push_output("*running,thread-id=\"all\"\r\n*stopped,reason=\"exited-normally\"\r\n(gdb) \r\n");
        assert_eq!(next_async(&session), "*running,thread-id=\"all\"");
        assert_eq!(next_async(&session), "*stopped,reason=\"exited-normally\"");
        session.end_session();
    }

    #[test]
    fn test_parsed_empty_async_response_is_marked() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());
        assert!(session.submit_command("-gdb-show confirm"));
        assert_eq!(next_async(&session), PARSED_EMPTY);
        session.end_session();
    }

    #[test]
    fn test_unrecognised_output_degrades_to_async() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());
        console.push_output("~\"Reading symbols from a.out...\"\r\n");
        assert_eq!(next_async(&session), "~\"Reading symbols from a.out...\"");
        session.end_session();
    }

    #[test]
    fn test_params_are_replayed_into_response() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());
        assert_eq!(session.parse_command("-var-assign var1 7", 9), "7=var1;7");
        session.end_session();
    }

    #[test]
    fn test_per_response_thread_strategy() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(
            &console,
            BridgeConfig {
                parse_strategy: ParseStrategy::PerResponseThread,
                ..config()
            },
        );
        assert_eq!(session.parse_command("-data-evaluate-expression x", 1), "42");
        assert!(session.submit_command("-exec-next"));
        assert_eq!(next_async(&session), "next");
        session.end_session();
    }

    #[test]
    fn test_unknown_command_ends_session() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());
        assert!(session.submit_command("-no-such-command"));
        assert!(wait_until(|| !session.is_running()));
        assert!(console.sent().is_empty());
        assert!(console.is_closed());
        assert!(!session.submit_command("-exec-next"));
    }

    #[test]
    fn test_end_session_consumes_exit() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());
        session.end_session();
        assert!(!session.is_running());
        assert!(console.is_closed());
        assert!(console.sent().iter().all(|line| !line.contains("-gdb-exit")));
        // Idempotent
        session.end_session();
    }

    #[test]
    fn test_interrupt_is_signalled_before_sending() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());
        assert!(session.submit_command("-exec-interrupt"));
        assert_eq!(next_async(&session), "interrupted");
        assert_eq!(console.interrupts(), 1);
        assert_eq!(console.sent(), vec!["50-exec-interrupt"]);
        session.end_session();
    }

    #[test]
    fn test_repeated_interrupt_is_debounced_while_busy() {
        // Nothing is answered until the test says so
        let console = Arc::new(ScriptedConsole::new(|_| None));
        let session = start(&console, config());

        assert!(session.submit_command("-exec-interrupt"));
        assert!(wait_until(|| console.sent().len() == 1));
        assert!(session.submit_command("-exec-interrupt"));
        assert!(wait_until(|| console.interrupts() == 2));
        assert_eq!(console.sent(), vec!["50-exec-interrupt"]);

        // Once answered, the next interrupt is sent again
        console.push_output("50^done\r\n(gdb) \r\n");
        assert_eq!(next_async(&session), "interrupted");
        assert!(session.submit_command("-exec-interrupt"));
        assert!(wait_until(|| console.sent().len() == 2));
        assert_eq!(console.interrupts(), 3);
        assert_eq!(console.sent()[1], "51-exec-interrupt");

        session.end_session();
    }

    #[test]
    fn test_repeated_interrupt_debounce_is_capped() {
        let console = Arc::new(ScriptedConsole::new(|_| None));
        let session = start(&console, config());

        for _ in 0..7 {
            assert!(session.submit_command("-exec-interrupt"));
        }
        // The first is sent, the next five only signal, the seventh waits
        assert!(wait_until(|| console.interrupts() == 6));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(console.interrupts(), 6);
        assert_eq!(console.sent(), vec!["50-exec-interrupt"]);

        console.push_output("50^done\r\n(gdb) \r\n");
        assert_eq!(next_async(&session), "interrupted");
        assert!(wait_until(|| console.sent().len() == 2));
        assert_eq!(console.sent()[1], "51-exec-interrupt");
        assert_eq!(console.interrupts(), 7);

        console.push_output("51^done\r\n(gdb) \r\n");
        assert_eq!(next_async(&session), "interrupted");
        session.end_session();
    }

    #[test]
    fn test_continue_waits_for_pending_commands() {
        // The step is left unanswered until the test says so
        let console = Arc::new(ScriptedConsole::new(|line: &str| {
            if line == "50-exec-next" {
                None
            } else {
                gdb(line)
            }
        }));
        let session = start(&console, config());

        assert!(session.submit_command("-exec-next"));
        assert!(session.submit_command("-exec-continue"));
        assert!(wait_until(|| session.is_command_queue_empty()));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(console.sent(), vec!["50-exec-next"]);

        console.push_output("50^running\r\n(gdb) \r\n");
        assert!(wait_until(|| console.sent().len() == 2));
        assert_eq!(console.sent()[1], "51-exec-continue");
        assert_eq!(next_async(&session), "next");
        assert_eq!(next_async(&session), "running");
        session.end_session();
    }

    #[test]
    fn test_end_session_waits_for_room_to_queue_exit() {
        let console = Arc::new(ScriptedConsole::new(|line: &str| {
            if line == "50-exec-next" {
                None
            } else {
                gdb(line)
            }
        }));
        let config = BridgeConfig {
            wait_time_ms: 2000,
            ..config()
        };
        let session = start(&console, config);

        // Hold the dispatch loop on the continue while the queue fills up
        assert!(session.submit_command("-exec-next"));
        assert!(session.submit_command("-exec-continue"));
        assert!(wait_until(|| session.is_command_queue_empty()));
        let mut queued = 0;
        while session.shared.commands.push("-gdb-set confirm off") {
            queued += 1;
        }
        assert_eq!(queued, COMMAND_SLOTS);

        let done = AtomicBool::new(false);
        let elapsed = thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    session.next_async_response();
                }
            });
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(50));
                console.push_output("50^running\r\n(gdb) \r\n");
            });

            let started = Instant::now();
            session.end_session();
            done.store(true, Ordering::SeqCst);
            started.elapsed()
        });

        // Well inside the forced shutdown deadline
        assert!(elapsed < Duration::from_secs(5));
        assert_eq!(console.sent().len(), 2 + COMMAND_SLOTS);
        assert!(console.is_closed());
    }

    #[test]
    fn test_launch_handshake() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        console.push_output("=thread-group-added,id=\"i1\"\r\n(gdb) \r\n");
        let plan = LaunchPlan {
            target: Some("localhost:1234".to_string()),
            executable: "/tmp/a.out".to_string(),
            pid: Some(4242),
        };
        let dyn_console: Arc<dyn DebuggerConsole> = console.clone();
        let session = Session::launch(config(), dyn_console, table(), &plan).unwrap();

        assert_eq!(
            console.sent(),
            vec![
                "1-gdb-set breakpoint pending on",
                "4-target-select localhost:1234",
                "5-file-exec-and-symbols /tmp/a.out",
                "6-target-attach 4242",
            ]
        );
        assert!(session.is_running());
        session.end_session();
    }

    #[test]
    fn test_launch_aborts_on_error_response() {
        let console = Arc::new(ScriptedConsole::new(|line: &str| {
            if line.contains("-target-select") {
                Some(reply(line, "^error,msg=\"Connection refused.\""))
            } else {
                gdb(line)
            }
        }));
        console.push_output("(gdb) \r\n");
        let plan = LaunchPlan {
            target: Some("localhost:1".to_string()),
            executable: "/tmp/a.out".to_string(),
            pid: None,
        };
        let dyn_console: Arc<dyn DebuggerConsole> = console.clone();
        let result = Session::launch(config(), dyn_console, table(), &plan);

        match result {
            Err(BridgeError::LaunchStep { step, response }) => {
                assert_eq!(step, "target select");
                assert_eq!(response, "!failed");
            }
            _ => panic!("Expected launch failure"),
        }
        assert_eq!(console.sent().len(), 2);
        assert!(console.is_closed());
    }

    #[test]
    fn test_list_processes() {
        let console = ScriptedConsole::new(|line: &str| {
            if line.starts_with("1-target-select") {
                Some("1^connected\r\n(gdb) \r\n".to_string())
            } else if line == "info pidlist" {
                Some("~\"pid 42 /bin/app\\n\"\r\n^done\r\n(gdb) \r\n".to_string())
            } else {
                None
            }
        });
        console.push_output("(gdb) \r\n");
        let text = list_processes(&config(), &console, "localhost:1234", Duration::from_secs(5));
        assert!(text.contains("pid 42 /bin/app"));
        assert_eq!(console.sent(), vec!["1-target-select localhost:1234", "info pidlist"]);
        assert!(console.is_closed());
    }

    #[test]
    fn test_list_processes_timeout() {
        let console = ScriptedConsole::new(|_| None);
        console.push_output("(gdb) \r\n");
        let text = list_processes(&config(), &console, "localhost:9", Duration::from_millis(30));
        assert_eq!(text, TIMEOUT_MARKER);
        assert_eq!(console.sent().len(), 1);
    }

    #[test]
    fn test_list_processes_stops_on_error() {
        let console = ScriptedConsole::new(|_| {
            Some("1^error,msg=\"Connection timed out.\"\r\n(gdb) \r\n".to_string())
        });
        console.push_output("(gdb) \r\n");
        let text = list_processes(&config(), &console, "localhost:9", Duration::from_secs(5));
        assert!(text.contains("1^error,msg="));
        assert_eq!(console.sent().len(), 1);
    }

    #[test]
    fn test_status() {
        let console = Arc::new(ScriptedConsole::new(gdb));
        let session = start(&console, config());
        let status = session.status();
        assert_eq!(status.session_id, Some(session.id().to_string()));
        assert!(status.running);
        assert!(!status.debugger_closed);
        session.end_session();
        assert!(!session.status().running);
    }
}
