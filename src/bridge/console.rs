//! Debugger console
//!
//! The bridge talks to the debugger through [`DebuggerConsole`]: commands go
//! in as lines, output comes back as whatever text is available. The
//! production implementation drives a spawned GDB child over pipes.

use crate::bridge::classify::ends_with_prompt;
use crate::bridge::config::BridgeConfig;
use crate::bridge::error::{BridgeError, Result};
use crate::bridge::types::TIMEOUT_MARKER;
use chrono::Local;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Grace period between asking the debugger to exit and killing it
const EXIT_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bidirectional text channel to the debugger
pub trait DebuggerConsole: Send + Sync {
    /// Write one complete command line, terminator included
    fn send_command(&self, line: &str) -> Result<()>;

    /// Output received since the last call, without blocking
    fn read_available(&self) -> Option<String>;

    /// True once the debugger's output stream has ended
    fn is_closed(&self) -> bool;

    /// Deliver an interrupt (Ctrl-C) to the debugger
    fn interrupt(&self) -> Result<()>;

    /// Stop the debugger and release its resources. Safe to call twice.
    fn shutdown(&self);
}

/// Collect debugger output.
///
/// Without `sync` this returns whatever is available right now. With `sync`
/// it keeps reading until the text ends with a prompt or the console closes.
pub fn wait_for_prompt(console: &dyn DebuggerConsole, sync: bool, poll: Duration) -> String {
    let mut text = String::new();
    loop {
        if let Some(chunk) = console.read_available() {
            text.push_str(&chunk);
        }
        if !sync || ends_with_prompt(&text) {
            return text;
        }
        if console.is_closed() {
            if let Some(chunk) = console.read_available() {
                text.push_str(&chunk);
            }
            return text;
        }
        thread::sleep(poll);
    }
}

/// [`wait_for_prompt`] in sync mode, giving up after `timeout` with
/// [`TIMEOUT_MARKER`].
pub fn wait_for_prompt_timeout(
    console: &dyn DebuggerConsole,
    timeout: Duration,
    poll: Duration,
) -> String {
    let deadline = Instant::now() + timeout;
    let mut text = String::new();
    loop {
        if let Some(chunk) = console.read_available() {
            text.push_str(&chunk);
        }
        if ends_with_prompt(&text) || console.is_closed() {
            return text;
        }
        if Instant::now() >= deadline {
            warn!("No prompt from debugger within {:?}", timeout);
            return TIMEOUT_MARKER.to_string();
        }
        thread::sleep(poll);
    }
}

/// Decode the complete UTF-8 prefix of `pending`, leaving an unfinished
/// trailing sequence for the next read. Invalid bytes become U+FFFD.
fn decode_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(pending.as_slice()) {
            Ok(valid) => {
                text.push_str(valid);
                pending.clear();
                return text;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + len);
                    }
                    None => {
                        pending.drain(..valid);
                        return text;
                    }
                }
            }
        }
    }
}

/// Timestamped copy of everything written to and read from the debugger
pub struct RawIoLog {
    file: Mutex<File>,
}

impl RawIoLog {
    /// Create the log, truncating any previous content
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn record(&self, text: &str) {
        let mut file = lock(&self.file);
        let stamp = Local::now().format("%H:%M:%S");
        if let Err(e) = writeln!(file, "{} - {}", stamp, text) {
            warn!("Failed to write raw I/O log: {}", e);
        }
    }
}

/// GDB child process driven over pipes
pub struct ProcessConsole {
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    output: Mutex<Receiver<String>>,
    closed: Arc<AtomicBool>,
    pid: u32,
    line_ending: &'static str,
    normalize_line_endings: bool,
    raw_log: Option<RawIoLog>,
}

impl ProcessConsole {
    /// Start the debugger described by `config`
    pub fn spawn(config: &BridgeConfig) -> Result<Self> {
        info!("Starting debugger: {} {:?}", config.gdb_path, config.gdb_args);

        let mut child = Command::new(&config.gdb_path)
            .args(&config.gdb_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                path: config.gdb_path.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(BridgeError::ConsoleClosed)?;
        let stdout = child.stdout.take().ok_or(BridgeError::ConsoleClosed)?;
        let stderr = child.stderr.take().ok_or(BridgeError::ConsoleClosed)?;

        let raw_log = match &config.raw_log_path {
            Some(path) => Some(RawIoLog::create(path)?),
            None => None,
        };

        let (tx, rx) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));

        // stderr is merged into the same stream as stdout
        let stdout_closed = Arc::clone(&closed);
        let stdout_tx = tx.clone();
        thread::Builder::new()
            .name("gdb-stdout".to_string())
            .spawn(move || {
                Self::pump(stdout, stdout_tx);
                stdout_closed.store(true, Ordering::SeqCst);
                debug!("Debugger stdout closed");
            })?;
        thread::Builder::new()
            .name("gdb-stderr".to_string())
            .spawn(move || Self::pump(stderr, tx))?;

        let pid = child.id();
        info!("Debugger started with pid {}", pid);

        Ok(Self {
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            output: Mutex::new(rx),
            closed,
            pid,
            line_ending: config.line_ending(),
            normalize_line_endings: config.normalize_line_endings,
            raw_log,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn pump(mut reader: impl Read, tx: Sender<String>) {
        let mut buf = [0u8; READ_CHUNK];
        let mut pending = Vec::new();
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    if !pending.is_empty() {
                        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
                    }
                    break;
                }
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    let chunk = decode_utf8(&mut pending);
                    if chunk.is_empty() {
                        continue;
                    }
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Error reading debugger output: {}", e);
                    break;
                }
            }
        }
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = lock(&self.stdin);
        let stdin = stdin.as_mut().ok_or(BridgeError::ConsoleClosed)?;
        stdin.write_all(line.as_bytes())?;
        stdin.flush()?;
        Ok(())
    }
}

impl DebuggerConsole for ProcessConsole {
    fn send_command(&self, line: &str) -> Result<()> {
        trace!("-> {}", line.trim_end());
        if let Some(log) = &self.raw_log {
            log.record(line.trim_end());
        }
        self.write_line(line)
    }

    fn read_available(&self) -> Option<String> {
        let output = lock(&self.output);
        let mut text = String::new();
        while let Ok(chunk) = output.try_recv() {
            text.push_str(&chunk);
        }
        drop(output);

        if text.is_empty() {
            return None;
        }
        if self.normalize_line_endings {
            text = text.replace("\r\n", "\n").replace('\n', "\r\n");
        }
        trace!("<- {:?}", text);
        if let Some(log) = &self.raw_log {
            log.record(&text);
        }
        Some(text)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[cfg(unix)]
    fn interrupt(&self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = i32::try_from(self.pid).map_err(|e| BridgeError::Interrupt(e.to_string()))?;
        debug!("Sending SIGINT to debugger {}", pid);
        kill(Pid::from_raw(pid), Signal::SIGINT).map_err(|e| BridgeError::Interrupt(e.to_string()))
    }

    #[cfg(not(unix))]
    fn interrupt(&self) -> Result<()> {
        Err(BridgeError::InterruptUnsupported)
    }

    fn shutdown(&self) {
        let Some(mut child) = lock(&self.child).take() else {
            return;
        };

        // Ask the debugger to exit before killing it
        let _ = self.write_line(&format!("-gdb-exit{}", self.line_ending));
        thread::sleep(EXIT_GRACE);

        let _ = child.kill();
        let _ = child.wait();
        lock(&self.stdin).take();
        self.closed.store(true, Ordering::SeqCst);

        info!("Debugger stopped");
    }
}

impl Drop for ProcessConsole {
    fn drop(&mut self) {
        self.shutdown();
    }
}
