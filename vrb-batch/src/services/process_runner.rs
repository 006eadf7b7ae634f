//! External process runner
//!
//! Launches a subprocess, streams its stdout/stderr line by line to a caller
//! supplied sink (or to the log), and resolves once the process is gone.
//!
//! The runner never returns an error. Launch failures, non-zero exits and
//! signals are all recorded in [`ProcessOutcome`] so callers can decide what
//! they mean; the pipeline treats none of them as fatal on their own.

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Number of trailing output lines kept in a [`ProcessOutcome`]
pub const DEFAULT_TAIL_LINES: usize = 32;

/// Stream a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One line of subprocess output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

/// How the subprocess ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    /// Process exited with a status code
    Exited(i32),
    /// Process was terminated by a signal
    Signaled,
    /// Process could not be started
    LaunchFailed(String),
    /// Process started but waiting for it failed
    WaitFailed(String),
}

/// Result of a [`ProcessRunner::run`] call
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub name: String,
    pub state: ExitState,
    /// Most recent output lines, oldest first
    pub tail: Vec<OutputLine>,
}

impl ProcessOutcome {
    /// True when the process ran and exited with code 0
    pub fn succeeded(&self) -> bool {
        matches!(self.state, ExitState::Exited(0))
    }

    /// True when the process never started
    pub fn launch_failed(&self) -> bool {
        matches!(self.state, ExitState::LaunchFailed(_))
    }
}

/// Working directory and environment for a subprocess
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(OsString, OsString)>,
}

impl RunOptions {
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            envs: Vec::new(),
        }
    }
}

/// Sink receiving every output line as it arrives
pub type OutputSink<'a> = &'a mut (dyn FnMut(&OutputLine) + Send);

/// Subprocess launcher
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    tail_lines: usize,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    /// Runner keeping `tail_lines` trailing lines in each outcome
    pub fn with_tail_lines(tail_lines: usize) -> Self {
        Self { tail_lines }
    }

    /// Run `program` with `args` until it exits
    ///
    /// `name` identifies the process in log output. When `on_output` is
    /// `None` every line is logged instead.
    pub async fn run(
        &self,
        name: &str,
        program: impl AsRef<OsStr>,
        args: &[OsString],
        options: &RunOptions,
        mut on_output: Option<OutputSink<'_>>,
    ) -> ProcessOutcome {
        let program = program.as_ref();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        command.envs(options.envs.iter().map(|(k, v)| (k, v)));

        debug!(
            process = name,
            program = %program.to_string_lossy(),
            args = ?args,
            "Spawning subprocess"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(
                    "[{}]: failed to launch {}: {}",
                    name,
                    program.to_string_lossy(),
                    e
                );
                return ProcessOutcome {
                    name: name.to_string(),
                    state: ExitState::LaunchFailed(e.to_string()),
                    tail: Vec::new(),
                };
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, StreamKind::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, StreamKind::Stderr, tx.clone()));
        }
        drop(tx);

        let mut tail = VecDeque::with_capacity(self.tail_lines);
        // Ends once both readers hit EOF and drop their senders
        while let Some(line) = rx.recv().await {
            match on_output.as_mut() {
                Some(sink) => sink(&line),
                None => log_line(name, &line),
            }
            if self.tail_lines > 0 {
                if tail.len() == self.tail_lines {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }

        let state = match child.wait().await {
            Ok(status) => match status.code() {
                Some(code) => ExitState::Exited(code),
                None => ExitState::Signaled,
            },
            Err(e) => {
                error!("[{}]: failed waiting for process: {}", name, e);
                ExitState::WaitFailed(e.to_string())
            }
        };

        debug!(process = name, state = ?state, "Subprocess finished");

        ProcessOutcome {
            name: name.to_string(),
            state,
            tail: tail.into_iter().collect(),
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn log_line(name: &str, line: &OutputLine) {
    match line.stream {
        StreamKind::Stdout => info!("[{}]: {}", name, line.text),
        StreamKind::Stderr => warn!("ERR [{}]: {}", name, line.text),
    }
}

async fn forward_lines<R>(mut reader: R, stream: StreamKind, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 4096];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for text in splitter.push(&buf[..n]) {
                    if tx.send(OutputLine { stream, text }).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("Output stream read failed: {}", e);
                break;
            }
        }
    }

    if let Some(text) = splitter.finish() {
        let _ = tx.send(OutputLine { stream, text });
    }
}

/// Splits a byte stream into lines on `\n` and `\r`
///
/// Progress meters redraw a single terminal line with carriage returns, so a
/// bare `\r` terminates a line too. Empty lines are dropped.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed bytes, returning every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' || b == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
            }
        }
        lines
    }

    /// Flush a trailing line that had no terminator
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}
