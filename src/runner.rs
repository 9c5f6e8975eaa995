use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::parse;
use crate::types::{CommandLine, EnvMap, Failure, FailureKind};

const POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Least time given to drain the pipe after a child exits near its deadline.
const COLLECT_GRACE: Duration = Duration::from_millis(50);

/// Where a child's stderr goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrMode {
    /// Stderr goes to our own stderr; only stdout is captured.
    Inherit,
    /// Stderr shares the stdout pipe, so the capture is one interleaved blob.
    Merge,
}

/// One child process to start.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub argv: &'a [String],
    /// `None` inherits our environment; `Some` replaces it entirely.
    pub env: Option<&'a EnvMap>,
    pub stderr: StderrMode,
    pub timeout: Option<Duration>,
}

impl<'a> Invocation<'a> {
    pub fn new(command: &'a CommandLine, env: Option<&'a EnvMap>) -> Self {
        Invocation {
            argv: command.tokens(),
            env,
            stderr: StderrMode::Inherit,
            timeout: None,
        }
    }

    pub fn merge_stderr(mut self) -> Self {
        self.stderr = StderrMode::Merge;
        self
    }

    /// Bounds the child's lifetime and the collection of its output.
    ///
    /// On expiry only the direct child is killed. Processes it started keep
    /// running; those still holding the output pipe are abandoned together
    /// with its reader.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command_text(&self) -> String {
        self.argv.join(" ")
    }
}

/// What a child left behind once it exited on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub output: String,
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turns a non-zero exit into [`RunError::NonZeroExit`].
    pub fn check(self, invocation: &Invocation<'_>) -> Result<ProcessOutput, RunError> {
        if self.success() {
            return Ok(self);
        }
        Err(RunError::NonZeroExit {
            command: invocation.command_text(),
            code: self.exit_code,
            output: self.output,
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        source: io::Error,
    },

    #[error("`{command}` {}", describe_exit(.code))]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("`{command}` timed out after {:.3}s and was killed", .timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },

    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        source: io::Error,
    },

    #[error("no match: pattern `{pattern}` not found in output of `{command}`")]
    PatternNotFound {
        pattern: String,
        command: String,
        output: String,
    },

    #[error("captured text {text:?} is not a number")]
    InvalidValue { text: String },
}

impl RunError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RunError::Spawn { .. } | RunError::Io { .. } => FailureKind::Spawn,
            RunError::NonZeroExit { .. } => FailureKind::NonZeroExit,
            RunError::Timeout { .. } => FailureKind::Timeout,
            RunError::PatternNotFound { .. } => FailureKind::PatternNotFound,
            RunError::InvalidValue { .. } => FailureKind::InvalidValue,
        }
    }

    /// Human-readable description, followed by the tail of any captured output.
    pub fn diagnostic(&self) -> String {
        let mut text = self.to_string();
        let output = match self {
            RunError::NonZeroExit { output, .. } | RunError::PatternNotFound { output, .. } => {
                output.as_str()
            }
            _ => "",
        };
        let tail = parse::output_tail(output);
        if !tail.trim().is_empty() {
            text.push_str("\n--- output ---\n");
            text.push_str(tail.trim_end());
        }
        text
    }

    pub fn to_failure(&self) -> Failure {
        Failure::new(self.kind(), self.diagnostic())
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

/// Starts a child process and waits for it.
///
/// Returns `Ok` for any exit status; only failures to start, collect or
/// bound the child are errors.
pub trait ProcessRunner {
    fn run(&self, invocation: &Invocation<'_>) -> Result<ProcessOutput, RunError>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
    fn run(&self, invocation: &Invocation<'_>) -> Result<ProcessOutput, RunError> {
        (**self).run(invocation)
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation<'_>) -> Result<ProcessOutput, RunError> {
        let command_text = invocation.command_text();
        let io_error = |source: io::Error| RunError::Io {
            command: command_text.clone(),
            source,
        };

        let Some((program, args)) = invocation.argv.split_first() else {
            return Err(RunError::Spawn {
                program: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
            });
        };

        let (mut reader, writer) = io::pipe().map_err(io_error)?;
        let stderr = match invocation.stderr {
            StderrMode::Merge => Stdio::from(writer.try_clone().map_err(io_error)?),
            StderrMode::Inherit => Stdio::inherit(),
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr);
        if let Some(env) = invocation.env {
            command.env_clear().envs(env);
        }

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: program.clone(),
            source,
        })?;
        // Our copies of the write end must be closed or the reader never sees EOF.
        drop(command);

        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = sender.send(reader.read_to_end(&mut buf).map(|_| buf));
        });

        let status = match invocation.timeout {
            None => child.wait().map(Some),
            Some(limit) => wait_with_deadline(&mut child, start, limit),
        }
        .map_err(io_error)?;
        let elapsed = start.elapsed();

        let Some(status) = status else {
            // The collector is left detached: a grandchild may still hold the pipe open.
            tracing::debug!(command = %command_text, ?elapsed, "child killed after timeout");
            return Err(RunError::Timeout {
                command: command_text.clone(),
                timeout: invocation.timeout.unwrap_or(elapsed),
            });
        };

        // A grandchild that inherited the pipe keeps it open after the child
        // exits, so the deadline also bounds the wait for EOF.
        let collected = match invocation.timeout {
            None => receiver.recv().ok(),
            Some(limit) => {
                let remaining = limit.saturating_sub(start.elapsed()).max(COLLECT_GRACE);
                match receiver.recv_timeout(remaining) {
                    Ok(read) => Some(read),
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::debug!(command = %command_text, "output still open at deadline");
                        return Err(RunError::Timeout {
                            command: command_text.clone(),
                            timeout: limit,
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            }
        };
        let bytes = match collected {
            Some(read) => read.map_err(io_error)?,
            None => return Err(io_error(io::Error::other("output collector panicked"))),
        };

        tracing::trace!(command = %command_text, ?elapsed, code = ?status.code(), "child exited");

        Ok(ProcessOutput {
            output: String::from_utf8_lossy(&bytes).into_owned(),
            exit_code: status.code(),
            elapsed,
        })
    }
}

/// Polls the child until it exits or `limit` has passed since `start`.
/// Returns `None` after killing and reaping a child that overran.
fn wait_with_deadline(
    child: &mut Child,
    start: Instant,
    limit: Duration,
) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let elapsed = start.elapsed();
        if elapsed >= limit {
            // Fails only if the child already exited, which the wait below handles.
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        thread::sleep((limit - elapsed).min(POLL_INTERVAL));
    }
}
