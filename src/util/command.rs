//! Command execution port.
//!
//! Every external tool (pulumi, gcloud, kubectl) is invoked through
//! [`CommandRunner`] so the backends can be exercised with a scripted fake.
//! Secret material travels on stdin, never in argv.

use crate::error::{Error, Result};
use std::fmt;
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Zeroizing<Vec<u8>>>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: &[u8]) -> Self {
        self.stdin = Some(Zeroizing::new(input.to_vec()));
        self
    }
}

// stdin is deliberately left out; it may hold a password.
impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

pub struct CommandOutput {
    pub success: bool,
    pub stdout: Zeroizing<Vec<u8>>,
    pub stderr: String,
}

// stdout may carry a secret payload.
impl fmt::Debug for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandOutput")
            .field("success", &self.success)
            .field("stdout", &format_args!("<{} bytes>", self.stdout.len()))
            .field("stderr", &self.stderr)
            .finish()
    }
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            success: true,
            stdout: Zeroizing::new(stdout.into()),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: Zeroizing::new(Vec::new()),
            stderr: stderr.into(),
        }
    }

    /// Stdout as UTF-8 text.
    pub fn stdout_text(&self, program: &str) -> Result<Zeroizing<String>> {
        String::from_utf8(self.stdout.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| Error::backend(program, false, "output is not valid UTF-8"))
    }

    /// Trimmed stderr, for error messages.
    pub fn error_text(&self) -> String {
        let text = self.stderr.trim();
        if text.is_empty() {
            "exited with non-zero status".to_string()
        } else {
            text.to_string()
        }
    }
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as child processes, killing them when the timeout elapses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!(command = ?spec, timeout = ?spec.timeout, "running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::backend(&spec.program, false, "executable not found on PATH")
            } else {
                Error::Io(e)
            }
        })?;

        let stdout_reader = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            // A child that exits early closes its end; its status and stderr
            // still decide the outcome.
            match stdin.write_all(input) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::debug!(program = %spec.program, "child closed stdin early");
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e.into());
                }
            }
            // dropping stdin closes the pipe
        }

        let start = Instant::now();
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None => {
                    if start.elapsed() > spec.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::Timeout {
                            program: spec.program.clone(),
                            after: spec.timeout,
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        let stdout = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        Ok(CommandOutput {
            success: status.success(),
            stdout: Zeroizing::new(stdout),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Whether `program` can be executed (used by `doctor`).
pub fn is_available(
    runner: &dyn CommandRunner,
    program: &str,
    version_args: &[&str],
    timeout: Duration,
) -> bool {
    runner
        .run(&CommandSpec::new(program, timeout).args(version_args.iter().copied()))
        .map(|out| out.success)
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) use scripted::ScriptedRunner;

#[cfg(test)]
mod scripted {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued results and records every spec it receives.
    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        responses: Mutex<VecDeque<Result<CommandOutput>>>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn push(&self, response: Result<CommandOutput>) -> &Self {
            self.responses.lock().unwrap().push_back(response);
            self
        }

        pub(crate) fn ok(&self, stdout: &str) -> &Self {
            self.push(Ok(CommandOutput::ok(stdout.as_bytes().to_vec())))
        }

        pub(crate) fn fail(&self, stderr: &str) -> &Self {
            self.push(Ok(CommandOutput::failed(stderr)))
        }

        pub(crate) fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(spec.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected command: {:?}", spec))
        }
    }
}
