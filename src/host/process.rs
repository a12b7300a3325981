//! Subprocess execution seam shared by every transport that shells out.
//!
//! Transports describe a process with [`ProcessRequest`] and hand it to a
//! [`CommandRunner`]. The production runner spawns the program with piped
//! streams and reaps it through a guard, so a child is killed and waited for
//! on every exit path, including timeouts and stream errors.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::process::{Child, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;

use super::HostError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Description of one process invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProcessRequest {
    /// Program to execute.
    pub program: String,
    /// Arguments passed verbatim (no shell involved).
    pub args: Vec<OsString>,
    /// Bytes written to the child's stdin before it is closed.
    pub stdin: Option<Vec<u8>>,
    /// Working directory for the child.
    pub current_dir: Option<Utf8PathBuf>,
    /// Environment overlay merged over the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Wall-clock limit after which the child is killed.
    pub timeout: Option<Duration>,
    /// Attach the child to the operator's terminal instead of capturing.
    pub interactive: bool,
}

impl ProcessRequest {
    /// Creates a request for `program` with `args`.
    #[must_use]
    pub fn new<I, A>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the stdin payload.
    #[must_use]
    pub fn stdin(mut self, payload: Option<Vec<u8>>) -> Self {
        self.stdin = payload;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: Option<Utf8PathBuf>) -> Self {
        self.current_dir = dir;
        self
    }

    /// Replaces the environment overlay.
    #[must_use]
    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Sets the wall-clock limit.
    #[must_use]
    pub const fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    /// Runs the process attached to the operator's terminal.
    #[must_use]
    pub const fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Returns a shell-like rendering for logs and assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Result of running a process.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProcessOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Stdout decoded lossily as UTF-8.
    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily as UTF-8.
    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Abstraction over process execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs the described process and captures its outputs.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Spawn`] if the process cannot be started,
    /// [`HostError::Timeout`] when the wall-clock limit is exceeded, or
    /// [`HostError::Io`] when a stream cannot be read or written.
    fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput, HostError>;
}

/// Real runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput, HostError> {
        let mut command = std::process::Command::new(&request.program);
        command.args(&request.args).envs(&request.env);
        if let Some(dir) = &request.current_dir {
            command.current_dir(dir);
        }

        if request.interactive {
            return run_interactive(&mut command, request);
        }

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = command.spawn().map_err(|err| HostError::Spawn {
            program: request.program.clone(),
            message: err.to_string(),
        })?;
        let mut guard = ChildGuard::new(child);

        let writer = spawn_writer(guard.child.stdin.take(), request.stdin.clone());
        let stdout = spawn_reader(guard.child.stdout.take());
        let stderr = spawn_reader(guard.child.stderr.take());

        let status = wait_with_deadline(&mut guard, request)?;
        let stdout = join_stream(stdout, &request.program, "stdout")?;
        let stderr = join_stream(stderr, &request.program, "stderr")?;
        if let Some(handle) = writer {
            join_writer(handle, &request.program)?;
        }

        Ok(ProcessOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn run_interactive(
    command: &mut std::process::Command,
    request: &ProcessRequest,
) -> Result<ProcessOutput, HostError> {
    command
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    let child = command.spawn().map_err(|err| HostError::Spawn {
        program: request.program.clone(),
        message: err.to_string(),
    })?;
    let mut guard = ChildGuard::new(child);
    let status = wait_with_deadline(&mut guard, request)?;
    Ok(ProcessOutput {
        code: status.code(),
        stdout: Vec::new(),
        stderr: Vec::new(),
    })
}

/// Owns a child process and reaps it when dropped.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    const fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        self.child.kill().ok();
        self.child.wait().ok();
    }
}

fn wait_with_deadline(
    guard: &mut ChildGuard,
    request: &ProcessRequest,
) -> Result<ExitStatus, HostError> {
    let wait_error = |err: &std::io::Error| HostError::io(format!("waiting for {}", request.program), err);

    let Some(limit) = request.timeout else {
        let status = guard.child.wait().map_err(|err| wait_error(&err))?;
        guard.reaped = true;
        return Ok(status);
    };

    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = guard.child.try_wait().map_err(|err| wait_error(&err))? {
            guard.reaped = true;
            return Ok(status);
        }
        if Instant::now() >= deadline {
            return Err(HostError::Timeout {
                program: request.program.clone(),
                seconds: limit.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_writer<W>(sink: Option<W>, payload: Option<Vec<u8>>) -> Option<JoinHandle<std::io::Result<()>>>
where
    W: Write + Send + 'static,
{
    let mut pipe = sink?;
    let Some(bytes) = payload else {
        // Dropping the handle closes the child's stdin.
        drop(pipe);
        return None;
    };
    Some(thread::spawn(move || {
        pipe.write_all(&bytes)?;
        pipe.flush()
    }))
}

fn spawn_reader<R>(source: Option<R>) -> Option<JoinHandle<std::io::Result<Vec<u8>>>>
where
    R: Read + Send + 'static,
{
    let mut pipe = source?;
    Some(thread::spawn(move || {
        let mut buffer = Vec::new();
        pipe.read_to_end(&mut buffer)?;
        Ok(buffer)
    }))
}

fn join_stream(
    handle: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    program: &str,
    stream: &str,
) -> Result<Vec<u8>, HostError> {
    let Some(handle) = handle else {
        return Ok(Vec::new());
    };
    let context = format!("reading {stream} of {program}");
    handle
        .join()
        .map_err(|_| HostError::Io {
            context: context.clone(),
            message: String::from("reader thread panicked"),
        })?
        .map_err(|err| HostError::io(context, &err))
}

fn join_writer(handle: JoinHandle<std::io::Result<()>>, program: &str) -> Result<(), HostError> {
    let context = format!("writing stdin of {program}");
    match handle.join() {
        Ok(Ok(())) => Ok(()),
        // The child may exit without draining stdin; that is not a failure.
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Ok(Err(err)) => Err(HostError::io(context, &err)),
        Err(_) => Err(HostError::Io {
            context,
            message: String::from("writer thread panicked"),
        }),
    }
}
