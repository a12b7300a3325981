//! Inert description of one program invocation.
//!
//! A [`Command`] carries a program, its arguments, an optional stdin payload
//! and an optional privilege-elevation target. It knows nothing about
//! transports: [`Command::run`] hands it to a [`Host`], which executes the
//! rendered line and records the outcome back onto the command. A command
//! runs at most once; a second attempt fails with [`CommandError::AlreadyRun`].
//! Buffers the command owns are released by [`Command::finish`], which also
//! runs when the command is dropped.

use std::fmt;
use std::io::{Cursor, Read};

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::host::{Host, HostError, ProcessOutput};

mod quote;

pub use quote::{quote, quote_argument};

/// Program substituted when a command is built without one.
pub const NOOP_PROGRAM: &str = "true";

const SYNC_TOOL: &str = "rsync";

/// Errors raised while running a [`Command`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when a command that already ran is executed again.
    #[error("command {program} has already been executed")]
    AlreadyRun {
        /// Program of the reused command.
        program: String,
    },
    /// Raised when the transport fails to execute the command.
    #[error(transparent)]
    Host(#[from] HostError),
}

/// One positional argument.
pub enum Argument {
    /// Literal text, quoted when the line is rendered.
    Text(String),
    /// Value produced when the line is rendered.
    Lazy(Box<dyn Fn() -> String + Send>),
}

impl Argument {
    fn render(&self) -> String {
        match self {
            Self::Text(text) => quote_argument(text),
            Self::Lazy(producer) => quote_argument(&producer()),
        }
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Argument {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for Argument {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

/// Payload piped to the program's standard input.
pub enum Stdin {
    /// In-memory bytes.
    Bytes(Vec<u8>),
    /// A reader drained when the command executes.
    Reader(Box<dyn Read + Send>),
}

impl Stdin {
    fn into_bytes(self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Reader(mut reader) => {
                let mut buffer = Vec::new();
                reader.read_to_end(&mut buffer)?;
                Ok(buffer)
            }
        }
    }
}

impl fmt::Debug for Stdin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl From<&str> for Stdin {
    fn from(value: &str) -> Self {
        Self::Bytes(value.as_bytes().to_vec())
    }
}

impl From<String> for Stdin {
    fn from(value: String) -> Self {
        Self::Bytes(value.into_bytes())
    }
}

impl From<Vec<u8>> for Stdin {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Runs the command as another user, optionally from a given directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Elevation {
    /// Account the command impersonates.
    pub user: String,
    /// Directory the command starts in.
    pub workdir: Option<Utf8PathBuf>,
}

impl Elevation {
    fn sudo(&self) -> String {
        format!("sudo -u {}", quote(&self.user))
    }

    fn cd_prefix(&self) -> String {
        self.workdir
            .as_ref()
            .map(|dir| format!("cd {} && ", quote(dir.as_str())))
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Lifecycle {
    Pending,
    Executed,
}

/// A single program invocation.
pub struct Command {
    program: String,
    args: Vec<Argument>,
    raw: bool,
    stdin: Option<Stdin>,
    elevation: Option<Elevation>,
    lifecycle: Lifecycle,
    status: Option<i32>,
    stdout: Cursor<Vec<u8>>,
    stderr: Cursor<Vec<u8>>,
}

impl Command {
    /// Creates a command for `program`. An empty program becomes a no-op.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        let requested = program.into();
        Self {
            program: if requested.trim().is_empty() {
                String::from(NOOP_PROGRAM)
            } else {
                requested
            },
            args: Vec::new(),
            raw: false,
            stdin: None,
            elevation: None,
            lifecycle: Lifecycle::Pending,
            status: None,
            stdout: Cursor::new(Vec::new()),
            stderr: Cursor::new(Vec::new()),
        }
    }

    /// Creates a command from a pre-rendered shell line. Nothing is quoted.
    #[must_use]
    pub fn shell(line: impl Into<String>) -> Self {
        let mut command = Self::new(line);
        command.raw = true;
        command
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<Argument>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Argument>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends an argument whose value is computed when the line renders.
    #[must_use]
    pub fn arg_lazy(mut self, producer: impl Fn() -> String + Send + 'static) -> Self {
        self.args.push(Argument::Lazy(Box::new(producer)));
        self
    }

    /// Sets the stdin payload.
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<Stdin>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Runs the command as `user`, starting in `workdir` when given.
    #[must_use]
    pub fn elevate(mut self, user: impl Into<String>, workdir: Option<Utf8PathBuf>) -> Self {
        self.elevation = Some(Elevation {
            user: user.into(),
            workdir,
        });
        self
    }

    /// Program this command invokes.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether a stdin payload is attached and not yet consumed.
    #[must_use]
    pub const fn has_stdin(&self) -> bool {
        self.stdin.is_some()
    }

    /// Renders the complete shell line, including elevation wrapping.
    #[must_use]
    pub fn full_command_line(&self) -> String {
        let Some(elevation) = &self.elevation else {
            return self.plain_line();
        };

        if !self.raw && self.is_sync_tool() {
            // The sync tool needs the impersonated user on both ends of the
            // transfer, so elevation goes into its own flags.
            let sudo = elevation.sudo();
            let remote_side = quote_argument(&format!("--rsync-path={sudo} {SYNC_TOOL}"));
            return format!(
                "{}{sudo} {} {remote_side}{}",
                elevation.cd_prefix(),
                self.program,
                self.rendered_args()
            );
        }

        let inner = format!("{}{}", elevation.cd_prefix(), self.plain_line());
        format!("{} -- sh -c {}", elevation.sudo(), quote(&inner))
    }

    /// Executes the command on `host`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::AlreadyRun`] when the command was executed
    /// before, whatever the earlier outcome, and [`CommandError::Host`] when
    /// the transport fails.
    pub fn run<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<(), CommandError> {
        if self.lifecycle == Lifecycle::Executed {
            return Err(CommandError::AlreadyRun {
                program: self.program.clone(),
            });
        }
        self.lifecycle = Lifecycle::Executed;
        host.execute(self)?;
        Ok(())
    }

    /// Whether [`Command::run`] has been attempted.
    #[must_use]
    pub fn has_run(&self) -> bool {
        self.lifecycle == Lifecycle::Executed
    }

    /// Exit status recorded by the transport.
    #[must_use]
    pub const fn exit_status(&self) -> Option<i32> {
        self.status
    }

    /// Returns `true` when the recorded exit status equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, Some(0))
    }

    /// Captured stdout as a consumable stream.
    pub fn stdout(&mut self) -> &mut dyn Read {
        &mut self.stdout
    }

    /// Captured stderr as a consumable stream.
    pub fn stderr(&mut self) -> &mut dyn Read {
        &mut self.stderr
    }

    /// Drains the unread part of stdout.
    pub fn stdout_bytes(&mut self) -> Vec<u8> {
        drain(&mut self.stdout)
    }

    /// Drains the unread part of stdout as lossy UTF-8.
    pub fn stdout_string(&mut self) -> String {
        String::from_utf8_lossy(&self.stdout_bytes()).into_owned()
    }

    /// Drains the unread part of stderr as lossy UTF-8.
    pub fn stderr_string(&mut self) -> String {
        String::from_utf8_lossy(&drain(&mut self.stderr)).into_owned()
    }

    /// Releases the stdin payload and captured buffers.
    pub fn finish(&mut self) {
        self.stdin = None;
        self.stdout = Cursor::new(Vec::new());
        self.stderr = Cursor::new(Vec::new());
    }

    /// Takes the stdin payload, draining a reader into memory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] when a stdin reader fails.
    pub fn take_stdin(&mut self) -> Result<Option<Vec<u8>>, HostError> {
        self.stdin
            .take()
            .map(Stdin::into_bytes)
            .transpose()
            .map_err(|err| HostError::io(format!("reading stdin for {}", self.program), &err))
    }

    /// Records the outcome of executing this command.
    pub fn record_output(&mut self, output: ProcessOutput) {
        self.status = output.code;
        self.stdout = Cursor::new(output.stdout);
        self.stderr = Cursor::new(output.stderr);
    }

    fn is_sync_tool(&self) -> bool {
        self.program.rsplit('/').next() == Some(SYNC_TOOL)
    }

    fn rendered_args(&self) -> String {
        self.args
            .iter()
            .map(|arg| format!(" {}", arg.render()))
            .collect()
    }

    fn plain_line(&self) -> String {
        if self.raw {
            return self.program.clone();
        }
        format!("{}{}", self.program, self.rendered_args())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("raw", &self.raw)
            .field("stdin", &self.stdin)
            .field("elevation", &self.elevation)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        self.finish();
    }
}

fn drain(stream: &mut Cursor<Vec<u8>>) -> Vec<u8> {
    let mut buffer = Vec::new();
    // Reading from an in-memory cursor cannot fail.
    stream.read_to_end(&mut buffer).ok();
    buffer
}
