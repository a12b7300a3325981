//! Per-instance façade over one bound transport.
//!
//! [`Access`] exposes file operations, remote script execution and folder
//! localisation for one [`Instance`], whatever transport backs it. Command
//! execution is a separate capability, [`ShellAccess`], reachable through
//! [`Access::shell`] only when the transport can run arbitrary commands.
//!
//! File operations log failures and return a negative result. Script and
//! shell execution surface a non-zero exit as [`AccessError::Execution`]
//! with the remote stderr untouched.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::command::{Command, CommandError, Stdin};
use crate::host::HostError;
use crate::instance::Instance;
use crate::instance::StoreError;

mod factory;
mod ftp;
mod http;
mod shell;

pub use factory::AccessFactory;
pub use ftp::FtpAccess;
pub use http::{HttpFetcher, HttpResponse, ReqwestFetcher};
pub use shell::{LocalAccess, ShellBackedAccess, SshAccess};

/// Operation groups an access may or may not support.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Capability {
    /// Running a PHP script on the target.
    Scripting,
    /// Moving files to and from the target.
    FileTransfer,
}

/// What the bound transport can do.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities {
    /// `run_php` works.
    pub scripting: bool,
    /// Uploads and downloads work.
    pub file_transfer: bool,
    /// Arbitrary commands can be executed.
    pub shell: bool,
    /// Folders can be mirrored incrementally.
    pub mirroring: bool,
}

impl Capabilities {
    /// Whether `capability` is available.
    #[must_use]
    pub const fn supports(self, capability: Capability) -> bool {
        match capability {
            Capability::Scripting => self.scripting,
            Capability::FileTransfer => self.file_transfer,
        }
    }
}

/// Errors surfaced by access operations that do not swallow failures.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Raised when a script or shell command exits non-zero.
    #[error("{program} exited with status {}: {stderr}", status.map_or_else(|| String::from("unknown"), |code| code.to_string()))]
    Execution {
        /// Program or command line that ran.
        program: String,
        /// Exit status, when one was reported.
        status: Option<i32>,
        /// Remote stderr, verbatim.
        stderr: String,
    },
    /// Raised when the bound transport lacks a capability.
    #[error("{transport} access for {instance} cannot provide {capability:?}")]
    MissingCapability {
        /// Instance name.
        instance: String,
        /// Transport name.
        transport: &'static str,
        /// Requested capability.
        capability: Capability,
    },
    /// Raised when an instance record lacks a setting the transport needs.
    #[error("instance {instance} has no {setting} configured")]
    MissingSetting {
        /// Instance name.
        instance: String,
        /// Missing field.
        setting: &'static str,
    },
    /// Raised when the transport fails to move a file or start a process.
    #[error(transparent)]
    Host(#[from] HostError),
    /// Raised when a command cannot run.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Raised when fetching a script over HTTP fails.
    #[error("GET {url} failed ({}): {message}", status.map_or_else(|| String::from("no response"), |code| code.to_string()))]
    Http {
        /// Requested URL.
        url: String,
        /// HTTP status, when a response arrived.
        status: Option<u16>,
        /// Response body or client error text.
        message: String,
    },
    /// Raised when a downloaded archive cannot be unpacked.
    #[error("failed to unpack {path}: {message}")]
    Archive {
        /// Local archive path.
        path: Utf8PathBuf,
        /// Error text.
        message: String,
    },
    /// Raised when a downgrade cannot be persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// File, script and folder operations on one instance.
pub trait Access {
    /// Transport name used in logs and errors.
    fn transport(&self) -> &'static str;

    /// Instance this access is bound to.
    fn instance(&self) -> &Instance;

    /// Mutable instance, used by Discovery to cache facts.
    fn instance_mut(&mut self) -> &mut Instance;

    /// What the bound transport can do.
    fn capabilities(&self) -> Capabilities;

    /// Whether `capability` is available.
    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().supports(capability)
    }

    /// Absolute paths are returned verbatim; relative ones are joined to
    /// the instance web root when one is known.
    fn resolve_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            return path.to_owned();
        }
        self.instance().effective_webroot().map_or_else(
            || path.to_owned(),
            |root| format!("{}/{}", root.trim_end_matches('/'), path.trim_start_matches("./")),
        )
    }

    /// Whether `path` exists. Failures count as absent.
    fn file_exists(&mut self, path: &str) -> bool;

    /// Contents of `path`, or empty on failure.
    fn file_get_contents(&mut self, path: &str) -> Vec<u8>;

    /// Last modification time of `path`.
    fn file_modification_date(&mut self, path: &str) -> Option<DateTime<Utc>>;

    /// Uploads `local` to `remote`, reporting success.
    fn upload_file(&mut self, local: &Utf8Path, remote: &str) -> bool;

    /// Downloads `remote` to `dest`, or to a scratch file when `dest` is
    /// absent. Returns the local path on success.
    fn download_file(&mut self, remote: &str, dest: Option<&Utf8Path>) -> Option<Utf8PathBuf>;

    /// Deletes `path`, reporting success.
    fn delete_file(&mut self, path: &str) -> bool;

    /// Renames `from` to `to`, reporting success.
    fn move_file(&mut self, from: &str, to: &str) -> bool;

    /// Copies `from` to `to`, reporting success.
    fn copy_file(&mut self, from: &str, to: &str) -> bool;

    /// Creates `path` and its missing parents, reporting success.
    fn create_directory(&mut self, path: &str) -> bool;

    /// Uploads `script` to a temporary location, runs it with `args` and
    /// returns its stdout. The temporary copy is removed on every path.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Execution`] or [`AccessError::Http`] when the
    /// script fails, and transport errors when it cannot be staged.
    fn run_php(&mut self, script: &Utf8Path, args: &[String]) -> Result<String, AccessError>;

    /// Mirrors the remote directory into `local`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError`] when listing, transfer or unpacking fails.
    fn localize_folder(&mut self, remote: &str, local: &Utf8Path) -> Result<(), AccessError>;

    /// Command execution, when the transport offers it.
    fn shell(&mut self) -> Option<&mut dyn ShellAccess> {
        None
    }
}

/// Arbitrary command execution on the bound transport.
pub trait ShellAccess {
    /// Builds a command for `program` with `args` and an optional payload.
    fn create_command(&self, program: &str, args: &[String], stdin: Option<Stdin>) -> Command {
        let mut command = Command::new(program).args(args);
        if let Some(payload) = stdin {
            command = command.with_stdin(payload);
        }
        command
    }

    /// Runs `command`. A non-zero exit is recorded on it, not raised.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError`] when the command cannot be executed.
    fn run_command(&mut self, command: &mut Command) -> Result<(), AccessError>;

    /// Runs raw shell lines as one `&&` chain. Returns stdout when
    /// `capture` is set and an empty string otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Execution`] with the remote stderr when the
    /// chain exits non-zero.
    fn shell_exec(&mut self, commands: &[String], capture: bool) -> Result<String, AccessError>;

    /// Whether `name` resolves to an executable on the target.
    fn has_executable(&mut self, name: &str) -> bool;
}

pub(crate) fn execution_error(program: &str, command: &mut Command) -> AccessError {
    AccessError::Execution {
        program: program.to_owned(),
        status: command.exit_status(),
        stderr: command.stderr_string(),
    }
}

#[cfg(test)]
mod tests;
