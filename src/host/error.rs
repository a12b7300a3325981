//! Errors raised by transports while executing commands or moving files.

use thiserror::Error;

/// Failures surfaced by a [`Host`](super::Host) or one of its helpers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostError {
    /// Raised when a process cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when reading or writing a stream or local file fails.
    #[error("{context}: {message}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a subprocess exceeds its wall-clock limit and is killed.
    #[error("{program} timed out after {seconds}s")]
    Timeout {
        /// Program that was killed.
        program: String,
        /// Configured limit in seconds.
        seconds: u64,
    },
    /// Raised when a tool the transport depends on is not installed.
    #[error("required tool {tool} was not found on PATH")]
    MissingPrerequisite {
        /// Name of the missing executable.
        tool: String,
    },
    /// Raised by the library-driven SSH session.
    #[error("ssh session to {target} failed: {message}")]
    Ssh {
        /// `user@host:port` of the target.
        target: String,
        /// Library error text.
        message: String,
    },
    /// Raised when a file-transfer helper exits with a non-zero status.
    #[error("{program} exited with status {status_text}: {stderr}")]
    TransferFailed {
        /// Helper that ran (`rsync`, `scp`, `tar`).
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the helper.
        stderr: String,
    },
    /// Raised when a single FTP operation fails.
    #[error("ftp {operation} {path} failed: {stderr}")]
    Ftp {
        /// Operation name (`list`, `get`, `put`, ...).
        operation: String,
        /// Remote path the operation addressed.
        path: String,
        /// Exit status of the FTP client.
        status: Option<i32>,
        /// Stderr captured from the FTP client.
        stderr: String,
    },
    /// Raised when an operator prompt cannot be answered.
    #[error("operator prompt failed: {0}")]
    Prompt(String),
    /// Raised when a transport is asked for something it cannot do.
    #[error("{transport} transport does not support {operation}")]
    Unsupported {
        /// Transport name.
        transport: &'static str,
        /// Operation that was requested.
        operation: &'static str,
    },
}

impl HostError {
    pub(crate) fn io(context: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn transfer(program: &str, code: Option<i32>, stderr: String) -> Self {
        let status_text = code.map_or_else(|| String::from("unknown"), |value| value.to_string());
        Self::TransferFailed {
            program: program.to_owned(),
            status: code,
            status_text,
            stderr,
        }
    }
}
