//! Transports able to execute a [`Command`] against one physical target.
//!
//! [`LocalHost`] runs commands as local child processes, [`SshHost`] runs
//! them on a remote machine through one of two interchangeable adapters, and
//! [`FtpHost`] offers file primitives only, because FTP has no command
//! execution.

use camino::Utf8Path;

use crate::command::Command;

mod error;
pub mod files;
pub mod ftp;
pub mod local;
pub mod process;
pub mod ssh;

pub use error::HostError;
pub use ftp::{FtpEntry, FtpHost};
pub use local::LocalHost;
pub use process::{CommandRunner, ProcessCommandRunner, ProcessOutput, ProcessRequest};
pub use ssh::{
    AdapterKind, AdapterPreference, KeyCache, KeySetupOutcome, KeyState, SessionCache,
    SshAdapter, SshContext, SshHost, SshSettings, SshTarget,
};

/// A transport that executes commands and moves files for one target.
pub trait Host {
    /// Short transport name used in logs and errors.
    fn transport(&self) -> &'static str;

    /// Executes `command`, recording its status and outputs on it.
    ///
    /// A non-zero exit status is not an error at this layer.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the command cannot be executed at all.
    fn execute(&mut self, command: &mut Command) -> Result<(), HostError>;

    /// Copies a local file to `remote` on the target.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the transfer fails.
    fn send_file(&mut self, local: &Utf8Path, remote: &str) -> Result<(), HostError>;

    /// Copies `remote` from the target to a local file.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the transfer fails.
    fn receive_file(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError>;

    /// Whether [`Host::mirror`] performs incremental synchronisation.
    fn supports_mirroring(&self) -> bool {
        false
    }

    /// Mirrors the remote directory into `local` incrementally.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Unsupported`] unless the transport overrides it.
    fn mirror(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        let _ = (remote, local);
        Err(HostError::Unsupported {
            transport: self.transport(),
            operation: "mirror",
        })
    }
}
