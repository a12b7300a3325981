//! Core library for the `hostkit` tool.
//!
//! The crate reaches web installations ("instances") over one of three
//! transports (local processes, SSH, FTP) behind a single [`Access`] API,
//! and discovers facts about each target (OS, interpreter, web root, backup
//! ownership) by running probe commands through that access. Discovered
//! facts are persisted alongside the instance record so later runs skip
//! probing.

pub mod access;
pub mod command;
pub mod config;
pub mod discovery;
pub mod host;
pub mod instance;
pub mod prompt;
pub mod test_support;

pub use access::{
    Access, AccessError, AccessFactory, Capabilities, Capability, FtpAccess, LocalAccess,
    ShellAccess, ShellBackedAccess, SshAccess,
};
pub use command::{Command, CommandError, quote, quote_argument};
pub use config::{ConfigError, HostkitConfig};
pub use discovery::{BackupPerm, Discovery, DiscoveryError, OsFamily, PhpCandidate, PhpDiscovery};
pub use host::{Host, HostError, LocalHost, SshHost};
pub use instance::{AccessType, Instance, InstanceStore, StoreError};
pub use prompt::{PromptError, Prompter, TerminalPrompter};
