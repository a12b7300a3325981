//! Command-line interface definitions for the `hostkit` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `hostkit` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hostkit",
    about = "Reach web installations over local, SSH or FTP access and discover their environment",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Instance records file, overriding `instances_file` from configuration.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) instances_file: Option<String>,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Operations on one or all instances.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// List recorded instances.
    #[command(name = "list", about = "List recorded instances")]
    List,
    /// Discover and record an instance's environment.
    #[command(name = "detect", about = "Discover and record an instance's environment")]
    Detect(DetectCommand),
    /// Run a command on an instance.
    #[command(name = "exec", about = "Run a command on an instance")]
    Exec(ExecCommand),
    /// Run a local PHP script on an instance.
    #[command(name = "php", about = "Run a local PHP script on an instance")]
    Php(PhpCommand),
    /// Copy a remote directory tree to the local machine.
    #[command(name = "localize", about = "Copy a remote directory tree to the local machine")]
    Localize(LocalizeCommand),
}

/// Arguments for `hostkit detect`.
#[derive(Debug, Args)]
pub(crate) struct DetectCommand {
    /// Instance name.
    pub(crate) instance: String,
    /// Print the recorded facts as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Arguments for `hostkit exec`.
#[derive(Debug, Args)]
pub(crate) struct ExecCommand {
    /// Instance name.
    pub(crate) instance: String,
    /// Command to execute on the instance (use -- to separate flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}

/// Arguments for `hostkit php`.
#[derive(Debug, Args)]
pub(crate) struct PhpCommand {
    /// Instance name.
    pub(crate) instance: String,
    /// Local script to upload and run.
    pub(crate) script: String,
    /// Arguments passed to the script.
    #[arg(trailing_var_arg = true)]
    pub(crate) args: Vec<String>,
}

/// Arguments for `hostkit localize`.
#[derive(Debug, Args)]
pub(crate) struct LocalizeCommand {
    /// Instance name.
    pub(crate) instance: String,
    /// Remote directory; relative paths resolve against the web root.
    pub(crate) remote: String,
    /// Local destination directory.
    pub(crate) local: String,
}
