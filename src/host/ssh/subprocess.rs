//! Adapter driving the system `ssh` client, one process per invocation.

use camino::Utf8Path;
use tracing::debug;

use super::{AdapterKind, SshAdapter, SshSettings, SshTarget};
use crate::command::{Command, quote};
use crate::host::{CommandRunner, HostError, ProcessCommandRunner, ProcessRequest};

/// Executes commands through the system SSH client.
///
/// Remote lines run under `set -e`, so the first failing step of a compound
/// command aborts the invocation. Transfers use the sync tool over the same
/// client options, or `scp` when the sync tool is not installed.
#[derive(Clone, Debug)]
pub struct SubprocessAdapter<R: CommandRunner = ProcessCommandRunner> {
    target: SshTarget,
    settings: SshSettings,
    runner: R,
    batch: bool,
    rsync_available: bool,
}

impl<R: CommandRunner> SubprocessAdapter<R> {
    /// Creates an adapter.
    ///
    /// `batch` disables password prompts; it is set once key login is known
    /// to work.
    #[must_use]
    pub const fn new(
        target: SshTarget,
        settings: SshSettings,
        runner: R,
        batch: bool,
        rsync_available: bool,
    ) -> Self {
        Self {
            target,
            settings,
            runner,
            batch,
            rsync_available,
        }
    }

    fn ssh_request(&self, line: &str, stdin: Option<Vec<u8>>) -> ProcessRequest {
        let mut args = self.settings.client_options(&self.target, "-p", self.batch);
        args.push(self.target.destination());
        args.push(format!("set -e; {line}"));
        ProcessRequest::new(self.settings.ssh_bin.as_str(), args)
            .stdin(stdin)
            .timeout(Some(self.settings.timeout))
    }

    fn remote_shell(&self) -> String {
        let mut parts = vec![self.settings.ssh_bin.clone()];
        parts.extend(
            self.settings
                .client_options(&self.target, "-p", self.batch)
                .iter()
                .map(|option| quote(option)),
        );
        parts.join(" ")
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}:{path}", self.target.destination())
    }

    fn transfer_request(&self, source: String, destination: String, mirror: bool) -> ProcessRequest {
        let request = if self.rsync_available {
            let mut args = vec![String::from("-az"), String::from("--protect-args")];
            if mirror {
                args.push(String::from("--delete"));
            }
            args.push(String::from("-e"));
            args.push(self.remote_shell());
            args.push(source);
            args.push(destination);
            ProcessRequest::new(self.settings.rsync_bin.as_str(), args)
        } else {
            let mut args = self.settings.client_options(&self.target, "-P", self.batch);
            args.push(source);
            args.push(destination);
            ProcessRequest::new(self.settings.scp_bin.as_str(), args)
        };
        request.timeout(Some(self.settings.timeout))
    }

    fn run_transfer(&self, request: &ProcessRequest) -> Result<(), HostError> {
        debug!(transport = "ssh", target = %self.target, line = %request.command_string(), "transferring");
        let output = self.runner.run(request)?;
        if output.is_success() {
            Ok(())
        } else {
            Err(HostError::transfer(&request.program, output.code, output.stderr_lossy()))
        }
    }
}

impl<R: CommandRunner> SshAdapter for SubprocessAdapter<R> {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Subprocess
    }

    fn execute(&mut self, command: &mut Command) -> Result<(), HostError> {
        let line = command.full_command_line();
        debug!(transport = "ssh", target = %self.target, line = %line, "executing command");
        let stdin = command.take_stdin()?;
        let output = self.runner.run(&self.ssh_request(&line, stdin))?;
        command.record_output(output);
        Ok(())
    }

    fn send_file(&mut self, local: &Utf8Path, remote: &str) -> Result<(), HostError> {
        let request = self.transfer_request(local.to_string(), self.remote_spec(remote), false);
        self.run_transfer(&request)
    }

    fn receive_file(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        let request = self.transfer_request(self.remote_spec(remote), local.to_string(), false);
        self.run_transfer(&request)
    }

    fn supports_mirroring(&self) -> bool {
        self.rsync_available
    }

    fn mirror(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        if !self.rsync_available {
            return Err(HostError::MissingPrerequisite {
                tool: self.settings.rsync_bin.clone(),
            });
        }
        let source = self.remote_spec(&format!("{}/", remote.trim_end_matches('/')));
        let destination = format!("{}/", local.as_str().trim_end_matches('/'));
        let request = self.transfer_request(source, destination, true);
        self.run_transfer(&request)
    }
}
