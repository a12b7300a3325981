//! Local transport: commands run as child processes of this tool.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use super::files;
use super::{CommandRunner, Host, HostError, ProcessCommandRunner, ProcessRequest};
use crate::command::{Command, quote};

const SHELL: &str = "sh";

/// Runs commands on the machine hosting the tool.
///
/// The working directory and the environment overlay apply to every command.
/// Overlay values win over inherited variables of the same name.
#[derive(Clone, Debug)]
pub struct LocalHost<R: CommandRunner = ProcessCommandRunner> {
    runner: R,
    cwd: Option<Utf8PathBuf>,
    env: BTreeMap<String, String>,
    rsync_bin: Option<String>,
}

impl LocalHost {
    /// Creates a host backed by real child processes.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_runner(ProcessCommandRunner)
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> LocalHost<R> {
    /// Creates a host that executes through `runner`.
    #[must_use]
    pub const fn with_runner(runner: R) -> Self {
        Self {
            runner,
            cwd: None,
            env: BTreeMap::new(),
            rsync_bin: None,
        }
    }

    /// Enables incremental mirroring through the given sync tool.
    #[must_use]
    pub fn with_rsync(mut self, rsync_bin: impl Into<String>) -> Self {
        self.rsync_bin = Some(rsync_bin.into());
        self
    }

    /// Changes the working directory used by later commands.
    pub fn chdir(&mut self, dir: impl Into<Utf8PathBuf>) {
        self.cwd = Some(dir.into());
    }

    /// Current working directory, if one was set.
    #[must_use]
    pub fn cwd(&self) -> Option<&Utf8Path> {
        self.cwd.as_deref()
    }

    /// Adds or replaces one environment overlay entry.
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Runs a list of raw shell lines one after another.
    ///
    /// Every line is prefixed with `cd` and `export` statements reflecting
    /// the current directory and overlay. Failures are logged and skipped;
    /// the stdout of every successful line is concatenated.
    pub fn run_commands<S: AsRef<str>>(&mut self, lines: &[S]) -> String {
        let prefix = self.state_prefix();
        let mut collected = String::new();
        for entry in lines {
            let line = entry.as_ref();
            let mut command = Command::shell(format!("{prefix}{line}"));
            match command.run(self) {
                Ok(()) if command.is_success() => collected.push_str(&command.stdout_string()),
                Ok(()) => warn!(
                    transport = "local",
                    line,
                    status = ?command.exit_status(),
                    stderr = %command.stderr_string(),
                    "legacy command failed"
                ),
                Err(err) => warn!(transport = "local", line, error = %err, "legacy command failed"),
            }
        }
        collected
    }

    fn state_prefix(&self) -> String {
        let mut parts = Vec::new();
        if let Some(dir) = &self.cwd {
            parts.push(format!("cd {}", quote(dir.as_str())));
        }
        parts.extend(
            self.env
                .iter()
                .map(|(key, value)| format!("export {key}={}", quote(value))),
        );
        parts.iter().map(|part| format!("{part} && ")).collect()
    }

    fn resolve(&self, path: &str) -> Utf8PathBuf {
        let candidate = Utf8Path::new(path);
        match &self.cwd {
            Some(dir) if candidate.is_relative() => dir.join(candidate),
            _ => candidate.to_path_buf(),
        }
    }
}

impl<R: CommandRunner> Host for LocalHost<R> {
    fn transport(&self) -> &'static str {
        "local"
    }

    fn execute(&mut self, command: &mut Command) -> Result<(), HostError> {
        let line = command.full_command_line();
        debug!(transport = "local", line = %line, "executing command");
        let stdin = command.take_stdin()?;
        let request = ProcessRequest::new(SHELL, ["-c", line.as_str()])
            .stdin(stdin)
            .current_dir(self.cwd.clone())
            .env(self.env.clone());
        let output = self.runner.run(&request)?;
        command.record_output(output);
        Ok(())
    }

    fn send_file(&mut self, local: &Utf8Path, remote: &str) -> Result<(), HostError> {
        let target = self.resolve(remote);
        files::copy_file(local, &target)
    }

    fn receive_file(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        let source = self.resolve(remote);
        files::copy_file(&source, local)
    }

    fn supports_mirroring(&self) -> bool {
        self.rsync_bin.is_some()
    }

    fn mirror(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        let Some(rsync) = self.rsync_bin.clone() else {
            return Err(HostError::Unsupported {
                transport: "local",
                operation: "mirror",
            });
        };
        let source = format!("{}/", self.resolve(remote).as_str().trim_end_matches('/'));
        let target = format!("{}/", local.as_str().trim_end_matches('/'));
        let request = ProcessRequest::new(rsync.as_str(), ["-a", "--delete", &source, &target]);
        debug!(transport = "local", line = %request.command_string(), "mirroring directory");
        let output = self.runner.run(&request)?;
        if output.is_success() {
            Ok(())
        } else {
            Err(HostError::transfer(&rsync, output.code, output.stderr_lossy()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;

    #[rstest]
    fn execute_runs_full_line_through_shell() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "hi\n", "");
        let mut host = LocalHost::with_runner(runner.clone());
        host.chdir("/srv/app");
        host.set_env("APP_ENV", "prod");

        let mut command = Command::new("echo").arg("hi there");
        command.run(&mut host).expect("execution should succeed");

        let invocations = runner.invocations();
        let request = invocations.first().expect("one invocation");
        assert_eq!(request.command_string(), "sh -c echo 'hi there'");
        assert_eq!(request.current_dir.as_deref(), Some(Utf8Path::new("/srv/app")));
        assert_eq!(request.env.get("APP_ENV").map(String::as_str), Some("prod"));
        assert_eq!(command.stdout_string(), "hi\n");
    }

    #[rstest]
    fn run_commands_prefixes_state_and_skips_failures() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "first\n", "");
        runner.push_output(Some(1), "", "boom");
        runner.push_output(Some(0), "third\n", "");
        let mut host = LocalHost::with_runner(runner.clone());
        host.chdir("/var/www/my site");
        host.set_env("LANG", "C");

        let output = host.run_commands(&["one", "two", "three"]);

        assert_eq!(output, "first\nthird\n");
        let lines: Vec<String> = runner
            .invocations()
            .iter()
            .map(ProcessRequest::command_string)
            .collect();
        assert_eq!(
            lines,
            vec![
                "sh -c cd '/var/www/my site' && export LANG=C && one",
                "sh -c cd '/var/www/my site' && export LANG=C && two",
                "sh -c cd '/var/www/my site' && export LANG=C && three",
            ]
        );
    }

    #[rstest]
    fn run_commands_continues_after_spawn_errors() {
        let runner = ScriptedRunner::new();
        runner.push_error(HostError::Spawn {
            program: String::from("sh"),
            message: String::from("denied"),
        });
        runner.push_output(Some(0), "ok", "");
        let mut host = LocalHost::with_runner(runner);

        assert_eq!(host.run_commands(&["broken", "fine"]), "ok");
    }

    #[rstest]
    fn overlay_wins_over_inherited_environment() {
        let mut host = LocalHost::new();
        host.set_env("HOME", "/overlay/home");

        let mut command = Command::shell("printf %s \"$HOME\"");
        command.run(&mut host).expect("sh should run");

        assert_eq!(command.stdout_string(), "/overlay/home");
    }

    #[rstest]
    fn mirror_requires_sync_tool() {
        let mut host = LocalHost::with_runner(ScriptedRunner::new());

        let err = host
            .mirror("/src", Utf8Path::new("/dst"))
            .expect_err("mirroring should be unsupported");

        assert!(matches!(err, HostError::Unsupported { .. }), "unexpected error: {err}");
    }

    #[rstest]
    fn mirror_invokes_rsync_with_delete() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let mut host = LocalHost::with_runner(runner.clone()).with_rsync("rsync");

        host.mirror("/src/site", Utf8Path::new("/dst/site/"))
            .expect("mirror should succeed");

        let invocations = runner.invocations();
        let request = invocations.first().expect("one invocation");
        assert_eq!(request.command_string(), "rsync -a --delete /src/site/ /dst/site/");
    }
}
