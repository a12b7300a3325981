//! Running probe lines and interpreting their output.

use crate::access::{AccessError, ShellAccess};
use crate::command::Command;

use super::DiscoveryError;

/// Outcome of one probe line.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ProbeOutput {
    pub(crate) status: Option<i32>,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl ProbeOutput {
    pub(crate) const fn succeeded(&self) -> bool {
        matches!(self.status, Some(0))
    }

    /// Trimmed stdout of a successful probe, if it printed anything.
    pub(crate) fn answer(&self) -> Option<&str> {
        let text = self.stdout.trim();
        (self.succeeded() && !text.is_empty()).then_some(text)
    }
}

pub(crate) fn run(shell: &mut dyn ShellAccess, line: &str) -> Result<ProbeOutput, AccessError> {
    let mut command = Command::shell(line);
    shell.run_command(&mut command)?;
    Ok(ProbeOutput {
        status: command.exit_status(),
        stdout: command.stdout_string(),
        stderr: command.stderr_string(),
    })
}

pub(crate) fn succeeds(shell: &mut dyn ShellAccess, line: &str) -> bool {
    run(shell, line).is_ok_and(|output| output.succeeded())
}

/// Runs `lines` in order and returns the first non-empty answer.
pub(crate) fn first_answer<S: AsRef<str>>(
    shell: &mut dyn ShellAccess,
    fact: &'static str,
    lines: &[S],
) -> Result<String, DiscoveryError> {
    let mut last_stderr = String::new();
    for line in lines {
        let output = run(shell, line.as_ref())?;
        if let Some(answer) = output.answer() {
            return Ok(answer.to_owned());
        }
        if !output.stderr.trim().is_empty() {
            last_stderr = output.stderr;
        }
    }
    Err(DiscoveryError::Detection {
        fact,
        stderr: last_stderr,
    })
}

/// Whether `path` names a PHP CLI binary rather than a helper such as
/// `php-config` or `phpize`.
pub(crate) fn is_php_binary(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.strip_suffix(".exe").unwrap_or(name);
    stem.strip_prefix("php")
        .is_some_and(|rest| rest.chars().all(|ch| ch.is_ascii_digit() || ch == '.'))
}
