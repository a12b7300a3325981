//! Access over transports that can execute commands.
//!
//! File operations are issued as small POSIX shell probes through the
//! bound [`Host`], so the same code serves local and SSH instances.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Access, AccessError, Capabilities, ShellAccess, execution_error};
use crate::command::{Command, quote};
use crate::host::{Host, LocalHost, SshHost, files};
use crate::instance::{Instance, facts};

const DEFAULT_PHP: &str = "php";
const ARCHIVE_TOOL: &str = "tar";

/// Access bound to a command-capable transport.
#[derive(Debug)]
pub struct ShellBackedAccess<H: Host> {
    instance: Instance,
    host: H,
    local_temp: Utf8PathBuf,
}

/// Access to an instance on this machine.
pub type LocalAccess = ShellBackedAccess<LocalHost>;

/// Access to an instance reached over SSH.
pub type SshAccess = ShellBackedAccess<SshHost>;

impl<H: Host> ShellBackedAccess<H> {
    /// Binds `host` to `instance`. Scratch files go under `local_temp`.
    #[must_use]
    pub const fn new(instance: Instance, host: H, local_temp: Utf8PathBuf) -> Self {
        Self {
            instance,
            host,
            local_temp,
        }
    }

    /// Bound transport.
    #[must_use]
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Bound transport, mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Releases the instance record, including any facts cached on it.
    #[must_use]
    pub fn into_instance(self) -> Instance {
        self.instance
    }

    fn probe(&mut self, line: String) -> Option<Command> {
        let mut command = Command::shell(line);
        debug!(
            instance = %self.instance.name,
            transport = self.host.transport(),
            line = %command.full_command_line(),
            "running probe"
        );
        match command.run(&mut self.host) {
            Ok(()) => Some(command),
            Err(err) => {
                warn!(instance = %self.instance.name, error = %err, "probe could not run");
                None
            }
        }
    }

    fn succeeds(&mut self, operation: &str, line: String) -> bool {
        let Some(mut command) = self.probe(line) else {
            return false;
        };
        if command.is_success() {
            return true;
        }
        warn!(
            instance = %self.instance.name,
            operation,
            status = ?command.exit_status(),
            stderr = %command.stderr_string().trim_end(),
            "file operation failed"
        );
        false
    }

    fn remove_quietly(&mut self, remote: &str) {
        if !self.succeeds("cleanup", format!("rm -f {}", quote(remote))) {
            warn!(instance = %self.instance.name, path = remote, "temporary file left behind");
        }
    }

    fn remote_scratch(&self, name: &str) -> String {
        format!(
            "{}/{}_{name}",
            self.instance.tempdir.trim_end_matches('/'),
            Uuid::new_v4().simple()
        )
    }

    fn fetch_archive(&mut self, source: &str, local: &Utf8Path) -> Result<(), AccessError> {
        let archive = self.remote_scratch("localize.tar.gz");
        let mut pack = Command::new(ARCHIVE_TOOL).args(["-czf", archive.as_str(), "-C", source, "."]);
        let packed = pack.run(&mut self.host);
        if packed.is_err() || !pack.is_success() {
            self.remove_quietly(&archive);
            packed?;
            return Err(execution_error(ARCHIVE_TOOL, &mut pack));
        }

        let scratch = files::scratch_path(&self.local_temp, ".tar.gz");
        let received = self.host.receive_file(&archive, &scratch);
        self.remove_quietly(&archive);
        received?;

        let unpacked = unpack(&scratch, local);
        if let Err(err) = files::remove(&scratch) {
            warn!(path = %scratch, error = %err, "failed to remove local archive");
        }
        unpacked
    }
}

fn unpack(archive: &Utf8Path, dest: &Utf8Path) -> Result<(), AccessError> {
    let failure = |message: String| AccessError::Archive {
        path: archive.to_path_buf(),
        message,
    };
    let file = files::open(archive).map_err(|err| failure(err.to_string()))?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(dest.as_std_path())
        .map_err(|err| failure(err.to_string()))
}

impl<H: Host> Access for ShellBackedAccess<H> {
    fn transport(&self) -> &'static str {
        self.host.transport()
    }

    fn instance(&self) -> &Instance {
        &self.instance
    }

    fn instance_mut(&mut self) -> &mut Instance {
        &mut self.instance
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            scripting: true,
            file_transfer: true,
            shell: true,
            mirroring: self.host.supports_mirroring(),
        }
    }

    fn file_exists(&mut self, path: &str) -> bool {
        let target = self.resolve_path(path);
        self.probe(format!("test -e {}", quote(&target)))
            .is_some_and(|command| command.is_success())
    }

    fn file_get_contents(&mut self, path: &str) -> Vec<u8> {
        let target = self.resolve_path(path);
        let Some(mut command) = self.probe(format!("cat {}", quote(&target))) else {
            return Vec::new();
        };
        if command.is_success() {
            return command.stdout_bytes();
        }
        warn!(
            instance = %self.instance.name,
            path = %target,
            stderr = %command.stderr_string().trim_end(),
            "failed to read file"
        );
        Vec::new()
    }

    fn file_modification_date(&mut self, path: &str) -> Option<DateTime<Utc>> {
        let quoted = quote(&self.resolve_path(path));
        let mut command = self.probe(format!(
            "stat -c %Y {quoted} 2>/dev/null || stat -f %m {quoted}"
        ))?;
        if !command.is_success() {
            return None;
        }
        let seconds = command.stdout_string().trim().parse::<i64>().ok()?;
        DateTime::from_timestamp(seconds, 0)
    }

    fn upload_file(&mut self, local: &Utf8Path, remote: &str) -> bool {
        let target = self.resolve_path(remote);
        self.host
            .send_file(local, &target)
            .inspect_err(|err| warn!(instance = %self.instance.name, path = %target, error = %err, "upload failed"))
            .is_ok()
    }

    fn download_file(&mut self, remote: &str, dest: Option<&Utf8Path>) -> Option<Utf8PathBuf> {
        let source = self.resolve_path(remote);
        let local = dest.map_or_else(
            || {
                let name = source.rsplit('/').next().unwrap_or("download");
                files::scratch_path(&self.local_temp, &format!("-{name}"))
            },
            Utf8Path::to_path_buf,
        );
        match self.host.receive_file(&source, &local) {
            Ok(()) => Some(local),
            Err(err) => {
                warn!(instance = %self.instance.name, path = %source, error = %err, "download failed");
                None
            }
        }
    }

    fn delete_file(&mut self, path: &str) -> bool {
        let target = self.resolve_path(path);
        self.succeeds("delete", format!("rm -f {}", quote(&target)))
    }

    fn move_file(&mut self, from: &str, to: &str) -> bool {
        let line = format!(
            "mv {} {}",
            quote(&self.resolve_path(from)),
            quote(&self.resolve_path(to))
        );
        self.succeeds("move", line)
    }

    fn copy_file(&mut self, from: &str, to: &str) -> bool {
        let line = format!(
            "cp -p {} {}",
            quote(&self.resolve_path(from)),
            quote(&self.resolve_path(to))
        );
        self.succeeds("copy", line)
    }

    fn create_directory(&mut self, path: &str) -> bool {
        let target = self.resolve_path(path);
        self.succeeds("mkdir", format!("mkdir -p {}", quote(&target)))
    }

    fn run_php(&mut self, script: &Utf8Path, args: &[String]) -> Result<String, AccessError> {
        let remote = self.remote_scratch(script.file_name().unwrap_or("script.php"));
        self.host.send_file(script, &remote)?;

        let php = self
            .instance
            .fact(facts::PHP)
            .unwrap_or(DEFAULT_PHP)
            .to_owned();
        let mut command = Command::new(php.as_str()).arg(&remote).args(args);
        let outcome = command.run(&mut self.host);
        self.remove_quietly(&remote);
        outcome?;

        if !command.is_success() {
            return Err(execution_error(&php, &mut command));
        }
        Ok(command.stdout_string())
    }

    fn localize_folder(&mut self, remote: &str, local: &Utf8Path) -> Result<(), AccessError> {
        let source = self.resolve_path(remote);
        files::create_dir_all(local)?;
        if self.host.supports_mirroring() {
            debug!(instance = %self.instance.name, source = %source, dest = %local, "mirroring folder");
            self.host.mirror(&source, local)?;
            return Ok(());
        }
        debug!(instance = %self.instance.name, source = %source, dest = %local, "fetching folder archive");
        self.fetch_archive(&source, local)
    }

    fn shell(&mut self) -> Option<&mut dyn ShellAccess> {
        Some(self)
    }
}

impl<H: Host> ShellAccess for ShellBackedAccess<H> {
    fn run_command(&mut self, command: &mut Command) -> Result<(), AccessError> {
        debug!(
            instance = %self.instance.name,
            transport = self.host.transport(),
            line = %command.full_command_line(),
            "running command"
        );
        command.run(&mut self.host)?;
        Ok(())
    }

    fn shell_exec(&mut self, commands: &[String], capture: bool) -> Result<String, AccessError> {
        let line = commands
            .iter()
            .map(String::as_str)
            .filter(|entry| !entry.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" && ");
        let mut command = Command::shell(line.as_str());
        self.run_command(&mut command)?;
        if !command.is_success() {
            return Err(execution_error(&line, &mut command));
        }
        let stdout = command.stdout_string();
        if capture {
            return Ok(stdout);
        }
        debug!(instance = %self.instance.name, output = %stdout.trim_end(), "discarded shell output");
        Ok(String::new())
    }

    fn has_executable(&mut self, name: &str) -> bool {
        self.probe(format!("command -v {}", quote(name)))
            .is_some_and(|command| command.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedHost;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        root: Utf8PathBuf,
        host: ScriptedHost,
        access: ShellBackedAccess<ScriptedHost>,
    }

    #[fixture]
    fn harness() -> Harness {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 temp path {}", path.display()));
        let host = ScriptedHost::new();
        let mut instance = Instance::new("shop", crate::instance::AccessType::Ssh);
        instance.webroot = Some(String::from("/var/www/shop"));
        let access = ShellBackedAccess::new(instance, host.clone(), root.clone());
        Harness {
            _tmp: tmp,
            root,
            host,
            access,
        }
    }

    #[rstest]
    #[case("index.php", "/var/www/shop/index.php")]
    #[case("./conf/app.ini", "/var/www/shop/conf/app.ini")]
    #[case("/etc/hosts", "/etc/hosts")]
    fn paths_resolve_against_the_web_root(harness: Harness, #[case] path: &str, #[case] expected: &str) {
        assert_eq!(harness.access.resolve_path(path), expected);
    }

    #[rstest]
    fn missing_file_is_a_negative_result(mut harness: Harness) {
        harness.host.on("test -e", 1, "", "");

        assert!(!harness.access.file_exists("index.php"));
        assert_eq!(harness.host.lines(), vec![String::from("test -e /var/www/shop/index.php")]);
    }

    #[rstest]
    fn unreadable_file_yields_empty_contents(mut harness: Harness) {
        harness.host.on("cat ", 1, "", "cat: permission denied");

        assert!(harness.access.file_get_contents("secret.txt").is_empty());
    }

    #[rstest]
    fn modification_date_parses_epoch_seconds(mut harness: Harness) {
        harness.host.on("stat ", 0, "1700000000\n", "");

        let date = harness.access.file_modification_date("index.php");

        assert_eq!(date.map(|value| value.timestamp()), Some(1_700_000_000));
    }

    #[rstest]
    fn run_php_returns_stdout_and_removes_the_copy(mut harness: Harness) {
        let script = harness.root.join("probe.php");
        std::fs::write(&script, "<?php echo 'ok';").unwrap_or_else(|err| panic!("write: {err}"));
        harness.access.instance_mut().set_fact(facts::PHP, "/usr/bin/php8.1");
        harness.host.on("/usr/bin/php8.1 ", 0, "ok", "");
        harness.host.on("rm -f", 0, "", "");

        let output = harness
            .access
            .run_php(&script, &[String::from("--flag=a b")])
            .unwrap_or_else(|err| panic!("run_php: {err}"));

        assert_eq!(output, "ok");
        let lines = harness.host.lines();
        let staged = lines
            .first()
            .and_then(|line| line.split_whitespace().nth(1))
            .map(|arg| arg.trim_matches('\'').to_owned())
            .unwrap_or_else(|| panic!("php line missing: {lines:?}"));
        assert!(staged.starts_with("/tmp/") && staged.ends_with("_probe.php"), "staged at {staged}");
        assert!(lines.first().is_some_and(|line| line.ends_with("--flag='a b'")), "lines: {lines:?}");
        assert_eq!(harness.host.count_matching("rm -f"), 1);
    }

    #[rstest]
    fn failing_script_surfaces_stderr_after_cleanup(mut harness: Harness) {
        let script = harness.root.join("broken.php");
        std::fs::write(&script, "<?php exit(3);").unwrap_or_else(|err| panic!("write: {err}"));
        harness.host.on("php ", 3, "", "PHP Fatal error: boom");
        harness.host.on("rm -f", 0, "", "");

        let Err(err) = harness.access.run_php(&script, &[]) else {
            panic!("non-zero exit should surface");
        };

        assert!(
            matches!(&err, AccessError::Execution { status: Some(3), stderr, .. } if stderr == "PHP Fatal error: boom"),
            "unexpected error: {err}"
        );
        assert_eq!(harness.host.count_matching("rm -f"), 1);
    }

    #[rstest]
    fn shell_exec_chains_commands_and_reports_failure(mut harness: Harness) {
        harness.host.on("cd /srv && git pull", 1, "", "fatal: not a git repository");

        let shell = harness.access.shell().unwrap_or_else(|| panic!("shell capability"));
        let Err(err) = shell.shell_exec(&[String::from("cd /srv"), String::from("git pull")], true) else {
            panic!("failing chain should surface");
        };

        assert!(err.to_string().contains("fatal: not a git repository"), "unexpected error: {err}");
    }

    #[rstest]
    fn has_executable_probes_with_command_v(mut harness: Harness) {
        harness.host.on("command -v git", 0, "/usr/bin/git\n", "");

        assert!(harness.access.has_executable("git"));
        assert!(!harness.access.has_executable("svn"));
    }

    #[rstest]
    fn localize_prefers_mirroring(mut harness: Harness) {
        harness.host.enable_mirroring();
        let dest = harness.root.join("mirror");

        harness
            .access
            .localize_folder("uploads", &dest)
            .unwrap_or_else(|err| panic!("localize: {err}"));

        assert_eq!(
            harness.host.mirrors(),
            vec![(String::from("/var/www/shop/uploads"), dest)]
        );
        assert!(harness.host.lines().is_empty());
    }

    #[rstest]
    fn failed_archive_is_cleaned_up_and_reported(mut harness: Harness) {
        harness.host.on("tar -czf", 2, "", "tar: uploads: Cannot open");
        harness.host.on("rm -f", 0, "", "");
        let dest = harness.root.join("copy");

        let Err(err) = harness.access.localize_folder("uploads", &dest) else {
            panic!("failed archive should surface");
        };

        assert!(matches!(err, AccessError::Execution { .. }), "unexpected error: {err}");
        assert_eq!(harness.host.count_matching("rm -f"), 1);
    }
}
