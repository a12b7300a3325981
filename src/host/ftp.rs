//! FTP transport.
//!
//! Every operation is one `curl` invocation: connect, authenticate, perform
//! the operation, disconnect. Credentials reach `curl` through a config
//! document on stdin so they never appear in the process list. FTP cannot
//! execute commands, so [`Host::execute`] always reports
//! [`HostError::Unsupported`].

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{CommandRunner, Host, HostError, ProcessCommandRunner, ProcessOutput, ProcessRequest};
use crate::command::Command;

/// Default FTP control port.
pub const DEFAULT_PORT: u16 = 21;

// curl exit codes meaning "the path is not there".
const CURL_ACCESS_DENIED: i32 = 9;
const CURL_RETR_FAILED: i32 = 19;
const CURL_REMOTE_FILE_NOT_FOUND: i32 = 78;

/// One entry of a detailed directory listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FtpEntry {
    /// Entry name without directory part.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Whether the entry is a symbolic link.
    pub is_symlink: bool,
    /// Size in bytes as reported by the server.
    pub size: u64,
}

/// Connection details plus the process runner used to reach the server.
#[derive(Clone)]
pub struct FtpHost<R: CommandRunner = ProcessCommandRunner> {
    host: String,
    port: u16,
    user: String,
    password: String,
    curl_bin: String,
    runner: R,
}

impl FtpHost {
    /// Creates an FTP host backed by the system `curl`.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::with_runner(host, port, user, password, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> FtpHost<R> {
    /// Creates an FTP host that runs `curl` through `runner`.
    #[must_use]
    pub fn with_runner(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        runner: R,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            curl_bin: String::from("curl"),
            runner,
        }
    }

    /// Overrides the `curl` binary.
    #[must_use]
    pub fn with_curl(mut self, curl_bin: impl Into<String>) -> Self {
        self.curl_bin = curl_bin.into();
        self
    }

    /// Names in `dir`, excluding `.` and `..`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Ftp`] when the listing fails.
    pub fn list(&self, dir: &str) -> Result<Vec<String>, HostError> {
        let output = self.run("list", dir, vec![String::from("--list-only"), self.dir_url(dir)])?;
        Ok(output
            .stdout_lossy()
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .map(ToOwned::to_owned)
            .collect())
    }

    /// Entries of `dir` parsed from the server's long listing.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Ftp`] when the listing fails.
    pub fn list_detailed(&self, dir: &str) -> Result<Vec<FtpEntry>, HostError> {
        let output = self.run("list", dir, vec![self.dir_url(dir)])?;
        Ok(output
            .stdout_lossy()
            .lines()
            .filter_map(parse_list_line)
            .collect())
    }

    /// Downloads `remote` into `local`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Ftp`] when the transfer fails.
    pub fn get(&self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        self.run(
            "get",
            remote,
            vec![String::from("--output"), local.to_string(), self.url(remote)],
        )
        .map(|_| ())
    }

    /// Reads `remote` into memory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Ftp`] when the transfer fails.
    pub fn read(&self, remote: &str) -> Result<Vec<u8>, HostError> {
        self.run("get", remote, vec![self.url(remote)])
            .map(|output| output.stdout)
    }

    /// Uploads `local` to `remote`, creating missing directories.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Ftp`] when the transfer fails.
    pub fn put(&self, local: &Utf8Path, remote: &str) -> Result<(), HostError> {
        self.run(
            "put",
            remote,
            vec![
                String::from("--ftp-create-dirs"),
                String::from("--upload-file"),
                local.to_string(),
                self.url(remote),
            ],
        )
        .map(|_| ())
    }

    /// Renames `from` to `to` on the server.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Ftp`] when the server refuses the rename.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), HostError> {
        self.quote_commands("rename", from, &[format!("RNFR {from}"), format!("RNTO {to}")])
    }

    /// Deletes one file.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Ftp`] when the server refuses the deletion.
    pub fn delete(&self, path: &str) -> Result<(), HostError> {
        self.quote_commands("delete", path, &[format!("DELE {path}")])
    }

    /// Creates one directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Ftp`] when the server refuses the creation.
    pub fn mkdir(&self, path: &str) -> Result<(), HostError> {
        self.quote_commands("mkdir", path, &[format!("MKD {path}")])
    }

    /// Whether `path` exists. "Not found" style failures are a negative
    /// answer, anything else is an error.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Ftp`] for failures other than "not found".
    pub fn exists(&self, path: &str) -> Result<bool, HostError> {
        match self.head(path) {
            Ok(_) => Ok(true),
            Err(HostError::Ftp {
                status: Some(CURL_ACCESS_DENIED | CURL_RETR_FAILED | CURL_REMOTE_FILE_NOT_FOUND),
                ..
            }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Last modification time reported by the server (`MDTM`).
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Ftp`] when the query fails.
    pub fn modification_time(&self, path: &str) -> Result<Option<DateTime<Utc>>, HostError> {
        let output = self.head(path)?;
        Ok(output
            .stdout_lossy()
            .lines()
            .find_map(|line| line.strip_prefix("Last-Modified:"))
            .and_then(|value| DateTime::parse_from_rfc2822(value.trim()).ok())
            .map(|stamp| stamp.with_timezone(&Utc)))
    }

    fn head(&self, path: &str) -> Result<ProcessOutput, HostError> {
        self.run("stat", path, vec![String::from("--head"), self.url(path)])
    }

    fn quote_commands(&self, operation: &str, path: &str, commands: &[String]) -> Result<(), HostError> {
        let mut args = Vec::with_capacity(commands.len() * 2 + 2);
        for command in commands {
            args.push(String::from("--quote"));
            args.push(command.clone());
        }
        args.push(String::from("--list-only"));
        args.push(self.dir_url("/"));
        self.run(operation, path, args).map(|_| ())
    }

    fn run(&self, operation: &str, path: &str, args: Vec<String>) -> Result<ProcessOutput, HostError> {
        let mut full_args = vec![
            String::from("--silent"),
            String::from("--show-error"),
            String::from("--globoff"),
            String::from("--config"),
            String::from("-"),
        ];
        full_args.extend(args);
        let request =
            ProcessRequest::new(self.curl_bin.as_str(), full_args).stdin(Some(self.credentials()));
        debug!(transport = "ftp", host = %self.host, operation, path, "ftp operation");
        let output = self.runner.run(&request)?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(HostError::Ftp {
                operation: operation.to_owned(),
                path: path.to_owned(),
                status: output.code,
                stderr: output.stderr_lossy(),
            })
        }
    }

    fn credentials(&self) -> Vec<u8> {
        let escape = |value: &str| value.replace('\\', "\\\\").replace('"', "\\\"");
        format!(
            "user = \"{}:{}\"\n",
            escape(&self.user),
            escape(&self.password)
        )
        .into_bytes()
    }

    fn url(&self, path: &str) -> String {
        format!("ftp://{}:{}/{}", self.host, self.port, encode_path(path))
    }

    fn dir_url(&self, dir: &str) -> String {
        let url = self.url(dir);
        if url.ends_with('/') { url } else { format!("{url}/") }
    }
}

impl<R: CommandRunner> std::fmt::Debug for FtpHost<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpHost")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("curl_bin", &self.curl_bin)
            .finish_non_exhaustive()
    }
}

impl<R: CommandRunner> Host for FtpHost<R> {
    fn transport(&self) -> &'static str {
        "ftp"
    }

    fn execute(&mut self, _command: &mut Command) -> Result<(), HostError> {
        Err(HostError::Unsupported {
            transport: "ftp",
            operation: "execute",
        })
    }

    fn send_file(&mut self, local: &Utf8Path, remote: &str) -> Result<(), HostError> {
        self.put(local, remote)
    }

    fn receive_file(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        self.get(remote, local)
    }
}

/// Percent-encodes a path for an FTP URL. Every byte outside the unreserved
/// set and `/` is escaped. Absolute paths keep their leading slash as `%2F`
/// so the server resolves them from the root rather than the login
/// directory.
fn encode_path(path: &str) -> String {
    let (prefix, rest) = path
        .strip_prefix('/')
        .map_or(("", path), |stripped| ("%2F", stripped));
    let mut encoded = String::from(prefix);
    for byte in rest.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~' | b'/') {
            encoded.push(char::from(byte));
        } else {
            encoded.extend(format!("%{byte:02X}").chars());
        }
    }
    encoded
}

fn skip_fields(line: &str, count: usize) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        rest = rest.get(end..)?.trim_start();
    }
    Some(rest)
}

/// Parses one Unix-style `LIST` line.
fn parse_list_line(raw: &str) -> Option<FtpEntry> {
    let line = raw.trim_end_matches('\r');
    let mut fields = line.split_whitespace();
    let mode = fields.next()?;
    let size = fields.nth(3)?.parse().unwrap_or(0);
    let mut name = skip_fields(line, 8)?;
    if mode.starts_with('l') {
        name = name.split(" -> ").next().unwrap_or(name);
    }
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(FtpEntry {
        name: name.to_owned(),
        is_dir: mode.starts_with('d'),
        is_symlink: mode.starts_with('l'),
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::{fixture, rstest};

    struct Harness {
        runner: ScriptedRunner,
        host: FtpHost<ScriptedRunner>,
    }

    #[fixture]
    fn harness() -> Harness {
        let runner = ScriptedRunner::new();
        let host = FtpHost::with_runner("ftp.example.com", 21, "site", "pa\"ss", runner.clone());
        Harness { runner, host }
    }

    fn last_request(runner: &ScriptedRunner) -> ProcessRequest {
        runner
            .invocations()
            .last()
            .cloned()
            .unwrap_or_else(|| panic!("expected an invocation"))
    }

    #[rstest]
    #[case("/var/www/index.php", "%2Fvar/www/index.php")]
    #[case("htdocs/my file.php", "htdocs/my%20file.php")]
    #[case("a#b?c%d", "a%23b%3Fc%25d")]
    #[case("uploads/[2024]/{a}.jpg", "uploads/%5B2024%5D/%7Ba%7D.jpg")]
    #[case("htdocs/café~1.php", "htdocs/caf%C3%A9~1.php")]
    fn paths_are_percent_encoded(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(encode_path(path), expected);
    }

    #[rstest]
    fn credentials_travel_on_stdin(harness: Harness) {
        harness.runner.push_output(Some(0), "a.php\r\nb.php\r\n.\r\n", "");

        let names = harness.host.list("htdocs").expect("list should succeed");

        assert_eq!(names, vec!["a.php", "b.php"]);
        let request = last_request(&harness.runner);
        assert_eq!(
            request.command_string(),
            "curl --silent --show-error --globoff --config - --list-only ftp://ftp.example.com:21/htdocs/"
        );
        assert_eq!(
            request.stdin.as_deref(),
            Some(b"user = \"site:pa\\\"ss\"\n".as_slice())
        );
        assert!(!request.command_string().contains("pa\"ss"));
    }

    #[rstest]
    fn detailed_listing_parses_unix_lines(harness: Harness) {
        harness.runner.push_output(
            Some(0),
            concat!(
                "drwxr-xr-x    2 site  site      4096 Jan 01 10:00 .\r\n",
                "drwxr-xr-x    2 site  site      4096 Jan 01 10:00 cache dir\r\n",
                "-rw-r--r--    1 site  site       120 Jan 01 10:00 index.php\r\n",
                "lrwxrwxrwx    1 site  site        11 Jan 01 10:00 current -> releases/1\r\n",
                "total 12\r\n",
            ),
            "",
        );

        let entries = harness
            .host
            .list_detailed("/var/www")
            .expect("listing should succeed");

        assert_eq!(
            entries,
            vec![
                FtpEntry {
                    name: String::from("cache dir"),
                    is_dir: true,
                    is_symlink: false,
                    size: 4096
                },
                FtpEntry {
                    name: String::from("index.php"),
                    is_dir: false,
                    is_symlink: false,
                    size: 120
                },
                FtpEntry {
                    name: String::from("current"),
                    is_dir: false,
                    is_symlink: true,
                    size: 11
                },
            ]
        );
    }

    #[rstest]
    fn rename_sends_rnfr_and_rnto(harness: Harness) {
        harness.runner.push_success();

        harness
            .host
            .rename("/www/a.php", "/www/b.php")
            .expect("rename should succeed");

        let request = last_request(&harness.runner);
        assert_eq!(
            request.command_string(),
            "curl --silent --show-error --globoff --config - --quote RNFR /www/a.php --quote RNTO /www/b.php --list-only ftp://ftp.example.com:21/%2F/"
        );
    }

    #[rstest]
    #[case(Some(78), Ok(false))]
    #[case(Some(0), Ok(true))]
    fn exists_maps_not_found_to_false(
        harness: Harness,
        #[case] status: Option<i32>,
        #[case] expected: Result<bool, ()>,
    ) {
        harness.runner.push_output(status, "", "");

        let answer = harness.host.exists("/www/missing.php").map_err(|_| ());

        assert_eq!(answer, expected);
    }

    #[rstest]
    fn exists_surfaces_connection_failures(harness: Harness) {
        harness.runner.push_output(Some(7), "", "Failed to connect");

        let err = harness
            .host
            .exists("/www/index.php")
            .expect_err("connection failure should surface");

        assert!(
            matches!(&err, HostError::Ftp { stderr, .. } if stderr == "Failed to connect"),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn modification_time_reads_last_modified(harness: Harness) {
        harness.runner.push_output(
            Some(0),
            "Last-Modified: Tue, 04 Jun 2024 10:15:00 GMT\r\nContent-Length: 120\r\n",
            "",
        );

        let stamp = harness
            .host
            .modification_time("/www/index.php")
            .expect("query should succeed")
            .expect("timestamp should parse");

        assert_eq!(stamp.to_rfc3339(), "2024-06-04T10:15:00+00:00");
    }

    #[rstest]
    fn execute_is_unsupported(mut harness: Harness) {
        let mut command = Command::new("ls");

        let err = command.run(&mut harness.host).expect_err("ftp cannot execute");

        assert!(
            matches!(
                err,
                crate::command::CommandError::Host(HostError::Unsupported { transport: "ftp", .. })
            ),
            "unexpected error: {err}"
        );
        assert!(harness.runner.invocations().is_empty());
    }
}
