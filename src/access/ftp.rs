//! Access over FTP.
//!
//! FTP cannot execute anything, so [`Access::run_php`] uploads the script
//! into the web root and fetches it over HTTP from the instance's `weburl`,
//! passing arguments as `args[]` query parameters. This only works when the
//! uploaded path is served at that URL.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Access, AccessError, Capabilities, HttpFetcher, ReqwestFetcher};
use crate::host::{CommandRunner, FtpHost, HostError, ProcessCommandRunner, files};
use crate::instance::Instance;

const SCRIPT_ARGUMENT: &str = "args[]";

/// Access bound to an FTP account.
pub struct FtpAccess<R: CommandRunner = ProcessCommandRunner, F: HttpFetcher = ReqwestFetcher> {
    instance: Instance,
    ftp: FtpHost<R>,
    http: F,
    local_temp: Utf8PathBuf,
}

impl<R: CommandRunner, F: HttpFetcher> FtpAccess<R, F> {
    /// Binds `ftp` to `instance`, fetching scripts through `http`.
    #[must_use]
    pub const fn new(instance: Instance, ftp: FtpHost<R>, http: F, local_temp: Utf8PathBuf) -> Self {
        Self {
            instance,
            ftp,
            http,
            local_temp,
        }
    }

    /// Bound FTP host.
    #[must_use]
    pub const fn host(&self) -> &FtpHost<R> {
        &self.ftp
    }

    /// Releases the instance record.
    #[must_use]
    pub fn into_instance(self) -> Instance {
        self.instance
    }

    fn report<T>(&self, operation: &str, path: &str, outcome: Result<T, HostError>) -> Option<T> {
        outcome
            .inspect_err(|err| {
                warn!(instance = %self.instance.name, operation, path, error = %err, "ftp operation failed");
            })
            .ok()
    }

    fn localize_into(&self, remote: &str, local: &Utf8Path) -> Result<(), AccessError> {
        files::create_dir_all(local)?;
        for entry in self.ftp.list_detailed(remote)? {
            let child_remote = format!("{}/{}", remote.trim_end_matches('/'), entry.name);
            let child_local = local.join(&entry.name);
            if entry.is_symlink {
                warn!(instance = %self.instance.name, path = %child_remote, "skipping symbolic link");
            } else if entry.is_dir {
                self.localize_into(&child_remote, &child_local)?;
            } else {
                debug!(instance = %self.instance.name, path = %child_remote, "downloading");
                self.ftp.get(&child_remote, &child_local)?;
            }
        }
        Ok(())
    }
}

impl<R: CommandRunner, F: HttpFetcher> Access for FtpAccess<R, F> {
    fn transport(&self) -> &'static str {
        "ftp"
    }

    fn instance(&self) -> &Instance {
        &self.instance
    }

    fn instance_mut(&mut self) -> &mut Instance {
        &mut self.instance
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            scripting: self.instance.weburl.is_some(),
            file_transfer: true,
            shell: false,
            mirroring: false,
        }
    }

    fn file_exists(&mut self, path: &str) -> bool {
        let target = self.resolve_path(path);
        self.report("exists", &target, self.ftp.exists(&target))
            .unwrap_or(false)
    }

    fn file_get_contents(&mut self, path: &str) -> Vec<u8> {
        let target = self.resolve_path(path);
        self.report("read", &target, self.ftp.read(&target))
            .unwrap_or_default()
    }

    fn file_modification_date(&mut self, path: &str) -> Option<DateTime<Utc>> {
        let target = self.resolve_path(path);
        self.report("stat", &target, self.ftp.modification_time(&target))
            .flatten()
    }

    fn upload_file(&mut self, local: &Utf8Path, remote: &str) -> bool {
        let target = self.resolve_path(remote);
        self.report("put", &target, self.ftp.put(local, &target))
            .is_some()
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
        self.report("get", &source, self.ftp.get(&source, &local))
            .map(|()| local)
    }

    fn delete_file(&mut self, path: &str) -> bool {
        let target = self.resolve_path(path);
        self.report("delete", &target, self.ftp.delete(&target))
            .is_some()
    }

    fn move_file(&mut self, from: &str, to: &str) -> bool {
        let source = self.resolve_path(from);
        let target = self.resolve_path(to);
        self.report("rename", &source, self.ftp.rename(&source, &target))
            .is_some()
    }

    fn copy_file(&mut self, from: &str, to: &str) -> bool {
        let source = self.resolve_path(from);
        let target = self.resolve_path(to);
        let scratch = files::scratch_path(&self.local_temp, ".copy");
        let copied = self
            .ftp
            .get(&source, &scratch)
            .and_then(|()| self.ftp.put(&scratch, &target));
        if let Err(err) = files::remove(&scratch) {
            warn!(path = %scratch, error = %err, "failed to remove local copy");
        }
        self.report("copy", &source, copied).is_some()
    }

    fn create_directory(&mut self, path: &str) -> bool {
        let target = self.resolve_path(path);
        let absolute = target.starts_with('/');
        let mut built: Vec<&str> = Vec::new();
        for part in target.split('/').filter(|part| !part.is_empty()) {
            built.push(part);
            let joined = built.join("/");
            let prefix = if absolute { format!("/{joined}") } else { joined };
            if let Err(err) = self.ftp.mkdir(&prefix) {
                debug!(path = %prefix, error = %err, "mkdir refused, directory may already exist");
            }
        }
        self.report("mkdir", &target, self.ftp.list(&target))
            .is_some()
    }

    fn run_php(&mut self, script: &Utf8Path, args: &[String]) -> Result<String, AccessError> {
        let weburl = self
            .instance
            .weburl
            .clone()
            .ok_or_else(|| AccessError::MissingSetting {
                instance: self.instance.name.clone(),
                setting: "weburl",
            })?;
        let name = format!(
            "{}-{}",
            Uuid::new_v4().simple(),
            script.file_name().unwrap_or("script.php")
        );
        let remote = self.resolve_path(&name);
        self.ftp.put(script, &remote)?;

        let url = format!("{}/{name}", weburl.trim_end_matches('/'));
        let query: Vec<(String, String)> = args
            .iter()
            .map(|arg| (String::from(SCRIPT_ARGUMENT), arg.clone()))
            .collect();
        debug!(instance = %self.instance.name, url = %url, "fetching uploaded script");
        let response = self.http.get(&url, &query);
        if let Err(err) = self.ftp.delete(&remote) {
            warn!(instance = %self.instance.name, path = %remote, error = %err, "uploaded script left behind");
        }

        let reply = response?;
        if !reply.is_success() {
            return Err(AccessError::Http {
                url,
                status: Some(reply.status),
                message: reply.body,
            });
        }
        Ok(reply.body)
    }

    fn localize_folder(&mut self, remote: &str, local: &Utf8Path) -> Result<(), AccessError> {
        let source = self.resolve_path(remote);
        self.localize_into(&source, local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ProcessRequest;
    use crate::instance::AccessType;
    use crate::test_support::{ScriptedHttp, ScriptedRunner};
    use rstest::{fixture, rstest};

    struct Harness {
        runner: ScriptedRunner,
        http: ScriptedHttp,
        access: FtpAccess<ScriptedRunner, ScriptedHttp>,
    }

    #[fixture]
    fn harness() -> Harness {
        let runner = ScriptedRunner::new();
        let http = ScriptedHttp::new();
        let mut instance = Instance::new("brochure", AccessType::Ftp);
        instance.webroot = Some(String::from("/htdocs"));
        instance.weburl = Some(String::from("https://brochure.example.com/"));
        let ftp = FtpHost::with_runner("ftp.example.com", 21, "site", "secret", runner.clone());
        let access = FtpAccess::new(instance, ftp, http.clone(), Utf8PathBuf::from("/tmp"));
        Harness { runner, http, access }
    }

    fn commands(runner: &ScriptedRunner) -> Vec<String> {
        runner
            .invocations()
            .iter()
            .map(ProcessRequest::command_string)
            .collect()
    }

    #[rstest]
    fn scripting_requires_a_web_url(mut harness: Harness) {
        assert!(harness.access.capabilities().scripting);
        harness.access.instance_mut().weburl = None;

        assert!(!harness.access.capabilities().scripting);
        let Err(err) = harness.access.run_php(Utf8Path::new("/tmp/probe.php"), &[]) else {
            panic!("missing weburl should fail");
        };
        assert!(matches!(err, AccessError::MissingSetting { setting: "weburl", .. }));
        assert!(harness.runner.invocations().is_empty());
    }

    #[rstest]
    fn script_runs_over_http_with_query_arguments(mut harness: Harness) {
        harness.runner.push_success();
        harness.runner.push_success();
        harness.http.push_response(200, "8.1.0");

        let body = harness
            .access
            .run_php(Utf8Path::new("/tmp/probe.php"), &[String::from("a"), String::from("b c")])
            .unwrap_or_else(|err| panic!("run_php: {err}"));

        assert_eq!(body, "8.1.0");
        let requests = harness.http.requests();
        let request = requests.first().unwrap_or_else(|| panic!("no request"));
        assert!(request.url.starts_with("https://brochure.example.com/"), "url {}", request.url);
        assert!(request.url.ends_with("-probe.php"), "url {}", request.url);
        assert_eq!(
            request.query,
            vec![
                (String::from("args[]"), String::from("a")),
                (String::from("args[]"), String::from("b c")),
            ]
        );
    }

    #[rstest]
    fn non_success_response_still_removes_the_script(mut harness: Harness) {
        harness.runner.push_success();
        harness.runner.push_success();
        harness.http.push_response(500, "Internal Server Error");

        let Err(err) = harness.access.run_php(Utf8Path::new("/tmp/probe.php"), &[]) else {
            panic!("a 500 should surface");
        };

        assert!(matches!(err, AccessError::Http { status: Some(500), .. }), "unexpected error: {err}");
        let lines = commands(&harness.runner);
        assert_eq!(lines.len(), 2, "lines: {lines:?}");
        assert!(lines.first().is_some_and(|line| line.contains("--upload-file /tmp/probe.php")));
        assert!(lines.get(1).is_some_and(|line| line.contains("--quote DELE /htdocs/")), "lines: {lines:?}");
    }

    #[rstest]
    fn failed_listing_is_reported_for_exists(mut harness: Harness) {
        harness.runner.push_output(Some(78), "", "curl: (78) RETR response: 550");

        assert!(!harness.access.file_exists("missing.txt"));
        assert!(
            commands(&harness.runner)
                .first()
                .is_some_and(|line| line.ends_with("--head ftp://ftp.example.com:21/%2Fhtdocs/missing.txt"))
        );
    }

    #[rstest]
    fn create_directory_walks_each_level(mut harness: Harness) {
        harness.runner.push_failure(21);
        harness.runner.push_success();
        harness.runner.push_success();
        harness.runner.push_output(Some(0), "", "");

        assert!(harness.access.create_directory("cache/img"));

        let lines = commands(&harness.runner);
        assert!(lines.first().is_some_and(|line| line.contains("MKD /htdocs ")), "lines: {lines:?}");
        assert!(lines.get(1).is_some_and(|line| line.contains("MKD /htdocs/cache ")));
        assert!(lines.get(2).is_some_and(|line| line.contains("MKD /htdocs/cache/img ")));
    }

    #[rstest]
    fn localize_skips_symlinks_and_escapes_bracketed_names(mut harness: Harness) {
        let dir = tempfile::TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let local = Utf8PathBuf::from_path_buf(dir.path().join("mirror"))
            .unwrap_or_else(|path| panic!("non-utf8 tempdir {}", path.display()));
        harness.runner.push_output(
            Some(0),
            concat!(
                "-rw-r--r--    1 site  site       120 Jan 01 10:00 index.php\r\n",
                "lrwxrwxrwx    1 site  site        11 Jan 01 10:00 current -> releases/1\r\n",
                "drwxr-xr-x    2 site  site      4096 Jan 01 10:00 [2024]\r\n",
            ),
            "",
        );
        harness.runner.push_success();
        harness.runner.push_output(Some(0), "", "");

        harness
            .access
            .localize_folder("uploads", &local)
            .unwrap_or_else(|err| panic!("localize: {err}"));

        let lines = commands(&harness.runner);
        assert_eq!(lines.len(), 3, "lines: {lines:?}");
        assert!(lines.iter().all(|line| line.contains("--globoff")));
        assert!(lines.get(1).is_some_and(|line| line.ends_with("%2Fhtdocs/uploads/index.php")));
        assert!(
            lines.get(2).is_some_and(|line| line.ends_with("%2Fhtdocs/uploads/%5B2024%5D/")),
            "lines: {lines:?}"
        );
        assert!(!lines.iter().any(|line| line.contains("current")));
    }

    #[rstest]
    fn ftp_has_no_shell(mut harness: Harness) {
        assert!(harness.access.shell().is_none());
        assert!(!harness.access.capabilities().shell);
    }
}
