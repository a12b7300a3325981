//! Per-platform answers to the questions Discovery asks.
//!
//! Profiles are tried in [`default_profiles`] order and the first whose
//! [`OsProfile::is_available`] probe succeeds is used, so control-panel
//! specialisations sit ahead of the plain Linux profile they extend.

use crate::access::ShellAccess;

use super::probe;
use super::{BackupPerm, OsFamily};

const LINUX_PHP_GLOBS: [&str; 2] = ["/usr/bin/php*", "/usr/local/bin/php*"];

/// Platform-specific discovery knowledge.
pub trait OsProfile {
    /// Name recorded in the `profile` fact.
    fn name(&self) -> &'static str;

    /// Operating system family.
    fn family(&self) -> OsFamily;

    /// Whether the target matches this profile.
    fn is_available(&self, shell: &mut dyn ShellAccess) -> bool;

    /// Web root candidates in preference order.
    fn webroot_candidates(&self, user: &str, home: &str) -> Vec<String>;

    /// Ownership and mode given to backup files.
    fn backup_perm(&self, user: &str, group: &str) -> BackupPerm;

    /// Shell lines printing candidate interpreter paths, one per line.
    fn php_probes(&self) -> Vec<String>;
}

/// Every built-in profile, most specific first.
#[must_use]
pub fn default_profiles() -> Vec<Box<dyn OsProfile>> {
    vec![
        Box::new(Virtualmin),
        Box::new(ClearOs),
        Box::new(Linux),
        Box::new(MacOs),
        Box::new(Windows),
    ]
}

/// Shell line printing every executable matched by `globs`, one per line.
///
/// Unmatched globs print nothing and the line always exits zero.
pub(crate) fn list_executables(globs: &[&str]) -> String {
    format!(
        "for f in {}; do [ -x \"$f\" ] && echo \"$f\"; done; true",
        globs.join(" ")
    )
}

fn kernel_is(shell: &mut dyn ShellAccess, expected: &[&str]) -> bool {
    probe::run(shell, "uname -s")
        .ok()
        .and_then(|output| output.answer().map(ToOwned::to_owned))
        .is_some_and(|kernel| expected.iter().any(|prefix| kernel.starts_with(prefix)))
}

/// Generic Linux.
#[derive(Clone, Copy, Debug, Default)]
pub struct Linux;

impl OsProfile for Linux {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn family(&self) -> OsFamily {
        OsFamily::Linux
    }

    fn is_available(&self, shell: &mut dyn ShellAccess) -> bool {
        kernel_is(shell, &["Linux"])
    }

    fn webroot_candidates(&self, _user: &str, home: &str) -> Vec<String> {
        vec![
            String::from("/var/www/html"),
            String::from("/var/www"),
            String::from("/srv/www"),
            format!("{home}/public_html"),
            format!("{home}/www"),
        ]
    }

    fn backup_perm(&self, user: &str, group: &str) -> BackupPerm {
        BackupPerm::new(user, group, 0o644)
    }

    fn php_probes(&self) -> Vec<String> {
        vec![String::from("command -v php"), list_executables(&LINUX_PHP_GLOBS)]
    }
}

/// Linux managed by the Virtualmin control panel.
#[derive(Clone, Copy, Debug, Default)]
pub struct Virtualmin;

impl OsProfile for Virtualmin {
    fn name(&self) -> &'static str {
        "virtualmin"
    }

    fn family(&self) -> OsFamily {
        OsFamily::Linux
    }

    fn is_available(&self, shell: &mut dyn ShellAccess) -> bool {
        probe::succeeds(shell, "test -d /etc/webmin/virtual-server")
    }

    fn webroot_candidates(&self, user: &str, home: &str) -> Vec<String> {
        let mut candidates = vec![format!("{home}/public_html")];
        candidates.extend(
            Linux
                .webroot_candidates(user, home)
                .into_iter()
                .filter(|candidate| !candidate.ends_with("/public_html")),
        );
        candidates
    }

    fn backup_perm(&self, user: &str, _group: &str) -> BackupPerm {
        BackupPerm::new(user, user, 0o640)
    }

    fn php_probes(&self) -> Vec<String> {
        let mut probes = Linux.php_probes();
        probes.push(list_executables(&["/opt/remi/php*/root/usr/bin/php"]));
        probes
    }
}

/// ClearOS gateway distribution.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClearOs;

impl OsProfile for ClearOs {
    fn name(&self) -> &'static str {
        "clearos"
    }

    fn family(&self) -> OsFamily {
        OsFamily::Linux
    }

    fn is_available(&self, shell: &mut dyn ShellAccess) -> bool {
        probe::succeeds(shell, "test -f /etc/clearos-release")
    }

    fn webroot_candidates(&self, user: &str, home: &str) -> Vec<String> {
        let mut candidates = vec![String::from("/var/www/virtual")];
        candidates.extend(Linux.webroot_candidates(user, home));
        candidates
    }

    fn backup_perm(&self, _user: &str, _group: &str) -> BackupPerm {
        BackupPerm::new("root", "root", 0o600)
    }

    fn php_probes(&self) -> Vec<String> {
        let mut probes = Linux.php_probes();
        probes.push(list_executables(&["/usr/clearos/sandbox/usr/bin/php"]));
        probes
    }
}

/// macOS.
#[derive(Clone, Copy, Debug, Default)]
pub struct MacOs;

impl OsProfile for MacOs {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn family(&self) -> OsFamily {
        OsFamily::Darwin
    }

    fn is_available(&self, shell: &mut dyn ShellAccess) -> bool {
        kernel_is(shell, &["Darwin"])
    }

    fn webroot_candidates(&self, _user: &str, home: &str) -> Vec<String> {
        vec![
            String::from("/Library/WebServer/Documents"),
            format!("{home}/Sites"),
        ]
    }

    fn backup_perm(&self, user: &str, _group: &str) -> BackupPerm {
        BackupPerm::new(user, "staff", 0o644)
    }

    fn php_probes(&self) -> Vec<String> {
        vec![
            String::from("command -v php"),
            list_executables(&[
                "/opt/homebrew/bin/php",
                "/usr/local/bin/php",
                "/opt/homebrew/opt/php@*/bin/php",
            ]),
        ]
    }
}

/// Windows reached through a POSIX shell layer (MSYS, Cygwin).
#[derive(Clone, Copy, Debug, Default)]
pub struct Windows;

impl OsProfile for Windows {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn family(&self) -> OsFamily {
        OsFamily::Windows
    }

    fn is_available(&self, shell: &mut dyn ShellAccess) -> bool {
        kernel_is(shell, &["MINGW", "MSYS", "CYGWIN", "Windows_NT"])
    }

    fn webroot_candidates(&self, _user: &str, _home: &str) -> Vec<String> {
        vec![
            String::from("/c/inetpub/wwwroot"),
            String::from("/c/xampp/htdocs"),
        ]
    }

    fn backup_perm(&self, user: &str, _group: &str) -> BackupPerm {
        BackupPerm::new(user, "Administrators", 0o666)
    }

    fn php_probes(&self) -> Vec<String> {
        vec![
            String::from("command -v php"),
            list_executables(&["/c/xampp/php/php.exe", "/c/php/php.exe"]),
        ]
    }
}
