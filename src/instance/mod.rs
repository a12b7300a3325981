//! Managed installations and their persisted configuration facts.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod store;

pub use store::{InstanceStore, StoreError};

/// Keys of the facts Discovery records on an instance.
pub mod facts {
    /// Operating system family (`LINUX`, `DARWIN`, `WINDOWS`).
    pub const OS: &str = "os";
    /// Distribution name.
    pub const DISTRO: &str = "distro";
    /// Machine architecture.
    pub const ARCH: &str = "arch";
    /// Login the transport runs as.
    pub const USER: &str = "user";
    /// Home directory of that login.
    pub const HOME: &str = "home";
    /// Web root.
    pub const WEBROOT: &str = "webroot";
    /// Absolute path of the PHP interpreter.
    pub const PHP: &str = "php";
    /// `PHP_VERSION_ID` of that interpreter.
    pub const PHP_VERSION: &str = "php_version";
    /// Owner given to backup files.
    pub const BACKUP_USER: &str = "backup_user";
    /// Group given to backup files.
    pub const BACKUP_GROUP: &str = "backup_group";
    /// Octal permission bits given to backup files.
    pub const BACKUP_PERM: &str = "backup_perm";
    /// Available version-control tools, comma separated.
    pub const VCS: &str = "vcs";
    /// OS profile selected by Discovery.
    pub const PROFILE: &str = "profile";
}

/// Transport an instance is reached through.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessType {
    /// Processes on this machine.
    #[default]
    Local,
    /// SSH with key-based login.
    Ssh,
    /// SSH where key login is known not to work.
    #[serde(rename = "ssh-nokey")]
    SshNoKey,
    /// FTP only.
    Ftp,
}

impl AccessType {
    /// Persisted name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ssh => "ssh",
            Self::SshNoKey => "ssh-nokey",
            Self::Ftp => "ftp",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "local" => Ok(Self::Local),
            "ssh" => Ok(Self::Ssh),
            "ssh-nokey" => Ok(Self::SshNoKey),
            "ftp" => Ok(Self::Ftp),
            other => Err(format!("unknown access type {other}")),
        }
    }
}

fn default_tempdir() -> String {
    String::from("/tmp")
}

/// One managed installation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Instance {
    /// Unique name; the key in the instance store.
    #[serde(default)]
    pub name: String,
    /// Transport used to reach the installation.
    pub access_type: AccessType,
    /// Remote host; unused for local instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Remote port; the transport default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Remote login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// FTP password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Web root configured by the operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webroot: Option<String>,
    /// Public URL of the web root, used to run scripts over FTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weburl: Option<String>,
    /// Remote scratch directory.
    #[serde(default = "default_tempdir")]
    pub tempdir: String,
    /// Facts recorded by Discovery or set by the operator.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub facts: BTreeMap<String, String>,
}

impl Instance {
    /// Creates an instance with no facts.
    #[must_use]
    pub fn new(name: impl Into<String>, access_type: AccessType) -> Self {
        Self {
            name: name.into(),
            access_type,
            tempdir: default_tempdir(),
            ..Self::default()
        }
    }

    /// Recorded value of `key`.
    #[must_use]
    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    /// Records `value` for `key`.
    pub fn set_fact(&mut self, key: &str, value: impl Into<String>) {
        self.facts.insert(key.to_owned(), value.into());
    }

    /// Operator web root, falling back to the discovered one.
    #[must_use]
    pub fn effective_webroot(&self) -> Option<&str> {
        self.webroot.as_deref().or_else(|| self.fact(facts::WEBROOT))
    }

    /// Remote login, falling back to the current local user for local
    /// instances.
    #[must_use]
    pub fn login(&self) -> String {
        self.user.clone().unwrap_or_else(|| {
            std::env::var("USER").unwrap_or_else(|_| String::from("root"))
        })
    }
}
