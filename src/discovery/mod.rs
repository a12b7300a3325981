//! Environment discovery for one instance.
//!
//! [`Discovery`] answers questions about the target (OS family, distro,
//! interpreter, web root, backup ownership) by running probe lines through
//! the instance's shell capability. Every answer is stored in the instance's
//! facts map, and a fact already present there is returned without probing
//! again, so facts loaded from the instance store skip discovery entirely.
//!
//! The platform-specific parts come from an [`OsProfile`], chosen by trying
//! each built-in profile's availability probe in priority order.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::access::{Access, AccessError, ShellAccess};
use crate::command::quote;
use crate::instance::facts;
use crate::prompt::{PromptError, Prompter};

mod probe;
mod profiles;

pub use profiles::{ClearOs, Linux, MacOs, OsProfile, Virtualmin, Windows, default_profiles};

const DISTRO_PROBES: [&str; 5] = [
    ". /etc/os-release && echo \"$PRETTY_NAME\"",
    "lsb_release -ds",
    "cat /etc/redhat-release",
    "test -f /etc/debian_version && printf 'Debian %s\\n' \"$(cat /etc/debian_version)\"",
    "command -v sw_vers >/dev/null && echo \"$(sw_vers -productName) $(sw_vers -productVersion)\"",
];

const VCS_TOOLS: [&str; 2] = ["git", "svn"];
const TARBALL: &str = "tarball";

/// Errors raised while discovering facts.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Raised when every probe for a fact failed.
    #[error("could not detect {fact}: {stderr}")]
    Detection {
        /// Fact being detected.
        fact: &'static str,
        /// Stderr of the last failing probe, verbatim.
        stderr: String,
    },
    /// Raised when the instance's transport cannot run probes.
    #[error("{transport} access for {instance} cannot run discovery probes")]
    NoShell {
        /// Instance name.
        instance: String,
        /// Transport name.
        transport: &'static str,
    },
    /// Raised when no profile matches the target.
    #[error("no platform profile matches {instance}")]
    NoProfile {
        /// Instance name.
        instance: String,
    },
    /// Raised when a recorded profile name is unknown.
    #[error("unknown platform profile {name}")]
    UnknownProfile {
        /// Recorded name.
        name: String,
    },
    /// Raised when a probe cannot be executed.
    #[error(transparent)]
    Access(#[from] AccessError),
    /// Raised when the operator cannot be asked to choose.
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Operating system family.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OsFamily {
    /// Linux kernels.
    Linux,
    /// macOS.
    Darwin,
    /// Windows.
    Windows,
}

impl OsFamily {
    /// Name recorded in the `os` fact.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "LINUX",
            Self::Darwin => "DARWIN",
            Self::Windows => "WINDOWS",
        }
    }

    fn from_kernel(kernel: &str) -> Option<Self> {
        let upper = kernel.trim().to_ascii_uppercase();
        if upper.starts_with("LINUX") {
            Some(Self::Linux)
        } else if upper.starts_with("DARWIN") {
            Some(Self::Darwin)
        } else if ["MINGW", "MSYS", "CYGWIN", "WINDOWS"]
            .iter()
            .any(|prefix| upper.starts_with(prefix))
        {
            Some(Self::Windows)
        } else {
            None
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsFamily {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "LINUX" => Ok(Self::Linux),
            "DARWIN" => Ok(Self::Darwin),
            "WINDOWS" => Ok(Self::Windows),
            other => Err(format!("unknown OS family {other}")),
        }
    }
}

/// Owner, group and mode given to backup files.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupPerm {
    /// Owning user.
    pub user: String,
    /// Owning group.
    pub group: String,
    /// Permission bits.
    pub mode: u32,
}

impl BackupPerm {
    /// Creates a triple.
    #[must_use]
    pub fn new(user: impl Into<String>, group: impl Into<String>, mode: u32) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
            mode,
        }
    }

    /// Mode rendered as four octal digits.
    #[must_use]
    pub fn octal(&self) -> String {
        format!("{:04o}", self.mode)
    }

    fn parse_stat(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let user = fields.next()?;
        let group = fields.next()?;
        let mode = u32::from_str_radix(fields.next()?, 8).ok()?;
        Some(Self::new(user, group, mode))
    }
}

impl fmt::Display for BackupPerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.user, self.group, self.octal())
    }
}

/// One interpreter found on the target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhpCandidate {
    /// Absolute path of the binary.
    pub path: String,
    /// `PHP_VERSION_ID`, e.g. `80100`.
    pub version_id: u32,
}

impl PhpCandidate {
    /// Version as `major.minor.patch`.
    #[must_use]
    pub fn version(&self) -> String {
        let major = self.version_id.div_euclid(10_000);
        let minor = self.version_id.rem_euclid(10_000).div_euclid(100);
        let patch = self.version_id.rem_euclid(100);
        format!("{major}.{minor}.{patch}")
    }
}

impl fmt::Display for PhpCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path, self.version())
    }
}

/// Result of interpreter discovery.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PhpDiscovery {
    /// One version was found; the candidate has been cached.
    Found(PhpCandidate),
    /// Several distinct versions were found, newest first. The operator
    /// must choose; nothing is cached.
    Ambiguous(Vec<PhpCandidate>),
}

/// Probes one instance through its access.
pub struct Discovery<'a> {
    access: &'a mut dyn Access,
    profile: Box<dyn OsProfile>,
}

impl<'a> Discovery<'a> {
    /// Selects a profile for the instance behind `access`.
    ///
    /// A recorded `profile` fact is trusted; otherwise the built-in
    /// profiles are probed in priority order.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoShell`] for transports without command
    /// execution and [`DiscoveryError::NoProfile`] when nothing matches.
    pub fn new(access: &'a mut dyn Access) -> Result<Self, DiscoveryError> {
        Self::with_profiles(access, default_profiles())
    }

    /// Like [`Discovery::new`] but choosing among `profiles`.
    ///
    /// # Errors
    ///
    /// See [`Discovery::new`].
    pub fn with_profiles(
        access: &'a mut dyn Access,
        profiles: Vec<Box<dyn OsProfile>>,
    ) -> Result<Self, DiscoveryError> {
        if let Some(name) = access.instance().fact(facts::PROFILE).map(ToOwned::to_owned) {
            let profile = profiles
                .into_iter()
                .find(|candidate| candidate.name() == name)
                .ok_or(DiscoveryError::UnknownProfile { name })?;
            return Ok(Self { access, profile });
        }

        let instance = access.instance().name.clone();
        let transport = access.transport();
        let shell = access
            .shell()
            .ok_or_else(|| DiscoveryError::NoShell {
                instance: instance.clone(),
                transport,
            })?;
        let profile = profiles
            .into_iter()
            .find(|candidate| candidate.is_available(&mut *shell))
            .ok_or(DiscoveryError::NoProfile { instance })?;
        info!(profile = profile.name(), "selected platform profile");
        access.instance_mut().set_fact(facts::PROFILE, profile.name());
        Ok(Self { access, profile })
    }

    /// Name of the selected profile.
    #[must_use]
    pub fn profile_name(&self) -> &'static str {
        self.profile.name()
    }

    /// OS family.
    ///
    /// A profile whose family contradicts the kernel is replaced by the
    /// first available profile of the detected family.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Detection`] when the kernel cannot be
    /// identified.
    pub fn detect_os(&mut self) -> Result<OsFamily, DiscoveryError> {
        if let Some(cached) = self.cached(facts::OS) {
            return cached
                .parse()
                .map_err(|message| DiscoveryError::Detection {
                    fact: facts::OS,
                    stderr: message,
                });
        }
        let kernel = probe::first_answer(self.shell()?, facts::OS, &["uname -s", "echo \"$OS\""])?;
        let family = OsFamily::from_kernel(&kernel).ok_or_else(|| DiscoveryError::Detection {
            fact: facts::OS,
            stderr: format!("unrecognised kernel {kernel}"),
        })?;
        if family != self.profile.family() {
            self.reselect_profile(family)?;
        }
        self.store(facts::OS, family.as_str());
        Ok(family)
    }

    /// Distribution or product name.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Detection`] when no release marker exists.
    pub fn detect_distro(&mut self) -> Result<String, DiscoveryError> {
        self.detect_text(facts::DISTRO, &DISTRO_PROBES)
    }

    /// Machine architecture.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Detection`] when `uname -m` fails.
    pub fn detect_arch(&mut self) -> Result<String, DiscoveryError> {
        self.detect_text(facts::ARCH, &["uname -m"])
    }

    /// Login the transport runs as.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Detection`] when the login cannot be read.
    pub fn detect_user(&mut self) -> Result<String, DiscoveryError> {
        self.detect_text(facts::USER, &["id -un", "whoami"])
    }

    /// Home directory of that login.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Detection`] when it cannot be read.
    pub fn detect_home(&mut self) -> Result<String, DiscoveryError> {
        if self.cached(facts::HOME).is_none() {
            let user = self.detect_user()?;
            let lines = [
                String::from("echo \"$HOME\""),
                format!("getent passwd {} | cut -d: -f6", quote(&user)),
            ];
            let home = probe::first_answer(self.shell()?, facts::HOME, &lines)?;
            self.store(facts::HOME, &home);
        }
        self.cached_or_missing(facts::HOME)
    }

    /// Web root: the operator's setting, otherwise the first writable
    /// profile candidate.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Detection`] when no candidate is writable.
    pub fn detect_webroot(&mut self) -> Result<String, DiscoveryError> {
        if let Some(configured) = self.access.instance().webroot.clone() {
            return Ok(configured);
        }
        if let Some(cached) = self.cached(facts::WEBROOT) {
            return Ok(cached);
        }
        let user = self.detect_user()?;
        let home = self.detect_home()?;
        let candidates = self.profile.webroot_candidates(&user, &home);
        let shell = self.shell()?;
        let mut last_stderr = String::new();
        for candidate in &candidates {
            let quoted = quote(candidate);
            let output = probe::run(&mut *shell, &format!("test -d {quoted} && test -w {quoted}"))?;
            if output.succeeded() {
                let found = candidate.clone();
                self.store(facts::WEBROOT, &found);
                return Ok(found);
            }
            debug!(candidate = %candidate, "web root candidate not writable");
            if !output.stderr.trim().is_empty() {
                last_stderr = output.stderr;
            }
        }
        Err(DiscoveryError::Detection {
            fact: facts::WEBROOT,
            stderr: if last_stderr.is_empty() {
                format!("none of {} is a writable directory", candidates.join(", "))
            } else {
                last_stderr
            },
        })
    }

    /// Ownership and mode for backups.
    ///
    /// With `path`, the triple is read from that file and not cached.
    /// Without it, the profile default for the current login is cached.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Detection`] when `path` cannot be stat'ed.
    pub fn detect_backup_perm(&mut self, path: Option<&str>) -> Result<BackupPerm, DiscoveryError> {
        if let Some(target) = path {
            let resolved = self.access.resolve_path(target);
            let quoted = quote(&resolved);
            let line = probe::first_answer(
                self.shell()?,
                facts::BACKUP_PERM,
                &[format!("stat -c '%U %G %a' {quoted} 2>/dev/null || stat -f '%Su %Sg %Lp' {quoted}")],
            )?;
            return BackupPerm::parse_stat(&line).ok_or_else(|| DiscoveryError::Detection {
                fact: facts::BACKUP_PERM,
                stderr: format!("unexpected stat output {line}"),
            });
        }

        if let Some(cached) = self.cached_backup_perm() {
            return Ok(cached);
        }
        let user = self.detect_user()?;
        let group = probe::run(self.shell()?, "id -gn")?
            .answer()
            .map_or_else(|| user.clone(), ToOwned::to_owned);
        let perm = self.profile.backup_perm(&user, &group);
        self.store(facts::BACKUP_USER, &perm.user);
        self.store(facts::BACKUP_GROUP, &perm.group);
        self.store(facts::BACKUP_PERM, &perm.octal());
        Ok(perm)
    }

    /// `PHP_VERSION_ID` of the interpreter at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Detection`] when the binary does not run.
    pub fn detect_php_version(&mut self, path: &str) -> Result<u32, DiscoveryError> {
        if self.cached(facts::PHP).as_deref() == Some(path)
            && let Some(version) = self.cached(facts::PHP_VERSION).and_then(|text| text.parse().ok())
        {
            return Ok(version);
        }
        let line = format!("{} -r 'echo PHP_VERSION_ID;'", quote(path));
        let output = probe::run(self.shell()?, &line)?;
        output
            .answer()
            .and_then(|text| text.parse::<u32>().ok())
            .ok_or_else(|| DiscoveryError::Detection {
                fact: facts::PHP_VERSION,
                stderr: output.stderr.clone(),
            })
    }

    /// Interpreters on the target.
    ///
    /// Every profile probe is run and every candidate's version queried.
    /// One distinct version is cached and returned as found; several are
    /// returned newest first for the operator to choose from.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Detection`] when no working interpreter
    /// exists.
    pub fn detect_php(&mut self) -> Result<PhpDiscovery, DiscoveryError> {
        if let Some(path) = self.cached(facts::PHP) {
            let version_id = self.detect_php_version(&path)?;
            return Ok(PhpDiscovery::Found(PhpCandidate { path, version_id }));
        }

        let mut paths: Vec<String> = Vec::new();
        for line in self.profile.php_probes() {
            // Listing probes can exit non-zero after printing partial matches.
            let output = probe::run(self.shell()?, &line)?;
            for found in output.stdout.lines().map(str::trim) {
                if probe::is_php_binary(found) && !paths.iter().any(|known| known == found) {
                    paths.push(found.to_owned());
                }
            }
        }

        let mut candidates = Vec::new();
        let mut last_stderr = String::new();
        for path in paths {
            match self.detect_php_version(&path) {
                Ok(version_id) => candidates.push(PhpCandidate { path, version_id }),
                Err(DiscoveryError::Detection { stderr, .. }) => last_stderr = stderr,
                Err(other) => return Err(other),
            }
        }
        candidates.sort_by(|left, right| right.version_id.cmp(&left.version_id));

        let newest = candidates.first().map(|candidate| candidate.version_id);
        if candidates
            .iter()
            .any(|candidate| Some(candidate.version_id) != newest)
        {
            return Ok(PhpDiscovery::Ambiguous(candidates));
        }
        let Some(chosen) = candidates.into_iter().next() else {
            return Err(DiscoveryError::Detection {
                fact: facts::PHP,
                stderr: last_stderr,
            });
        };
        self.cache_php(&chosen);
        Ok(PhpDiscovery::Found(chosen))
    }

    /// Interpreter to use, asking the operator when several versions exist.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when detection or the prompt fails.
    pub fn select_php(&mut self, prompter: &mut dyn Prompter) -> Result<PhpCandidate, DiscoveryError> {
        match self.detect_php()? {
            PhpDiscovery::Found(candidate) => Ok(candidate),
            PhpDiscovery::Ambiguous(candidates) => {
                let labels: Vec<String> = candidates.iter().map(ToString::to_string).collect();
                let question = format!(
                    "Several PHP versions were found on {}. Which one should be used?",
                    self.access.instance().name
                );
                let index = prompter.select(&question, &labels)?;
                let chosen = candidates
                    .into_iter()
                    .nth(index)
                    .ok_or(DiscoveryError::Prompt(PromptError::Cancelled { question }))?;
                self.cache_php(&chosen);
                Ok(chosen)
            }
        }
    }

    /// Version-control tools on the target; `tarball` is always present.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoShell`] for transports without a shell.
    pub fn detect_vcs(&mut self) -> Result<Vec<String>, DiscoveryError> {
        if let Some(cached) = self.cached(facts::VCS) {
            return Ok(cached.split(',').map(ToOwned::to_owned).collect());
        }
        let shell = self.shell()?;
        let mut tools: Vec<String> = VCS_TOOLS
            .iter()
            .filter(|tool| shell.has_executable(tool))
            .map(|tool| (*tool).to_owned())
            .collect();
        tools.push(String::from(TARBALL));
        self.store(facts::VCS, &tools.join(","));
        Ok(tools)
    }

    /// Runs every detection, asking the operator where needed.
    ///
    /// # Errors
    ///
    /// Returns the first [`DiscoveryError`] raised.
    pub fn detect_all(&mut self, prompter: &mut dyn Prompter) -> Result<(), DiscoveryError> {
        self.detect_os()?;
        self.detect_distro()?;
        self.detect_arch()?;
        self.detect_user()?;
        self.detect_home()?;
        self.detect_webroot()?;
        self.detect_backup_perm(None)?;
        self.select_php(prompter)?;
        self.detect_vcs()?;
        Ok(())
    }

    /// Replaces a profile whose family contradicts the detected kernel.
    fn reselect_profile(&mut self, family: OsFamily) -> Result<(), DiscoveryError> {
        warn!(
            instance = %self.access.instance().name,
            profile = self.profile.name(),
            detected = family.as_str(),
            "platform profile does not match the target kernel"
        );
        let instance = self.access.instance().name.clone();
        let shell = self.shell()?;
        let profile = default_profiles()
            .into_iter()
            .filter(|candidate| candidate.family() == family)
            .find(|candidate| candidate.is_available(&mut *shell))
            .ok_or(DiscoveryError::NoProfile { instance })?;
        self.store(facts::PROFILE, profile.name());
        self.profile = profile;
        Ok(())
    }

    fn shell(&mut self) -> Result<&mut dyn ShellAccess, DiscoveryError> {
        let instance = self.access.instance().name.clone();
        let transport = self.access.transport();
        self.access
            .shell()
            .ok_or(DiscoveryError::NoShell { instance, transport })
    }

    fn cached(&self, key: &str) -> Option<String> {
        self.access.instance().fact(key).map(ToOwned::to_owned)
    }

    fn cached_or_missing(&self, key: &'static str) -> Result<String, DiscoveryError> {
        self.cached(key).ok_or_else(|| DiscoveryError::Detection {
            fact: key,
            stderr: String::new(),
        })
    }

    fn cached_backup_perm(&self) -> Option<BackupPerm> {
        let user = self.cached(facts::BACKUP_USER)?;
        let group = self.cached(facts::BACKUP_GROUP)?;
        let mode = u32::from_str_radix(&self.cached(facts::BACKUP_PERM)?, 8).ok()?;
        Some(BackupPerm::new(user, group, mode))
    }

    fn store(&mut self, key: &'static str, value: &str) {
        info!(
            instance = %self.access.instance().name,
            fact = key,
            value,
            "cached fact"
        );
        self.access.instance_mut().set_fact(key, value);
    }

    fn cache_php(&mut self, candidate: &PhpCandidate) {
        self.store(facts::PHP, &candidate.path);
        self.store(facts::PHP_VERSION, &candidate.version_id.to_string());
    }

    fn detect_text(&mut self, fact: &'static str, lines: &[&str]) -> Result<String, DiscoveryError> {
        if let Some(cached) = self.cached(fact) {
            return Ok(cached);
        }
        let answer = probe::first_answer(self.shell()?, fact, lines)?;
        self.store(fact, &answer);
        Ok(answer)
    }
}

impl fmt::Debug for Discovery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Discovery")
            .field("instance", &self.access.instance().name)
            .field("profile", &self.profile.name())
            .finish()
    }
}
