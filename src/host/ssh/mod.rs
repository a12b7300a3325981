//! SSH transport.
//!
//! [`SshHost`] binds one `user@host:port` target and delegates execution to
//! an [`SshAdapter`]. Two adapters exist: [`SubprocessAdapter`] drives the
//! system `ssh` client and [`SessionAdapter`] keeps a library session open.
//! The preferred adapter is chosen once from [`AdapterPreference`]; when it
//! fails to initialise the transport downgrades to the subprocess adapter.
//!
//! Connections are made through an [`SshContext`], which owns the key
//! verification cache and the session cache for the lifetime of the process.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{CommandRunner, Host, HostError, ProcessCommandRunner};
use crate::command::Command;
use crate::prompt::Prompter;

mod keys;
mod session;
mod subprocess;

pub use keys::{KeySetup, KeySetupOutcome, KeyState};
pub use session::SessionAdapter;
pub use subprocess::SubprocessAdapter;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// One SSH destination.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SshTarget {
    /// Remote login.
    pub user: String,
    /// Remote host name or address.
    pub host: String,
    /// Remote port.
    pub port: u16,
}

impl SshTarget {
    /// Creates a target.
    #[must_use]
    pub fn new(user: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port,
        }
    }

    /// Cache key in `user@host:port` form.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    /// Destination in `user@host` form.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Adapter requested by configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AdapterPreference {
    /// Session adapter unless the local platform is known to be unreliable.
    #[default]
    Auto,
    /// Always try the session adapter first.
    Session,
    /// Always use the system client.
    Subprocess,
}

impl AdapterPreference {
    /// Resolves the preference to the adapter tried first.
    #[must_use]
    pub const fn resolve(self) -> AdapterKind {
        match self {
            Self::Auto if cfg!(target_os = "macos") => AdapterKind::Subprocess,
            Self::Auto | Self::Session => AdapterKind::Session,
            Self::Subprocess => AdapterKind::Subprocess,
        }
    }
}

impl FromStr for AdapterPreference {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "session" => Ok(Self::Session),
            "subprocess" => Ok(Self::Subprocess),
            other => Err(format!(
                "unknown ssh adapter {other}; expected auto, session or subprocess"
            )),
        }
    }
}

/// Concrete adapter implementation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdapterKind {
    /// Library-driven persistent session.
    Session,
    /// System `ssh` client per invocation.
    Subprocess,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Session => "session",
            Self::Subprocess => "subprocess",
        })
    }
}

/// Settings shared by every SSH connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// System SSH client binary.
    pub ssh_bin: String,
    /// Key-provisioning helper binary.
    pub ssh_copy_id_bin: String,
    /// Sync tool used for transfers and mirroring.
    pub rsync_bin: String,
    /// Copy tool used when the sync tool is unavailable.
    pub scp_bin: String,
    /// Private key used for authentication.
    pub identity_file: Option<Utf8PathBuf>,
    /// Client configuration file.
    pub config_file: Option<Utf8PathBuf>,
    /// Wall-clock limit per subprocess invocation.
    pub timeout: Duration,
    /// Adapter requested by configuration.
    pub adapter: AdapterPreference,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            ssh_copy_id_bin: String::from("ssh-copy-id"),
            rsync_bin: String::from("rsync"),
            scp_bin: String::from("scp"),
            identity_file: None,
            config_file: None,
            timeout: Duration::from_secs(300),
            adapter: AdapterPreference::Auto,
        }
    }
}

impl SshSettings {
    /// Client options shared by `ssh`, `scp` and the sync tool's remote shell.
    ///
    /// `port_flag` differs between `ssh` (`-p`) and `scp` (`-P`).
    #[must_use]
    pub fn client_options(&self, target: &SshTarget, port_flag: &str, batch: bool) -> Vec<String> {
        let mut options = vec![port_flag.to_owned(), target.port.to_string()];
        if let Some(identity) = &self.identity_file {
            options.push(String::from("-i"));
            options.push(identity.to_string());
        }
        if let Some(config) = &self.config_file {
            options.push(String::from("-F"));
            options.push(config.to_string());
        }
        if batch {
            options.push(String::from("-o"));
            options.push(String::from("BatchMode=yes"));
        }
        options
    }
}

/// Process-wide record of key verification per target.
#[derive(Clone, Debug, Default)]
pub struct KeyCache {
    states: Arc<Mutex<HashMap<String, KeyState>>>,
}

impl KeyCache {
    /// Cached state for `target`, if it was checked before.
    #[must_use]
    pub fn get(&self, target: &SshTarget) -> Option<KeyState> {
        self.states.lock().get(&target.key()).copied()
    }

    /// Records the state reached for `target`.
    pub fn insert(&self, target: &SshTarget, state: KeyState) {
        self.states.lock().insert(target.key(), state);
    }
}

/// Process-wide cache of authenticated library sessions per target.
#[derive(Clone, Default)]
pub struct SessionCache {
    sessions: Arc<Mutex<HashMap<String, ssh2::Session>>>,
}

impl SessionCache {
    /// Session previously opened for `target`.
    #[must_use]
    pub fn get(&self, target: &SshTarget) -> Option<ssh2::Session> {
        self.sessions.lock().get(&target.key()).cloned()
    }

    /// Stores the session opened for `target`.
    pub fn insert(&self, target: &SshTarget, session: ssh2::Session) {
        self.sessions.lock().insert(target.key(), session);
    }

    /// Number of cached sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("sessions", &self.len())
            .finish()
    }
}

/// One way of talking SSH to a target.
pub trait SshAdapter {
    /// Which implementation this is.
    fn kind(&self) -> AdapterKind;

    /// Executes `command` on the target and records its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the command cannot be executed.
    fn execute(&mut self, command: &mut Command) -> Result<(), HostError>;

    /// Uploads a local file.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the transfer fails.
    fn send_file(&mut self, local: &Utf8Path, remote: &str) -> Result<(), HostError>;

    /// Downloads a remote file.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the transfer fails.
    fn receive_file(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError>;

    /// Whether [`SshAdapter::mirror`] is available.
    fn supports_mirroring(&self) -> bool {
        false
    }

    /// Mirrors a remote directory locally.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Unsupported`] unless overridden.
    fn mirror(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        let _ = (remote, local);
        Err(HostError::Unsupported {
            transport: "ssh",
            operation: "mirror",
        })
    }
}

/// Builds the preferred adapter, downgrading to the subprocess adapter when
/// the preferred one fails to initialise.
///
/// # Errors
///
/// Returns the subprocess adapter's error when no adapter can be built.
pub fn select_adapter<F>(preferred: AdapterKind, mut build: F) -> Result<Box<dyn SshAdapter>, HostError>
where
    F: FnMut(AdapterKind) -> Result<Box<dyn SshAdapter>, HostError>,
{
    match build(preferred) {
        Ok(adapter) => Ok(adapter),
        Err(err) if preferred != AdapterKind::Subprocess => {
            warn!(
                preferred = %preferred,
                fallback = %AdapterKind::Subprocess,
                error = %err,
                "ssh adapter unavailable; downgrading"
            );
            build(AdapterKind::Subprocess)
        }
        Err(err) => Err(err),
    }
}

/// Connection factory owning the caches shared by every SSH host.
#[derive(Clone, Debug)]
pub struct SshContext {
    settings: SshSettings,
    keys: KeyCache,
    sessions: SessionCache,
    locate: fn(&str) -> bool,
}

impl Default for SshContext {
    fn default() -> Self {
        Self::new(SshSettings::default())
    }
}

impl SshContext {
    /// Creates a factory with empty caches.
    #[must_use]
    pub fn new(settings: SshSettings) -> Self {
        Self {
            settings,
            keys: KeyCache::default(),
            sessions: SessionCache::default(),
            locate: keys::tool_on_path,
        }
    }

    /// Replaces the lookup used to find prerequisite tools.
    #[must_use]
    pub fn with_tool_lookup(mut self, locate: fn(&str) -> bool) -> Self {
        self.locate = locate;
        self
    }

    /// Fails unless the key-provisioning helper is installed.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::MissingPrerequisite`] naming the helper.
    pub fn require_key_helper(&self) -> Result<(), HostError> {
        let tool = &self.settings.ssh_copy_id_bin;
        if (self.locate)(tool) {
            Ok(())
        } else {
            Err(HostError::MissingPrerequisite { tool: tool.clone() })
        }
    }

    /// Shared settings.
    #[must_use]
    pub const fn settings(&self) -> &SshSettings {
        &self.settings
    }

    /// Key verification cache.
    #[must_use]
    pub const fn keys(&self) -> &KeyCache {
        &self.keys
    }

    /// Session cache.
    #[must_use]
    pub const fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Builds an adapter of `kind` for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the adapter cannot initialise.
    pub fn build_adapter<R>(
        &self,
        kind: AdapterKind,
        target: &SshTarget,
        batch: bool,
        runner: R,
    ) -> Result<Box<dyn SshAdapter>, HostError>
    where
        R: CommandRunner + 'static,
    {
        match kind {
            AdapterKind::Session => Ok(Box::new(SessionAdapter::connect(
                target,
                &self.settings,
                &self.sessions,
            )?)),
            AdapterKind::Subprocess => {
                let rsync_available = which::which(&self.settings.rsync_bin).is_ok();
                Ok(Box::new(SubprocessAdapter::new(
                    target.clone(),
                    self.settings.clone(),
                    runner,
                    batch,
                    rsync_available,
                )))
            }
        }
    }
}

/// Remote target reached over SSH.
pub struct SshHost {
    target: SshTarget,
    adapter: Box<dyn SshAdapter>,
    key_state: KeyState,
}

impl SshHost {
    /// Connects to `target`, running key setup first when `native_key` is set.
    ///
    /// Without native key support the target is reached through the system
    /// client, which may ask for a password on the terminal.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when prerequisites are missing, key setup fails
    /// or no adapter can be built.
    pub fn connect(
        context: &SshContext,
        target: SshTarget,
        native_key: bool,
        prompter: &mut dyn Prompter,
    ) -> Result<Self, HostError> {
        Self::connect_with(context, target, native_key, ProcessCommandRunner, prompter)
    }

    /// Connects through an explicit process runner.
    ///
    /// # Errors
    ///
    /// See [`SshHost::connect`].
    pub fn connect_with<R>(
        context: &SshContext,
        target: SshTarget,
        native_key: bool,
        runner: R,
        prompter: &mut dyn Prompter,
    ) -> Result<Self, HostError>
    where
        R: CommandRunner + Clone + 'static,
    {
        context.require_key_helper()?;
        let key_state = if native_key {
            KeySetup::new(context.settings(), context.keys(), &runner, prompter)
                .with_tool_lookup(context.locate)
                .ensure(&target)?
        } else {
            KeyState::Downgraded
        };
        let verified = key_state == KeyState::KeyVerified;
        let preferred = if verified {
            context.settings().adapter.resolve()
        } else {
            AdapterKind::Subprocess
        };
        let adapter = select_adapter(preferred, |kind| {
            context.build_adapter(kind, &target, verified, runner.clone())
        })?;
        info!(target = %target, adapter = %adapter.kind(), "ssh transport ready");
        Ok(Self::from_adapter(target, adapter, key_state))
    }

    /// Wraps an already built adapter.
    #[must_use]
    pub fn from_adapter(target: SshTarget, adapter: Box<dyn SshAdapter>, key_state: KeyState) -> Self {
        Self {
            target,
            adapter,
            key_state,
        }
    }

    /// Bound target.
    #[must_use]
    pub const fn target(&self) -> &SshTarget {
        &self.target
    }

    /// Adapter in use.
    #[must_use]
    pub fn adapter_kind(&self) -> AdapterKind {
        self.adapter.kind()
    }

    /// Key state reached while connecting.
    #[must_use]
    pub const fn key_state(&self) -> KeyState {
        self.key_state
    }

    /// Outcome of key setup relevant to the persisted access type.
    #[must_use]
    pub fn key_outcome(&self) -> KeySetupOutcome {
        KeySetupOutcome::from(self.key_state)
    }
}

impl fmt::Debug for SshHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshHost")
            .field("target", &self.target)
            .field("adapter", &self.adapter.kind())
            .field("key_state", &self.key_state)
            .finish()
    }
}

impl Host for SshHost {
    fn transport(&self) -> &'static str {
        "ssh"
    }

    fn execute(&mut self, command: &mut Command) -> Result<(), HostError> {
        self.adapter.execute(command)
    }

    fn send_file(&mut self, local: &Utf8Path, remote: &str) -> Result<(), HostError> {
        self.adapter.send_file(local, remote)
    }

    fn receive_file(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        self.adapter.receive_file(remote, local)
    }

    fn supports_mirroring(&self) -> bool {
        self.adapter.supports_mirroring()
    }

    fn mirror(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        self.adapter.mirror(remote, local)
    }
}
