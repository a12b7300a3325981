//! Key-based authentication setup.
//!
//! The first connection to a target in a process checks whether key-based
//! login already works. If it does not, the public key is provisioned with
//! the key-copy helper and the operator is asked whether a password was
//! still requested; a "yes" downgrades the target to password logins.
//! The reached state is cached per target for the rest of the process.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use super::{KeyCache, SshSettings, SshTarget};
use crate::host::{CommandRunner, HostError, ProcessRequest};
use crate::prompt::Prompter;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Progress of key setup for one target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyState {
    /// Nothing is known yet.
    NotChecked,
    /// A password-less login attempt failed.
    KeyMissing,
    /// The key-copy helper is running.
    KeyInstalling,
    /// Password-less login works.
    KeyVerified,
    /// The target keeps asking for a password; key login is not used.
    Downgraded,
}

/// What key setup means for the persisted access type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeySetupOutcome {
    /// Keep the native-key access type.
    Verified,
    /// Record the target as lacking native key support.
    Downgraded,
}

impl From<KeyState> for KeySetupOutcome {
    fn from(state: KeyState) -> Self {
        if state == KeyState::KeyVerified {
            Self::Verified
        } else {
            Self::Downgraded
        }
    }
}

pub(crate) fn tool_on_path(tool: &str) -> bool {
    which::which(tool).is_ok()
}

/// Runs the key setup state machine for targets.
pub struct KeySetup<'a, R: CommandRunner> {
    settings: &'a SshSettings,
    cache: &'a KeyCache,
    runner: &'a R,
    prompter: &'a mut dyn Prompter,
    locate: fn(&str) -> bool,
}

impl<'a, R: CommandRunner> KeySetup<'a, R> {
    /// Creates a key setup run.
    pub fn new(
        settings: &'a SshSettings,
        cache: &'a KeyCache,
        runner: &'a R,
        prompter: &'a mut dyn Prompter,
    ) -> Self {
        Self {
            settings,
            cache,
            runner,
            prompter,
            locate: tool_on_path,
        }
    }

    /// Replaces the lookup used to find the key-copy helper.
    #[must_use]
    pub fn with_tool_lookup(mut self, locate: fn(&str) -> bool) -> Self {
        self.locate = locate;
        self
    }

    /// Ensures key setup ran for `target`, returning the reached state.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::MissingPrerequisite`] when the key-copy helper
    /// is not installed, [`HostError::Prompt`] when the operator cannot be
    /// asked, or a process error from the probe.
    pub fn ensure(&mut self, target: &SshTarget) -> Result<KeyState, HostError> {
        if let Some(state) = self.cache.get(target) {
            return Ok(state);
        }
        if !(self.locate)(&self.settings.ssh_copy_id_bin) {
            return Err(HostError::MissingPrerequisite {
                tool: self.settings.ssh_copy_id_bin.clone(),
            });
        }

        let mut state = KeyState::NotChecked;
        while !matches!(state, KeyState::KeyVerified | KeyState::Downgraded) {
            state = self.advance(state, target)?;
            info!(target = %target, state = ?state, "ssh key setup");
        }
        self.cache.insert(target, state);
        Ok(state)
    }

    fn advance(&mut self, state: KeyState, target: &SshTarget) -> Result<KeyState, HostError> {
        match state {
            KeyState::NotChecked => {
                if self.probe(target)? {
                    Ok(KeyState::KeyVerified)
                } else {
                    Ok(KeyState::KeyMissing)
                }
            }
            KeyState::KeyMissing => Ok(KeyState::KeyInstalling),
            KeyState::KeyInstalling => self.install(target),
            KeyState::KeyVerified | KeyState::Downgraded => Ok(state),
        }
    }

    fn probe(&self, target: &SshTarget) -> Result<bool, HostError> {
        let mut args = self.settings.client_options(target, "-p", true);
        args.push(target.destination());
        args.push(String::from("true"));
        let request = ProcessRequest::new(self.settings.ssh_bin.as_str(), args)
            .timeout(Some(PROBE_TIMEOUT.min(self.settings.timeout)));
        Ok(self.runner.run(&request)?.is_success())
    }

    fn install(&mut self, target: &SshTarget) -> Result<KeyState, HostError> {
        let mut args = Vec::new();
        if let Some(identity) = &self.settings.identity_file {
            args.push(String::from("-i"));
            args.push(public_key_path(identity).to_string());
        }
        args.push(String::from("-p"));
        args.push(target.port.to_string());
        args.push(target.destination());
        let request =
            ProcessRequest::new(self.settings.ssh_copy_id_bin.as_str(), args).interactive();
        let output = self.runner.run(&request)?;
        if !output.is_success() {
            warn!(target = %target, status = ?output.code, "key provisioning failed");
            return Ok(KeyState::Downgraded);
        }

        let question = format!("Were you asked for a password when connecting to {target}?");
        let asked = self
            .prompter
            .confirm(&question, false)
            .map_err(|err| HostError::Prompt(err.to_string()))?;
        if asked {
            warn!(target = %target, "key login unavailable; falling back to password logins");
            Ok(KeyState::Downgraded)
        } else {
            Ok(KeyState::KeyVerified)
        }
    }
}

fn public_key_path(identity: &Utf8Path) -> Utf8PathBuf {
    if identity.extension() == Some("pub") {
        identity.to_path_buf()
    } else {
        Utf8PathBuf::from(format!("{identity}.pub"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedPrompter, ScriptedRunner};
    use rstest::{fixture, rstest};

    fn always_present(_: &str) -> bool {
        true
    }

    fn never_present(_: &str) -> bool {
        false
    }

    #[fixture]
    fn target() -> SshTarget {
        SshTarget::new("deploy", "web1.example.com", 2222)
    }

    #[fixture]
    fn settings() -> SshSettings {
        SshSettings {
            identity_file: Some(Utf8PathBuf::from("/home/op/.ssh/id_ed25519")),
            ..SshSettings::default()
        }
    }

    #[rstest]
    fn verified_probe_skips_installation(target: SshTarget, settings: SshSettings) {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let cache = KeyCache::default();
        let mut prompter = ScriptedPrompter::new();

        let state = KeySetup::new(&settings, &cache, &runner, &mut prompter)
            .with_tool_lookup(always_present)
            .ensure(&target)
            .expect("key setup should succeed");

        assert_eq!(state, KeyState::KeyVerified);
        assert_eq!(runner.invocations().len(), 1);
        assert_eq!(
            runner.invocations().first().map(ProcessRequest::command_string),
            Some(String::from(
                "ssh -p 2222 -i /home/op/.ssh/id_ed25519 -o BatchMode=yes deploy@web1.example.com true"
            ))
        );
        assert!(prompter.questions().is_empty());
    }

    #[rstest]
    #[case(false, KeyState::KeyVerified)]
    #[case(true, KeyState::Downgraded)]
    fn missing_key_is_installed_then_confirmed(
        target: SshTarget,
        settings: SshSettings,
        #[case] password_requested: bool,
        #[case] expected: KeyState,
    ) {
        let runner = ScriptedRunner::new();
        runner.push_exit_code(255);
        runner.push_success();
        let cache = KeyCache::default();
        let mut prompter = ScriptedPrompter::new();
        prompter.push_confirm(password_requested);

        let state = KeySetup::new(&settings, &cache, &runner, &mut prompter)
            .with_tool_lookup(always_present)
            .ensure(&target)
            .expect("key setup should succeed");

        assert_eq!(state, expected);
        let install = runner.invocations().get(1).cloned().expect("install invocation");
        assert!(install.interactive);
        assert_eq!(
            install.command_string(),
            "ssh-copy-id -i /home/op/.ssh/id_ed25519.pub -p 2222 deploy@web1.example.com"
        );
        assert_eq!(cache.get(&target), Some(expected));
    }

    #[rstest]
    fn cached_state_is_not_rechecked(target: SshTarget, settings: SshSettings) {
        let runner = ScriptedRunner::new();
        let cache = KeyCache::default();
        cache.insert(&target, KeyState::Downgraded);
        let mut prompter = ScriptedPrompter::new();

        let state = KeySetup::new(&settings, &cache, &runner, &mut prompter)
            .with_tool_lookup(never_present)
            .ensure(&target)
            .expect("cached state should be returned");

        assert_eq!(state, KeyState::Downgraded);
        assert!(runner.invocations().is_empty());
    }

    #[rstest]
    fn missing_helper_is_reported(target: SshTarget, settings: SshSettings) {
        let runner = ScriptedRunner::new();
        let cache = KeyCache::default();
        let mut prompter = ScriptedPrompter::new();

        let err = KeySetup::new(&settings, &cache, &runner, &mut prompter)
            .with_tool_lookup(never_present)
            .ensure(&target)
            .expect_err("missing helper should fail");

        assert_eq!(
            err,
            HostError::MissingPrerequisite {
                tool: String::from("ssh-copy-id")
            }
        );
        assert_eq!(cache.get(&target), None);
    }

    #[rstest]
    fn failed_installation_downgrades(target: SshTarget, settings: SshSettings) {
        let runner = ScriptedRunner::new();
        runner.push_exit_code(255);
        runner.push_exit_code(1);
        let cache = KeyCache::default();
        let mut prompter = ScriptedPrompter::new();

        let state = KeySetup::new(&settings, &cache, &runner, &mut prompter)
            .with_tool_lookup(always_present)
            .ensure(&target)
            .expect("key setup should finish");

        assert_eq!(state, KeyState::Downgraded);
        assert!(prompter.questions().is_empty());
    }
}
