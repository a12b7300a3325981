//! Builds the right [`Access`] for an instance's access type.

use camino::Utf8PathBuf;
use tracing::info;

use super::{Access, AccessError, Capability, FtpAccess, ReqwestFetcher, ShellBackedAccess};
use crate::config::{ConfigError, HostkitConfig};
use crate::host::{FtpHost, KeySetupOutcome, LocalHost, SshContext, SshHost, SshTarget, ftp, ssh};
use crate::instance::{AccessType, Instance, InstanceStore};
use crate::prompt::Prompter;

/// Opens accesses, sharing SSH key and session caches between them.
#[derive(Clone, Debug)]
pub struct AccessFactory {
    config: HostkitConfig,
    ssh: SshContext,
    store: InstanceStore,
}

impl AccessFactory {
    /// Creates a factory persisting downgrades to `store`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` does not validate.
    pub fn new(config: HostkitConfig, store: InstanceStore) -> Result<Self, ConfigError> {
        let ssh = SshContext::new(config.ssh_settings()?);
        Ok(Self { config, ssh, store })
    }

    /// Shared SSH state.
    #[must_use]
    pub const fn ssh_context(&self) -> &SshContext {
        &self.ssh
    }

    /// Store downgrades are written to.
    #[must_use]
    pub const fn store(&self) -> &InstanceStore {
        &self.store
    }

    /// Opens the access matching `instance.access_type`.
    ///
    /// SSH instances run key setup on first contact. When the operator
    /// reports that a password was still requested the instance is saved
    /// as `ssh-nokey`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::MissingSetting`] when the record lacks a host
    /// or login, and transport errors when connecting fails.
    pub fn open(
        &self,
        mut instance: Instance,
        prompter: &mut dyn Prompter,
    ) -> Result<Box<dyn Access>, AccessError> {
        let temp = self.config.temp_dir();
        match instance.access_type {
            AccessType::Local => Ok(Box::new(ShellBackedAccess::new(instance, self.local_host(), temp))),
            AccessType::Ssh | AccessType::SshNoKey => {
                let target = SshTarget::new(
                    instance.login(),
                    required(&instance, instance.host.as_deref(), "host")?,
                    instance.port.unwrap_or(ssh::DEFAULT_PORT),
                );
                let native_key = instance.access_type == AccessType::Ssh;
                let host = SshHost::connect(&self.ssh, target, native_key, prompter)?;
                if native_key {
                    self.record_key_outcome(&mut instance, host.key_outcome())?;
                }
                Ok(Box::new(ShellBackedAccess::new(instance, host, temp)))
            }
            AccessType::Ftp => {
                let ftp_host = FtpHost::new(
                    required(&instance, instance.host.as_deref(), "host")?,
                    instance.port.unwrap_or(ftp::DEFAULT_PORT),
                    required(&instance, instance.user.as_deref(), "user")?,
                    instance.password.clone().unwrap_or_default(),
                )
                .with_curl(self.config.curl_bin.as_str());
                Ok(Box::new(FtpAccess::new(instance, ftp_host, ReqwestFetcher::new()?, temp)))
            }
        }
    }

    /// Opens an access and checks it offers `capability`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::MissingCapability`] when the transport cannot
    /// provide it, or any error from [`AccessFactory::open`].
    pub fn open_for(
        &self,
        instance: Instance,
        capability: Capability,
        prompter: &mut dyn Prompter,
    ) -> Result<Box<dyn Access>, AccessError> {
        let access = self.open(instance, prompter)?;
        if access.supports(capability) {
            return Ok(access);
        }
        Err(AccessError::MissingCapability {
            instance: access.instance().name.clone(),
            transport: access.transport(),
            capability,
        })
    }

    /// Persists a downgrade to `ssh-nokey`, returning whether one happened.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Store`] when the record cannot be saved.
    pub fn record_key_outcome(
        &self,
        instance: &mut Instance,
        outcome: KeySetupOutcome,
    ) -> Result<bool, AccessError> {
        if outcome != KeySetupOutcome::Downgraded || instance.access_type != AccessType::Ssh {
            return Ok(false);
        }
        instance.access_type = AccessType::SshNoKey;
        self.store.save(instance)?;
        info!(instance = %instance.name, "recorded instance as ssh-nokey");
        Ok(true)
    }

    fn local_host(&self) -> LocalHost {
        let host = LocalHost::new();
        if which::which(&self.config.rsync_bin).is_ok() {
            return host.with_rsync(self.config.rsync_bin.as_str());
        }
        host
    }

    /// Scratch directory used for local artefacts.
    #[must_use]
    pub fn temp_dir(&self) -> Utf8PathBuf {
        self.config.temp_dir()
    }
}

fn required<'a>(
    instance: &Instance,
    value: Option<&'a str>,
    setting: &'static str,
) -> Result<&'a str, AccessError> {
    value
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| AccessError::MissingSetting {
            instance: instance.name.clone(),
            setting,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedPrompter;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        factory: AccessFactory,
    }

    #[fixture]
    fn harness() -> Harness {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("instances.toml"))
            .unwrap_or_else(|path| panic!("non-utf8 temp path {}", path.display()));
        let factory = AccessFactory::new(HostkitConfig::default(), InstanceStore::new(path))
            .unwrap_or_else(|err| panic!("factory: {err}"));
        Harness { _tmp: tmp, factory }
    }

    #[rstest]
    fn local_instances_get_a_shell(harness: Harness) {
        let mut prompter = ScriptedPrompter::new();

        let mut access = harness
            .factory
            .open(Instance::new("dev", AccessType::Local), &mut prompter)
            .unwrap_or_else(|err| panic!("open: {err}"));

        assert_eq!(access.transport(), "local");
        assert!(access.shell().is_some());
    }

    #[rstest]
    #[case(AccessType::Ssh)]
    #[case(AccessType::SshNoKey)]
    #[case(AccessType::Ftp)]
    fn remote_instances_need_a_host(harness: Harness, #[case] access_type: AccessType) {
        let mut prompter = ScriptedPrompter::new();

        let Err(err) = harness
            .factory
            .open(Instance::new("remote", access_type), &mut prompter)
        else {
            panic!("a record without host should not open");
        };

        assert!(
            matches!(err, AccessError::MissingSetting { setting: "host", .. }),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn ftp_without_weburl_cannot_script(harness: Harness) {
        let mut instance = Instance::new("brochure", AccessType::Ftp);
        instance.host = Some(String::from("ftp.example.com"));
        instance.user = Some(String::from("site"));
        let mut prompter = ScriptedPrompter::new();

        let Err(err) = harness
            .factory
            .open_for(instance, Capability::Scripting, &mut prompter)
        else {
            panic!("scripting should be unavailable");
        };

        assert!(
            matches!(err, AccessError::MissingCapability { transport: "ftp", .. }),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn downgrade_is_written_back(harness: Harness) {
        let mut instance = Instance::new("shop", AccessType::Ssh);
        instance.host = Some(String::from("web1.example.com"));

        let changed = harness
            .factory
            .record_key_outcome(&mut instance, KeySetupOutcome::Downgraded)
            .unwrap_or_else(|err| panic!("record: {err}"));

        assert!(changed);
        assert_eq!(instance.access_type, AccessType::SshNoKey);
        let stored = harness
            .factory
            .store()
            .get("shop")
            .unwrap_or_else(|err| panic!("get: {err}"));
        assert_eq!(stored.access_type, AccessType::SshNoKey);
    }

    #[rstest]
    fn verified_keys_leave_the_record_alone(harness: Harness) {
        let mut instance = Instance::new("shop", AccessType::Ssh);

        let changed = harness
            .factory
            .record_key_outcome(&mut instance, KeySetupOutcome::Verified)
            .unwrap_or_else(|err| panic!("record: {err}"));

        assert!(!changed);
        assert!(harness.factory.store().list().unwrap_or_default().is_empty());
    }
}
