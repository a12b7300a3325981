//! Configuration loading via `ortho-config`.
//!
//! [`HostkitConfig`] merges defaults, `hostkit.toml` discovered through the
//! standard search order, `HOSTKIT_*` environment variables and CLI flags.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::host::{AdapterPreference, SshSettings};

/// Default location of the persisted instance records.
pub const DEFAULT_INSTANCES_FILE: &str = "~/.config/hostkit/instances.toml";

/// Tool binaries, SSH behaviour and storage locations.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HOSTKIT",
    discovery(
        app_name = "hostkit",
        env_var = "HOSTKIT_CONFIG_PATH",
        config_file_name = "hostkit.toml",
        dotfile_name = ".hostkit.toml",
        project_file_name = "hostkit.toml"
    )
)]
pub struct HostkitConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the key-provisioning helper.
    #[ortho_config(default = "ssh-copy-id".to_owned())]
    pub ssh_copy_id_bin: String,
    /// Path to the `rsync` executable.
    #[ortho_config(default = "rsync".to_owned())]
    pub rsync_bin: String,
    /// Path to the `scp` executable, used when `rsync` is missing.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Path to the `curl` executable used for FTP.
    #[ortho_config(default = "curl".to_owned())]
    pub curl_bin: String,
    /// Private key used for SSH; `~/` is expanded.
    pub ssh_identity_file: Option<String>,
    /// SSH client configuration file passed with `-F`.
    pub ssh_config_file: Option<String>,
    /// Wall-clock limit for each SSH subprocess invocation.
    #[ortho_config(default = 300)]
    pub ssh_timeout_secs: u64,
    /// `auto`, `session` or `subprocess`.
    #[ortho_config(default = "auto".to_owned())]
    pub ssh_adapter: String,
    /// TOML file holding instance records; `~/` is expanded.
    #[ortho_config(default = DEFAULT_INSTANCES_FILE.to_owned())]
    pub instances_file: String,
    /// Scratch directory for downloads and archives.
    pub local_temp_dir: Option<String>,
}

impl Default for HostkitConfig {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            ssh_copy_id_bin: String::from("ssh-copy-id"),
            rsync_bin: String::from("rsync"),
            scp_bin: String::from("scp"),
            curl_bin: String::from("curl"),
            ssh_identity_file: None,
            ssh_config_file: None,
            ssh_timeout_secs: 300,
            ssh_adapter: String::from("auto"),
            instances_file: DEFAULT_INSTANCES_FILE.to_owned(),
            local_temp_dir: None,
        }
    }
}

impl HostkitConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("hostkit")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures required values are present and well formed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is empty
    /// and [`ConfigError::Invalid`] when a value cannot be interpreted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.ssh_copy_id_bin, "ssh_copy_id_bin")?;
        Self::require_value(&self.rsync_bin, "rsync_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.curl_bin, "curl_bin")?;
        Self::require_value(&self.instances_file, "instances_file")?;
        if self.ssh_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: String::from("ssh_timeout_secs"),
                message: String::from("must be greater than zero"),
            });
        }
        self.adapter_preference()?;
        Ok(())
    }

    /// Parsed SSH adapter preference.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unknown adapter names.
    pub fn adapter_preference(&self) -> Result<AdapterPreference, ConfigError> {
        self.ssh_adapter
            .parse()
            .map_err(|message| ConfigError::Invalid {
                field: String::from("ssh_adapter"),
                message,
            })
    }

    /// Settings shared by every SSH connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn ssh_settings(&self) -> Result<SshSettings, ConfigError> {
        self.validate()?;
        Ok(SshSettings {
            ssh_bin: self.ssh_bin.clone(),
            ssh_copy_id_bin: self.ssh_copy_id_bin.clone(),
            rsync_bin: self.rsync_bin.clone(),
            scp_bin: self.scp_bin.clone(),
            identity_file: self.ssh_identity_file.as_deref().map(expanded_path),
            config_file: self.ssh_config_file.as_deref().map(expanded_path),
            timeout: Duration::from_secs(self.ssh_timeout_secs),
            adapter: self.adapter_preference()?,
        })
    }

    /// Instance records file with `~/` expanded.
    #[must_use]
    pub fn instances_path(&self) -> Utf8PathBuf {
        expanded_path(&self.instances_file)
    }

    /// Scratch directory for local artefacts.
    #[must_use]
    pub fn temp_dir(&self) -> Utf8PathBuf {
        self.local_temp_dir.as_deref().map_or_else(
            || {
                Utf8PathBuf::from_path_buf(std::env::temp_dir())
                    .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
            },
            expanded_path,
        )
    }

    fn require_value(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {field}: set HOSTKIT_{} or add {field} to hostkit.toml",
                field.to_ascii_uppercase()
            )));
        }
        Ok(())
    }
}

fn expanded_path(path: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(expand_tilde(path))
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If `HOME` is not set the input is returned unchanged.
///
/// # Examples
///
/// ```
/// # use hostkit::config::expand_tilde;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_tilde("~/.ssh/id_ed25519"), format!("{home}/.ssh/id_ed25519"));
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value is present but unusable.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Offending field.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn config() -> HostkitConfig {
        HostkitConfig::default()
    }

    #[rstest]
    fn defaults_validate(config: HostkitConfig) {
        assert_eq!(config.validate(), Ok(()));
    }

    #[rstest]
    fn empty_binary_is_rejected_with_guidance(mut config: HostkitConfig) {
        config.rsync_bin = String::from("  ");

        let err = config.validate().expect_err("empty rsync_bin should fail");

        assert_eq!(
            err,
            ConfigError::MissingField(String::from(
                "missing rsync_bin: set HOSTKIT_RSYNC_BIN or add rsync_bin to hostkit.toml"
            ))
        );
    }

    #[rstest]
    fn unknown_adapter_is_rejected(mut config: HostkitConfig) {
        config.ssh_adapter = String::from("telnet");

        let err = config.validate().expect_err("unknown adapter should fail");

        assert!(
            matches!(&err, ConfigError::Invalid { field, .. } if field == "ssh_adapter"),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn zero_timeout_is_rejected(mut config: HostkitConfig) {
        config.ssh_timeout_secs = 0;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[rstest]
    fn ssh_settings_carry_paths_and_timeout(mut config: HostkitConfig) {
        config.ssh_identity_file = Some(String::from("/keys/id_ed25519"));
        config.ssh_config_file = Some(String::from("/etc/ssh/hostkit_config"));
        config.ssh_timeout_secs = 42;
        config.ssh_adapter = String::from("subprocess");

        let settings = config.ssh_settings().expect("settings should build");

        assert_eq!(settings.identity_file, Some(Utf8PathBuf::from("/keys/id_ed25519")));
        assert_eq!(settings.config_file, Some(Utf8PathBuf::from("/etc/ssh/hostkit_config")));
        assert_eq!(settings.timeout, Duration::from_secs(42));
        assert_eq!(settings.adapter, AdapterPreference::Subprocess);
    }

    #[rstest]
    fn local_temp_dir_overrides_system_default(mut config: HostkitConfig) {
        config.local_temp_dir = Some(String::from("/scratch/hostkit"));

        assert_eq!(config.temp_dir(), Utf8PathBuf::from("/scratch/hostkit"));
    }

    #[rstest]
    fn expand_tilde_leaves_absolute_paths_unchanged() {
        assert_eq!(expand_tilde("/srv/instances.toml"), "/srv/instances.toml");
    }
}
