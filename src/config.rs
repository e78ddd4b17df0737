// src/config.rs

//! Airlock configuration file
//!
//! A single TOML file describes where channels, incoming media, verified
//! staging and host manifests live, which public keys are trusted, and how
//! channel operations behave. A missing file means "all defaults".
//!
//! ```toml
//! [paths]
//! channels = "/var/lib/airlock/channels"
//!
//! [trust]
//! keys = ["/etc/airlock/trusted/release.asc"]
//!
//! [channels]
//! history_limit = 20
//! metadata_command = ["createrepo_c", "--update", "{dir}"]
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/airlock/airlock.toml";

/// Placeholder substituted with the channel content directory in hook commands
pub const DIR_PLACEHOLDER: &str = "{dir}";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub trust: TrustConfig,

    #[serde(default)]
    pub channels: ChannelsConfig,

    #[serde(default)]
    pub manifest: ManifestConfig,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Root under which each channel has its own directory
    #[serde(default = "default_channels_dir")]
    pub channels: PathBuf,

    /// Where bundles arrive from transport media
    #[serde(default = "default_incoming_dir")]
    pub incoming: PathBuf,

    /// Verified staging area
    #[serde(default = "default_staging_dir")]
    pub staging: PathBuf,

    /// Host manifest store
    #[serde(default = "default_manifests_dir")]
    pub manifests: PathBuf,
}

fn default_channels_dir() -> PathBuf {
    PathBuf::from("/var/lib/airlock/channels")
}

fn default_incoming_dir() -> PathBuf {
    PathBuf::from("/var/lib/airlock/incoming")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("/var/lib/airlock/verified")
}

fn default_manifests_dir() -> PathBuf {
    PathBuf::from("/var/lib/airlock/manifests")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            channels: default_channels_dir(),
            incoming: default_incoming_dir(),
            staging: default_staging_dir(),
            manifests: default_manifests_dir(),
        }
    }
}

/// Explicitly provisioned trusted public keys
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustConfig {
    /// ASCII-armored public key files
    #[serde(default)]
    pub keys: Vec<PathBuf>,
}

/// Channel operation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelsConfig {
    /// Number of history entries kept in channel metadata
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// How long to wait for a channel lock before giving up
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// Repository metadata command run after each content swap
    #[serde(default)]
    pub metadata_command: Option<Vec<String>>,

    /// Remove a verified bundle from staging once a publish of it commits
    #[serde(default = "default_prune_verified")]
    pub prune_verified: bool,
}

fn default_history_limit() -> usize {
    20
}

fn default_lock_timeout() -> u64 {
    30
}

fn default_prune_verified() -> bool {
    true
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            lock_timeout_secs: default_lock_timeout(),
            metadata_command: None,
            prune_verified: default_prune_verified(),
        }
    }
}

impl ChannelsConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

/// Manifest capture settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestConfig {
    /// Operator-assigned host identifier
    #[serde(default)]
    pub host_id: Option<String>,
}

impl Config {
    /// Load from an explicit path, or the default path if it exists
    ///
    /// An explicitly requested file must exist; the default one may not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.channels.history_limit == 0 {
            return Err(Error::ConfigError(
                "channels.history_limit must be at least 1".to_string(),
            ));
        }
        if let Some(cmd) = &self.channels.metadata_command
            && cmd.is_empty()
        {
            return Err(Error::ConfigError(
                "channels.metadata_command must name a program".to_string(),
            ));
        }
        if let Some(id) = &self.manifest.host_id
            && id.trim().is_empty()
        {
            return Err(Error::ConfigError(
                "manifest.host_id must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize back to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ConfigError(e.to_string()))
    }
}
