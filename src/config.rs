// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Nixwrap is configured through an optional TOML file plus a small set of
//! environment variables. Both are read exactly once, at the command-dispatch
//! boundary, into a single [`Config`] value. Everything past that boundary
//! receives the configuration by reference and never consults the process
//! environment on its own.
//!
//! # Configuration File
//!
//! The file lives at `$XDG_CONFIG_HOME/nixwrap/config.toml` unless the
//! `NIXWRAP_CONFIG` variable names another path. A missing file simply means
//! that the defaults are used. Every field is optional:
//!
//! ```toml
//! flake = "~/nixos"
//! host = "tower"
//! remote = "pi@garden"
//! remote_flake = "nixos"
//! dry_run = false
//! theme_variable = "NIXOS_THEME"
//! store_root = "/nix/store"
//! profile = "/nix/var/nix/profiles/system"
//! ```
//!
//! # Environment Overrides
//!
//! - `NIXWRAP_REMOTE`: target host for `push`.
//! - `NIXWRAP_HOST`: host attribute used when rebuilding from the flake.
//! - `NIXWRAP_DRY_RUN`: print external actions instead of executing them.
//! - `NIXWRAP_THEME_VAR`: name of the variable that `theme` sets.

use crate::path::{default_config_file, NoWayHome};

use serde::{Deserialize, Serialize};
use std::{
    env,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Nixwrap configuration.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Flake directory holding the system configuration.
    pub flake: PathBuf,

    /// Host attribute of the flake to build, defaults to the hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Remote host to push the configuration to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    /// Flake directory on the remote host, relative to the remote home.
    pub remote_flake: String,

    /// Print external actions instead of executing them.
    pub dry_run: bool,

    /// Name of the environment variable that selects a theme.
    pub theme_variable: String,

    /// Root of the immutable package store.
    pub store_root: PathBuf,

    /// Profile whose generations are managed.
    pub profile: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flake: PathBuf::from("/etc/nixos"),
            host: None,
            remote: None,
            remote_flake: "nixos".into(),
            dry_run: false,
            theme_variable: "NIXOS_THEME".into(),
            store_root: PathBuf::from("/nix/store"),
            profile: PathBuf::from("/nix/var/nix/profiles/system"),
        }
    }
}

impl Config {
    /// Load configuration for the current process.
    ///
    /// Reads the configuration file named by `NIXWRAP_CONFIG`, or the default
    /// configuration file, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if default path cannot be found.
    /// - Return [`ConfigError::Read`] if existing file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is invalid.
    pub fn load() -> Result<Self> {
        let path = match env::var_os("NIXWRAP_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => default_config_file()?,
        };

        Ok(Self::load_from(path)?.with_env_overrides())
    }

    /// Load configuration file at target path.
    ///
    /// Falls back to defaults if the file does not exist.
    #[instrument(skip(path), level = "debug")]
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(data) => {
                debug!("load configuration from {:?}", path.display());
                data.parse()
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no configuration at {:?}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            }),
        }
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(remote) = env::var("NIXWRAP_REMOTE") {
            self.remote = Some(remote);
        }

        if let Ok(host) = env::var("NIXWRAP_HOST") {
            self.host = Some(host);
        }

        if let Ok(flag) = env::var("NIXWRAP_DRY_RUN") {
            self.dry_run = is_truthy(&flag);
        }

        if let Ok(name) = env::var("NIXWRAP_THEME_VAR") {
            self.theme_variable = name;
        }

        self
    }

    /// Flake reference to rebuild from, e.g., `/etc/nixos#tower`.
    pub fn flake_ref(&self) -> String {
        flake_ref(self.flake.to_string_lossy(), self.host.as_deref())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        config.flake = expand(&config.flake)?;
        config.store_root = expand(&config.store_root)?;
        config.profile = expand(&config.profile)?;

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

fn flake_ref(flake: impl AsRef<str>, host: Option<&str>) -> String {
    match host {
        Some(host) => format!("{}#{host}", flake.as_ref()),
        None => flake.as_ref().to_string(),
    }
}

fn is_truthy(flag: &str) -> bool {
    matches!(
        flag.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Configuration file exists but cannot be read.
    #[error("failed to read configuration file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Default configuration path cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
