//! Finding, reading and validating a patch config.

use crate::config::schema::{PatchConfig, ValidationError};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// File name searched for when no config path is given.
pub const CONFIG_FILE_NAME: &str = "patch-guard.toml";

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "PATCH_GUARD_CONFIG";

/// Everything that can go wrong between "which config?" and a validated
/// [`PatchConfig`]. Parse and validation errors from [`load_from_str`]
/// carry no path; [`load_from_path`] fills it in.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "no {} found in {} or any parent directory (set {} or pass --config)",
        CONFIG_FILE_NAME,
        .start.display(),
        CONFIG_ENV_VAR
    )]
    NotFound { start: PathBuf },

    #[error("failed to read patch config from {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse patch config TOML{}: {source}", location(.path))]
    Toml {
        path: Option<PathBuf>,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("invalid patch config{}: {source}", location(.path))]
    Validation {
        path: Option<PathBuf>,
        #[source]
        source: ValidationError,
    },
}

fn location(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" ({})", path.display()),
        None => String::new(),
    }
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path.to_path_buf()),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PatchConfig, ConfigError> {
    let config: PatchConfig = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Find the config file to use.
///
/// Priority order:
/// 1. Explicit path (the `--config` flag)
/// 2. `PATCH_GUARD_CONFIG` environment variable
/// 3. `patch-guard.toml` in `start` or the nearest ancestor containing one
pub fn discover(explicit: Option<&Path>, start: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
        debug!(path = ?path, "config taken from {}", CONFIG_ENV_VAR);
        return Ok(PathBuf::from(path));
    }

    find_upwards(start).ok_or_else(|| ConfigError::NotFound {
        start: start.to_path_buf(),
    })
}

/// Walk up from `start` looking for `patch-guard.toml`.
pub fn find_upwards(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}
