use crate::config::schema::{PatchConfig, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Configuration shipped with the crate: the iOS adaptation of
/// `crypto_rand_fast.c`.
pub const BUILTIN_CONFIG: &str = include_str!("../../patches/crypto_rand_fast.toml");

/// Where a patch configuration came from, for error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// Embedded in the binary
    Builtin,
    File(PathBuf),
    /// Passed in as a string by a library caller
    Inline,
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOrigin::Builtin => write!(f, "built-in patch config"),
            ConfigOrigin::File(path) => write!(f, "patch config {}", path.display()),
            ConfigOrigin::Inline => write!(f, "inline patch config"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read patch config from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin} is not valid TOML: {source}")]
    Toml {
        origin: ConfigOrigin,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("{origin} is invalid: {source}")]
    Validation {
        origin: ConfigOrigin,
        #[source]
        source: ValidationError,
    },
}

impl ConfigError {
    pub fn origin(&self) -> Option<&ConfigOrigin> {
        match self {
            ConfigError::Io { .. } => None,
            ConfigError::Toml { origin, .. } | ConfigError::Validation { origin, .. } => {
                Some(origin)
            }
        }
    }
}

fn parse(input: &str, origin: ConfigOrigin) -> Result<PatchConfig, ConfigError> {
    let config: PatchConfig = match toml_edit::de::from_str(input) {
        Ok(config) => config,
        Err(source) => return Err(ConfigError::Toml { origin, source }),
    };
    if let Err(source) = config.validate() {
        return Err(ConfigError::Validation { origin, source });
    }
    debug!(origin = %origin, name = %config.meta.name, "patch config loaded");
    Ok(config)
}

pub fn load_from_str(input: &str) -> Result<PatchConfig, ConfigError> {
    parse(input, ConfigOrigin::Inline)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents, ConfigOrigin::File(path.to_path_buf()))
}

pub fn load_builtin() -> Result<PatchConfig, ConfigError> {
    parse(BUILTIN_CONFIG, ConfigOrigin::Builtin)
}
