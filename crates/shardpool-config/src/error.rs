//! Error type for configuration loading and validation.

use thiserror::Error;

/// Errors raised while loading or validating the config file.
///
/// These are fatal at process startup and nowhere else.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
