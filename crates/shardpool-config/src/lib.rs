//! Configuration for the shardpool autoscaler.
//!
//! The config file is TOML with `${VAR}` environment-variable
//! expansion applied before parsing, so credentials can be injected
//! from the environment without templating. Validation runs once at
//! startup and is the only fatal error path in the system; everything
//! after that degrades and retries.

mod error;
mod load;
mod types;

pub use error::ConfigError;
pub use load::expand_env;
pub use types::*;
