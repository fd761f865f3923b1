//! Environment lookups shared by the component configs.

use std::str::FromStr;

use super::error::ConfigError;

/// Read `name` from the environment, falling back to `default` when unset
pub(crate) fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}
