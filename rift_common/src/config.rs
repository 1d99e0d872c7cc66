//! Config loading. The config structs themselves live next to the code that
//! reads them (the server crate); this module only knows how to get them off
//! disk.

use log::warn;
use serde::de::DeserializeOwned;
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("could not read config at `{path}`: {source}")]
  Io {
    path:   String,
    source: std::io::Error,
  },
  #[error("could not parse config at `{path}`: {source}")]
  Parse {
    path:   String,
    source: toml::de::Error,
  },
}

/// Loads a TOML config from the given path. If the file is missing or does
/// not parse, this logs a warning and returns the default config. Everything
/// should be runnable with no config file at all.
pub fn load<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> T {
  match load_err(path) {
    Ok(v) => v,
    Err(e) => {
      warn!("{e}; using default config");
      T::default()
    }
  }
}

/// Loads a TOML config from the given path, and surfaces errors to the
/// caller. Prefer [`load`] outside of tests.
pub fn load_err<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
  let path = path.as_ref();
  let src = fs::read_to_string(path)
    .map_err(|e| ConfigError::Io { path: path.display().to_string(), source: e })?;
  toml::from_str(&src)
    .map_err(|e| ConfigError::Parse { path: path.display().to_string(), source: e })
}

/// Parses a TOML config from a string. Used for tests and for the embedded
/// default config.
pub fn from_str<T: DeserializeOwned>(src: &str) -> Result<T, toml::de::Error> {
  toml::from_str(src)
}
