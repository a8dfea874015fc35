//! Engine settings.
//!
//! Settings are read with the `config` crate from an optional `metatype.toml`
//! (or an explicit file) and `METATYPE_*` environment variables, then
//! installed process-wide so that the engine internals can consult them.

use config::{Config, Environment, File};
use lazy_static::lazy_static;
use serde::Deserialize;

use std::sync::{Mutex, PoisonError};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Filter handed to the tracing subscriber by the binary.
    pub log_filter: String,
    /// Largest number of default elements a single indexed write may append to a list.
    pub max_list_padding: usize,
    /// Prefix of generated ids for anonymous child dictionaries.
    pub dictionary_id_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
            max_list_padding: 10_000,
            dictionary_id_prefix: "dictionary".into(),
        }
    }
}

impl EngineConfig {
    /// Reads `path` (required when given) or `metatype.*` in the working
    /// directory (optional), with `METATYPE_*` environment variables on top.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name("metatype").required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("METATYPE").try_parsing(true))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        Ok(settings)
    }
}

lazy_static! {
    static ref INSTALLED: Mutex<EngineConfig> = Mutex::new(EngineConfig::default());
}

/// Publishes `settings` for the whole process.
pub fn install(settings: EngineConfig) {
    *INSTALLED.lock().unwrap_or_else(PoisonError::into_inner) = settings;
}

/// A snapshot of the installed settings.
pub fn current() -> EngineConfig {
    INSTALLED.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let settings = EngineConfig::load(None).unwrap();
        assert!(settings.max_list_padding > 0);
        assert!(!settings.dictionary_id_prefix.is_empty());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(EngineConfig::load(Some("does/not/exist/metatype-settings")).is_err());
    }
}
