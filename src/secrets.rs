//! API credential handling for the code-generation service.
//!
//! Resolves the key from an environment variable or a file and keeps its
//! value out of logs and diagnostics.

use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

/// Source from which to retrieve the API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Read from an environment variable.
    EnvVar(String),
    /// Read from a file (surrounding whitespace is trimmed).
    File(PathBuf),
    /// Provided directly (for testing only).
    Direct(String),
}

impl SecretSource {
    /// Picks the source configured for generation: a key file wins over the env var.
    pub fn for_generation(config: &GenerationConfig) -> Self {
        match &config.api_key_file {
            Some(path) => SecretSource::File(path.clone()),
            None => SecretSource::EnvVar(config.api_key_env.clone()),
        }
    }
}

/// A resolved API key. Never printed.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Resolves the key from its source.
    pub fn resolve(source: &SecretSource) -> Result<Self> {
        let value = match source {
            SecretSource::EnvVar(name) => env::var(name).map_err(|_| {
                Error::Config(format!("environment variable '{}' not set", name))
            })?,
            SecretSource::File(path) => std::fs::read_to_string(path)
                .map_err(|e| {
                    Error::Config(format!("cannot read key file '{}': {}", path.display(), e))
                })?
                .trim()
                .to_string(),
            SecretSource::Direct(value) => value.clone(),
        };

        if value.trim().is_empty() {
            return Err(Error::Config("API key is empty".to_string()));
        }

        Ok(Self(value))
    }

    /// Wraps a literal key.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw key for use in a request header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Replaces every occurrence of the key in `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }
        text.replace(&self.0, "[REDACTED]")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}
