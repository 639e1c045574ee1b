//! Error types for the scene-forge pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Diagnostic used when a model response does not hold exactly one program.
pub const EXTRACTION_DIAGNOSTIC: &str = "response did not contain exactly one program block";

/// Top-level error type for generation, execution and storage.
#[derive(Error, Debug)]
pub enum Error {
    /// The prompt composer was asked for a turn whose inputs are missing.
    #[error("prompt composition failed: {0}")]
    Composition(String),

    /// The code-generation service could not be reached or answered badly.
    #[error("generation service error: {0}")]
    GenerationService(String),

    /// The model answered, but not with exactly one program block.
    #[error("{0}")]
    Extraction(String),

    /// The scene program failed validation, rendering, or produced nothing.
    #[error("{0}")]
    Execution(String),

    /// A sandbox working directory could not be prepared.
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// A rendered artifact could not be adopted by the session store.
    #[error("failed to store artifact {path}: {reason}")]
    Artifact { path: PathBuf, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for failures the correction loop absorbs as a spent attempt.
    pub fn is_attempt_failure(&self) -> bool {
        matches!(
            self,
            Error::GenerationService(_) | Error::Extraction(_) | Error::Execution(_)
        )
    }

    /// The text fed back into the next prompt for this failure.
    pub fn diagnostic(&self) -> String {
        match self {
            Error::Extraction(msg) | Error::Execution(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for scene-forge operations.
pub type Result<T> = std::result::Result<T, Error>;
