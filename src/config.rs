//! Configuration for the generate-execute-correct pipeline.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//! Validated before use to catch errors early.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable naming a TOML config file.
pub const CONFIG_ENV: &str = "SCENE_FORGE_CONFIG";

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

/// Render quality preset passed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Low,
    Medium,
    High,
}

impl Quality {
    /// Engine command-line flag for this preset.
    pub fn flag(self) -> &'static str {
        match self {
            Quality::Low => "-ql",
            Quality::Medium => "-qm",
            Quality::High => "-qh",
        }
    }

    /// Pixel height the engine uses in its output directory name.
    pub fn pixel_height(self) -> u32 {
        match self {
            Quality::Low => 480,
            Quality::Medium => 720,
            Quality::High => 1080,
        }
    }
}

/// Container format of the rendered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    #[default]
    Mp4,
    Gif,
}

impl MediaFormat {
    /// File extension of the artifact.
    pub fn extension(self) -> &'static str {
        match self {
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Gif => "gif",
        }
    }
}

/// Settings for the code-generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// HTTP endpoint of the any-llm compatible service.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model selector forwarded to the service.
    #[serde(default = "default_model")]
    pub model: String,
    /// Scheduling priority hint forwarded to the service.
    #[serde(default = "default_priority")]
    pub priority: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// File holding the API key; takes precedence over `api_key_env`.
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Extra tries on transport failure, with the same prompt.
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,
    /// First delay between transport retries, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_endpoint() -> String {
    "https://fal.run/fal-ai/any-llm".to_string()
}

fn default_model() -> String {
    "google/gemini-2.5-flash".to_string()
}

fn default_priority() -> String {
    "latency".to_string()
}

fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_transport_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            priority: default_priority(),
            api_key_env: default_api_key_env(),
            api_key_file: None,
            request_timeout_secs: default_request_timeout(),
            transport_retries: default_transport_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl GenerationConfig {
    /// Returns the request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the initial retry delay as a Duration.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Settings for the sandboxed render step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Interpreter used to launch `-m manim`.
    #[serde(default = "default_python")]
    pub python: String,
    /// Wall-clock budget per attempt in seconds.
    #[serde(default = "default_execution_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub format: MediaFormat,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Upper bound on diagnostic text fed back into prompts.
    #[serde(default = "default_max_diagnostic_chars")]
    pub max_diagnostic_chars: usize,
    /// Parent directory for per-attempt working directories.
    #[serde(default)]
    pub work_root: Option<PathBuf>,
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_execution_timeout() -> u64 {
    120
}

fn default_fps() -> u32 {
    15
}

fn default_max_diagnostic_chars() -> usize {
    4000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            timeout_secs: default_execution_timeout(),
            quality: Quality::default(),
            format: MediaFormat::default(),
            fps: default_fps(),
            max_diagnostic_chars: default_max_diagnostic_chars(),
            work_root: None,
        }
    }
}

impl ExecutionConfig {
    /// Returns the execution timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the sandbox root, falling back to the system temp dir.
    pub fn work_root(&self) -> PathBuf {
        self.work_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("scene-forge-sandboxes"))
    }
}

/// Settings for the correction loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Generate-execute attempts per request.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Previous utterances included in follow-up prompts.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_history_turns() -> usize {
    4
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            history_turns: default_history_turns(),
        }
    }
}

/// Settings for the session/artifact store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory that owns committed artifacts.
    #[serde(default)]
    pub artifact_root: Option<PathBuf>,
}

impl StoreConfig {
    /// Returns the artifact root, falling back to the system temp dir.
    pub fn artifact_root(&self) -> PathBuf {
        self.artifact_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("scene-forge-artifacts"))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl ForgeConfig {
    /// Parses configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Reads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }
}

impl Validate for GenerationConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.endpoint.trim().is_empty() {
            result.add_error("generation.endpoint cannot be empty");
        } else if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            result.add_error(format!(
                "generation.endpoint '{}' must be an http(s) URL",
                self.endpoint
            ));
        }

        if self.model.trim().is_empty() {
            result.add_error("generation.model cannot be empty");
        }

        if self.request_timeout_secs == 0 {
            result.add_error("generation.request_timeout_secs must be at least 1");
        }

        if self.transport_retries > 5 {
            result.add_warning("generation.transport_retries > 5 may stall requests on outages");
        }

        result
    }
}

impl Validate for ExecutionConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.python.trim().is_empty() {
            result.add_error("execution.python cannot be empty");
        }

        if self.timeout_secs == 0 {
            result.add_error("execution.timeout_secs must be at least 1");
        }

        if self.fps == 0 {
            result.add_error("execution.fps must be at least 1");
        }

        if self.max_diagnostic_chars < 200 {
            result.add_warning(
                "execution.max_diagnostic_chars under 200 may hide the actual error from the model",
            );
        }

        if self.timeout_secs > 1800 {
            result.add_warning("execution.timeout_secs over 30 minutes may indicate a misconfiguration");
        }

        result
    }
}

impl Validate for CorrectionConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.max_attempts == 0 {
            result.add_error("correction.max_attempts must be at least 1");
        }

        if self.max_attempts > 10 {
            result.add_warning("correction.max_attempts > 10 may lead to excessive model calls");
        }

        result
    }
}

impl Validate for ForgeConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        result.merge(self.generation.validate());
        result.merge(self.execution.validate());
        result.merge(self.correction.validate());
        result
    }
}
