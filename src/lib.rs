//! Scene Forge - natural-language to Manim animation generator
//!
//! This library turns a user's description of a concept into a rendered
//! animation: a language model writes a Manim program, the program is rendered
//! in an isolated working directory, and failures are fed back to the model
//! until a program renders or the attempt budget runs out.

pub mod backoff;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod generation;
pub mod prompt;
pub mod sandbox;
pub mod secrets;
pub mod session;

pub use error::{Error, Result};

pub use backoff::ExponentialBackoff;
pub use config::{
    CorrectionConfig, ExecutionConfig, ForgeConfig, GenerationConfig, MediaFormat, Quality,
    StoreConfig, Validate, ValidationResult, CONFIG_ENV,
};
pub use controller::{render_once, CorrectionLoop, GenerationFailure, GenerationSuccess};
pub use executor::{Execution, Executor, ManimExecutor};
pub use generation::{extract_program, CodeGenerator, FalGenerator, RetryingGenerator};
pub use prompt::{compose, ComposedPrompt, GenerationRequest, PromptKind};
pub use sandbox::{WorkDir, WorkDirProvider};
pub use secrets::{ApiKey, SecretSource};
pub use session::{CommittedScene, SessionState, SessionStore, Turn};
