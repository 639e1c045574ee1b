//! Correction loop controller.
//!
//! Drives one request through `COMPOSE -> GENERATE -> EXECUTE` up to
//! `max_attempts` times. A failed attempt's program and diagnostic are fed
//! into the next prompt; the first attempt that renders is committed to the
//! session store. Session state is only touched on success.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::Instrument;

use crate::config::CorrectionConfig;
use crate::error::Error;
use crate::executor::{Execution, Executor};
use crate::generation::{extract_program, CodeGenerator};
use crate::prompt::{compose, ComposedPrompt, GenerationRequest};
use crate::session::{CommittedScene, SessionStore};

/// Utterance recorded for programs rendered without generation.
pub const MANUAL_RENDER_UTTERANCE: &str = "render the manually edited program";

/// A request that produced a working program.
#[derive(Debug, Clone)]
pub struct GenerationSuccess {
    pub program: String,
    /// Artifact path, owned by the session store.
    pub artifact: PathBuf,
    /// Attempt that succeeded (1-based).
    pub attempts: u32,
    /// Engine output of the winning attempt.
    pub logs: String,
}

/// Terminal failure of a request.
#[derive(Debug, Clone, Error)]
pub enum GenerationFailure {
    /// Every attempt failed. Carries the closest attempt for inspection.
    #[error("no working program after {attempts} attempt(s): {diagnostic}")]
    Exhausted {
        /// Diagnostic of the final attempt.
        diagnostic: String,
        /// Program of the final attempt, or the latest one generated.
        last_program: Option<String>,
        attempts: u32,
    },

    /// The composer was given inconsistent inputs.
    #[error("prompt composition failed: {0}")]
    Composition(String),

    /// Infrastructure failure outside the model's control.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GenerationFailure {
    /// The text to show the user.
    pub fn diagnostic(&self) -> &str {
        match self {
            GenerationFailure::Exhausted { diagnostic, .. } => diagnostic,
            GenerationFailure::Composition(msg) | GenerationFailure::Internal(msg) => msg,
        }
    }

    /// The closest program, if one was generated.
    pub fn last_program(&self) -> Option<&str> {
        match self {
            GenerationFailure::Exhausted { last_program, .. } => last_program.as_deref(),
            _ => None,
        }
    }
}

impl From<Error> for GenerationFailure {
    fn from(err: Error) -> Self {
        match err {
            Error::Composition(msg) => GenerationFailure::Composition(msg),
            other => GenerationFailure::Internal(other.to_string()),
        }
    }
}

/// Outcome of a single generate-execute cycle.
enum AttemptOutcome {
    /// The program rendered.
    Rendered { program: String, execution: Execution },
    /// The model or the engine failed; `program` is what to show and feed back.
    Failed {
        program: Option<String>,
        diagnostic: String,
    },
    /// Not an attempt failure; the request stops here.
    Aborted(Error),
}

/// The generate-execute-correct loop.
pub struct CorrectionLoop<G: CodeGenerator, E: Executor> {
    generator: G,
    executor: E,
    store: Arc<SessionStore>,
    max_attempts: u32,
    history_turns: usize,
}

impl<G: CodeGenerator, E: Executor> CorrectionLoop<G, E> {
    /// Creates a loop over the given collaborators.
    pub fn new(
        generator: G,
        executor: E,
        store: Arc<SessionStore>,
        config: &CorrectionConfig,
    ) -> Self {
        Self {
            generator,
            executor,
            store,
            max_attempts: config.max_attempts.max(1),
            history_turns: config.history_turns,
        }
    }

    /// Overrides the attempt bound (minimum 1).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Returns the attempt bound.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the code generator.
    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Returns the session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Turns one utterance into a rendered scene, correcting failures.
    ///
    /// Dropping the returned future cancels the request: any running engine
    /// process is killed and nothing is committed.
    pub async fn handle_request(
        &self,
        session_id: &str,
        utterance: &str,
    ) -> Result<GenerationSuccess, GenerationFailure> {
        let span = tracing::info_span!(
            "request",
            session_id = %session_id,
            request_id = %uuid::Uuid::new_v4()
        );
        self.run_loop(session_id, utterance).instrument(span).await
    }

    /// Renders a user-supplied program once, without generation or retries.
    pub async fn render_program(
        &self,
        session_id: &str,
        program: &str,
    ) -> Result<GenerationSuccess, GenerationFailure> {
        render_once(&self.executor, &self.store, session_id, program).await
    }

    async fn run_loop(
        &self,
        session_id: &str,
        utterance: &str,
    ) -> Result<GenerationSuccess, GenerationFailure> {
        let committed = self.store.get(session_id);
        let turn_index = self.store.turn_count(session_id);
        let history = self.store.history(session_id, self.history_turns);

        // Failing program and diagnostic of the latest attempt that produced text.
        let mut feedback: Option<(String, String)> = None;
        let mut last_program: Option<String> = None;
        let mut last_diagnostic = String::new();

        for attempt in 1..=self.max_attempts {
            tracing::debug!(attempt, state = "compose");
            let request = build_request(
                utterance,
                committed.as_ref(),
                feedback.as_ref(),
                turn_index,
                &history,
            );
            let prompt = compose(&request)?;

            match self.run_attempt(attempt, &prompt).await {
                AttemptOutcome::Rendered { program, execution } => {
                    tracing::info!(attempt, state = "succeed", "attempt rendered");
                    return commit_execution(
                        &self.store,
                        session_id,
                        utterance,
                        program,
                        execution,
                        attempt,
                    );
                }
                AttemptOutcome::Failed {
                    program,
                    diagnostic,
                } => {
                    let next = if attempt < self.max_attempts {
                        "retry"
                    } else {
                        "abort"
                    };
                    tracing::info!(
                        attempt,
                        state = next,
                        diagnostic = %last_line(&diagnostic),
                        "attempt failed"
                    );

                    if let Some(program) = program {
                        feedback = Some((program.clone(), diagnostic.clone()));
                        last_program = Some(program);
                    }
                    last_diagnostic = diagnostic;
                }
                AttemptOutcome::Aborted(err) => {
                    tracing::error!(attempt, error = %err, "request aborted");
                    return Err(err.into());
                }
            }
        }

        tracing::warn!(attempts = self.max_attempts, "attempts exhausted");
        Err(GenerationFailure::Exhausted {
            diagnostic: last_diagnostic,
            last_program,
            attempts: self.max_attempts,
        })
    }

    async fn run_attempt(&self, attempt: u32, prompt: &ComposedPrompt) -> AttemptOutcome {
        tracing::debug!(attempt, state = "generate", kind = ?prompt.kind);
        let raw = match self.generator.complete(prompt).await {
            Ok(raw) => raw,
            Err(e) if e.is_attempt_failure() => {
                return AttemptOutcome::Failed {
                    program: None,
                    diagnostic: e.diagnostic(),
                }
            }
            Err(e) => return AttemptOutcome::Aborted(e),
        };

        let program = match extract_program(&raw) {
            Ok(program) => program,
            Err(e) => {
                let raw = raw.trim();
                return AttemptOutcome::Failed {
                    program: (!raw.is_empty()).then(|| raw.to_string()),
                    diagnostic: e.diagnostic(),
                };
            }
        };

        tracing::debug!(attempt, state = "execute", executor = %self.executor.name());
        match self.executor.execute(&program).await {
            Ok(execution) => AttemptOutcome::Rendered { program, execution },
            Err(e) if e.is_attempt_failure() => AttemptOutcome::Failed {
                program: Some(program),
                diagnostic: e.diagnostic(),
            },
            Err(e) => AttemptOutcome::Aborted(e),
        }
    }
}

/// Renders `program` once and commits it on success.
///
/// Needs no code generator; failures are `Exhausted` with one attempt.
pub async fn render_once<E: Executor + ?Sized>(
    executor: &E,
    store: &SessionStore,
    session_id: &str,
    program: &str,
) -> Result<GenerationSuccess, GenerationFailure> {
    let span = tracing::info_span!("render", session_id = %session_id);
    async {
        match executor.execute(program).await {
            Ok(execution) => commit_execution(
                store,
                session_id,
                MANUAL_RENDER_UTTERANCE,
                program.to_string(),
                execution,
                1,
            ),
            Err(e) if e.is_attempt_failure() => Err(GenerationFailure::Exhausted {
                diagnostic: e.diagnostic(),
                last_program: Some(program.to_string()),
                attempts: 1,
            }),
            Err(e) => Err(e.into()),
        }
    }
    .instrument(span)
    .await
}

fn commit_execution(
    store: &SessionStore,
    session_id: &str,
    utterance: &str,
    program: String,
    mut execution: Execution,
    attempts: u32,
) -> Result<GenerationSuccess, GenerationFailure> {
    let scene = store.commit(
        session_id,
        utterance,
        &program,
        &execution.artifact,
        attempts,
    )?;

    if let Err(e) = execution.workdir.cleanup() {
        tracing::warn!(error = %e, "failed to remove winning attempt directory");
    }

    Ok(GenerationSuccess {
        program: scene.program,
        artifact: scene.artifact,
        attempts,
        logs: execution.logs,
    })
}

fn build_request(
    utterance: &str,
    committed: Option<&CommittedScene>,
    feedback: Option<&(String, String)>,
    turn_index: usize,
    history: &[String],
) -> GenerationRequest {
    let mut request = GenerationRequest::new(utterance)
        .with_turn_index(turn_index)
        .with_history(history.to_vec());

    if let Some(scene) = committed {
        request = request.with_prior_program(scene.program.clone());
    }

    if let Some((program, diagnostic)) = feedback {
        request = request
            .with_prior_program(program.clone())
            .with_prior_error(diagnostic.clone());
    }

    request
}

fn last_line(text: &str) -> &str {
    text.lines().last().unwrap_or_default()
}
