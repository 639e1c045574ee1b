//! Prompt composition for the code-generation model.
//!
//! Three framings exist: a first request, an edit of the session's last
//! program, and a correction of a failed attempt. Composition is pure; the
//! same request always produces the same prompt.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scene class name every generated program must define.
pub const SCENE_CLASS_NAME: &str = "MyScene";

/// Rules shared by every framing.
const ENGINE_CONVENTIONS: &str = "\
- Use Manim Community v0.19 syntax only.
- Start the program with `from manim import *`.
- When creating an Axes object, do not pass axis_color as a keyword argument; use axis_config={\"color\": ...} instead.
- Avoid deprecated or unavailable methods such as get_tangent_line; construct tangent lines manually using the slope and Line(...).
- Keep visuals well spaced, readable and never overlapping, and keep everything inside the canvas.
- Place text carefully using .to_edge(), .next_to() or .shift().
- Only include coordinate axes, graphs, tangent lines or shapes if they are necessary.";

/// Which framing a prompt uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// First request in a session.
    Initial,
    /// Modify the session's last successful program.
    FollowUp,
    /// Repair a program that failed.
    Retry,
}

/// Inputs for one prompt. Built once per attempt and consumed by [`compose`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    /// What the user asked for in this turn.
    pub utterance: String,
    /// Committed program (follow-up) or failing program (retry).
    pub prior_program: Option<String>,
    /// Diagnostic of the failed attempt being corrected.
    pub prior_error: Option<String>,
    /// Number of turns already committed in the session.
    pub turn_index: usize,
    /// Earlier utterances in the session, oldest first.
    pub history: Vec<String>,
}

impl GenerationRequest {
    /// Creates a first-turn request.
    pub fn new(utterance: impl Into<String>) -> Self {
        Self {
            utterance: utterance.into(),
            ..Default::default()
        }
    }

    /// Attaches the program to modify or repair.
    pub fn with_prior_program(mut self, program: impl Into<String>) -> Self {
        self.prior_program = Some(program.into());
        self
    }

    /// Attaches the diagnostic of a failed attempt.
    pub fn with_prior_error(mut self, diagnostic: impl Into<String>) -> Self {
        self.prior_error = Some(diagnostic.into());
        self
    }

    /// Sets the turn index.
    pub fn with_turn_index(mut self, turn_index: usize) -> Self {
        self.turn_index = turn_index;
        self
    }

    /// Sets the earlier utterances.
    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    /// The framing this request calls for.
    pub fn kind(&self) -> PromptKind {
        if self.prior_error.is_some() {
            PromptKind::Retry
        } else if self.prior_program.is_some() || self.turn_index > 0 {
            PromptKind::FollowUp
        } else {
            PromptKind::Initial
        }
    }
}

/// A prompt ready for the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedPrompt {
    pub kind: PromptKind,
    /// System framing: engine conventions and output constraints.
    pub system: String,
    /// The instruction itself.
    pub user: String,
}

/// Builds the prompt for `request`.
pub fn compose(request: &GenerationRequest) -> Result<ComposedPrompt> {
    let kind = request.kind();
    let (system, user) = match kind {
        PromptKind::Initial => (initial_system(), request.utterance.trim().to_string()),
        PromptKind::FollowUp => {
            let program = request.prior_program.as_deref().ok_or_else(|| {
                Error::Composition(format!(
                    "follow-up turn {} has no committed program",
                    request.turn_index
                ))
            })?;
            (edit_system(), follow_up_user(request, program))
        }
        PromptKind::Retry => {
            let program = request.prior_program.as_deref().ok_or_else(|| {
                Error::Composition("retry requested without the failing program".to_string())
            })?;
            let diagnostic = request.prior_error.as_deref().unwrap_or_default();
            (retry_system(), retry_user(request, program, diagnostic))
        }
    };

    tracing::debug!(
        kind = ?kind,
        turn_index = request.turn_index,
        user_len = user.len(),
        "composed prompt"
    );

    Ok(ComposedPrompt { kind, system, user })
}

fn output_constraints(prompt: &mut String) {
    prompt.push_str("### Output\n\n");
    prompt.push_str(&format!(
        "- The scene class must be named `{}` and inherit from Scene.\n",
        SCENE_CLASS_NAME
    ));
    prompt.push_str("- Always conclude construct() with `self.wait()`.\n");
    prompt.push_str(
        "- Return the full program in exactly one ```python fenced code block and nothing else.\n",
    );
}

fn initial_system() -> String {
    let mut prompt = String::new();

    prompt.push_str("You are a senior math educator and Manim Community v0.19 expert.\n");
    prompt.push_str(
        "Write a Manim program that visualizes the user's request. Focus on producing working code.\n\n",
    );

    prompt.push_str("### Conventions\n\n");
    prompt.push_str(ENGINE_CONVENTIONS);
    prompt.push_str("\n\n");

    output_constraints(&mut prompt);
    prompt
}

fn edit_system() -> String {
    let mut prompt = String::new();

    prompt.push_str("You are a Manim expert. You will receive an existing Manim program and an instruction on how to modify it.\n\n");

    prompt.push_str("### Rules\n\n");
    prompt.push_str("- Only modify what is necessary to satisfy the instruction.\n");
    prompt.push_str("- The class name must remain unchanged.\n");
    prompt.push_str(ENGINE_CONVENTIONS);
    prompt.push_str("\n\n");

    output_constraints(&mut prompt);
    prompt
}

fn retry_system() -> String {
    let mut prompt = String::new();

    prompt.push_str("You are a Manim expert fixing a program that failed to render.\n\n");

    prompt.push_str("### Rules\n\n");
    prompt.push_str("- Fix the cause of the reported error; keep everything else intact.\n");
    prompt.push_str("- The result must still satisfy the original instruction.\n");
    prompt.push_str(ENGINE_CONVENTIONS);
    prompt.push_str("\n\n");

    output_constraints(&mut prompt);
    prompt
}

fn fenced(prompt: &mut String, lang: &str, body: &str) {
    prompt.push_str("```");
    prompt.push_str(lang);
    prompt.push('\n');
    prompt.push_str(body.trim_end());
    prompt.push_str("\n```\n\n");
}

fn follow_up_user(request: &GenerationRequest, program: &str) -> String {
    let mut prompt = String::new();

    if !request.history.is_empty() {
        prompt.push_str("## Earlier Requests\n\n");
        for (i, utterance) in request.history.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, utterance.trim()));
        }
        prompt.push('\n');
    }

    prompt.push_str("## Current Program\n\n");
    fenced(&mut prompt, "python", program);

    prompt.push_str("## Instruction\n\n");
    prompt.push_str("Modify this program to satisfy the new instruction:\n\n");
    prompt.push_str(request.utterance.trim());
    prompt.push('\n');

    prompt
}

fn retry_user(request: &GenerationRequest, program: &str, diagnostic: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Original Instruction\n\n");
    prompt.push_str(request.utterance.trim());
    prompt.push_str("\n\n");

    prompt.push_str("## Failing Program\n\n");
    fenced(&mut prompt, "python", program);

    prompt.push_str("## Error\n\n");
    fenced(&mut prompt, "", diagnostic);

    prompt.push_str("This program failed with the error above. Produce a corrected version that still satisfies the original instruction.\n");

    prompt
}
