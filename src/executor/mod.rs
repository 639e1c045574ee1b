//! Sandboxed execution of scene programs.
//!
//! An [`Executor`] renders one program inside a fresh working directory and
//! either hands back the produced artifact (with the directory that still owns
//! it) or fails with `Error::Execution` carrying a bounded diagnostic.

mod manim;
pub mod scene;

pub use manim::ManimExecutor;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::sandbox::WorkDir;

/// Name of the program file written into each working directory.
pub const SCENE_FILE: &str = "scene.py";

/// A successful render.
///
/// The artifact lives inside `workdir`; it must be moved out before the
/// working directory is dropped.
#[derive(Debug)]
pub struct Execution {
    pub workdir: WorkDir,
    pub artifact: PathBuf,
    /// Engine output, for display.
    pub logs: String,
}

/// Trait for scene executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Renders `program`. Failures the model can fix are `Error::Execution`.
    ///
    /// Dropping the returned future terminates any running engine process
    /// and removes its working directory.
    async fn execute(&self, program: &str) -> Result<Execution>;

    /// Returns the name of this executor.
    fn name(&self) -> &str;
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for Box<E> {
    async fn execute(&self, program: &str) -> Result<Execution> {
        (**self).execute(program).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Keeps the last `max_chars` characters of `text`, marking the cut.
pub fn tail_diagnostic(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let tail: String = text.chars().skip(total - max_chars).collect();
    format!("…{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(tail_diagnostic("  boom \n", 100), "boom");
    }

    #[test]
    fn long_text_keeps_the_end() {
        let text = format!("{}NameError: X", "a".repeat(1000));
        let tail = tail_diagnostic(&text, 12);
        assert_eq!(tail, "…NameError: X");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "ééééééé error";
        let tail = tail_diagnostic(text, 8);
        assert_eq!(tail, "…éé error");
    }
}
