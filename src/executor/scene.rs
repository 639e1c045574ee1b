//! Static checks on scene programs before they are rendered.

use crate::error::{Error, Result};

const REQUIRED_IMPORTS: &[&str] = &["from manim import *", "import manim"];

/// Rejects programs that cannot possibly render.
pub fn validate_scene_program(program: &str) -> Result<()> {
    if !REQUIRED_IMPORTS.iter().any(|imp| program.contains(imp)) {
        return Err(validation_error(
            "program must include 'from manim import *' or 'import manim'",
        ));
    }

    if !program.contains("class") {
        return Err(validation_error(
            "program must contain at least one class definition",
        ));
    }

    if !program.contains("Scene") {
        return Err(validation_error(
            "class must inherit from Scene or a Scene subclass",
        ));
    }

    Ok(())
}

fn validation_error(reason: &str) -> Error {
    Error::Execution(format!("validation error: {}", reason))
}

/// Name of the first class that mentions `Scene`, e.g. `MyScene` for
/// `class MyScene(MovingCameraScene):`.
pub fn find_scene_class(program: &str) -> Option<String> {
    program.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("class ")?;
        if !line.contains("Scene") {
            return None;
        }
        let name = rest
            .split(|c: char| c == '(' || c == ':')
            .next()
            .unwrap_or_default()
            .trim();
        let valid = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
        valid.then(|| name.to_string())
    })
}
