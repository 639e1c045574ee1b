//! Program extraction from model responses.
//!
//! The model is told to answer with exactly one fenced code block. Anything
//! else (prose only, an unterminated fence, several blocks) is rejected so the
//! correction loop can ask again.

use crate::error::{Error, Result, EXTRACTION_DIAGNOSTIC};

const FENCE: &str = "```";

/// Returns the body of the single fenced block in `response`.
pub fn extract_program(response: &str) -> Result<String> {
    let blocks = fenced_blocks(response);

    if blocks.len() != 1 {
        tracing::debug!(blocks = blocks.len(), "response rejected by extraction");
        return Err(Error::Extraction(EXTRACTION_DIAGNOSTIC.to_string()));
    }

    Ok(blocks.into_iter().next().unwrap_or_default())
}

/// Collects the trimmed bodies of all complete, non-empty fenced blocks.
fn fenced_blocks(response: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in response.lines() {
        let trimmed = line.trim();

        match current.as_mut() {
            None => {
                if let Some(rest) = trimmed.strip_prefix(FENCE) {
                    // A one-line block like ```x = 1``` is not a program.
                    if rest.ends_with(FENCE) {
                        continue;
                    }
                    current = Some(Vec::new());
                }
            }
            Some(body) => {
                if trimmed.starts_with(FENCE) {
                    push_block(&mut blocks, body);
                    current = None;
                } else if let Some(head) = line.trim_end().strip_suffix(FENCE) {
                    body.push(head);
                    push_block(&mut blocks, body);
                    current = None;
                } else {
                    body.push(line);
                }
            }
        }
    }

    blocks
}

fn push_block(blocks: &mut Vec<String>, body: &[&str]) {
    let text = body.join("\n");
    let text = text.trim();
    if !text.is_empty() {
        blocks.push(text.to_string());
    }
}
