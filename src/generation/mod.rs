//! Code generation clients.
//!
//! A [`CodeGenerator`] turns a composed prompt into raw response text. The
//! provider's wire format stays inside the implementation; callers see text
//! or a typed error, and pull the program out with [`extract_program`].

mod extract;
mod fal;

pub use extract::extract_program;
pub use fal::FalGenerator;

use std::time::Duration;

use async_trait::async_trait;

use crate::backoff::ExponentialBackoff;
use crate::error::{Error, Result};
use crate::prompt::ComposedPrompt;

/// Longest pause between transport retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);

/// Trait for code-generation services.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Sends the prompt and returns the model's raw answer.
    ///
    /// Transport and availability problems are `Error::GenerationService`.
    async fn complete(&self, prompt: &ComposedPrompt) -> Result<String>;

    /// Returns the name of this generator.
    fn name(&self) -> &str;
}

#[async_trait]
impl<G: CodeGenerator + ?Sized> CodeGenerator for Box<G> {
    async fn complete(&self, prompt: &ComposedPrompt) -> Result<String> {
        (**self).complete(prompt).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Retries transport failures with the unchanged prompt.
pub struct RetryingGenerator<G> {
    inner: G,
    retries: u32,
    initial_delay: Duration,
}

impl<G: CodeGenerator> RetryingGenerator<G> {
    /// Wraps `inner`, allowing `retries` extra tries after a service error.
    pub fn new(inner: G, retries: u32, initial_delay: Duration) -> Self {
        Self {
            inner,
            retries,
            initial_delay,
        }
    }

    /// Returns the wrapped generator.
    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: CodeGenerator> CodeGenerator for RetryingGenerator<G> {
    async fn complete(&self, prompt: &ComposedPrompt) -> Result<String> {
        let mut backoff = ExponentialBackoff::new(self.initial_delay, MAX_RETRY_DELAY);
        let mut tries = 0;

        loop {
            match self.inner.complete(prompt).await {
                Err(Error::GenerationService(reason)) if tries < self.retries => {
                    tries += 1;
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        generator = %self.inner.name(),
                        retry = tries,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "generation service failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
