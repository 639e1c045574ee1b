//! fal.ai `any-llm` client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::prompt::ComposedPrompt;
use crate::secrets::{ApiKey, SecretSource};

use super::CodeGenerator;

/// Longest slice of an error body quoted in a diagnostic.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Serialize)]
struct AnyLlmRequest<'a> {
    prompt: &'a str,
    system_prompt: &'a str,
    model: &'a str,
    priority: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnyLlmResponse {
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: Option<String>,
}

/// Generator backed by an any-llm compatible HTTP endpoint.
pub struct FalGenerator {
    client: Client,
    endpoint: String,
    model: String,
    priority: String,
    api_key: ApiKey,
}

impl FalGenerator {
    /// Creates a client with an explicit key.
    pub fn new(config: &GenerationConfig, api_key: ApiKey) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("scene-forge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            priority: config.priority.clone(),
            api_key,
        })
    }

    /// Creates a client, resolving the key from the configured source.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = ApiKey::resolve(&SecretSource::for_generation(config))?;
        Self::new(config, api_key)
    }

    /// Returns the model selector sent with each request.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn service_error(&self, detail: impl AsRef<str>) -> Error {
        Error::GenerationService(self.api_key.redact(detail.as_ref()))
    }
}

#[async_trait]
impl CodeGenerator for FalGenerator {
    async fn complete(&self, prompt: &ComposedPrompt) -> Result<String> {
        let body = AnyLlmRequest {
            prompt: &prompt.user,
            system_prompt: &prompt.system,
            model: &self.model,
            priority: &self.priority,
        };

        tracing::info!(
            endpoint = %self.endpoint,
            model = %self.model,
            kind = ?prompt.kind,
            "requesting program from generation service"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Key {}", self.api_key.expose()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    self.service_error("request timed out")
                } else {
                    self.service_error(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(self.service_error(format!("HTTP {}: {}", status.as_u16(), snippet)));
        }

        let parsed: AnyLlmResponse = response
            .json()
            .await
            .map_err(|e| self.service_error(format!("undecodable response: {}", e)))?;

        if parsed.output.trim().is_empty() {
            return Err(match parsed.error {
                Some(error) => self.service_error(format!("service reported: {}", error)),
                None => self.service_error("empty output"),
            });
        }

        tracing::debug!(chars = parsed.output.len(), "generation service answered");
        Ok(parsed.output)
    }

    fn name(&self) -> &str {
        "fal-any-llm"
    }
}
