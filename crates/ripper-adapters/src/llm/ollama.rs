use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ripper_core::{CompletionRequest, LlmProvider, ProviderError};

use super::{ensure_success, join_url, map_transport_error};

pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Local models served by Ollama. No API key.
pub struct OllamaProvider {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: OLLAMA_DEFAULT_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        debug!(model = %request.model, "Ollama generate request");

        let response = self
            .http
            .post(join_url(&self.base_url, "api/generate"))
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, request.timeout))?;

        let response: GenerateResponse = ensure_success(response, request.timeout)
            .await?
            .json()
            .await
            .map_err(|e| map_transport_error(e, request.timeout))?;

        if response.response.trim().is_empty() {
            return Err(ProviderError::InvalidResponse("empty response".to_string()));
        }
        Ok(response.response)
    }
}
