use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ripper_core::{CompletionRequest, LlmProvider, ProviderError};

use super::{ensure_success, join_url, map_transport_error};

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI chat completions.
pub struct OpenAiProvider {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            api_key: api_key.into(),
            http,
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatRequest {
            model: &request.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(model = %request.model, "OpenAI chat request");

        let response = self
            .http
            .post(join_url(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, request.timeout))?;

        let response: ChatResponse = ensure_success(response, request.timeout)
            .await?
            .json()
            .await
            .map_err(|e| map_transport_error(e, request.timeout))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hi there"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider =
            OpenAiProvider::new("sk-test", reqwest::Client::new()).with_base_url(server.uri());
        let request = CompletionRequest::new("gpt-4o-mini", "hello").with_system("be brief");

        assert_eq!(provider.complete(&request).await.unwrap(), "hi there");
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limit"))
            .mount(&server)
            .await;

        let provider =
            OpenAiProvider::new("sk-test", reqwest::Client::new()).with_base_url(server.uri());
        let err = provider
            .complete(&CompletionRequest::new("gpt-4o-mini", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::RateLimited(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_auth_failure_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let provider =
            OpenAiProvider::new("sk-bad", reqwest::Client::new()).with_base_url(server.uri());
        let err = provider
            .complete(&CompletionRequest::new("gpt-4o-mini", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Authentication(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(std::time::Duration::from_secs(2))
                    .set_body_json(json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let provider =
            OpenAiProvider::new("sk-test", reqwest::Client::new()).with_base_url(server.uri());
        let request = CompletionRequest::new("gpt-4o-mini", "hello")
            .with_timeout(std::time::Duration::from_millis(200));
        let err = provider.complete(&request).await.unwrap_err();

        assert!(matches!(err, ProviderError::Timeout(_)));
    }
}
