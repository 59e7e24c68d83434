//! LLM provider clients.
//!
//! Each provider speaks its own wire format but exposes the same
//! [`LlmProvider`](ripper_core::LlmProvider) capability. Transport and HTTP
//! failures are mapped onto [`ProviderError`] so the retry utility can tell
//! transient from terminal failures.

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod registry;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use registry::{CostTier, ModelInfo, ProviderInfo, ProviderRegistry};

use std::time::Duration;

use ripper_core::ProviderError;

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

pub(crate) fn map_transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_decode() {
        ProviderError::InvalidResponse(err.to_string())
    } else if let Some(status) = err.status() {
        ProviderError::from_status(status.as_u16(), err.to_string())
    } else {
        ProviderError::Connection(err.to_string())
    }
}

/// Turn a non-success response into a classified error.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .map_err(|e| map_transport_error(e, timeout))?;
    Err(ProviderError::from_status(
        status.as_u16(),
        truncate_to_char_boundary(body.trim(), MAX_ERROR_BODY),
    ))
}

pub(crate) fn truncate_to_char_boundary(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_char_boundary() {
        assert_eq!(truncate_to_char_boundary("short", 10), "short");
        assert_eq!(truncate_to_char_boundary("héllo", 2), "h...");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://x/v1/", "/chat"), "http://x/v1/chat");
        assert_eq!(join_url("http://x", "api/generate"), "http://x/api/generate");
    }
}
