//! HTTP client for the scraper service.
//!
//! The service lists recent items for a creator and downloads and
//! transcribes single items on demand. It implements both the source and
//! the fetch/transcribe collaborator.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use ripper_core::{FetchError, Platform, SourceCollaborator, SourceItem, SourceRef, TranscriptFetcher};

#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(alias = "shortcode", alias = "video_id")]
    id: String,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    views: u64,
    #[serde(default)]
    likes: u64,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ItemsResponse {
    Wrapped { items: Vec<WireItem> },
    Bare(Vec<WireItem>),
}

impl ItemsResponse {
    fn into_items(self) -> Vec<WireItem> {
        match self {
            ItemsResponse::Wrapped { items } => items,
            ItemsResponse::Bare(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    transcript: String,
}

/// Scraper service client.
#[derive(Debug, Clone)]
pub struct ScraperClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ScraperClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn map_transport_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if err.is_decode() {
            FetchError::Terminal(format!("malformed scraper response: {}", err))
        } else {
            FetchError::Transient(err.to_string())
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let response = self
            .http
            .get(&url)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body.trim()));
        }

        response.json().await.map_err(|e| self.map_transport_error(e))
    }
}

fn classify_status(status: u16, body: &str) -> FetchError {
    let message = format!("scraper returned {}: {}", status, body);
    match status {
        404 => FetchError::NotFound(message),
        408 | 429 | 500..=599 => FetchError::Transient(message),
        _ => FetchError::Terminal(message),
    }
}

#[async_trait]
impl SourceCollaborator for ScraperClient {
    async fn list_items(
        &self,
        platform: Platform,
        creator: &str,
        max_items: usize,
    ) -> Result<Vec<SourceItem>, FetchError> {
        debug!(platform = %platform, creator = %creator, max_items, "Listing creator items");

        let response: ItemsResponse = self
            .get_json(
                format!("{}/items", self.base_url),
                &[
                    ("platform", platform.as_str().to_string()),
                    ("creator", creator.to_string()),
                    ("limit", max_items.to_string()),
                ],
            )
            .await?;

        let source = SourceRef::new(platform, creator);
        Ok(response
            .into_items()
            .into_iter()
            .take(max_items)
            .map(|wire| {
                let mut item =
                    SourceItem::new(wire.id, source.clone()).with_metrics(wire.views, wire.likes);
                item.transcript = wire.transcript.filter(|t| !t.trim().is_empty());
                item.url = wire.url;
                item
            })
            .collect())
    }
}

#[async_trait]
impl TranscriptFetcher for ScraperClient {
    async fn fetch_transcript(
        &self,
        platform: Platform,
        creator: &str,
        item_id: &str,
    ) -> Result<String, FetchError> {
        debug!(platform = %platform, creator = %creator, item_id = %item_id, "Fetching transcript");

        let response: TranscriptResponse = self
            .get_json(
                format!(
                    "{}/transcripts/{}/{}/{}",
                    self.base_url,
                    platform.as_str(),
                    creator,
                    item_id
                ),
                &[],
            )
            .await?;
        Ok(response.transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ScraperClient {
        ScraperClient::new(server.uri(), reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_list_items_truncates_to_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("platform", "tiktok"))
            .and(query_param("creator", "alice"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"id": "a", "views": 100, "likes": 5, "transcript": "hello there"},
                    {"id": "b", "views": 50, "transcript": ""},
                    {"id": "c", "views": 10}
                ]
            })))
            .mount(&server)
            .await;

        let items = client(&server)
            .list_items(Platform::Tiktok, "alice", 2)
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "a");
        assert_eq!(items[0].views, 100);
        assert_eq!(items[0].transcript.as_deref(), Some("hello there"));
        assert_eq!(items[1].transcript, None);
        assert_eq!(items[1].source, SourceRef::new(Platform::Tiktok, "alice"));
    }

    #[tokio::test]
    async fn test_bare_list_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"shortcode": "x1", "likes": 3}])),
            )
            .mount(&server)
            .await;

        let items = client(&server)
            .list_items(Platform::Instagram, "bob", 5)
            .await
            .unwrap();
        assert_eq!(items[0].id, "x1");
        assert_eq!(items[0].likes, 3);
    }

    #[tokio::test]
    async fn test_fetch_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transcripts/instagram/bob/x1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"transcript": "the words"})),
            )
            .mount(&server)
            .await;

        let transcript = client(&server)
            .fetch_transcript(Platform::Instagram, "bob", "x1")
            .await
            .unwrap();
        assert_eq!(transcript, "the words");
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transcripts/tiktok/alice/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transcripts/tiktok/alice/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transcripts/tiktok/alice/private"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = client(&server);
        let gone = client
            .fetch_transcript(Platform::Tiktok, "alice", "gone")
            .await
            .unwrap_err();
        assert!(matches!(gone, FetchError::NotFound(_)));

        let busy = client
            .fetch_transcript(Platform::Tiktok, "alice", "busy")
            .await
            .unwrap_err();
        assert!(busy.is_retryable());

        let private = client
            .fetch_transcript(Platform::Tiktok, "alice", "private")
            .await
            .unwrap_err();
        assert!(matches!(private, FetchError::Terminal(_)));
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = client(&server)
            .with_timeout(Duration::from_millis(100))
            .fetch_transcript(Platform::Tiktok, "alice", "a")
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout(Duration::from_millis(100)));
    }
}
