use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::{PipelineConfig, MAX_SOURCES};
use crate::error::ValidationError;

// Newtype wrappers for type safety

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// Source types

/// Social platform a creator publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Tiktok,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Tiktok => "tiktok",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "instagram" | "ig" => Ok(Platform::Instagram),
            "tiktok" | "tt" => Ok(Platform::Tiktok),
            other => Err(ValidationError::UnknownPlatform(other.to_string())),
        }
    }
}

/// One content source: a creator on a platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub platform: Platform,
    pub creator: String,
}

impl SourceRef {
    pub fn new(platform: Platform, creator: impl Into<String>) -> Self {
        Self {
            platform,
            creator: creator.into(),
        }
    }

    /// Display handle, e.g. `@creator`.
    pub fn handle(&self) -> String {
        format!("@{}", self.creator)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:@{}", self.platform, self.creator)
    }
}

/// Provider and model used for every LLM call of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSelection {
    pub provider: String,
    pub model: String,
}

impl ModelSelection {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

// Request types

/// A batch analysis request as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub sources: Vec<SourceRef>,
    pub items_per_source: u32,
    pub model: ModelSelection,
}

impl AnalysisRequest {
    pub fn new(sources: Vec<SourceRef>, items_per_source: u32, model: ModelSelection) -> Self {
        Self {
            sources,
            items_per_source,
            model,
        }
    }

    /// Upper bound on the number of items this request may process (N x K).
    pub fn total_target(&self) -> usize {
        self.sources.len() * self.items_per_source as usize
    }

    /// Validate and normalize the request against pipeline limits.
    ///
    /// Creator names are trimmed and stripped of a leading `@`, the provider
    /// id is lowercased. Returns the normalized request.
    pub fn normalized(mut self, limits: &PipelineConfig) -> Result<Self, ValidationError> {
        if self.sources.is_empty() {
            return Err(ValidationError::NoSources);
        }
        let max_sources = limits.max_sources.min(MAX_SOURCES);
        if self.sources.len() > max_sources {
            return Err(ValidationError::TooManySources {
                count: self.sources.len(),
                max: max_sources,
            });
        }
        if self.items_per_source == 0 || self.items_per_source > limits.max_items_per_source {
            return Err(ValidationError::InvalidItemCap {
                value: self.items_per_source,
                max: limits.max_items_per_source,
            });
        }

        let mut seen = HashSet::new();
        for source in &mut self.sources {
            let trimmed = source.creator.trim();
            let creator = trimmed.strip_prefix('@').unwrap_or(trimmed).trim().to_string();
            if creator.is_empty() {
                return Err(ValidationError::EmptyCreator);
            }
            let folded = creator.to_lowercase();
            source.creator = creator;
            if !seen.insert((source.platform, folded)) {
                return Err(ValidationError::DuplicateSource(source.to_string()));
            }
        }

        self.model.provider = self.model.provider.trim().to_lowercase();
        self.model.model = self.model.model.trim().to_string();
        if self.model.model.is_empty() {
            return Err(ValidationError::EmptyModel);
        }

        Ok(self)
    }
}

// Item types

/// One unit of input content as returned by the source collaborator.
///
/// Engagement metrics are always fresh from the source; only the transcript
/// is ever served from the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: String,
    pub source: SourceRef,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub from_cache: bool,
}

impl SourceItem {
    pub fn new(id: impl Into<String>, source: SourceRef) -> Self {
        Self {
            id: id.into(),
            source,
            transcript: None,
            views: 0,
            likes: 0,
            url: None,
            from_cache: false,
        }
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    pub fn with_metrics(mut self, views: u64, likes: u64) -> Self {
        self.views = views;
        self.likes = likes;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.source.platform, &self.source.creator, &self.id)
    }
}

/// Transcript cache key: (platform, creator, item id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub platform: Platform,
    pub creator: String,
    pub item_id: String,
}

impl CacheKey {
    /// Creator names are case-insensitive on every supported platform.
    pub fn new(platform: Platform, creator: &str, item_id: &str) -> Self {
        Self {
            platform,
            creator: creator.trim().to_lowercase(),
            item_id: item_id.trim().to_string(),
        }
    }

    /// Flat, filesystem-safe name for this key.
    ///
    /// Each part is escaped so `_` only ever separates parts and distinct
    /// keys never share a file.
    pub fn file_name(&self) -> String {
        format!(
            "{}{}.txt",
            Self::creator_prefix(self.platform, &self.creator),
            escape_segment(&self.item_id)
        )
    }

    /// File name prefix shared by every key of exactly one creator.
    pub fn creator_prefix(platform: Platform, creator: &str) -> String {
        format!(
            "{}_{}_",
            platform,
            escape_segment(&creator.trim().to_lowercase())
        )
    }
}

/// Percent-encode everything outside `[A-Za-z0-9.-]`, so the result holds no
/// `_`, path separator or `%` of its own.
fn escape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' => out.push(byte as char),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.platform, self.creator, self.item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(creators: &[&str], cap: u32) -> AnalysisRequest {
        AnalysisRequest::new(
            creators
                .iter()
                .map(|c| SourceRef::new(Platform::Instagram, *c))
                .collect(),
            cap,
            ModelSelection::new("OpenAI", "gpt-4o-mini"),
        )
    }

    #[test]
    fn test_normalized_strips_handles() {
        let req = request(&["  @alice ", "bob"], 3)
            .normalized(&PipelineConfig::default())
            .unwrap();
        assert_eq!(req.sources[0].creator, "alice");
        assert_eq!(req.sources[1].creator, "bob");
        assert_eq!(req.model.provider, "openai");
        assert_eq!(req.total_target(), 6);
    }

    #[test]
    fn test_normalized_rejects_bad_shapes() {
        let limits = PipelineConfig::default();
        assert_eq!(
            request(&[], 3).normalized(&limits),
            Err(ValidationError::NoSources)
        );
        assert!(matches!(
            request(&["a", "b", "c", "d", "e", "f"], 3).normalized(&limits),
            Err(ValidationError::TooManySources { count: 6, max: 5 })
        ));
        assert!(matches!(
            request(&["a"], 0).normalized(&limits),
            Err(ValidationError::InvalidItemCap { value: 0, .. })
        ));
        assert_eq!(
            request(&["@ "], 2).normalized(&limits),
            Err(ValidationError::EmptyCreator)
        );
        assert!(matches!(
            request(&["Alice", "@alice"], 2).normalized(&limits),
            Err(ValidationError::DuplicateSource(_))
        ));
    }

    #[test]
    fn test_source_ceiling_ignores_looser_limits() {
        let limits = PipelineConfig {
            max_sources: 10,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            request(&["a", "b", "c", "d", "e", "f"], 1).normalized(&limits),
            Err(ValidationError::TooManySources { count: 6, max: 5 })
        ));
        assert!(request(&["a", "b", "c", "d", "e"], 1).normalized(&limits).is_ok());
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!("Instagram".parse::<Platform>().unwrap(), Platform::Instagram);
        assert_eq!(" TIKTOK ".parse::<Platform>().unwrap(), Platform::Tiktok);
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn test_cache_key_file_name() {
        let key = CacheKey::new(Platform::Tiktok, "Some/User", "abc\\123");
        assert_eq!(key.file_name(), "tiktok_some%2Fuser_abc%5C123.txt");
        assert!(key
            .file_name()
            .starts_with(&CacheKey::creator_prefix(Platform::Tiktok, "some/user")));
    }

    #[test]
    fn test_cache_key_file_names_are_unambiguous() {
        let left = CacheKey::new(Platform::Instagram, "a_b", "c");
        let right = CacheKey::new(Platform::Instagram, "a", "b_c");
        assert_ne!(left.file_name(), right.file_name());

        let escaped = CacheKey::new(Platform::Instagram, "a%5Fb", "c");
        assert_ne!(left.file_name(), escaped.file_name());

        let prefix = CacheKey::creator_prefix(Platform::Instagram, "john");
        assert!(!CacheKey::new(Platform::Instagram, "john_doe", "1")
            .file_name()
            .starts_with(&prefix));
        assert!(CacheKey::new(Platform::Instagram, "John", "1")
            .file_name()
            .starts_with(&prefix));
    }

    #[test]
    fn test_normalized_keeps_underscored_handles() {
        let req = request(&["@john_doe", "john"], 1)
            .normalized(&PipelineConfig::default())
            .unwrap();
        assert_eq!(req.sources[0].creator, "john_doe");
        assert_eq!(req.sources[1].creator, "john");
    }

    #[test]
    fn test_job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
