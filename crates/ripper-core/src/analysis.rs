use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::skeleton::{CtaType, ExtractionRecord, HookTechnique, ValueStructure};
use crate::types::Platform;

/// Label to occurrence count, ordered by label.
pub type FrequencyTable = BTreeMap<String, usize>;

/// Per-creator statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorStats {
    pub creator: String,
    pub platform: Platform,
    pub video_count: usize,
    pub total_views: u64,
    pub total_likes: u64,
    pub avg_views: f64,
    pub avg_likes: f64,
    pub avg_hook_word_count: f64,
    pub avg_total_word_count: f64,
    pub avg_duration_seconds: f64,
    pub hook_techniques: FrequencyTable,
    pub value_structures: FrequencyTable,
    pub cta_types: FrequencyTable,
}

/// The fields of a record that the synthesis prompt needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonDigest {
    pub item_id: String,
    pub creator: String,
    pub platform: Platform,
    pub views: u64,
    pub hook: String,
    pub hook_technique: HookTechnique,
    pub hook_word_count: u32,
    pub value: String,
    pub value_structure: ValueStructure,
    pub value_points: Vec<String>,
    pub cta: String,
    pub cta_type: CtaType,
    pub total_word_count: u32,
    pub estimated_duration_seconds: f64,
}

impl From<&ExtractionRecord> for SkeletonDigest {
    fn from(record: &ExtractionRecord) -> Self {
        let s = &record.skeleton;
        Self {
            item_id: record.item_id.clone(),
            creator: record.creator.clone(),
            platform: record.platform,
            views: record.views,
            hook: s.hook.clone(),
            hook_technique: s.hook_technique,
            hook_word_count: s.hook_word_count,
            value: s.value.clone(),
            value_structure: s.value_structure,
            value_points: s.value_points.clone(),
            cta: s.cta.clone(),
            cta_type: s.cta_type,
            total_word_count: s.total_word_count,
            estimated_duration_seconds: s.estimated_duration_seconds,
        }
    }
}

/// Statistics derived purely from a set of extraction records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedView {
    pub total_records: usize,
    pub total_views: u64,
    pub total_likes: u64,
    pub avg_hook_word_count: f64,
    pub avg_total_word_count: f64,
    pub avg_duration_seconds: f64,
    pub hook_techniques: FrequencyTable,
    pub value_structures: FrequencyTable,
    pub cta_types: FrequencyTable,
    pub creators: Vec<CreatorStats>,
    pub digests: Vec<SkeletonDigest>,
    pub aggregated_at: Option<DateTime<Utc>>,
}

impl AggregatedView {
    pub fn creator_count(&self) -> usize {
        self.creators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_records == 0
    }
}

/// One reusable template parsed from the synthesis text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisTemplate {
    pub name: String,
    #[serde(default)]
    pub components: BTreeMap<String, String>,
}

/// Output of the synthesis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisArtifact {
    /// Full markdown analysis as returned by the model.
    pub analysis: String,
    #[serde(default)]
    pub templates: Vec<SynthesisTemplate>,
    #[serde(default)]
    pub quick_wins: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub model_used: String,
    pub synthesized_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}
