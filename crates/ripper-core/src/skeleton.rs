//! Extraction records ("skeletons").
//!
//! The model returns loosely typed JSON objects ([`RawSkeleton`]). A record
//! only becomes an [`ExtractionRecord`] after [`RawSkeleton::validate`] has
//! accepted every required field, so a partially populated record can never
//! reach the result set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::types::{ModelSelection, Platform, SourceItem};

/// Opening technique used by the first sentences of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookTechnique {
    Curiosity,
    Contrast,
    Result,
    Question,
    Story,
    Shock,
}

impl HookTechnique {
    pub const ALL: [HookTechnique; 6] = [
        HookTechnique::Curiosity,
        HookTechnique::Contrast,
        HookTechnique::Result,
        HookTechnique::Question,
        HookTechnique::Story,
        HookTechnique::Shock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookTechnique::Curiosity => "curiosity",
            HookTechnique::Contrast => "contrast",
            HookTechnique::Result => "result",
            HookTechnique::Question => "question",
            HookTechnique::Story => "story",
            HookTechnique::Shock => "shock",
        }
    }
}

/// How the body of a video delivers its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueStructure {
    Steps,
    SingleInsight,
    Framework,
    Story,
    Listicle,
    Transformation,
}

impl ValueStructure {
    pub const ALL: [ValueStructure; 6] = [
        ValueStructure::Steps,
        ValueStructure::SingleInsight,
        ValueStructure::Framework,
        ValueStructure::Story,
        ValueStructure::Listicle,
        ValueStructure::Transformation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueStructure::Steps => "steps",
            ValueStructure::SingleInsight => "single_insight",
            ValueStructure::Framework => "framework",
            ValueStructure::Story => "story",
            ValueStructure::Listicle => "listicle",
            ValueStructure::Transformation => "transformation",
        }
    }
}

/// Closing call to action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtaType {
    Follow,
    Comment,
    Share,
    Link,
    None,
}

impl CtaType {
    pub const ALL: [CtaType; 5] = [
        CtaType::Follow,
        CtaType::Comment,
        CtaType::Share,
        CtaType::Link,
        CtaType::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CtaType::Follow => "follow",
            CtaType::Comment => "comment",
            CtaType::Share => "share",
            CtaType::Link => "link",
            CtaType::None => "none",
        }
    }
}

macro_rules! label_enum {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_lowercase().replace([' ', '-'], "_");
                <$ty>::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| s.to_string())
            }
        }
    };
}

label_enum!(HookTechnique);
label_enum!(ValueStructure);
label_enum!(CtaType);

/// Why a returned record was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkeletonRejection {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: {value}")]
    InvalidLabel { field: &'static str, value: String },
}

/// A record exactly as the model produced it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawSkeleton {
    #[serde(default, alias = "item_id", alias = "id")]
    pub video_id: Option<Value>,
    #[serde(default)]
    pub hook: Option<Value>,
    #[serde(default)]
    pub hook_technique: Option<Value>,
    #[serde(default)]
    pub hook_word_count: Option<Value>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub value_structure: Option<Value>,
    #[serde(default)]
    pub value_points: Option<Value>,
    #[serde(default)]
    pub cta: Option<Value>,
    #[serde(default)]
    pub cta_type: Option<Value>,
    #[serde(default)]
    pub total_word_count: Option<Value>,
    #[serde(default)]
    pub estimated_duration_seconds: Option<Value>,
}

fn text(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn count(value: &Option<Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n.as_f64().map(|f| f.max(0.0).round() as u32).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(|f| f.max(0.0).round() as u32).unwrap_or(0),
        _ => 0,
    }
}

fn seconds(value: &Option<Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0).max(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0).max(0.0),
        _ => 0.0,
    }
}

impl RawSkeleton {
    /// Item id the model attributed this record to.
    pub fn item_id(&self) -> Option<String> {
        text(&self.video_id)
    }

    /// Check required fields and labels. Hook, value and call-to-action text
    /// must be non-empty and every label must be a known one.
    pub fn validate(&self) -> Result<Skeleton, SkeletonRejection> {
        let required = |field: &'static str, v: &Option<Value>| {
            text(v).ok_or(SkeletonRejection::MissingField(field))
        };

        required("video_id", &self.video_id)?;
        let hook = required("hook", &self.hook)?;
        let hook_technique = required("hook_technique", &self.hook_technique)?;
        let value = required("value", &self.value)?;
        let value_structure = required("value_structure", &self.value_structure)?;
        let cta = required("cta", &self.cta)?;
        let cta_type = required("cta_type", &self.cta_type)?;

        let hook_technique = hook_technique.parse::<HookTechnique>().map_err(|value| {
            SkeletonRejection::InvalidLabel {
                field: "hook_technique",
                value,
            }
        })?;
        let value_structure = value_structure.parse::<ValueStructure>().map_err(|value| {
            SkeletonRejection::InvalidLabel {
                field: "value_structure",
                value,
            }
        })?;
        let cta_type = cta_type.parse::<CtaType>().map_err(|value| {
            SkeletonRejection::InvalidLabel {
                field: "cta_type",
                value,
            }
        })?;

        let value_points = match &self.value_points {
            Some(Value::Array(points)) => points
                .iter()
                .filter_map(|p| text(&Some(p.clone())))
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
            _ => Vec::new(),
        };

        Ok(Skeleton {
            hook,
            hook_technique,
            hook_word_count: count(&self.hook_word_count),
            value,
            value_structure,
            value_points,
            cta,
            cta_type,
            total_word_count: count(&self.total_word_count),
            estimated_duration_seconds: seconds(&self.estimated_duration_seconds),
        })
    }
}

/// The validated structural fields of one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    pub hook: String,
    pub hook_technique: HookTechnique,
    #[serde(default)]
    pub hook_word_count: u32,
    pub value: String,
    pub value_structure: ValueStructure,
    #[serde(default)]
    pub value_points: Vec<String>,
    pub cta: String,
    pub cta_type: CtaType,
    #[serde(default)]
    pub total_word_count: u32,
    #[serde(default)]
    pub estimated_duration_seconds: f64,
}

/// A fully populated extraction result for one source item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub item_id: String,
    pub creator: String,
    pub platform: Platform,
    #[serde(flatten)]
    pub skeleton: Skeleton,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub transcript: String,
    pub extraction_model: String,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractionRecord {
    pub fn new(skeleton: Skeleton, item: &SourceItem, model: &ModelSelection) -> Self {
        Self {
            item_id: item.id.clone(),
            creator: item.source.creator.clone(),
            platform: item.source.platform,
            skeleton,
            views: item.views,
            likes: item.likes,
            url: item.url.clone(),
            transcript: item.transcript.clone().unwrap_or_default(),
            extraction_model: model.to_string(),
            extracted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawSkeleton {
        serde_json::from_value(value).unwrap()
    }

    fn complete() -> Value {
        json!({
            "video_id": "abc",
            "hook": "Stop doing this one thing",
            "hook_technique": "contrast",
            "hook_word_count": 6,
            "value": "Explains the better way",
            "value_structure": "Single Insight",
            "value_points": ["one", "two"],
            "cta": "Follow for more",
            "cta_type": "follow",
            "total_word_count": "120",
            "estimated_duration_seconds": 42.5
        })
    }

    #[test]
    fn test_validate_accepts_complete_record() {
        let skeleton = raw(complete()).validate().unwrap();
        assert_eq!(skeleton.hook_technique, HookTechnique::Contrast);
        assert_eq!(skeleton.value_structure, ValueStructure::SingleInsight);
        assert_eq!(skeleton.total_word_count, 120);
        assert_eq!(skeleton.value_points.len(), 2);
    }

    #[test]
    fn test_validate_rejects_empty_required_fields() {
        let mut value = complete();
        value["cta"] = json!("   ");
        assert_eq!(
            raw(value).validate(),
            Err(SkeletonRejection::MissingField("cta"))
        );

        let mut value = complete();
        value.as_object_mut().unwrap().remove("hook");
        assert_eq!(
            raw(value).validate(),
            Err(SkeletonRejection::MissingField("hook"))
        );
    }

    #[test]
    fn test_validate_rejects_unknown_labels() {
        let mut value = complete();
        value["cta_type"] = json!("subscribe");
        assert!(matches!(
            raw(value).validate(),
            Err(SkeletonRejection::InvalidLabel { field: "cta_type", .. })
        ));
    }

    #[test]
    fn test_numeric_video_id() {
        let mut value = complete();
        value["video_id"] = json!(12345);
        assert_eq!(raw(value).item_id().as_deref(), Some("12345"));
    }

    #[test]
    fn test_record_serializes_flat() {
        let skeleton = raw(complete()).validate().unwrap();
        let item = SourceItem::new("abc", crate::SourceRef::new(Platform::Instagram, "alice"))
            .with_metrics(1000, 50)
            .with_transcript("hello");
        let record = ExtractionRecord::new(skeleton, &item, &ModelSelection::new("openai", "gpt-4o-mini"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["hook_technique"], "contrast");
        assert_eq!(value["extraction_model"], "openai/gpt-4o-mini");
        assert_eq!(value["views"], 1000);
    }
}
