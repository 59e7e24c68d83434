use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::{AggregatedView, SynthesisArtifact};
use crate::skeleton::ExtractionRecord;
use crate::types::{AnalysisRequest, JobId};

/// Current on-disk record layout.
pub const JOB_SCHEMA_VERSION: u32 = 1;

/// Stage of a job's state machine.
///
/// Running jobs move strictly forward through
/// `pending -> fetching -> extracting -> aggregating -> synthesizing` and
/// finish in one of the four terminal phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Fetching,
    Extracting,
    Aggregating,
    Synthesizing,
    Complete,
    Error,
    Partial,
    Aborted,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Fetching => "fetching",
            Phase::Extracting => "extracting",
            Phase::Aggregating => "aggregating",
            Phase::Synthesizing => "synthesizing",
            Phase::Complete => "complete",
            Phase::Error => "error",
            Phase::Partial => "partial",
            Phase::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Complete | Phase::Error | Phase::Partial | Phase::Aborted
        )
    }

    pub fn is_running(&self) -> bool {
        !self.is_terminal()
    }

    /// Position in the running sequence; terminal phases have none.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            Phase::Pending => Some(0),
            Phase::Fetching => Some(1),
            Phase::Extracting => Some(2),
            Phase::Aggregating => Some(3),
            Phase::Synthesizing => Some(4),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.ordinal(), next.ordinal()) {
            (Some(from), Some(to)) => to == from + 1,
            (Some(from), None) => match next {
                Phase::Complete | Phase::Partial => from == 4,
                _ => true,
            },
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error or warning accumulated while a job ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobIssue {
    pub phase: Phase,
    #[serde(default)]
    pub item: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl JobIssue {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            item: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn for_item(phase: Phase, item: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item: Some(item.into()),
            ..Self::new(phase, message)
        }
    }
}

impl fmt::Display for JobIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            Some(item) => write!(f, "[{}] {}: {}", self.phase, item, self.message),
            None => write!(f, "[{}] {}", self.phase, self.message),
        }
    }
}

/// Running tallies shown alongside progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobCounters {
    pub total_target: usize,
    pub items_listed: usize,
    pub transcripts_from_cache: usize,
    pub transcripts_fetched: usize,
    pub valid_transcripts: usize,
    pub invalid_transcripts: usize,
    pub records_extracted: usize,
    pub items_failed: usize,
    pub provider_calls: usize,
}

/// Stage outputs attached to a job. Survive later stage failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOutputs {
    pub records: Vec<ExtractionRecord>,
    pub failed_ids: Vec<String>,
    pub coverage: Option<f64>,
    pub aggregated: Option<AggregatedView>,
    pub synthesis: Option<SynthesisArtifact>,
    pub report: Option<String>,
}

/// The complete persisted state of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub id: JobId,
    pub request: AnalysisRequest,
    pub phase: Phase,
    #[serde(default)]
    pub percent: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<JobIssue>,
    #[serde(default)]
    pub counters: JobCounters,
    #[serde(default)]
    pub outputs: JobOutputs,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub abort_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_schema_version() -> u32 {
    JOB_SCHEMA_VERSION
}

impl JobRecord {
    pub fn new(id: JobId, request: AnalysisRequest) -> Self {
        let now = Utc::now();
        let counters = JobCounters {
            total_target: request.total_target(),
            ..Default::default()
        };
        Self {
            schema_version: JOB_SCHEMA_VERSION,
            id,
            request,
            phase: Phase::Pending,
            percent: 0,
            message: "Queued".to_string(),
            errors: Vec::new(),
            counters,
            outputs: JobOutputs::default(),
            asset_id: None,
            abort_requested: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            phase: self.phase,
            percent: self.percent,
            message: self.message.clone(),
            errors: self.errors.clone(),
            counters: self.counters.clone(),
            coverage: self.outputs.coverage,
            asset_id: self.asset_id.clone(),
            abort_requested: self.abort_requested,
            request: self.request.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }
}

/// Read-only view of a job for status polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub phase: Phase,
    pub percent: u8,
    pub message: String,
    pub errors: Vec<JobIssue>,
    pub counters: JobCounters,
    pub coverage: Option<f64>,
    pub asset_id: Option<String>,
    pub abort_requested: bool,
    pub request: AnalysisRequest,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Everything handed to the asset store once a job finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArtifact {
    pub job_id: JobId,
    pub request: AnalysisRequest,
    pub records: Vec<ExtractionRecord>,
    pub failed_ids: Vec<String>,
    pub coverage: f64,
    pub aggregated: AggregatedView,
    pub synthesis: SynthesisArtifact,
    pub report: String,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelSelection, Platform, SourceRef};
    use pretty_assertions::assert_eq;

    fn record() -> JobRecord {
        JobRecord::new(
            JobId::new(),
            AnalysisRequest::new(
                vec![SourceRef::new(Platform::Instagram, "alice")],
                3,
                ModelSelection::new("openai", "gpt-4o-mini"),
            ),
        )
    }

    #[test]
    fn test_phase_transitions() {
        assert!(Phase::Pending.can_transition_to(Phase::Fetching));
        assert!(Phase::Fetching.can_transition_to(Phase::Extracting));
        assert!(!Phase::Fetching.can_transition_to(Phase::Aggregating));
        assert!(!Phase::Extracting.can_transition_to(Phase::Complete));
        assert!(Phase::Synthesizing.can_transition_to(Phase::Complete));
        assert!(Phase::Extracting.can_transition_to(Phase::Aborted));
        assert!(Phase::Aggregating.can_transition_to(Phase::Error));
        assert!(!Phase::Complete.can_transition_to(Phase::Error));
        assert!(!Phase::Aborted.can_transition_to(Phase::Pending));
    }

    #[test]
    fn test_new_record_is_pending() {
        let job = record();
        assert_eq!(job.phase, Phase::Pending);
        assert_eq!(job.counters.total_target, 3);
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_record_ignores_unknown_fields() {
        let job = record();
        let mut value = serde_json::to_value(&job).unwrap();
        value["added_in_a_later_version"] = serde_json::json!({"nested": true});
        value.as_object_mut().unwrap().remove("counters");
        let loaded: JobRecord = serde_json::from_value(value).unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.counters, JobCounters::default());
    }

    #[test]
    fn test_issue_display() {
        let issue = JobIssue::for_item(Phase::Extracting, "abc", "parse failed");
        assert_eq!(issue.to_string(), "[extracting] abc: parse failed");
    }
}
