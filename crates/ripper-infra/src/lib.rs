//! Infrastructure shared by the pipeline stages: retry with backoff and
//! stage budgets, the transcript cache, and atomic job persistence.

pub mod cache;
pub mod persistence;
pub mod resilience;

pub use cache::{
    CacheStats, FileTranscriptStore, MemoryTranscriptStore, TranscriptCache, TranscriptLookup,
    TranscriptStore, TranscriptValidator, TranscriptVerdict,
};
pub use persistence::{FileJobStore, JobRepository};
pub use resilience::{ResilienceError, RetryConfig, RetryPolicy, StageBudget};
