//! Transcript caching
//!
//! Validated transcripts are stored once per (platform, creator, item) key
//! and never overwritten.

pub mod store;
pub mod transcript;
pub mod validation;

pub use store::{CacheStats, FileTranscriptStore, MemoryTranscriptStore, TranscriptStore};
pub use transcript::{TranscriptCache, TranscriptLookup};
pub use validation::{TranscriptValidator, TranscriptVerdict};
