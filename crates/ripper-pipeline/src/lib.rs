//! The analysis stages of the ripper.
//!
//! - [`extractor`]: batched, fault-isolating structure extraction
//! - [`aggregator`]: pure statistics over extraction records
//! - [`synthesizer`]: one larger LLM call producing the strategy analysis
//! - [`report`]: the markdown report stored with a finished job

pub mod aggregator;
pub mod extractor;
pub mod parse;
pub mod prompts;
pub mod report;
pub mod synthesizer;

pub use aggregator::{aggregate, distribution, summary, top_pattern, PatternShare};
pub use extractor::{BatchExtractor, ExtractionOutcome, ExtractionProgress, ItemFailure};
pub use parse::parse_records;
pub use report::generate_report;
pub use synthesizer::{SynthesisOutcome, Synthesizer};

use ripper_core::ProviderError;
use thiserror::Error;

/// Stage-level failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Nothing to synthesize: no extraction records")]
    EmptyInput,

    #[error("Synthesis failed after {attempts} attempt(s): {message}")]
    SynthesisFailed { attempts: u32, message: String },

    #[error("Prompt construction failed: {0}")]
    Prompt(String),

    #[error("Cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error of one guarded provider call.
#[derive(Debug)]
pub(crate) enum CallError {
    Provider(ProviderError),
    Cancelled,
}

impl CallError {
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            CallError::Provider(e) => e.is_retryable(),
            CallError::Cancelled => false,
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Provider(e) => write!(f, "{}", e),
            CallError::Cancelled => write!(f, "cancelled"),
        }
    }
}
