//! Transcript quality heuristics.

use std::collections::HashMap;
use std::fmt;

use ripper_core::TranscriptConfig;

/// Outcome of validating one transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptVerdict {
    Valid,
    TooShort { words: usize, min: usize },
    Garbage { pattern: String, hits: usize },
    Degenerate { token: String, share: f64 },
}

impl TranscriptVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, TranscriptVerdict::Valid)
    }
}

impl fmt::Display for TranscriptVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptVerdict::Valid => write!(f, "valid"),
            TranscriptVerdict::TooShort { words, min } => {
                write!(f, "transcript too short ({} words, minimum {})", words, min)
            }
            TranscriptVerdict::Garbage { pattern, hits } => {
                write!(f, "transcript dominated by '{}' ({} occurrences)", pattern, hits)
            }
            TranscriptVerdict::Degenerate { token, share } => write!(
                f,
                "degenerate transcript: '{}' makes up {:.0}% of words",
                token,
                share * 100.0
            ),
        }
    }
}

/// Rejects transcripts that are too short or look like transcription noise.
#[derive(Debug, Clone)]
pub struct TranscriptValidator {
    config: TranscriptConfig,
}

impl Default for TranscriptValidator {
    fn default() -> Self {
        Self::new(TranscriptConfig::default())
    }
}

impl TranscriptValidator {
    pub fn new(config: TranscriptConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, text: &str) -> TranscriptVerdict {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() < self.config.min_words {
            return TranscriptVerdict::TooShort {
                words: words.len(),
                min: self.config.min_words,
            };
        }

        let lower = text.to_lowercase();
        let half = words.len() as f64 / 2.0;
        for pattern in &self.config.garbage_patterns {
            let pattern = pattern.to_lowercase();
            if pattern.is_empty() {
                continue;
            }
            let hits = lower.matches(pattern.as_str()).count();
            if hits as f64 > half {
                return TranscriptVerdict::Garbage { pattern, hits };
            }
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for word in &words {
            let token: String = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if !token.is_empty() {
                *counts.entry(token).or_default() += 1;
            }
        }
        if let Some((token, count)) = counts.into_iter().max_by_key(|(_, c)| *c) {
            let share = count as f64 / words.len() as f64;
            if share > self.config.max_dominant_token_ratio {
                return TranscriptVerdict::Degenerate { token, share };
            }
        }

        TranscriptVerdict::Valid
    }
}
