//! Resilience patterns for calls to external collaborators
//!
//! Provides retry policies with backoff and per-stage wall-clock budgets.

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};

use std::time::Duration;
use tokio::time::Instant;

/// Errors that can occur in resilient operations
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// The operation failed with an error the classifier marked terminal
    Terminal(E),
    /// Every attempt failed with a transient error
    RetriesExhausted { attempts: u32, last: E },
    /// The last attempt did not finish in time
    Timeout { attempts: u32, after: Duration },
    /// The stage ran out of wall-clock time
    BudgetExhausted { attempts: u32, last: Option<E> },
}

impl<E> ResilienceError<E> {
    /// The underlying operation error, if one was observed
    pub fn into_inner(self) -> Option<E> {
        match self {
            ResilienceError::Terminal(e) | ResilienceError::RetriesExhausted { last: e, .. } => {
                Some(e)
            }
            ResilienceError::BudgetExhausted { last, .. } => last,
            ResilienceError::Timeout { .. } => None,
        }
    }

    /// Number of attempts that were made
    pub fn attempts(&self) -> u32 {
        match self {
            ResilienceError::Terminal(_) => 1,
            ResilienceError::RetriesExhausted { attempts, .. }
            | ResilienceError::Timeout { attempts, .. }
            | ResilienceError::BudgetExhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResilienceError::Terminal(_))
    }
}

impl<E: std::fmt::Display> std::fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResilienceError::Terminal(e) => write!(f, "{}", e),
            ResilienceError::RetriesExhausted { attempts, last } => {
                write!(f, "Retries exhausted after {} attempts: {}", attempts, last)
            }
            ResilienceError::Timeout { attempts, after } => {
                write!(f, "Timed out after {:?} (attempt {})", after, attempts)
            }
            ResilienceError::BudgetExhausted { attempts, last } => match last {
                Some(e) => write!(f, "Stage time budget exhausted after {} attempts: {}", attempts, e),
                None => write!(f, "Stage time budget exhausted after {} attempts", attempts),
            },
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResilienceError::Terminal(e) | ResilienceError::RetriesExhausted { last: e, .. } => {
                Some(e)
            }
            ResilienceError::BudgetExhausted { last: Some(e), .. } => Some(e),
            _ => None,
        }
    }
}

/// Wall-clock allowance shared by every call of one stage
#[derive(Debug, Clone, Copy)]
pub struct StageBudget {
    deadline: Instant,
}

impl StageBudget {
    /// Start a budget that expires `allowance` from now
    pub fn start(allowance: Duration) -> Self {
        Self {
            deadline: Instant::now() + allowance,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_exhausted(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_inner() {
        let err: ResilienceError<&str> = ResilienceError::RetriesExhausted {
            attempts: 3,
            last: "boom",
        };
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.into_inner(), Some("boom"));

        let err: ResilienceError<&str> = ResilienceError::Timeout {
            attempts: 1,
            after: Duration::from_secs(1),
        };
        assert_eq!(err.into_inner(), None);
    }

    #[test]
    fn test_display() {
        let err: ResilienceError<String> = ResilienceError::Terminal("bad key".into());
        assert_eq!(err.to_string(), "bad key");
        assert!(err.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_budget_expires() {
        let budget = StageBudget::start(Duration::from_secs(5));
        assert!(!budget.is_exhausted());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(budget.remaining(), Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), Duration::ZERO);
    }
}
