//! Retry policies
//!
//! Exponential backoff with jitter, a retryable/terminal classifier, an
//! optional per-attempt timeout and an optional wall-clock budget shared by
//! every call of one pipeline stage.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use ripper_core::RetrySettings;

use super::{ResilienceError, StageBudget};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Whether to add random jitter
    pub jitter: bool,
    /// Jitter factor (0.0 to 1.0); delays vary by up to this share either way
    pub jitter_factor: f64,
    /// Upper bound for a single attempt; a timed-out attempt counts as transient
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.5,
            attempt_timeout: None,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
            multiplier: settings.multiplier,
            jitter: settings.jitter,
            ..Default::default()
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with max attempts
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Set max attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Bound every attempt
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    budget: Option<StageBudget>,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            budget: None,
        }
    }

    /// Same policy, additionally bounded by a stage budget
    pub fn within(&self, budget: StageBudget) -> Self {
        Self {
            config: self.config.clone(),
            budget: Some(budget),
        }
    }

    /// Calculate the delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        // Calculate base delay with exponential backoff
        let base_delay = self
            .config
            .initial_delay
            .mul_f64(self.config.multiplier.powi((attempt - 1) as i32));

        // Cap at max delay
        let delay = base_delay.min(self.config.max_delay);

        if self.config.jitter {
            self.add_jitter(delay)
        } else {
            delay
        }
    }

    /// Add random jitter to a delay
    fn add_jitter(&self, delay: Duration) -> Duration {
        let jitter_range = delay.mul_f64(self.config.jitter_factor);
        if jitter_range.is_zero() {
            return delay;
        }
        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(Duration::ZERO..jitter_range);

        // Randomly add or subtract jitter
        if rng.gen_bool(0.5) {
            delay + jitter
        } else {
            delay.saturating_sub(jitter)
        }
    }

    /// Whether another attempt may follow attempt number `attempt`
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_attempts
    }

    /// Run `operation` until it succeeds, fails terminally, runs out of
    /// attempts, or exhausts the stage budget.
    ///
    /// The operation receives the 1-based attempt number so it can adjust
    /// per-attempt parameters such as its own timeout.
    pub async fn execute<F, Fut, T, E, P>(
        &self,
        mut operation: F,
        is_retryable: P,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        let mut last_error: Option<E> = None;

        loop {
            if self.budget.as_ref().is_some_and(|b| b.is_exhausted()) {
                return Err(ResilienceError::BudgetExhausted {
                    attempts: attempt,
                    last: last_error,
                });
            }
            attempt += 1;

            let limit = match (self.config.attempt_timeout, self.budget.as_ref()) {
                (Some(t), Some(b)) => Some(t.min(b.remaining())),
                (Some(t), None) => Some(t),
                (None, Some(b)) => Some(b.remaining()),
                (None, None) => None,
            };

            let outcome = match limit {
                Some(limit) => match tokio::time::timeout(limit, operation(attempt)).await {
                    Ok(result) => result.map_err(Some),
                    Err(_) => Err(None),
                },
                None => operation(attempt).await.map_err(Some),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(Some(error)) => {
                    if !is_retryable(&error) {
                        return Err(ResilienceError::Terminal(error));
                    }
                    if !self.should_retry(attempt) {
                        return Err(ResilienceError::RetriesExhausted {
                            attempts: attempt,
                            last: error,
                        });
                    }
                    warn!(attempt, error = %error, "Transient failure, retrying");
                    last_error = Some(error);
                }
                Err(None) => {
                    let after = limit.unwrap_or_default();
                    if !self.should_retry(attempt) {
                        return Err(ResilienceError::Timeout {
                            attempts: attempt,
                            after,
                        });
                    }
                    warn!(attempt, timeout = ?after, "Attempt timed out, retrying");
                }
            }

            let delay = self.delay_for_attempt(attempt);
            if let Some(budget) = &self.budget {
                if Instant::now() + delay >= budget.deadline() {
                    return Err(ResilienceError::BudgetExhausted {
                        attempts: attempt,
                        last: last_error,
                    });
                }
            }
            tokio::time::sleep(delay).await;
        }
    }
}
