//! Retry policies keyed by failure class
//!
//! Every external call (sheets, mail, LLM) is retried with the policy of
//! the class its error belongs to. Non-retryable errors return immediately.

use crate::error::{FailureClass, OrchestrationError};
use crate::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff for a single failure class.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = fail fast).
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Adds up to 25% on top of each delay.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Retries without sleeping. Used by tests and local dry runs.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::no_retry()
        }
    }

    pub fn sheet_api() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }

    pub fn mail_api() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Three attempts total, waiting 4s..10s between them.
    pub fn llm_api() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(retry as i32 - 1);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let delay = if self.jitter {
            capped * (1.0 + jitter_fraction() * 0.25)
        } else {
            capped
        };

        Duration::from_millis(delay as u64)
    }
}

fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// One policy per failure class.
#[derive(Debug, Clone)]
pub struct RetryPolicies {
    pub sheet_api: RetryPolicy,
    pub mail_api: RetryPolicy,
    pub llm_api: RetryPolicy,
    pub other: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            sheet_api: RetryPolicy::sheet_api(),
            mail_api: RetryPolicy::mail_api(),
            llm_api: RetryPolicy::llm_api(),
            other: RetryPolicy::no_retry(),
        }
    }
}

impl RetryPolicies {
    /// Same retry budgets as the defaults, no sleeping.
    pub fn immediate() -> Self {
        Self {
            sheet_api: RetryPolicy::immediate(3),
            mail_api: RetryPolicy::immediate(2),
            llm_api: RetryPolicy::immediate(2),
            other: RetryPolicy::no_retry(),
        }
    }

    pub fn for_class(&self, class: FailureClass) -> &RetryPolicy {
        match class {
            FailureClass::SheetApi => &self.sheet_api,
            FailureClass::MailApi => &self.mail_api,
            FailureClass::LlmApi => &self.llm_api,
            _ => &self.other,
        }
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn into_result(self) -> Result<T> {
        self.result
    }
}

/// Run `operation`, retrying per the class of each error it returns.
///
/// When at least one retry happened and the budget runs out, the last error
/// is wrapped in `RetriesExhausted`, which is itself never retryable.
pub async fn retry_classified<T, F, Fut>(policies: &RetryPolicies, mut operation: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        let error = match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(e) => e,
        };

        let class = error.failure_class();
        let policy = policies.for_class(class);
        let retries_used = attempts - 1;

        if !error.is_retryable() {
            return RetryOutcome {
                result: Err(error),
                attempts,
            };
        }

        if retries_used >= policy.max_retries {
            let result = if retries_used == 0 {
                Err(error)
            } else {
                Err(OrchestrationError::RetriesExhausted {
                    class,
                    attempts,
                    last_error: error.to_string(),
                })
            };
            return RetryOutcome { result, attempts };
        }

        let delay = policy.delay_for_retry(retries_used + 1);
        warn!(
            failure_class = %class,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after transient failure"
        );
        tokio::time::sleep(delay).await;
    }
}
