// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Rate-limit and failure handling around Strava calls.
//!
//! The HTTP layer never raises for 401/429; it reports a [`CallOutcome`]
//! and [`RetryPolicy`] decides what happens next:
//! - `Ok` returns immediately
//! - `RateLimited` sleeps `max(retry_interval, Retry-After)` and repeats the
//!   identical call, with no cap on the number of waits
//! - `NeedsReauth`, `NotFound` and `Fatal` are returned as errors, never retried

use crate::error::{AppError, Result};
use std::future::Future;
use std::time::Duration;

/// Result of one remote call, before any retry decision.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Ok(T),
    /// 401 (or a rejected grant on the token endpoint)
    NeedsReauth(String),
    /// 429, with the provider's suggested wait if it sent one
    RateLimited { retry_after: Option<Duration> },
    /// 404 or an empty resource
    NotFound(String),
    /// Anything else: transport failures, 5xx, other 4xx, bad JSON
    Fatal(AppError),
}

/// What the retry loop should do with an outcome.
#[derive(Debug)]
pub enum Decision<T> {
    Return(Result<T>),
    RetryAfter(Duration),
}

/// Reaction to throttling and failures, shared by every Strava call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retry_interval: Duration,
}

impl RetryPolicy {
    pub fn new(retry_interval: Duration) -> Self {
        Self { retry_interval }
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// How long to wait after a 429.
    pub fn wait_for(&self, retry_after: Option<Duration>) -> Duration {
        retry_after.map_or(self.retry_interval, |d| d.max(self.retry_interval))
    }

    pub fn decide<T>(&self, outcome: CallOutcome<T>) -> Decision<T> {
        match outcome {
            CallOutcome::Ok(value) => Decision::Return(Ok(value)),
            CallOutcome::RateLimited { retry_after } => {
                Decision::RetryAfter(self.wait_for(retry_after))
            }
            CallOutcome::NeedsReauth(reason) => {
                Decision::Return(Err(AppError::Authorization(reason)))
            }
            CallOutcome::NotFound(what) => Decision::Return(Err(AppError::NotFound(what))),
            CallOutcome::Fatal(err) => Decision::Return(Err(err)),
        }
    }

    /// Run `call` until it produces something other than a rate limit.
    ///
    /// The only suspension point is the sleep between attempts; dropping
    /// the returned future cancels the wait.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        let mut waits = 0u32;
        loop {
            match self.decide(call().await) {
                Decision::Return(result) => {
                    if waits > 0 {
                        tracing::info!(operation, waits, "Call succeeded after rate-limit waits");
                    }
                    return result;
                }
                Decision::RetryAfter(delay) => {
                    waits += 1;
                    tracing::warn!(
                        operation,
                        wait_secs = delay.as_secs(),
                        attempt = waits,
                        "Strava rate limit hit (429), waiting before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Strava's short-term limit window is 15 minutes.
    fn default() -> Self {
        Self::new(Duration::from_secs(900))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tokio::time::Instant;

    #[test]
    fn test_wait_uses_larger_of_interval_and_retry_after() {
        let policy = RetryPolicy::new(Duration::from_secs(60));
        assert_eq!(policy.wait_for(None), Duration::from_secs(60));
        assert_eq!(
            policy.wait_for(Some(Duration::from_secs(10))),
            Duration::from_secs(60)
        );
        assert_eq!(
            policy.wait_for(Some(Duration::from_secs(120))),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_decide_maps_outcomes_to_errors() {
        let policy = RetryPolicy::default();

        assert!(matches!(
            policy.decide::<()>(CallOutcome::NeedsReauth("expired".into())),
            Decision::Return(Err(AppError::Authorization(_)))
        ));
        assert!(matches!(
            policy.decide::<()>(CallOutcome::NotFound("streams".into())),
            Decision::Return(Err(AppError::NotFound(_)))
        ));
        assert!(matches!(
            policy.decide::<()>(CallOutcome::Fatal(AppError::StravaApi("HTTP 500".into()))),
            Decision::Return(Err(AppError::StravaApi(_)))
        ));
        assert!(matches!(
            policy.decide(CallOutcome::Ok(7)),
            Decision::Return(Ok(7))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_suggested_delay_then_retries() {
        let policy = RetryPolicy::new(Duration::from_secs(5));
        let calls = RefCell::new(Vec::new());
        let start = Instant::now();

        let result = policy
            .run("list activities", || {
                calls.borrow_mut().push(start.elapsed());
                let attempt = calls.borrow().len();
                async move {
                    if attempt == 1 {
                        CallOutcome::RateLimited {
                            retry_after: Some(Duration::from_secs(30)),
                        }
                    } else {
                        CallOutcome::Ok("page")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "page");
        let calls = calls.into_inner();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_not_capped_by_attempt_count() {
        let policy = RetryPolicy::new(Duration::from_secs(900));
        let mut attempts = 0;

        let result = policy
            .run("get streams", || {
                attempts += 1;
                let attempt = attempts;
                async move {
                    if attempt <= 10 {
                        CallOutcome::RateLimited { retry_after: None }
                    } else {
                        CallOutcome::Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_not_retried() {
        let policy = RetryPolicy::new(Duration::from_secs(1));
        let mut attempts = 0;

        let result: Result<()> = policy
            .run("list activities", || {
                attempts += 1;
                async { CallOutcome::NeedsReauth("token revoked".to_string()) }
            })
            .await;

        assert!(result.unwrap_err().is_authorization_error());
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let policy = RetryPolicy::new(Duration::from_secs(1));
        let mut attempts = 0;

        let result: Result<()> = policy
            .run("list activities", || {
                attempts += 1;
                async { CallOutcome::Fatal(AppError::StravaApi("HTTP 503".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(AppError::StravaApi(_))));
        assert_eq!(attempts, 1);
    }
}
