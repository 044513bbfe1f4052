// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry with backoff for provider calls.
//!
//! The loop enforces the per-call timeout on every attempt, consults
//! the cancellation token before each attempt and before each backoff
//! sleep, and records an [`AttemptTiming`] per attempt so the trial
//! record can account for every wire interaction.

use crate::{CancellationToken, ProviderError};
use arb_core::{AttemptOutcome, AttemptTiming, RetryPolicy};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Result of a retried call plus its attempt ledger.
pub struct RetryOutcome<T> {
    /// The final result.
    pub result: Result<T, ProviderError>,
    /// One timing per attempt, in order.
    pub attempts: Vec<AttemptTiming>,
}

/// Run `op` with up to `policy.per_call_max_retries` retries on
/// retryable errors, bounding each attempt by `per_call_timeout`.
///
/// [`ProviderError::Aborted`] stops the loop immediately without
/// counting as either success or retryable failure.
pub async fn execute_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    per_call_timeout: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempts = Vec::new();
    let max_attempts = policy.per_call_max_retries + 1;

    for attempt in 0..max_attempts {
        if cancel.is_cancelled() {
            return RetryOutcome {
                result: Err(ProviderError::Aborted),
                attempts,
            };
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(ProviderError::Aborted),
            timed = tokio::time::timeout(per_call_timeout, op()) => match timed {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            },
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                attempts.push(AttemptTiming {
                    attempt,
                    duration_ms,
                    outcome: AttemptOutcome::Ok,
                });
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(ProviderError::Aborted) => {
                return RetryOutcome {
                    result: Err(ProviderError::Aborted),
                    attempts,
                };
            }
            Err(err) => {
                let timing_outcome = match &err {
                    ProviderError::Timeout => AttemptOutcome::Timeout,
                    e if e.is_retryable() => AttemptOutcome::RetryableError,
                    _ => AttemptOutcome::FatalError,
                };
                attempts.push(AttemptTiming {
                    attempt,
                    duration_ms,
                    outcome: timing_outcome,
                });
                let exhausted = attempt + 1 >= max_attempts;
                if !err.is_retryable() || exhausted {
                    return RetryOutcome {
                        result: Err(err),
                        attempts,
                    };
                }
                debug!(attempt, error = %err, "retrying provider call");
                let backoff = Duration::from_millis(policy.backoff_ms << attempt);
                tokio::select! {
                    () = cancel.cancelled() => {
                        return RetryOutcome {
                            result: Err(ProviderError::Aborted),
                            attempts,
                        };
                    }
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    unreachable!("loop always returns within max_attempts iterations")
}
