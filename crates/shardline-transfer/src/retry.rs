//! Retry policy with capped exponential backoff.
//!
//! The upload loop is an explicit state machine: each iteration either
//! makes an attempt or waits out a backoff, and every attempt produces one
//! immutable [`AttemptOutcome`] that decides the next step.

use std::future::Future;
use std::time::Duration;

use shardline_store::StoreError;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::error::{Result, TransferError};

/// Longest wait between two attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Wait before attempt `attempt` (1-indexed).
///
/// Attempt 1 never waits; attempt `k > 1` waits `min(2^(k-2) s, 30 s)`,
/// giving delays of 0, 1, 2, 4, 8, 16, 30, 30, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }
    // 2^5 already exceeds the cap.
    let exponent = (attempt - 2).min(5);
    Duration::from_secs(1u64 << exponent).min(MAX_BACKOFF)
}

/// How many times a fragment is tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// A policy making `max_retries` attempts in total (at least one).
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// What follows a failed `attempt`: the next attempt and its backoff,
    /// or `None` once attempts are exhausted.
    pub fn after_failure(&self, attempt: u32) -> Option<(u32, Duration)> {
        if attempt >= self.max_attempts {
            return None;
        }
        let next = attempt + 1;
        Some((next, backoff_delay(next)))
    }
}

/// Result of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Succeeded(T),
    Failed(StoreError),
    /// The per-attempt deadline elapsed first.
    TimedOut,
}

enum RetryStep {
    Attempt(u32),
    Backoff { next: u32, delay: Duration },
}

/// Drive `op` under `policy` until it succeeds, attempts run out, or the
/// overall deadline passes.
///
/// `op` receives the 1-indexed attempt number and that attempt's deadline.
pub async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    deadline: &Deadline,
    index: usize,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32, Instant) -> Fut,
    Fut: Future<Output = shardline_store::Result<T>>,
{
    let mut step = RetryStep::Attempt(1);

    loop {
        step = match step {
            RetryStep::Backoff { next, delay } => {
                if !deadline.allows_wait(delay) {
                    return Err(TransferError::Timeout { index });
                }
                debug!(fragment = index, attempt = next, ?delay, "backing off");
                tokio::time::sleep(delay).await;
                RetryStep::Attempt(next)
            }
            RetryStep::Attempt(attempt) => {
                if deadline.is_expired() {
                    return Err(TransferError::Timeout { index });
                }

                let attempt_deadline = deadline.attempt();
                let outcome =
                    match tokio::time::timeout_at(attempt_deadline, op(attempt, attempt_deadline))
                        .await
                    {
                        Ok(Ok(value)) => AttemptOutcome::Succeeded(value),
                        Ok(Err(e)) => AttemptOutcome::Failed(e),
                        Err(_) => AttemptOutcome::TimedOut,
                    };

                let error = match outcome {
                    AttemptOutcome::Succeeded(value) => return Ok(value),
                    AttemptOutcome::Failed(e) => e,
                    AttemptOutcome::TimedOut => StoreError::Timeout,
                };

                warn!(fragment = index, attempt, error = %error, "attempt failed");

                if deadline.is_expired() {
                    return Err(TransferError::Timeout { index });
                }
                match policy.after_failure(attempt) {
                    Some((next, delay)) => RetryStep::Backoff { next, delay },
                    None => {
                        return Err(TransferError::UploadFailed {
                            index,
                            attempts: attempt,
                            source: error,
                        })
                    }
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Virtual time only advances in whole timer ticks.
    fn assert_elapsed(start: Instant, secs: u64) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(secs) && elapsed < Duration::from_millis(secs * 1000 + 50),
            "elapsed {:?}, expected ~{}s",
            elapsed,
            secs
        );
    }

    #[test]
    fn test_backoff_schedule() {
        let delays: Vec<u64> = (1..=9).map(|k| backoff_delay(k).as_secs()).collect();
        assert_eq!(delays, vec![0, 1, 2, 4, 8, 16, 30, 30, 30]);
        assert_eq!(backoff_delay(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::new(0).after_failure(1), None);
    }

    #[test]
    fn test_after_failure_sequence() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.after_failure(1), Some((2, Duration::from_secs(1))));
        assert_eq!(policy.after_failure(2), Some((3, Duration::from_secs(2))));
        assert_eq!(policy.after_failure(3), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_exact_attempts() {
        let calls = AtomicU32::new(0);
        let deadline = Deadline::start(Duration::from_secs(600), Duration::from_secs(60));
        let start = Instant::now();

        let result: Result<()> = run_with_retry(RetryPolicy::new(4), &deadline, 7, |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Network("down".into())) }
        })
        .await;

        assert!(matches!(
            result,
            Err(TransferError::UploadFailed {
                index: 7,
                attempts: 4,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 0 + 1 + 2 + 4 seconds of backoff.
        assert_elapsed(start, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let deadline = Deadline::start(Duration::from_secs(600), Duration::from_secs(60));

        let value = run_with_retry(RetryPolicy::new(3), &deadline, 0, |attempt, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(StoreError::Network("flaky".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let deadline = Deadline::start(Duration::from_secs(600), Duration::from_secs(5));

        let value = run_with_retry(RetryPolicy::new(2), &deadline, 0, |attempt, _| async move {
            if attempt == 1 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok::<_, StoreError>(attempt)
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_deadline_aborts() {
        let deadline = Deadline::start(Duration::from_secs(10), Duration::from_secs(60));
        let start = Instant::now();

        let result: Result<()> = run_with_retry(RetryPolicy::new(5), &deadline, 2, |_, _| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(TransferError::Timeout { index: 2 })));
        assert_elapsed(start, 10);
    }
}
