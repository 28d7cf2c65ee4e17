//! Deadline composition for transfers.
//!
//! An overall budget is fixed when a transfer starts. Each attempt gets the
//! earlier of its own budget and whatever remains of the overall one.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    overall: Instant,
    per_attempt: Duration,
}

impl Deadline {
    /// Start the clock now.
    pub fn start(overall_timeout: Duration, per_attempt: Duration) -> Self {
        Self::starting_at(Instant::now(), overall_timeout, per_attempt)
    }

    pub fn starting_at(start: Instant, overall_timeout: Duration, per_attempt: Duration) -> Self {
        Self {
            overall: start + overall_timeout,
            per_attempt,
        }
    }

    /// Instant after which nothing may continue.
    pub fn overall(&self) -> Instant {
        self.overall
    }

    pub fn remaining(&self) -> Duration {
        self.overall.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.overall
    }

    /// Deadline for an attempt starting now.
    pub fn attempt(&self) -> Instant {
        (Instant::now() + self.per_attempt).min(self.overall)
    }

    /// True if waiting `delay` from now still leaves time to act.
    pub fn allows_wait(&self, delay: Duration) -> bool {
        Instant::now() + delay < self.overall
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_attempt_bounded_by_overall() {
        let d = Deadline::start(Duration::from_secs(10), Duration::from_secs(4));
        let start = Instant::now();
        assert_eq!(d.attempt(), start + Duration::from_secs(4));

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(d.attempt(), d.overall());
        assert_eq!(d.remaining(), Duration::from_secs(2));
        assert!(!d.allows_wait(Duration::from_secs(2)));
        assert!(d.allows_wait(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(d.is_expired());
    }
}
