//! Cool-down schedules between retry attempts.

use std::time::Duration;

/// How long to wait before re-attempting a model, as a function of how many
/// consecutive failures it has produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffPolicy {
    /// The same fixed delay for every attempt.
    Simple {
        /// Delay applied to every attempt.
        delay: Duration,
    },
    /// Delay growing by `multiplier` per attempt, capped at `max_delay`.
    Exponential {
        /// Base delay for the first retry.
        delay: Duration,
        /// Upper bound on any computed delay.
        max_delay: Duration,
        /// Growth factor per additional attempt.
        multiplier: f64,
    },
}

impl BackoffPolicy {
    /// Fixed-delay policy.
    pub fn simple(delay: Duration) -> Self {
        Self::Simple { delay }
    }

    /// Exponential policy with the given base, cap, and growth factor.
    pub fn exponential(delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self::Exponential {
            delay,
            max_delay,
            multiplier,
        }
    }

    /// The cool-down before attempt `count`.
    ///
    /// Attempt counts start at 1; an exponential policy returns zero for a
    /// count of zero, a simple policy returns its delay for every count.
    pub fn delay(&self, count: u32) -> Duration {
        match *self {
            Self::Simple { delay } => delay,
            Self::Exponential {
                delay,
                max_delay,
                multiplier,
            } => {
                if count == 0 {
                    return Duration::ZERO;
                }
                let scaled = delay.as_millis() as f64 * multiplier.powi(count as i32 - 1);
                let capped = scaled.min(max_delay.as_millis() as f64);
                Duration::from_millis(capped as u64)
            }
        }
    }
}
