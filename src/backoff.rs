//! Delay schedules for retry policies and the worker's failure handler.

use std::time::Duration;

/// Backoff schedule between attempts.
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Fixed delay between attempts.
    Constant { delay: Duration },
    /// Delay grows linearly with the attempt number.
    Linear { base: Duration },
    /// Delay doubles each attempt, with an optional cap.
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base }
    }

    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Cap the exponential schedule. No effect on other variants.
    pub fn with_max(mut self, cap: Duration) -> Self {
        if let Backoff::Exponential { max, .. } = &mut self {
            *max = Some(cap);
        }
        self
    }

    /// Delay before the given attempt (1-indexed). Saturates instead of
    /// overflowing for absurd attempt numbers.
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { base } => {
                base.checked_mul(attempt as u32).unwrap_or(Duration::from_secs(u64::MAX))
            }
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let multiplier = 2u32.saturating_pow(exponent);
                let delay =
                    base.checked_mul(multiplier).unwrap_or(Duration::from_secs(u64::MAX));
                match max {
                    Some(cap) => delay.min(*cap),
                    None => delay,
                }
            }
        }
    }
}
