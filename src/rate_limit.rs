//! Per-key rate limiting.
//!
//! Two admission-control limiters gate traffic before backend selection:
//! - [`FixedWindowCounter`]: per-key counters reset at discrete window
//!   boundaries shared across keys.
//! - [`SlidingWindow`]: per-key timestamp logs counted over a rolling
//!   horizon, inclusive at the window start.
//!
//! Both support blacklisting, per-key `[allowed, denied]` metrics, and
//! process-wide totals. `allow` returns `bool`: a denial is an expected
//! policy outcome, not an error. Per-key buckets lock independently; the
//! global counters are atomics.

use std::str::FromStr;

pub mod fixed_window;
pub mod sliding_window;

pub use fixed_window::FixedWindowCounter;
pub use sliding_window::SlidingWindow;

/// Window length units accepted by the limiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Second,
    Minute,
    Hour,
    Day,
}

impl Unit {
    /// Window length in milliseconds.
    pub fn as_millis(self) -> u64 {
        match self {
            Unit::Second => 1_000,
            Unit::Minute => 60_000,
            Unit::Hour => 3_600_000,
            Unit::Day => 86_400_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Second => "second",
            Unit::Minute => "minute",
            Unit::Hour => "hour",
            Unit::Day => "day",
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = RateLimitConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "second" => Ok(Unit::Second),
            "minute" => Ok(Unit::Minute),
            "hour" => Ok(Unit::Hour),
            "day" => Ok(Unit::Day),
            other => Err(RateLimitConfigError::InvalidUnit(other.to_string())),
        }
    }
}

/// Smallest accepted sliding-window span, in units.
pub const MIN_WINDOW: u64 = 1;
/// Largest accepted sliding-window span, in units.
pub const MAX_WINDOW: u64 = 100_000;

/// Errors returned when configuring a limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitConfigError {
    /// Unit string was not one of `second`, `minute`, `hour`, `day`.
    InvalidUnit(String),
    /// The request limit must be greater than zero.
    ZeroLimit,
    /// The sliding-window span must lie in `[MIN_WINDOW, MAX_WINDOW]`.
    WindowOutOfRange(u64),
}

impl std::fmt::Display for RateLimitConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitConfigError::InvalidUnit(unit) => {
                write!(f, "invalid rate limiter unit '{}', expected second|minute|hour|day", unit)
            }
            RateLimitConfigError::ZeroLimit => {
                write!(f, "rate limit must be greater than zero")
            }
            RateLimitConfigError::WindowOutOfRange(window) => {
                write!(
                    f,
                    "window must be between {} and {}, got {}",
                    MIN_WINDOW, MAX_WINDOW, window
                )
            }
        }
    }
}

impl std::error::Error for RateLimitConfigError {}

/// Per-key admission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyMetrics {
    pub allowed: u64,
    pub denied: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_parses_the_four_names() {
        assert_eq!("second".parse::<Unit>().unwrap(), Unit::Second);
        assert_eq!("minute".parse::<Unit>().unwrap(), Unit::Minute);
        assert_eq!("hour".parse::<Unit>().unwrap(), Unit::Hour);
        assert_eq!("day".parse::<Unit>().unwrap(), Unit::Day);
        assert!(matches!(
            "fortnight".parse::<Unit>().unwrap_err(),
            RateLimitConfigError::InvalidUnit(s) if s == "fortnight"
        ));
    }

    #[test]
    fn unit_millis_are_exact() {
        assert_eq!(Unit::Second.as_millis(), 1_000);
        assert_eq!(Unit::Minute.as_millis(), 60_000);
        assert_eq!(Unit::Hour.as_millis(), 3_600_000);
        assert_eq!(Unit::Day.as_millis(), 86_400_000);
    }

    #[test]
    fn unit_round_trips_through_display() {
        for unit in [Unit::Second, Unit::Minute, Unit::Hour, Unit::Day] {
            assert_eq!(unit.to_string().parse::<Unit>().unwrap(), unit);
        }
    }
}
