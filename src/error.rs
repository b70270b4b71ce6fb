//! Error types shared across the toolkit's policies.

use std::fmt;
use std::time::Duration;

/// Unified error for policy-guarded operations.
///
/// Policy rejections (`Timeout`, `CircuitOpen`, `NoCapacity`) are expected,
/// observable outcomes and carry the numbers a caller needs to react;
/// `Inner` carries the guarded operation's own error verbatim, never wrapped.
#[derive(Debug)]
pub enum PolicyError<E> {
    /// A deadline elapsed before the operation completed.
    Timeout {
        elapsed: Duration,
        timeout: Duration,
    },
    /// The circuit breaker is open and short-circuited the call.
    CircuitOpen {
        failure_rate: f64,
        retry_in: Duration,
    },
    /// No healthy backend with spare capacity could be selected.
    NoCapacity { detail: String },
    /// The underlying operation failed.
    Inner(E),
}

impl<E: Clone> Clone for PolicyError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Timeout { elapsed, timeout } => {
                Self::Timeout { elapsed: *elapsed, timeout: *timeout }
            }
            Self::CircuitOpen { failure_rate, retry_in } => {
                Self::CircuitOpen { failure_rate: *failure_rate, retry_in: *retry_in }
            }
            Self::NoCapacity { detail } => Self::NoCapacity { detail: detail.clone() },
            Self::Inner(e) => Self::Inner(e.clone()),
        }
    }
}

impl<E: PartialEq> PartialEq for PolicyError<E> {
    fn eq(&self, other: &Self) -> bool {
        use PolicyError::*;
        match (self, other) {
            (Timeout { elapsed: a1, timeout: b1 }, Timeout { elapsed: a2, timeout: b2 }) => {
                a1 == a2 && b1 == b2
            }
            (
                CircuitOpen { failure_rate: r1, retry_in: d1 },
                CircuitOpen { failure_rate: r2, retry_in: d2 },
            ) => r1 == r2 && d1 == d2,
            (NoCapacity { detail: d1 }, NoCapacity { detail: d2 }) => d1 == d2,
            (Inner(e1), Inner(e2)) => e1 == e2,
            _ => false,
        }
    }
}

impl<E: fmt::Display> fmt::Display for PolicyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::CircuitOpen { failure_rate, retry_in } => {
                write!(
                    f,
                    "circuit breaker open (failure rate {:.4}, next probe in {:?})",
                    failure_rate, retry_in
                )
            }
            Self::NoCapacity { detail } if detail.is_empty() => {
                f.write_str("no healthy server with capacity")
            }
            Self::NoCapacity { detail } => {
                write!(f, "no healthy server with capacity: {}", detail)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for PolicyError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> PolicyError<E> {
    /// Check if this error is due to an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is a circuit-breaker rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if this error is a load-balancer capacity rejection.
    pub fn is_no_capacity(&self) -> bool {
        matches!(self, Self::NoCapacity { .. })
    }

    /// Check if this error wraps an operation error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Extract the operation error, if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the operation error, if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);

    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for DummyError {}

    #[test]
    fn timeout_display_names_both_durations() {
        let err: PolicyError<io::Error> = PolicyError::Timeout {
            elapsed: Duration::from_millis(5100),
            timeout: Duration::from_secs(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("5.1"));
    }

    #[test]
    fn circuit_open_display_includes_rate() {
        let err: PolicyError<io::Error> = PolicyError::CircuitOpen {
            failure_rate: 0.75,
            retry_in: Duration::from_secs(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("circuit breaker open"));
        assert!(msg.contains("0.75"));
    }

    #[test]
    fn no_capacity_display_matches_contract() {
        let err: PolicyError<io::Error> =
            PolicyError::NoCapacity { detail: "all backends at cap".into() };
        assert_eq!(err.to_string(), "no healthy server with capacity: all backends at cap");

        let bare: PolicyError<io::Error> = PolicyError::NoCapacity { detail: String::new() };
        assert_eq!(bare.to_string(), "no healthy server with capacity");
    }

    #[test]
    fn predicates_cover_all_variants() {
        let timeout: PolicyError<DummyError> =
            PolicyError::Timeout { elapsed: Duration::from_secs(1), timeout: Duration::from_secs(1) };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_inner());

        let open: PolicyError<DummyError> =
            PolicyError::CircuitOpen { failure_rate: 1.0, retry_in: Duration::ZERO };
        assert!(open.is_circuit_open());

        let capacity: PolicyError<DummyError> = PolicyError::NoCapacity { detail: String::new() };
        assert!(capacity.is_no_capacity());

        let inner = PolicyError::Inner(DummyError("x"));
        assert!(inner.is_inner());
        assert_eq!(inner.as_inner().unwrap().0, "x");
        assert_eq!(inner.into_inner().unwrap().0, "x");
    }

    #[test]
    fn source_points_at_inner_error() {
        use std::error::Error;
        let err = PolicyError::Inner(DummyError("root cause"));
        assert_eq!(err.source().unwrap().to_string(), "root cause");

        let timeout: PolicyError<DummyError> =
            PolicyError::Timeout { elapsed: Duration::ZERO, timeout: Duration::ZERO };
        assert!(timeout.source().is_none());
    }
}
