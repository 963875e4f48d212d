//! API handlers and shared utilities for Gardi.
//!
//! This module organizes the service's route handlers: the k-anonymity
//! breach proxy, the health aggregator, the session whoami endpoint, and the
//! service banner.

pub mod breach;
pub mod health;
pub mod root;
pub mod session;

/// Reported state of one dependency in `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DependencyStatus {
    /// Dependency is reachable.
    Ok,
    /// Dependency is configured but unreachable or failing.
    Error,
    /// Dependency is not configured; nothing to check.
    Unconfigured,
}

impl DependencyStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Unconfigured => "unconfigured",
        }
    }

    const fn is_healthy(self) -> bool {
        !matches!(self, Self::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_status_strings() {
        assert_eq!(DependencyStatus::Ok.as_str(), "ok");
        assert_eq!(DependencyStatus::Error.as_str(), "error");
        assert_eq!(DependencyStatus::Unconfigured.as_str(), "unconfigured");
    }

    #[test]
    fn only_error_is_unhealthy() {
        assert!(DependencyStatus::Ok.is_healthy());
        assert!(DependencyStatus::Unconfigured.is_healthy());
        assert!(!DependencyStatus::Error.is_healthy());
    }
}
