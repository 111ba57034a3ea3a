//! Error taxonomy for the delivery core.
//!
//! Every failure is explicit and typed. Errors are `Clone` so a single failure
//! can travel unchanged through a chain of asynchronous results and still be
//! compared against the original in tests.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for delivery, link and session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Invariant violations (programming defects)
    #[error("operation issued outside its execution context: expected '{expected}', got '{actual}'")]
    NotExecuting { expected: String, actual: String },

    #[error("execution context '{context}' is already active")]
    ContextBusy { context: String },

    #[error("{what} was already resolved")]
    AlreadyResolved { what: String },

    // Caller errors
    #[error("link '{link}' is not open (state: {state})")]
    LinkNotOpen { link: String, state: String },

    #[error("range {offset}+{length} exceeds buffer of {available} bytes")]
    Range {
        offset: usize,
        length: usize,
        available: usize,
    },

    #[error("session '{session}' is closed")]
    SessionClosed { session: String },

    #[error("unknown link '{link}'")]
    UnknownLink { link: String },

    #[error("unknown delivery '{delivery}' on link '{link}'")]
    UnknownDelivery { link: String, delivery: String },

    // Asynchronous outcomes
    #[error("store failure: {reason}")]
    StoreFailure { reason: String },

    #[error("delivery '{delivery}' was not settled by the peer: {outcome}")]
    SettlementFailure { delivery: String, outcome: String },

    // Configuration
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to read configuration '{}': {reason}", .path.display())]
    ConfigRead { path: PathBuf, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not-executing error.
    pub fn not_executing(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::NotExecuting {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a context-busy error.
    pub fn context_busy(context: impl Into<String>) -> Self {
        Self::ContextBusy {
            context: context.into(),
        }
    }

    /// Create an already-resolved error.
    pub fn already_resolved(what: impl Into<String>) -> Self {
        Self::AlreadyResolved { what: what.into() }
    }

    /// Create a link-not-open error.
    pub fn link_not_open(link: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::LinkNotOpen {
            link: link.into(),
            state: state.to_string(),
        }
    }

    /// Create a range error.
    pub const fn range(offset: usize, length: usize, available: usize) -> Self {
        Self::Range {
            offset,
            length,
            available,
        }
    }

    /// Create a session-closed error.
    pub fn session_closed(session: impl Into<String>) -> Self {
        Self::SessionClosed {
            session: session.into(),
        }
    }

    /// Create an unknown-link error.
    pub fn unknown_link(link: impl Into<String>) -> Self {
        Self::UnknownLink { link: link.into() }
    }

    /// Create an unknown-delivery error.
    pub fn unknown_delivery(link: impl Into<String>, delivery: impl Into<String>) -> Self {
        Self::UnknownDelivery {
            link: link.into(),
            delivery: delivery.into(),
        }
    }

    /// Create a store failure.
    pub fn store_failure(reason: impl Into<String>) -> Self {
        Self::StoreFailure {
            reason: reason.into(),
        }
    }

    /// Create a settlement failure.
    pub fn settlement_failure(delivery: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self::SettlementFailure {
            delivery: delivery.into(),
            outcome: outcome.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a configuration read error.
    pub fn config_read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigRead {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// True for errors that signal a programming defect rather than a runtime
    /// condition.
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::NotExecuting { .. } | Self::ContextBusy { .. } | Self::AlreadyResolved { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::store_failure("disk full");
        assert!(err.to_string().contains("disk full"));

        let err = Error::range(1, 5, 3);
        let text = err.to_string();
        assert!(text.contains("1+5"));
        assert!(text.contains('3'));
    }

    #[test]
    fn should_classify_invariant_violations() {
        assert!(Error::not_executing("a", "b").is_invariant_violation());
        assert!(Error::already_resolved("send result").is_invariant_violation());
        assert!(Error::context_busy("session-1").is_invariant_violation());
        assert!(!Error::store_failure("io").is_invariant_violation());
        assert!(!Error::link_not_open("l", "closed").is_invariant_violation());
    }

    #[test]
    fn should_compare_forwarded_clones_as_equal() {
        let original = Error::settlement_failure("7", "rejected: no route");
        let forwarded = original.clone();
        assert_eq!(original, forwarded);
    }
}
