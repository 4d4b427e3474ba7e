//! Typed error taxonomy for the commuter coordination core.
//!
//! Most call sites still return `anyhow::Result` the way the rest of this
//! crate does (see e.g. `reservoir::depot`), but a handful of boundaries
//! need to match on *which kind* of failure occurred — a conductor tick
//! that hits `Unavailable` skips silently, while `StateError` is logged
//! and dropped. `CoreError` exists for those call sites and converts into
//! `anyhow::Error` for free via `?`.

use std::fmt;

/// A typed error kind, per spec §7.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed geometry, missing required field, out-of-range value.
    #[error("validation error: {0}")]
    Validation(String),

    /// Illegal transition, e.g. boarding a non-WAITING passenger.
    #[error("state error: {0}")]
    State(String),

    /// Hub or CMS temporarily unreachable; callers retry with backoff.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Request/response did not complete in the configured window.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Unknown id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Boarding would exceed vehicle capacity. Prevented, never surfaced
    /// externally — kept here only so internal call sites can match on it.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Corrupted invariant. The process should abort after flushing logs.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn validation(msg: impl fmt::Display) -> Self {
        Self::Validation(msg.to_string())
    }

    pub fn state(msg: impl fmt::Display) -> Self {
        Self::State(msg.to_string())
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(CoreError::Unavailable("hub down".into()).is_retryable());
        assert!(CoreError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(!CoreError::Validation("bad polygon".into()).is_retryable());
        assert!(!CoreError::Fatal("duplicate passenger id".into()).is_retryable());
    }
}
