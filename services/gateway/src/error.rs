//! Error types for the gateway core.
//!
//! The core surfaces exactly five kinds and discriminates on them at every
//! boundary: validation failures terminate at the router, duplicates are
//! silent successes, unavailability is retried and then dead-lettered,
//! throttling propagates to the producer, and internal invariant violations
//! are isolated to the affected point.

use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// The five error kinds the core discriminates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Duplicate,
    Unavailable,
    Throttled,
    Internal,
}

/// Main error type for the ingestion core.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Guards or payload validation rejected the message. Non-retryable.
    #[error("invalid input ({reason}): {detail}")]
    InvalidInput {
        /// Short machine code surfaced to producers, e.g. `guards_failed`.
        reason: &'static str,
        detail: String,
    },

    /// Dedup hit. Silent success; surfaced only so callers can count it.
    #[error("duplicate message {msg_id}")]
    Duplicate { msg_id: String },

    /// A downstream dependency is down or refusing connections.
    #[error("{dependency} unavailable: {detail}")]
    Unavailable { dependency: String, detail: String },

    /// A circuit breaker is open for the dependency; fails fast, no retry.
    #[error("{dependency} circuit open")]
    CircuitOpen { dependency: String },

    /// Per-series or transport backpressure; propagates to the producer.
    #[error("throttled: {scope}")]
    Throttled { scope: String },

    /// A programming invariant was violated; the point is isolated.
    #[error("internal: {detail}")]
    Internal { detail: String },
}

impl GatewayError {
    pub fn invalid_input(reason: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason,
            detail: detail.into(),
        }
    }

    pub fn unavailable(dependency: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Unavailable {
            dependency: dependency.into(),
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidInput { .. } => ErrorKind::InvalidInput,
            GatewayError::Duplicate { .. } => ErrorKind::Duplicate,
            GatewayError::Unavailable { .. } | GatewayError::CircuitOpen { .. } => {
                ErrorKind::Unavailable
            }
            GatewayError::Throttled { .. } => ErrorKind::Throttled,
            GatewayError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the retry layer may attempt the operation again. Breaker
    /// rejections fail fast by design.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unavailable { .. })
    }

    /// Short machine code for producer-facing responses. Never leaks
    /// credentials, connection strings, or backtraces.
    pub fn reason_code(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput { reason, .. } => reason,
            GatewayError::Duplicate { .. } => "duplicate",
            GatewayError::Unavailable { .. } => "unavailable",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::Throttled { .. } => "throttled",
            GatewayError::Internal { .. } => "internal_error",
        }
    }

    /// HTTP status mapping: 400 / 200 / 503 / 429 / 500.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidInput => 400,
            ErrorKind::Duplicate => 200,
            ErrorKind::Unavailable => 503,
            ErrorKind::Throttled => 429,
            ErrorKind::Internal => 500,
        }
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(e: redis::RedisError) -> Self {
        GatewayError::unavailable("redis", e.to_string())
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        GatewayError::unavailable("database", e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::invalid_input("parse", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_http_statuses() {
        assert_eq!(GatewayError::invalid_input("guards_failed", "nan").http_status(), 400);
        assert_eq!(GatewayError::Duplicate { msg_id: "x".into() }.http_status(), 200);
        assert_eq!(GatewayError::unavailable("legacy", "refused").http_status(), 503);
        assert_eq!(
            GatewayError::Throttled { scope: "http".into() }.http_status(),
            429
        );
        assert_eq!(GatewayError::internal("bug").http_status(), 500);
    }

    #[test]
    fn only_plain_unavailability_is_transient() {
        assert!(GatewayError::unavailable("legacy", "refused").is_transient());
        assert!(!GatewayError::CircuitOpen { dependency: "legacy".into() }.is_transient());
        assert!(!GatewayError::invalid_input("parse", "bad json").is_transient());
        assert!(!GatewayError::internal("bug").is_transient());
    }

    #[test]
    fn reason_codes_leak_nothing() {
        let e = GatewayError::unavailable("legacy", "postgres://user:pw@host/db refused");
        // Producer-facing code stays generic even though the detail carries
        // the connection context for logs.
        assert_eq!(e.reason_code(), "unavailable");
    }
}
