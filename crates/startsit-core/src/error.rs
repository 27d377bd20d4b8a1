// Error taxonomy shared by every layer of the analysis pipeline.
//
// Upstream adapters return `UpstreamError`; submission-time checks return
// `ValidationError`. Per-player failures are recorded as `PlayerError`
// (see `model.rs`), which every upstream error converts into.

use std::time::Duration;

use thiserror::Error;

use crate::model::{ErrorCode, PlayerError};

// ---------------------------------------------------------------------------
// Upstream errors
// ---------------------------------------------------------------------------

/// Failure of a call to an external collaborator (statistics or grading
/// provider). Adapters never return partial data: any non-success outcome
/// maps to exactly one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The call did not finish within its timeout.
    #[error("{service} timed out after {after:?}")]
    Timeout { service: String, after: Duration },

    /// Transport failure, 5xx, or rate limiting.
    #[error("{service} unavailable: {reason}")]
    Unavailable { service: String, reason: String },

    /// The provider refused the request (4xx other than 429). Retrying the
    /// same request cannot succeed.
    #[error("{service} rejected the request: {reason}")]
    Rejected { service: String, reason: String },

    /// A 2xx response whose body could not be decoded.
    #[error("{service} returned an invalid response: {reason}")]
    InvalidResponse { service: String, reason: String },
}

impl UpstreamError {
    pub fn timeout(service: impl Into<String>, after: Duration) -> Self {
        UpstreamError::Timeout {
            service: service.into(),
            after,
        }
    }

    pub fn unavailable(service: impl Into<String>, reason: impl Into<String>) -> Self {
        UpstreamError::Unavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn rejected(service: impl Into<String>, reason: impl Into<String>) -> Self {
        UpstreamError::Rejected {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_response(service: impl Into<String>, reason: impl Into<String>) -> Self {
        UpstreamError::InvalidResponse {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Only timeouts and unavailability are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout { .. } | UpstreamError::Unavailable { .. }
        )
    }

    pub fn service(&self) -> &str {
        match self {
            UpstreamError::Timeout { service, .. }
            | UpstreamError::Unavailable { service, .. }
            | UpstreamError::Rejected { service, .. }
            | UpstreamError::InvalidResponse { service, .. } => service,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            UpstreamError::Timeout { .. } => ErrorCode::UpstreamTimeout,
            UpstreamError::Unavailable { .. } => ErrorCode::UpstreamUnavailable,
            UpstreamError::Rejected { .. } => ErrorCode::UpstreamRejected,
            UpstreamError::InvalidResponse { .. } => ErrorCode::InvalidResponse,
        }
    }
}

impl From<UpstreamError> for PlayerError {
    fn from(err: UpstreamError) -> Self {
        PlayerError::new(err.error_code(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// A job request that can never be processed. Raised at submission time;
/// such requests never reach the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("player list is empty")]
    EmptyPlayerList,

    #[error("player id at index {index} is empty")]
    EmptyPlayerId { index: usize },

    #[error("roster id must not be empty")]
    EmptyRosterId,

    #[error("opponent team id must not be empty")]
    EmptyOpponentTeamId,

    #[error("week {week} is outside 1..={max}")]
    InvalidWeek { week: u8, max: u8 },

    #[error("season {season} is outside {min}..={max}")]
    InvalidSeason { season: u16, min: u16, max: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(UpstreamError::timeout("stats", Duration::from_secs(10)).is_retryable());
        assert!(UpstreamError::unavailable("stats", "503").is_retryable());
        assert!(!UpstreamError::rejected("stats", "404").is_retryable());
        assert!(!UpstreamError::invalid_response("grading", "no grade").is_retryable());
    }

    #[test]
    fn upstream_error_converts_to_player_error_with_code() {
        let err = UpstreamError::timeout("stats", Duration::from_secs(10));
        let player_err: PlayerError = err.into();
        assert_eq!(player_err.code, ErrorCode::UpstreamTimeout);
        assert!(player_err.message.contains("stats timed out"));
    }

    #[test]
    fn service_name_is_exposed_for_every_variant() {
        assert_eq!(UpstreamError::rejected("grading", "bad key").service(), "grading");
        assert_eq!(UpstreamError::invalid_response("stats", "eof").service(), "stats");
    }
}
