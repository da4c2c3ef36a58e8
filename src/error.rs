//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid match request: {reason}")]
    InvalidMatchRequest { reason: String },

    #[error("Store unavailable ({store}): {message}")]
    StoreUnavailable { store: String, message: String },

    #[error("Participant not found: {participant_id}")]
    ParticipantNotFound { participant_id: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Shorthand for a queue store failure
    pub fn queue_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            store: "queue".to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a room registry failure
    pub fn rooms_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            store: "rooms".to_string(),
            message: message.into(),
        }
    }
}

/// Whether an error is a transient store failure the caller may retry
pub fn is_transient(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::StoreUnavailable { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient: anyhow::Error = MatchmakingError::queue_unavailable("timeout").into();
        assert!(is_transient(&transient));

        let invalid: anyhow::Error = MatchmakingError::InvalidMatchRequest {
            reason: "empty id".to_string(),
        }
        .into();
        assert!(!is_transient(&invalid));

        assert!(!is_transient(&anyhow::anyhow!("something else")));
    }

    #[test]
    fn test_store_error_message() {
        let err = MatchmakingError::rooms_unavailable("connection reset");
        assert_eq!(
            err.to_string(),
            "Store unavailable (rooms): connection reset"
        );
    }
}
