use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventPingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Event not found: {id}")]
    EventNotFound { id: String },

    #[error("Participant not found: {id}")]
    ParticipantNotFound { id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl EventPingError {
    /// Short error code string returned to RPC clients.
    pub fn code(&self) -> &'static str {
        match self {
            EventPingError::Config(_) => "CONFIG_ERROR",
            EventPingError::AuthFailed(_) => "AUTH_FAILED",
            EventPingError::EventNotFound { .. } => "EVENT_NOT_FOUND",
            EventPingError::ParticipantNotFound { .. } => "PARTICIPANT_NOT_FOUND",
            EventPingError::Database(_) => "DATABASE_ERROR",
            EventPingError::Store(_) => "STORE_ERROR",
            EventPingError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}

/// Failure reported by the external Event/Participant store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing storage could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded into a domain type.
    #[error("corrupt store record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, EventPingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_distinct_code() {
        let errors = [
            EventPingError::Config("bad toml".into()),
            EventPingError::AuthFailed("no token".into()),
            EventPingError::EventNotFound { id: "ev".into() },
            EventPingError::ParticipantNotFound { id: "p".into() },
            EventPingError::Database("locked".into()),
            EventPingError::Store(StoreError::Unavailable("down".into())),
            EventPingError::InvalidRequest("id mismatch".into()),
        ];
        let codes: std::collections::HashSet<_> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), errors.len());
        assert_eq!(errors[2].to_string(), "Event not found: ev");
    }
}
