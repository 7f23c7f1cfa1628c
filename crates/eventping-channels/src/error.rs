use std::time::Duration;

use eventping_core::ChannelKind;
use thiserror::Error;

/// Errors that can occur within any channel adapter.
///
/// Variants fall in two classes: transient failures worth retrying with
/// backoff, and terminal failures that will never succeed for this
/// recipient/content. See [`ChannelError::is_retryable`].
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying transport could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The provider failed in a way that may succeed later (5xx, reset, …).
    #[error("Transient provider failure: {0}")]
    Transient(String),

    /// An operation exceeded its allowed time budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The provider asked us to slow down.
    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The recipient identity is malformed or unknown to the provider.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The provider permanently refused the message.
    #[error("Rejected by provider: {0}")]
    Rejected(String),

    /// The channel rejected the supplied credentials or token.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The channel-specific configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No adapter is registered for the channel kind.
    #[error("No adapter configured for channel {0}")]
    NotConfigured(ChannelKind),
}

impl ChannelError {
    /// `true` when a later attempt for the same reminder may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::ConnectionFailed(_)
                | ChannelError::Transient(_)
                | ChannelError::Timeout { .. }
                | ChannelError::RateLimited { .. }
        )
    }

    /// Provider-requested minimum delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ChannelError::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_variants_are_retryable() {
        assert!(ChannelError::ConnectionFailed("reset".into()).is_retryable());
        assert!(ChannelError::Transient("502".into()).is_retryable());
        assert!(ChannelError::Timeout { ms: 30_000 }.is_retryable());
        assert!(ChannelError::RateLimited { retry_after_secs: None }.is_retryable());
    }

    #[test]
    fn terminal_variants_are_not_retryable() {
        assert!(!ChannelError::InvalidRecipient("x".into()).is_retryable());
        assert!(!ChannelError::Rejected("spam".into()).is_retryable());
        assert!(!ChannelError::AuthFailed("bad token".into()).is_retryable());
        assert!(!ChannelError::ConfigError("no host".into()).is_retryable());
        assert!(!ChannelError::NotConfigured(ChannelKind::Slack).is_retryable());
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        let e = ChannelError::RateLimited { retry_after_secs: Some(12) };
        assert_eq!(e.retry_after(), Some(Duration::from_secs(12)));
        assert_eq!(ChannelError::Transient("x".into()).retry_after(), None);
    }
}
