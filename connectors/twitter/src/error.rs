//! Error types for the feed session and the Twitter transport.

use std::time::Duration;

use thiserror::Error;

/// Transport-level errors raised while talking to the Twitter API.
#[derive(Error, Debug)]
pub enum TwitterError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// OAuth signature generation failed
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// Twitter API returned an error
    #[error("Twitter API error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        error_code: Option<i32>,
        retry_after: Option<u64>,
    },

    /// Rate limited (HTTP 420 or 429)
    #[error("Rate limited, retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    /// Stream error
    #[error("Stream error: {0}")]
    Stream(String),
}

impl TwitterError {
    /// Check if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } | Self::Stream(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get the suggested retry delay.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(Duration::from_secs(*retry_after)),
            Self::Api { retry_after, .. } => retry_after.map(Duration::from_secs),
            _ => None,
        }
    }
}

/// Result type for Twitter transport operations.
pub type TwitterResult<T> = Result<T, TwitterError>;

/// Errors surfaced by [`StreamSession`](crate::StreamSession).
///
/// `NoAuth` and `EmptyFilter` are detected before any network call.
/// `AlreadyStarted` is a state-machine violation, never a network failure.
#[derive(Error, Debug)]
pub enum FeedError {
    /// Credentials were not supplied, or one of their fields is blank.
    #[error("twitter credentials cannot be empty")]
    NoAuth,

    /// The filter has no keywords to track.
    #[error("twitter stream filter cannot be empty")]
    EmptyFilter,

    /// `start` was called while a stream is already running.
    #[error("twitter stream already started")]
    AlreadyStarted,

    /// Credential verification was rejected or could not be performed.
    #[error("cannot authenticate to Twitter: {source}")]
    Authentication {
        #[source]
        source: TwitterError,
    },

    /// The filtered stream could not be opened.
    #[error("unable to start Twitter filter: {source}")]
    Subscription {
        #[source]
        source: TwitterError,
    },
}

impl FeedError {
    /// Whether this error comes from invalid construction input.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::NoAuth | Self::EmptyFilter)
    }

    /// The underlying transport error, if any.
    #[must_use]
    pub const fn transport_error(&self) -> Option<&TwitterError> {
        match self {
            Self::Authentication { source } | Self::Subscription { source } => Some(source),
            _ => None,
        }
    }
}

/// Result type for feed session operations.
pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TwitterError::RateLimited { retry_after: 60 }.is_retryable());
        assert!(TwitterError::Stream("eof".into()).is_retryable());
        assert!(
            TwitterError::Api {
                status: 503,
                message: "Service Unavailable".into(),
                error_code: None,
                retry_after: None,
            }
            .is_retryable()
        );
        assert!(
            !TwitterError::Api {
                status: 401,
                message: "Unauthorized".into(),
                error_code: Some(32),
                retry_after: None,
            }
            .is_retryable()
        );
        assert!(!TwitterError::OAuth("bad key".into()).is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let err = TwitterError::RateLimited { retry_after: 15 };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(15)));
        assert_eq!(TwitterError::Stream("x".into()).retry_after(), None);
    }

    #[test]
    fn test_feed_error_kinds() {
        assert!(FeedError::NoAuth.is_config_error());
        assert!(FeedError::EmptyFilter.is_config_error());
        assert!(!FeedError::AlreadyStarted.is_config_error());

        let err = FeedError::Authentication {
            source: TwitterError::Api {
                status: 401,
                message: "Could not authenticate you.".into(),
                error_code: Some(32),
                retry_after: None,
            },
        };
        assert!(!err.is_config_error());
        assert!(matches!(
            err.transport_error(),
            Some(TwitterError::Api { status: 401, .. })
        ));
        assert_eq!(
            err.to_string(),
            "cannot authenticate to Twitter: Twitter API error 401: Could not authenticate you."
        );
        assert!(FeedError::AlreadyStarted.transport_error().is_none());
    }
}
