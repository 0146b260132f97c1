//! Feed configuration: credentials, transport settings and the combined
//! [`FeedConfig`] a host can deserialize.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::filter::FilterSpec;

/// OAuth 1.0a user-context credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Access token
    pub access_key: String,

    /// Access token secret
    pub access_secret: String,

    /// Consumer key (API key)
    #[serde(alias = "consomer_key")]
    pub consumer_key: String,

    /// Consumer secret (API secret)
    #[serde(alias = "consomer_secret")]
    pub consumer_secret: String,
}

impl Credentials {
    /// Create credentials from the consumer and access key pairs.
    #[must_use]
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        access_key: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            access_secret: access_secret.into(),
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
        }
    }

    /// True when any of the four fields is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        [
            &self.access_key,
            &self.access_secret,
            &self.consumer_key,
            &self.consumer_secret,
        ]
        .iter()
        .any(|v| v.trim().is_empty())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"[REDACTED]")
            .field("access_key", &self.access_key)
            .field("access_secret", &"[REDACTED]")
            .finish()
    }
}

/// Settings for the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Base URL for the REST API (default: https://api.twitter.com)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base URL for the streaming API (default: https://stream.twitter.com)
    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    /// Request timeout. Bounds credential verification and the stream's
    /// connect phase; never the stream body.
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,

    /// Reconnect with backoff when a running stream drops
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,

    /// Capacity of the channel between the transport and the receive loop
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_api_url() -> String {
    "https://api.twitter.com".into()
}

fn default_stream_url() -> String {
    "https://stream.twitter.com".into()
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_reconnect() -> bool {
    true
}

const fn default_channel_capacity() -> usize {
    256
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            stream_url: default_stream_url(),
            timeout: default_timeout(),
            reconnect: default_reconnect(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Everything needed to build a [`StreamSession`](crate::StreamSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// OAuth credentials; `None` makes session construction fail with `NoAuth`
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Stream and client-side filter
    pub filter: FilterSpec,

    /// Transport settings
    #[serde(default)]
    pub transport: TransportConfig,
}

impl FeedConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Rate limit information from Twitter API headers.
#[derive(Debug, Clone, Default)]
pub struct RateLimitInfo {
    /// Maximum number of requests allowed in the window
    pub limit: Option<u32>,

    /// Remaining requests in the current window
    pub remaining: Option<u32>,

    /// Unix timestamp when the rate limit resets
    pub reset: Option<u64>,
}

impl RateLimitInfo {
    /// Parse rate limit info from response headers.
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        };
        Self {
            limit: read("x-rate-limit-limit").and_then(|v: u64| u32::try_from(v).ok()),
            remaining: read("x-rate-limit-remaining").and_then(|v: u64| u32::try_from(v).ok()),
            reset: read("x-rate-limit-reset"),
        }
    }

    /// Get the duration until the rate limit resets.
    #[must_use]
    pub fn time_until_reset(&self) -> Option<Duration> {
        let reset = self.reset?;
        let now = u64::try_from(chrono::Utc::now().timestamp()).ok()?;

        (reset > now).then(|| Duration::from_secs(reset - now))
    }
}
