//! Twitter API v1.1 types used by the filtered stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TwitterResult;

// ─────────────────────────────────────────────────────────────────────────────
// Tweet Types
// ─────────────────────────────────────────────────────────────────────────────

/// Tweet object as delivered on the stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tweet {
    /// Tweet ID
    pub id: i64,

    /// Tweet ID as a string
    #[serde(default)]
    pub id_str: String,

    /// Tweet text content
    #[serde(default)]
    pub text: String,

    /// Creation time, e.g. `Wed Oct 10 20:19:24 +0000 2018`
    #[serde(default)]
    pub created_at: Option<String>,

    /// Milliseconds since the epoch, added by the streaming API
    #[serde(default)]
    pub timestamp_ms: Option<String>,

    /// Author
    pub user: User,

    /// Entities (media, hashtags, ...)
    #[serde(default)]
    pub entities: Entities,

    /// Detected language (BCP 47)
    #[serde(default)]
    pub lang: Option<String>,

    /// Whether the text was truncated at 140 characters
    #[serde(default)]
    pub truncated: bool,
}

/// Twitter user object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    /// User ID
    #[serde(default)]
    pub id: i64,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Handle without the leading `@`
    #[serde(default)]
    pub screen_name: String,

    /// HTTPS avatar URL
    #[serde(default)]
    pub profile_image_url_https: String,

    /// Whether the account is verified
    #[serde(default)]
    pub verified: bool,

    /// Whether the account is protected (private)
    #[serde(default)]
    pub protected: bool,
}

/// Tweet entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entities {
    /// Attached media
    #[serde(default)]
    pub media: Vec<MediaEntity>,

    /// Hashtags
    #[serde(default)]
    pub hashtags: Vec<Hashtag>,
}

/// Media entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaEntity {
    /// Media ID
    #[serde(default)]
    pub id: i64,

    /// Media kind: "photo", "video", "animated_gif"
    #[serde(rename = "type")]
    pub media_type: String,

    /// HTTPS URL of the media file
    #[serde(default)]
    pub media_url_https: String,

    /// Shortened URL that appears in the text
    #[serde(default)]
    pub url: Option<String>,
}

impl MediaEntity {
    /// Whether this entity is a still image.
    #[must_use]
    pub fn is_photo(&self) -> bool {
        self.media_type == "photo"
    }
}

/// Hashtag entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashtag {
    /// Hashtag text (without #)
    pub text: String,

    /// Start and end offsets in the text
    #[serde(default)]
    pub indices: Vec<u32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Notices
// ─────────────────────────────────────────────────────────────────────────────

/// Warning sent when the client is falling behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StallWarning {
    /// Warning code, e.g. `FALLING_BEHIND`
    pub code: String,

    /// Human readable message
    #[serde(default)]
    pub message: String,

    /// Fill level of the server-side queue
    #[serde(default)]
    pub percent_full: u32,
}

/// Notice sent right before the server closes the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDisconnect {
    /// Disconnect code
    pub code: u32,

    /// Name of the disconnected stream
    #[serde(default)]
    pub stream_name: String,

    /// Reason text
    #[serde(default)]
    pub reason: String,
}

/// Number of undelivered tweets since the connection was opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamLimit {
    /// Undelivered tweet count
    pub track: u64,
}

/// Deletion notice for a previously delivered tweet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDeletion {
    /// Deleted tweet ID
    pub id: i64,

    /// Author ID
    #[serde(default)]
    pub user_id: i64,
}

/// One decoded message from the filtered stream.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// A tweet matching the tracked keywords.
    Tweet(Box<Tweet>),

    /// The client is falling behind.
    StallWarning(StallWarning),

    /// The server is about to close the connection.
    Disconnect(StreamDisconnect),

    /// Tweets were withheld by rate limiting.
    Limit(StreamLimit),

    /// A tweet was deleted.
    StatusDeletion(StatusDeletion),

    /// Anything else.
    Other(Value),
}

impl StreamMessage {
    /// Short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tweet(_) => "tweet",
            Self::StallWarning(_) => "stall_warning",
            Self::Disconnect(_) => "disconnect",
            Self::Limit(_) => "limit",
            Self::StatusDeletion(_) => "status_deletion",
            Self::Other(_) => "other",
        }
    }
}

impl From<Tweet> for StreamMessage {
    fn from(tweet: Tweet) -> Self {
        Self::Tweet(Box::new(tweet))
    }
}

/// Decode a single stream line into a [`StreamMessage`].
///
/// Messages are told apart by their top-level keys.
pub fn decode_message(line: &str) -> TwitterResult<StreamMessage> {
    let mut value: Value = serde_json::from_str(line)?;

    let Some(obj) = value.as_object_mut() else {
        return Ok(StreamMessage::Other(value));
    };

    if let Some(warning) = obj.remove("warning") {
        return Ok(StreamMessage::StallWarning(serde_json::from_value(warning)?));
    }
    if let Some(disconnect) = obj.remove("disconnect") {
        return Ok(StreamMessage::Disconnect(serde_json::from_value(disconnect)?));
    }
    if let Some(limit) = obj.remove("limit") {
        return Ok(StreamMessage::Limit(serde_json::from_value(limit)?));
    }
    if let Some(mut delete) = obj.remove("delete") {
        if let Some(status) = delete.get_mut("status").map(Value::take) {
            return Ok(StreamMessage::StatusDeletion(serde_json::from_value(status)?));
        }
        return Ok(StreamMessage::Other(delete));
    }
    if obj.contains_key("text") && obj.contains_key("user") {
        let tweet: Tweet = serde_json::from_value(value)?;
        return Ok(tweet.into());
    }

    Ok(StreamMessage::Other(value))
}
