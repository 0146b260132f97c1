//! Conversion of raw stream tweets into [`FeedTweet`] records.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::FilterSpec;
use crate::types::Tweet;

/// `created_at` layout used by API v1.1.
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Simplified tweet handed to the session callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedTweet {
    /// Tweet ID
    pub id: i64,

    /// Author handle
    pub user: String,

    /// Author display name
    pub user_name: String,

    /// Author avatar URL
    pub user_photo: String,

    /// Tweet text
    pub text: String,

    /// Photo URLs in attachment order
    pub images: Vec<String>,

    /// When the tweet was posted
    pub time: DateTime<Utc>,
}

/// Translate a raw tweet, or `None` when `filter` rejects it.
#[must_use]
pub fn translate(tweet: Tweet, filter: Option<&FilterSpec>) -> Option<FeedTweet> {
    if let Some(filter) = filter {
        if !filter.matches(&tweet.user.screen_name.to_lowercase(), &tweet.text) {
            return None;
        }
    }

    let time = tweet_time(&tweet).unwrap_or_else(Utc::now);
    let images = tweet
        .entities
        .media
        .into_iter()
        .filter(|m| m.is_photo())
        .map(|m| m.media_url_https)
        .collect();

    Some(FeedTweet {
        id: tweet.id,
        user: tweet.user.screen_name,
        user_name: tweet.user.name,
        user_photo: tweet.user.profile_image_url_https,
        text: tweet.text,
        images,
        time,
    })
}

fn tweet_time(tweet: &Tweet) -> Option<DateTime<Utc>> {
    let from_millis = tweet
        .timestamp_ms
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    from_millis.or_else(|| {
        tweet
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_str(s, CREATED_AT_FORMAT).ok())
            .map(|t| t.with_timezone(&Utc))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entities, MediaEntity, User};

    fn media(kind: &str, url: &str) -> MediaEntity {
        MediaEntity {
            id: 0,
            media_type: kind.to_string(),
            media_url_https: url.to_string(),
            url: None,
        }
    }

    fn tweet(handle: &str, text: &str, media: Vec<MediaEntity>) -> Tweet {
        Tweet {
            id: 42,
            id_str: "42".into(),
            text: text.into(),
            created_at: Some("Wed Oct 10 20:19:24 +0000 2018".into()),
            timestamp_ms: None,
            user: User {
                id: 7,
                name: "Alice Liddell".into(),
                screen_name: handle.into(),
                profile_image_url_https: "https://pbs.twimg.com/alice.jpg".into(),
                ..User::default()
            },
            entities: Entities {
                media,
                hashtags: vec![],
            },
            lang: Some("en".into()),
            truncated: false,
        }
    }

    #[test]
    fn test_fields_are_copied() {
        let record = translate(tweet("Alice", "hello", vec![]), None).unwrap();

        assert_eq!(record.id, 42);
        assert_eq!(record.user, "Alice");
        assert_eq!(record.user_name, "Alice Liddell");
        assert_eq!(record.user_photo, "https://pbs.twimg.com/alice.jpg");
        assert_eq!(record.text, "hello");
        assert!(record.images.is_empty());
        assert_eq!(record.time.timestamp(), 1_539_202_764);
    }

    #[test]
    fn test_only_photos_become_images_in_order() {
        let raw = tweet(
            "alice",
            "pics",
            vec![
                media("photo", "https://pbs.twimg.com/media/1.jpg"),
                media("video", "https://pbs.twimg.com/media/2.jpg"),
                media("photo", "https://pbs.twimg.com/media/3.jpg"),
                media("animated_gif", "https://pbs.twimg.com/media/4.jpg"),
            ],
        );

        let record = translate(raw, None).unwrap();
        assert_eq!(
            record.images,
            vec![
                "https://pbs.twimg.com/media/1.jpg".to_string(),
                "https://pbs.twimg.com/media/3.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn test_filter_sees_lowercased_handle() {
        let filter = FilterSpec::new(["rust"]).with_only_users(["alice"]);

        assert!(translate(tweet("ALICE", "hi", vec![]), Some(&filter)).is_some());
        assert!(translate(tweet("bob", "hi", vec![]), Some(&filter)).is_none());
    }

    #[test]
    fn test_filter_rejection_drops_tweet() {
        let filter = FilterSpec::new(["rust"]).with_blocked_words(["spam"]);

        assert!(translate(tweet("alice", "pure spam", vec![]), Some(&filter)).is_none());
        assert!(translate(tweet("alice", "pure rust", vec![]), Some(&filter)).is_some());
    }

    #[test]
    fn test_timestamp_ms_takes_precedence() {
        let mut raw = tweet("alice", "hi", vec![]);
        raw.timestamp_ms = Some("1539202765123".into());

        let record = translate(raw, None).unwrap();
        assert_eq!(record.time.timestamp_millis(), 1_539_202_765_123);
    }

    #[test]
    fn test_missing_timestamp_falls_back_to_receipt_time() {
        let mut raw = tweet("alice", "hi", vec![]);
        raw.created_at = Some("not a date".into());

        let before = Utc::now();
        let record = translate(raw, None).unwrap();
        assert!(record.time >= before);
    }
}
