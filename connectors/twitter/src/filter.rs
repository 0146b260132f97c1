//! Stream filter: provider-side tracking criteria plus the client-side
//! allow/deny predicate applied to every received tweet.

use serde::{Deserialize, Serialize};

use crate::error::{FeedError, FeedResult};
use crate::transport::StreamFilterParams;

/// Filter for a feed session.
///
/// `keywords` and `language` are sent to Twitter when the stream is opened.
/// The three remaining lists are evaluated locally by [`FilterSpec::matches`].
/// An empty list never constrains anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// BCP 47 language codes
    #[serde(default)]
    pub language: Vec<String>,

    /// Phrases to track (must not be empty)
    #[serde(default)]
    pub keywords: Vec<String>,

    /// If non-empty, only these handles are delivered
    #[serde(default)]
    pub only_users: Vec<String>,

    /// Handles that are never delivered
    #[serde(default)]
    pub blocked_users: Vec<String>,

    /// Literal substrings that cause a tweet to be dropped
    #[serde(default, rename = "banned_words", alias = "blocked_words")]
    pub blocked_words: Vec<String>,
}

impl FilterSpec {
    /// Create a filter tracking the given keywords.
    #[must_use]
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Restrict the stream to these languages.
    #[must_use]
    pub fn with_language<I, S>(mut self, language: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.language = language.into_iter().map(Into::into).collect();
        self
    }

    /// Only deliver tweets from these handles.
    #[must_use]
    pub fn with_only_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only_users = users.into_iter().map(Into::into).collect();
        self
    }

    /// Never deliver tweets from these handles.
    #[must_use]
    pub fn with_blocked_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_users = users.into_iter().map(Into::into).collect();
        self
    }

    /// Drop tweets containing any of these substrings.
    #[must_use]
    pub fn with_blocked_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_words = words.into_iter().map(Into::into).collect();
        self
    }

    /// Reject a filter that tracks nothing.
    pub fn validate(&self) -> FeedResult<()> {
        if self.keywords.is_empty() {
            return Err(FeedError::EmptyFilter);
        }
        Ok(())
    }

    /// Parameters for opening the filtered stream. Stall warnings are
    /// always requested.
    #[must_use]
    pub fn stream_params(&self) -> StreamFilterParams {
        StreamFilterParams {
            track: self.keywords.clone(),
            language: self.language.clone(),
            stall_warnings: true,
        }
    }

    /// Decide whether a tweet should be delivered.
    ///
    /// Evaluation order: blocked users, blocked words, then the allow-list.
    /// A blocked author or word is rejected even when the author is
    /// allow-listed. Authors compare case-insensitively; word matching is a
    /// case-sensitive substring test on the raw text.
    #[must_use]
    pub fn matches(&self, author: &str, text: &str) -> bool {
        let author = author.to_lowercase();
        let is_author = |u: &String| u.to_lowercase() == author;

        if self.blocked_users.iter().any(is_author) {
            return false;
        }
        if self.blocked_words.iter().any(|w| text.contains(w.as_str())) {
            return false;
        }
        if !self.only_users.is_empty() {
            return self.only_users.iter().any(is_author);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts() -> [&'static str; 4] {
        ["", "hello world", "Buy CHEAP pills", "rust 🦀 release"]
    }

    #[test]
    fn test_empty_lists_accept_everything() {
        let filter = FilterSpec::new(["rust"]);
        for author in ["alice", "bob", ""] {
            for text in texts() {
                assert!(filter.matches(author, text), "{author} / {text}");
            }
        }
    }

    #[test]
    fn test_blocked_author_wins_over_allow_list() {
        let filter = FilterSpec::new(["rust"])
            .with_only_users(["alice", "bob"])
            .with_blocked_users(["Alice"]);

        assert!(!filter.matches("alice", "hello"));
        assert!(filter.matches("bob", "hello"));
    }

    #[test]
    fn test_blocked_word_wins_over_allow_list() {
        let filter = FilterSpec::new(["rust"])
            .with_only_users(["alice"])
            .with_blocked_words(["spam"]);

        assert!(!filter.matches("alice", "this is spam"));
        assert!(filter.matches("alice", "this is fine"));
    }

    #[test]
    fn test_allow_list_is_exclusive() {
        let filter = FilterSpec::new(["rust"]).with_only_users(["alice", "Carol"]);

        assert!(filter.matches("alice", "hi"));
        assert!(filter.matches("carol", "hi"));
        assert!(!filter.matches("bob", "hi"));
        assert!(!filter.matches("", "hi"));
    }

    #[test]
    fn test_author_matching_is_case_insensitive() {
        let allow = FilterSpec::new(["rust"]).with_only_users(["alice"]);
        let block = FilterSpec::new(["rust"]).with_blocked_users(["alice"]);

        assert_eq!(allow.matches("AlICe", "t"), allow.matches("alice", "t"));
        assert_eq!(block.matches("AlICe", "t"), block.matches("alice", "t"));
        assert!(allow.matches("AlICe", "t"));
        assert!(!block.matches("AlICe", "t"));

        let mixed_list = FilterSpec::new(["rust"]).with_only_users(["ALICE"]);
        assert!(mixed_list.matches("alice", "t"));
    }

    #[test]
    fn test_blocked_words_are_case_sensitive_substrings() {
        let filter = FilterSpec::new(["rust"]).with_blocked_words(["CHEAP"]);

        assert!(!filter.matches("bob", "Buy CHEAP pills"));
        assert!(!filter.matches("bob", "SUPERCHEAPDEALS"));
        assert!(filter.matches("bob", "buy cheap pills"));
    }

    #[test]
    fn test_validate_requires_keywords() {
        assert!(matches!(
            FilterSpec::default().validate(),
            Err(FeedError::EmptyFilter)
        ));
        assert!(FilterSpec::new(["rust"]).validate().is_ok());
    }

    #[test]
    fn test_stream_params_request_stall_warnings() {
        let params = FilterSpec::new(["rust", "tokio"])
            .with_language(["en"])
            .stream_params();

        assert_eq!(params.track, vec!["rust".to_string(), "tokio".to_string()]);
        assert_eq!(params.language, vec!["en".to_string()]);
        assert!(params.stall_warnings);
    }

    #[test]
    fn test_deserialize_legacy_field_names() {
        let filter: FilterSpec = serde_json::from_value(serde_json::json!({
            "language": ["en"],
            "keywords": ["rust"],
            "only_users": ["alice"],
            "blocked_users": ["bob"],
            "banned_words": ["spam"]
        }))
        .unwrap();

        assert_eq!(filter.blocked_words, vec!["spam".to_string()]);
        assert_eq!(filter.only_users, vec!["alice".to_string()]);
    }
}
