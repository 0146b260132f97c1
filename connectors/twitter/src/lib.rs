//! Twitter Filtered Feed
//!
//! Consumes the Twitter v1.1 filtered stream and hands matching tweets to a
//! single callback.
//!
//! ## Pipeline
//!
//! - [`StreamSession`] validates credentials and filter, authenticates, and
//!   owns at most one live subscription.
//! - A background loop reads raw [`StreamMessage`]s in order, converts tweets
//!   with [`translate`] and applies the client-side [`FilterSpec`].
//! - Accepted tweets are delivered as [`FeedTweet`] to the registered
//!   callback; everything else is dropped silently.
//!
//! ## Transport
//!
//! [`TwitterApiClient`] signs requests with OAuth 1.0a and keeps the stream
//! connected with backoff until it is stopped. Any other
//! [`StreamTransport`] can be plugged in through
//! [`SessionBuilder::connect_with`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod client;
mod config;
mod error;
mod filter;
mod oauth;
mod session;
mod stream;
mod translate;
mod transport;
mod types;

pub use client::TwitterApiClient;
pub use config::{Credentials, FeedConfig, RateLimitInfo, TransportConfig};
pub use error::{FeedError, FeedResult, TwitterError, TwitterResult};
pub use filter::FilterSpec;
pub use oauth::OAuthSigner;
pub use session::{Callback, SessionBuilder, StreamSession, StreamStats};
pub use translate::{translate, FeedTweet};
pub use transport::{
    subscription_channel, MessageSink, StreamFilterParams, StreamStopper, StreamTransport,
    Subscription,
};
pub use types::{
    decode_message, Entities, Hashtag, MediaEntity, StallWarning, StatusDeletion,
    StreamDisconnect, StreamLimit, StreamMessage, Tweet, User,
};
