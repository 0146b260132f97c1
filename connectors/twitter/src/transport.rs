//! The boundary between a feed session and whatever delivers raw stream
//! messages.
//!
//! A transport verifies credentials and opens filtered subscriptions. A
//! [`Subscription`] is the consumer half of a closable channel: the session
//! reads messages until the channel closes, and can ask the producer to
//! stop through its [`StreamStopper`]. Dropping the stopper counts as a stop
//! request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::error::TwitterResult;
use crate::types::{StreamMessage, User};

/// Provider-side parameters for a filtered stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFilterParams {
    /// Phrases to track
    pub track: Vec<String>,

    /// Languages to restrict to
    pub language: Vec<String>,

    /// Ask the server to send stall warnings
    pub stall_warnings: bool,
}

impl StreamFilterParams {
    /// Encode as form parameters. Empty lists are omitted.
    #[must_use]
    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form = Vec::with_capacity(3);
        if !self.track.is_empty() {
            form.push(("track".to_string(), self.track.join(",")));
        }
        if !self.language.is_empty() {
            form.push(("language".to_string(), self.language.join(",")));
        }
        if self.stall_warnings {
            form.push(("stall_warnings".to_string(), "true".to_string()));
        }
        form
    }
}

/// Capability required by [`StreamSession`](crate::StreamSession).
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Check that the credentials are accepted, returning the account.
    async fn verify_credentials(&self) -> TwitterResult<User>;

    /// Open a filtered stream.
    ///
    /// Returns once the stream is established; messages then arrive on the
    /// subscription until the transport closes it.
    async fn filter(&self, params: StreamFilterParams) -> TwitterResult<Subscription>;
}

/// Consumer half of an open stream.
#[derive(Debug)]
pub struct Subscription {
    messages: mpsc::Receiver<StreamMessage>,
    stopper: StreamStopper,
}

impl Subscription {
    /// Split into the message receiver and the stop handle.
    #[must_use]
    pub fn into_parts(self) -> (mpsc::Receiver<StreamMessage>, StreamStopper) {
        (self.messages, self.stopper)
    }
}

/// Signals the producer side of a subscription to terminate.
#[derive(Debug)]
pub struct StreamStopper {
    tx: watch::Sender<bool>,
}

impl StreamStopper {
    /// Request termination. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a stop was already requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Producer half of an open stream, held by the transport.
#[derive(Debug, Clone)]
pub struct MessageSink {
    tx: mpsc::Sender<StreamMessage>,
    stop_rx: watch::Receiver<bool>,
}

impl MessageSink {
    /// Deliver a message. Returns `false` once the consumer is gone.
    pub async fn send(&self, message: StreamMessage) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// Whether the consumer asked the stream to stop, or went away.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed() || self.stop_rx.has_changed().is_err() || *self.stop_rx.borrow()
    }

    /// Resolve once a stop is requested or the stopper is dropped.
    pub async fn stopped(&self) {
        let mut rx = self.stop_rx.clone();
        // An error means the stopper was dropped, which is also a stop.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Create a subscription channel with the given capacity.
#[must_use]
pub fn subscription_channel(capacity: usize) -> (Subscription, MessageSink) {
    let (tx, messages) = mpsc::channel(capacity.max(1));
    let (stop_tx, stop_rx) = watch::channel(false);

    (
        Subscription {
            messages,
            stopper: StreamStopper { tx: stop_tx },
        },
        MessageSink { tx, stop_rx },
    )
}
