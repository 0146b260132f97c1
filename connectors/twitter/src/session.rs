//! Stream session: owns the single filtered subscription, its receive loop
//! and the callback slot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::{
    client::TwitterApiClient,
    config::{Credentials, FeedConfig, TransportConfig},
    error::{FeedError, FeedResult, TwitterResult},
    filter::FilterSpec,
    transport::{StreamStopper, StreamTransport},
    translate::{translate, FeedTweet},
    types::{StreamMessage, User},
};

/// Consumer of translated tweets.
pub type Callback = Arc<dyn Fn(FeedTweet) + Send + Sync>;

/// Subscription slot.
enum StreamState {
    Idle,
    Starting { stop_requested: bool },
    Running { generation: u64, stopper: StreamStopper },
}

impl fmt::Debug for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Starting { stop_requested } => f
                .debug_struct("Starting")
                .field("stop_requested", stop_requested)
                .finish(),
            Self::Running { generation, .. } => f
                .debug_struct("Running")
                .field("generation", generation)
                .finish_non_exhaustive(),
        }
    }
}

/// Snapshot of the session counters. Counters accumulate across runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    /// Tweets read from the subscription
    pub received: u64,

    /// Tweets handed to the callback
    pub delivered: u64,

    /// Tweets rejected by the client-side filter
    pub filtered: u64,

    /// Tweets dropped because no callback was registered
    pub undelivered: u64,

    /// Stall warnings reported by the server
    pub stall_warnings: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    delivered: AtomicU64,
    filtered: AtomicU64,
    undelivered: AtomicU64,
    stall_warnings: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> StreamStats {
        StreamStats {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            undelivered: self.undelivered.load(Ordering::Relaxed),
            stall_warnings: self.stall_warnings.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the session handle and its receive loop.
struct Shared {
    filter: FilterSpec,
    state: Mutex<StreamState>,
    callback: RwLock<Option<Callback>>,
    generation: AtomicU64,
    counters: Counters,
    running_tx: watch::Sender<bool>,
}

impl Shared {
    /// Return to `Idle`. Caller holds the state lock.
    fn set_idle(&self, state: &mut StreamState) {
        *state = StreamState::Idle;
        self.running_tx.send_replace(false);
    }

    fn handle_message(&self, message: StreamMessage) {
        match message {
            StreamMessage::Tweet(tweet) => {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
                let id = tweet.id;
                match translate(*tweet, Some(&self.filter)) {
                    Some(record) => self.dispatch(record),
                    None => {
                        self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                        debug!(id, "Tweet dropped by filter");
                    }
                }
            }
            StreamMessage::StallWarning(warning) => {
                self.counters.stall_warnings.fetch_add(1, Ordering::Relaxed);
                warn!(
                    code = %warning.code,
                    percent_full = warning.percent_full,
                    "Stall warning: {}",
                    warning.message
                );
            }
            StreamMessage::Disconnect(notice) => {
                info!(
                    code = notice.code,
                    stream = %notice.stream_name,
                    reason = %notice.reason,
                    "Server disconnect notice"
                );
            }
            StreamMessage::Limit(limit) => {
                debug!(withheld = limit.track, "Limit notice");
            }
            StreamMessage::StatusDeletion(_) | StreamMessage::Other(_) => {}
        }
    }

    fn dispatch(&self, record: FeedTweet) {
        // Clone out so a replacement never waits on a running callback.
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(record);
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.undelivered.fetch_add(1, Ordering::Relaxed);
            debug!(id = record.id, "No callback registered, tweet discarded");
        }
    }
}

/// Resets `Starting` to `Idle` unless disarmed, so a failed or cancelled
/// `start` never leaves the slot taken.
struct StartGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl StartGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.state.lock();
        if matches!(*state, StreamState::Starting { .. }) {
            self.shared.set_idle(&mut state);
        }
    }
}

/// Clears the slot when a receive loop exits, including by panic.
struct LoopGuard {
    shared: Arc<Shared>,
    generation: u64,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        match *state {
            StreamState::Running { generation, .. } if generation == self.generation => {
                self.shared.set_idle(&mut state);
                info!(generation, "Twitter stream stopped");
            }
            _ => debug!(generation = self.generation, "Stale receive loop exited"),
        }
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    mut messages: mpsc::Receiver<StreamMessage>,
    generation: u64,
) {
    let _guard = LoopGuard {
        shared: Arc::clone(&shared),
        generation,
    };

    while let Some(message) = messages.recv().await {
        shared.handle_message(message);
    }

    debug!(generation, "Subscription channel closed");
}

/// Builder for [`StreamSession`].
#[derive(Debug, Default)]
pub struct SessionBuilder {
    credentials: Option<Credentials>,
    filter: FilterSpec,
    transport: TransportConfig,
}

impl SessionBuilder {
    /// Start from a deserialized [`FeedConfig`].
    #[must_use]
    pub fn from_config(config: FeedConfig) -> Self {
        Self {
            credentials: config.credentials,
            filter: config.filter,
            transport: config.transport,
        }
    }

    /// Request timeout for credential verification and stream connection.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.transport.timeout = timeout;
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: FilterSpec) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replace the transport settings. Call before [`timeout`](Self::timeout)
    /// to keep a custom timeout.
    #[must_use]
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport = config;
        self
    }

    /// Build the HTTP transport and authenticate.
    pub async fn connect(self) -> FeedResult<StreamSession<TwitterApiClient>> {
        self.connect_with(TwitterApiClient::new).await
    }

    /// Build the session on a transport produced by `factory`, then
    /// authenticate.
    ///
    /// Credentials and filter are validated before `factory` runs.
    pub async fn connect_with<T, F>(self, factory: F) -> FeedResult<StreamSession<T>>
    where
        T: StreamTransport,
        F: FnOnce(&Credentials, &TransportConfig) -> TwitterResult<T>,
    {
        let credentials = match self.credentials {
            Some(credentials) if !credentials.is_blank() => credentials,
            _ => return Err(FeedError::NoAuth),
        };
        self.filter.validate()?;

        let transport = factory(&credentials, &self.transport)
            .map_err(|source| FeedError::Authentication { source })?;
        drop(credentials);

        StreamSession::authenticate(transport, self.filter).await
    }
}

/// A filtered feed over one transport.
///
/// At most one subscription is live at a time. Dropping the session stops
/// any running stream.
pub struct StreamSession<T = TwitterApiClient> {
    transport: T,
    shared: Arc<Shared>,
    user: User,
}

impl<T> fmt::Debug for StreamSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("user", &self.user.screen_name)
            .field("state", &*self.shared.state.lock())
            .finish_non_exhaustive()
    }
}

impl StreamSession<TwitterApiClient> {
    /// Create a session builder.
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }
}

impl<T: StreamTransport> StreamSession<T> {
    #[instrument(skip_all)]
    async fn authenticate(transport: T, filter: FilterSpec) -> FeedResult<Self> {
        let user = transport
            .verify_credentials()
            .await
            .map_err(|source| FeedError::Authentication { source })?;

        info!(user = %user.screen_name, "Twitter session authenticated");

        let (running_tx, _) = watch::channel(false);
        Ok(Self {
            transport,
            shared: Arc::new(Shared {
                filter,
                state: Mutex::new(StreamState::Idle),
                callback: RwLock::new(None),
                generation: AtomicU64::new(0),
                counters: Counters::default(),
                running_tx,
            }),
            user,
        })
    }

    /// Open the filtered stream and spawn the receive loop.
    ///
    /// Returns once the subscription is open. Must be called inside a tokio
    /// runtime.
    #[instrument(skip(self), fields(user = %self.user.screen_name))]
    pub async fn start(&self) -> FeedResult<()> {
        {
            let mut state = self.shared.state.lock();
            if !matches!(*state, StreamState::Idle) {
                return Err(FeedError::AlreadyStarted);
            }
            *state = StreamState::Starting {
                stop_requested: false,
            };
            self.shared.running_tx.send_replace(true);
        }
        let guard = StartGuard {
            shared: &self.shared,
            armed: true,
        };

        let subscription = self
            .transport
            .filter(self.shared.filter.stream_params())
            .await
            .map_err(|source| {
                warn!(error = %source, "Failed to open filtered stream");
                FeedError::Subscription { source }
            })?;
        let (messages, stopper) = subscription.into_parts();

        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut state = self.shared.state.lock();
            if matches!(
                *state,
                StreamState::Starting {
                    stop_requested: true
                }
            ) {
                debug!("Stop requested during start");
                stopper.stop();
            }
            *state = StreamState::Running {
                generation,
                stopper,
            };
        }
        guard.disarm();

        tokio::spawn(receive_loop(Arc::clone(&self.shared), messages, generation));
        info!(generation, "Twitter stream started");
        Ok(())
    }

    /// Account the session authenticated as.
    #[must_use]
    pub const fn user(&self) -> &User {
        &self.user
    }

    /// Underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T> StreamSession<T> {
    /// Ask the running stream to terminate. A no-op when idle.
    ///
    /// The session returns to idle once the receive loop has drained; see
    /// [`wait_stopped`](Self::wait_stopped).
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        match &mut *state {
            StreamState::Idle => {}
            StreamState::Starting { stop_requested } => *stop_requested = true,
            StreamState::Running {
                generation,
                stopper,
            } => {
                info!(generation = *generation, "Stopping Twitter stream");
                stopper.stop();
            }
        }
    }

    /// Register the consumer, replacing any previous one.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(FeedTweet) + Send + Sync + 'static,
    {
        *self.shared.callback.write() = Some(Arc::new(callback));
    }

    /// Remove the consumer. Tweets are discarded until a new one is set.
    pub fn clear_callback(&self) {
        *self.shared.callback.write() = None;
    }

    /// Whether a stream is starting or running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !matches!(*self.shared.state.lock(), StreamState::Idle)
    }

    /// Resolve once the session is idle.
    pub async fn wait_stopped(&self) {
        let mut running = self.shared.running_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = running.wait_for(|running| !*running).await;
    }

    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.shared.counters.snapshot()
    }

    #[must_use]
    pub fn filter(&self) -> &FilterSpec {
        &self.shared.filter
    }
}

impl<T> Drop for StreamSession<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
