//! Shared helpers for the integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use twitter_feed::{
    subscription_channel, StreamFilterParams, StreamMessage, StreamTransport, Subscription, Tweet,
    TwitterError, TwitterResult, User,
};

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,twitter_feed=debug"));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer().compact())
            .init();
    });
}

/// Observable state of a [`StubTransport`].
#[derive(Debug, Default)]
pub struct StubState {
    pub built: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub filter_calls: AtomicUsize,
    pub fail_verify: AtomicBool,
    pub fail_filter: AtomicBool,
    /// When set, `filter` parks until `gate` is notified.
    pub gated: AtomicBool,
    pub gate: Notify,
    pub last_params: Mutex<Option<StreamFilterParams>>,
    upstreams: Mutex<Vec<mpsc::Sender<StreamMessage>>>,
}

impl StubState {
    /// Push a message into the most recent subscription.
    pub async fn push(&self, message: impl Into<StreamMessage>) {
        let upstream = self.upstream().expect("no subscription open");
        upstream
            .send(message.into())
            .await
            .expect("subscription already closed");
    }

    /// Sender feeding the most recent subscription.
    pub fn upstream(&self) -> Option<mpsc::Sender<StreamMessage>> {
        self.upstreams.lock().last().cloned()
    }

    /// Simulate the provider ending every open stream.
    pub fn close_upstream(&self) {
        self.upstreams.lock().clear();
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.built.load(Ordering::SeqCst),
            self.verify_calls.load(Ordering::SeqCst),
            self.filter_calls.load(Ordering::SeqCst),
        )
    }
}

/// In-memory transport recording every call.
#[derive(Debug, Clone)]
pub struct StubTransport {
    state: Arc<StubState>,
}

impl StubTransport {
    pub fn new(state: &Arc<StubState>) -> Self {
        state.built.fetch_add(1, Ordering::SeqCst);
        Self {
            state: Arc::clone(state),
        }
    }
}

#[async_trait]
impl StreamTransport for StubTransport {
    async fn verify_credentials(&self) -> TwitterResult<User> {
        self.state.verify_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_verify.load(Ordering::SeqCst) {
            return Err(TwitterError::Api {
                status: 401,
                message: "Could not authenticate you.".into(),
                error_code: Some(32),
                retry_after: None,
            });
        }
        Ok(User {
            id: 1,
            name: "Feed Bot".into(),
            screen_name: "feedbot".into(),
            ..User::default()
        })
    }

    async fn filter(&self, params: StreamFilterParams) -> TwitterResult<Subscription> {
        self.state.filter_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.last_params.lock() = Some(params);

        if self.state.gated.load(Ordering::SeqCst) {
            self.state.gate.notified().await;
        }
        if self.state.fail_filter.load(Ordering::SeqCst) {
            return Err(TwitterError::Api {
                status: 503,
                message: "Service Unavailable".into(),
                error_code: None,
                retry_after: None,
            });
        }

        let (subscription, sink) = subscription_channel(16);
        let (upstream_tx, mut upstream_rx) = mpsc::channel(16);
        self.state.upstreams.lock().push(upstream_tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = sink.stopped() => break,
                    message = upstream_rx.recv() => match message {
                        Some(message) => {
                            if !sink.send(message).await {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(subscription)
    }
}

pub fn tweet(id: i64, handle: &str, text: &str) -> Tweet {
    Tweet {
        id,
        id_str: id.to_string(),
        text: text.to_string(),
        timestamp_ms: Some("1539202764000".into()),
        user: User {
            screen_name: handle.to_string(),
            name: handle.to_uppercase(),
            ..User::default()
        },
        ..Tweet::default()
    }
}
