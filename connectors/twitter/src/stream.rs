//! Filtered stream reader.
//!
//! Reads the `\r\n` delimited body of `statuses/filter`, decodes each line
//! and forwards it to the subscription. While the subscription is live a
//! dropped connection is reopened with backoff; a stop request, a consumer
//! that went away, or a non-retryable response ends the loop and closes the
//! channel.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Response;
use tracing::{debug, error, info, warn};

use crate::{
    client::TwitterApiClient,
    error::TwitterError,
    transport::{MessageSink, StreamFilterParams},
    types::decode_message,
};

/// Upper bound for a buffered partial line.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Network backoff grows linearly up to this delay, then doubles.
const LINEAR_BACKOFF_THRESHOLD: Duration = Duration::from_secs(60);

/// Longest wait between reconnect attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(16 * 60);

/// Longest wait after server errors.
const MAX_HTTP_BACKOFF: Duration = Duration::from_secs(320);

/// Why the previous connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryCause {
    /// Connection dropped, body ended or the request failed at the network level.
    Network,
    /// 5xx response.
    Http,
    /// 420 or 429 response.
    RateLimited,
}

impl RetryCause {
    /// Classify a connection error, or `None` when it should not be retried.
    pub(crate) const fn for_error(error: &TwitterError) -> Option<Self> {
        match error {
            TwitterError::Http(_) | TwitterError::Stream(_) => Some(Self::Network),
            TwitterError::RateLimited { .. } => Some(Self::RateLimited),
            TwitterError::Api { status, .. } if *status >= 500 => Some(Self::Http),
            _ => None,
        }
    }
}

/// Reconnect delays, tracked separately per cause.
#[derive(Debug, Default)]
pub(crate) struct ReconnectBackoff {
    network: Option<Duration>,
    http: Option<Duration>,
    rate_limited: Option<Duration>,
}

impl ReconnectBackoff {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn next_delay(&mut self, cause: RetryCause) -> Duration {
        let slot = match cause {
            RetryCause::Network => &mut self.network,
            RetryCause::Http => &mut self.http,
            RetryCause::RateLimited => &mut self.rate_limited,
        };

        let next = match (*slot, cause) {
            (None, RetryCause::Network) => Duration::from_secs(1),
            (None, RetryCause::Http) => Duration::from_secs(5),
            (None, RetryCause::RateLimited) => Duration::from_secs(60),
            (Some(prev), RetryCause::Network) if prev < LINEAR_BACKOFF_THRESHOLD => {
                prev + Duration::from_secs(1)
            }
            (Some(prev), RetryCause::Http) => (prev * 2).min(MAX_HTTP_BACKOFF),
            (Some(prev), _) => (prev * 2).min(MAX_BACKOFF),
        };

        *slot = Some(next);
        next
    }
}

/// How a single connection ended.
#[derive(Debug)]
enum StreamEnd {
    /// Stop requested or the consumer went away.
    Stopped,
    /// Server closed the body.
    Closed,
    /// Read error.
    Failed(TwitterError),
}

/// Drive the subscription until it is stopped or can no longer reconnect.
///
/// Dropping `sink` on return is what closes the consumer's channel.
pub(crate) async fn run_stream_loop(
    client: TwitterApiClient,
    params: StreamFilterParams,
    response: Response,
    sink: MessageSink,
) {
    let mut backoff = ReconnectBackoff::default();
    let mut response = Some(response);
    let mut cause = RetryCause::Network;

    loop {
        if let Some(active) = response.take() {
            backoff.reset();
            match process_stream(active, &sink).await {
                StreamEnd::Stopped => {
                    info!("Filtered stream stopped");
                    return;
                }
                StreamEnd::Closed => info!("Filtered stream closed by server"),
                StreamEnd::Failed(e) => warn!(error = %e, "Filtered stream interrupted"),
            }
            cause = RetryCause::Network;
        }

        if !client.reconnect_enabled() {
            debug!("Reconnect disabled, closing subscription");
            return;
        }

        let delay = backoff.next_delay(cause);
        info!(delay_secs = delay.as_secs(), ?cause, "Reconnecting after delay");
        tokio::select! {
            () = sink.stopped() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let attempt = tokio::select! {
            () = sink.stopped() => return,
            attempt = client.open_stream(&params) => attempt,
        };

        match attempt {
            Ok(reopened) => response = Some(reopened),
            Err(e) => match RetryCause::for_error(&e) {
                Some(next) => {
                    warn!(error = %e, "Reconnect attempt failed");
                    cause = next;
                }
                None => {
                    error!(error = %e, "Filtered stream rejected, closing subscription");
                    return;
                }
            },
        }
    }
}

/// Forward messages from one connection until it ends.
async fn process_stream(response: Response, sink: &MessageSink) -> StreamEnd {
    let mut body = std::pin::pin!(response.bytes_stream());
    let mut buffer = Vec::new();

    loop {
        let next = tokio::select! {
            () = sink.stopped() => return StreamEnd::Stopped,
            next = body.next() => next,
        };

        let chunk: Bytes = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return StreamEnd::Failed(e.into()),
            None => {
                // A final message may arrive without its delimiter.
                buffer.push(b'\n');
                if !forward_lines(&mut buffer, sink).await {
                    return StreamEnd::Stopped;
                }
                return StreamEnd::Closed;
            }
        };

        buffer.extend_from_slice(&chunk);
        if !forward_lines(&mut buffer, sink).await {
            return StreamEnd::Stopped;
        }

        if buffer.len() > MAX_LINE_BYTES {
            return StreamEnd::Failed(TwitterError::Stream(format!(
                "message exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
    }
}

/// Decode and forward every complete line in `buffer`. Returns `false` once
/// the consumer is gone.
async fn forward_lines(buffer: &mut Vec<u8>, sink: &MessageSink) -> bool {
    while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
        let line = String::from_utf8_lossy(&line);
        let line = line.trim();

        if line.is_empty() {
            debug!("Received keep-alive");
            continue;
        }

        match decode_message(line) {
            Ok(message) => {
                debug!(kind = message.kind(), "Received stream message");
                if !sink.send(message).await {
                    return false;
                }
            }
            Err(e) => warn!(error = %e, "Failed to decode stream message"),
        }
    }
    true
}
