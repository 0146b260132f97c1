//! Twitter API client: credential verification and the filtered stream
//! endpoint, signed with OAuth 1.0a.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::{
    config::{Credentials, RateLimitInfo, TransportConfig},
    error::{TwitterError, TwitterResult},
    oauth::OAuthSigner,
    stream::run_stream_loop,
    transport::{subscription_channel, StreamFilterParams, StreamTransport, Subscription},
    types::User,
};

/// Seconds to wait after a 420/429 when the response names no reset time.
const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 60;

/// HTTP implementation of [`StreamTransport`].
#[derive(Debug, Clone)]
pub struct TwitterApiClient {
    client: Client,
    stream_client: Client,
    api_url: String,
    stream_url: String,
    signer: OAuthSigner,
    timeout: Duration,
    reconnect: bool,
    channel_capacity: usize,
}

impl TwitterApiClient {
    /// Create a new API client.
    pub fn new(credentials: &Credentials, config: &TransportConfig) -> TwitterResult<Self> {
        let user_agent = format!("twitter-feed/{}", env!("CARGO_PKG_VERSION"));

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&user_agent)
            .build()?;

        // The stream body is open-ended, so only the connect phase is bounded.
        let stream_client = Client::builder()
            .connect_timeout(config.timeout)
            .user_agent(&user_agent)
            .build()?;

        Ok(Self {
            client,
            stream_client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            stream_url: config.stream_url.trim_end_matches('/').to_string(),
            signer: OAuthSigner::new(credentials),
            timeout: config.timeout,
            reconnect: config.reconnect,
            channel_capacity: config.channel_capacity,
        })
    }

    pub(crate) const fn reconnect_enabled(&self) -> bool {
        self.reconnect
    }

    /// Fetch the authenticated account, failing if the credentials are rejected.
    #[instrument(skip(self))]
    pub async fn verify_credentials(&self) -> TwitterResult<User> {
        let url = format!("{}/1.1/account/verify_credentials.json", self.api_url);
        let auth_header = self.signer.authorization_header("GET", &url, &[])?;

        debug!(url = %url, "Verifying Twitter credentials");
        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, auth_header)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Open one connection to the filtered stream endpoint.
    #[instrument(skip(self, params), fields(track = ?params.track))]
    pub(crate) async fn open_stream(&self, params: &StreamFilterParams) -> TwitterResult<Response> {
        let url = format!("{}/1.1/statuses/filter.json", self.stream_url);
        let form = params.to_form();
        let auth_header = self.signer.authorization_header("POST", &url, &form)?;

        info!(url = %url, "Connecting to Twitter filtered stream");
        let request = self
            .stream_client
            .post(&url)
            .header(AUTHORIZATION, auth_header)
            .form(&form)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                TwitterError::Stream(format!(
                    "no response from stream endpoint within {:?}",
                    self.timeout
                ))
            })??;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

#[async_trait]
impl StreamTransport for TwitterApiClient {
    async fn verify_credentials(&self) -> TwitterResult<User> {
        Self::verify_credentials(self).await
    }

    async fn filter(&self, params: StreamFilterParams) -> TwitterResult<Subscription> {
        let response = self.open_stream(&params).await?;
        let (subscription, sink) = subscription_channel(self.channel_capacity);

        tokio::spawn(run_stream_loop(self.clone(), params, response, sink));

        Ok(subscription)
    }
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> TwitterResult<T> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(TwitterError::from)
}

/// Map a non-success response to a [`TwitterError`].
async fn error_from_response(response: Response) -> TwitterError {
    let status = response.status();
    let rate_limit = RateLimitInfo::from_headers(response.headers());
    debug!(
        status = status.as_u16(),
        limit = ?rate_limit.limit,
        remaining = ?rate_limit.remaining,
        reset = ?rate_limit.reset,
        "Twitter request failed"
    );

    // 420 is the legacy "Enhance Your Calm" streaming status.
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 420 {
        let retry_after = rate_limit
            .time_until_reset()
            .map_or(DEFAULT_RATE_LIMIT_WAIT_SECS, |d| d.as_secs());
        return TwitterError::RateLimited { retry_after };
    }

    #[derive(serde::Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        errors: Vec<ErrorEntry>,
    }

    #[derive(serde::Deserialize)]
    struct ErrorEntry {
        #[serde(default)]
        code: Option<i32>,
        #[serde(default)]
        message: Option<String>,
    }

    let body = response.bytes().await.unwrap_or_default();
    let first = serde_json::from_slice::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.errors.into_iter().next());

    let (message, error_code) = match first {
        Some(ErrorEntry { code, message }) => (
            message.unwrap_or_else(|| status.to_string()),
            code,
        ),
        None => {
            let text = String::from_utf8_lossy(&body).trim().to_string();
            let message = if text.is_empty() {
                status.to_string()
            } else {
                text
            };
            (message, None)
        }
    };

    TwitterError::Api {
        status: status.as_u16(),
        message,
        error_code,
        retry_after: rate_limit.time_until_reset().map(|d| d.as_secs()),
    }
}
