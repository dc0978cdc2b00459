//! Checkin transport.
//!
//! [`Transport`] is the seam between the pure encode/decode pipeline and the
//! network. [`HttpTransport`] is the production implementation: one gzip'd
//! HTTPS POST per attempt, retried through [`retry`] on connection-level
//! failures and bounded by an overall timeout. It can also read the head of
//! an offered package for its metadata. Tests substitute their own
//! implementation.
//!
//! A single `HttpTransport` can serve many concurrent probes; the underlying
//! `reqwest::Client` pools connections and is safe to share.

pub mod retry;

use crate::error::{MetadataError, NetworkError};
use crate::metadata::OtaMetadata;
use crate::request::CheckinRequest;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, RANGE, USER_AGENT};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

pub use retry::{AttemptError, RetryCause, RetryMachine, RetryPolicy, RetryState};

/// Production checkin endpoint
pub const CHECKIN_URL: &str = "https://android.googleapis.com/checkin";

/// Content type of checkin payloads
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuffer";

/// Raw checkin response body, consumed once by the decoder
#[derive(Debug)]
pub struct CheckinResponse {
    body: Bytes,
}

impl CheckinResponse {
    /// Wraps a response body
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    /// Body length in bytes
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Returns true if the server sent an empty body
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Gives up ownership of the body
    pub fn into_bytes(self) -> Bytes {
        self.body
    }
}

/// Sends an encoded checkin request and returns the raw response
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs the exchange with `endpoint`
    async fn send(
        &self,
        request: CheckinRequest,
        endpoint: &Url,
    ) -> Result<CheckinResponse, NetworkError>;

    /// Reads package metadata from the first `window` bytes at `url`.
    ///
    /// Transports that cannot fetch packages report nothing.
    async fn fetch_metadata(
        &self,
        _url: &Url,
        _window: u64,
    ) -> Result<Option<OtaMetadata>, MetadataError> {
        Ok(None)
    }
}

/// Timeouts and retry budget for [`HttpTransport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Deadline for the whole exchange including retries, in milliseconds
    pub timeout_ms: u64,
    /// Deadline for a single attempt, in milliseconds
    pub attempt_timeout_ms: u64,
    /// TCP/TLS connect deadline, in milliseconds
    pub connect_timeout_ms: u64,
    /// Retry budget for connection-level failures
    pub retry: RetryPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            attempt_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransportConfig {
    /// Creates a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the overall deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the per-attempt deadline
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the connect deadline
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

/// HTTPS transport backed by a pooled `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// Builds a transport with its own connection pool
    pub fn new(config: TransportConfig) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.attempt_timeout_ms))
            .gzip(true)
            .build()
            .map_err(|e| NetworkError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, config))
    }

    /// Wraps an existing client, sharing its pool
    pub fn with_client(client: Client, config: TransportConfig) -> Self {
        Self { client, config }
    }

    /// The active configuration
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn attempt(
        &self,
        endpoint: &Url,
        body: Bytes,
        user_agent: HeaderValue,
    ) -> Result<CheckinResponse, AttemptError> {
        let response = self
            .client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
            .header(CONTENT_ENCODING, "gzip")
            .header(USER_AGENT, user_agent)
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            // Server-side rejections are final
            return Err(AttemptError::Fatal(NetworkError::ServerRejected {
                status: status.as_u16(),
            }));
        }

        let body = response.bytes().await.map_err(classify)?;
        trace!("Received {} byte checkin response", body.len());
        Ok(CheckinResponse::new(body))
    }

    /// Downloads at most `window` bytes from the start of `url`, in one attempt
    async fn fetch_head(&self, url: &Url, window: u64) -> Result<Vec<u8>, NetworkError> {
        let started = Instant::now();
        let fail = |err: reqwest::Error| classify(err).into_network(1, started.elapsed());

        let mut response = self
            .client
            .get(url.clone())
            .header(RANGE, format!("bytes=0-{}", window.saturating_sub(1)))
            .send()
            .await
            .map_err(fail)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::ServerRejected {
                status: status.as_u16(),
            });
        }

        // Servers that ignore the range send the whole package
        let limit = usize::try_from(window).unwrap_or(usize::MAX);
        let mut head = Vec::new();
        while head.len() < limit {
            match response.chunk().await.map_err(fail)? {
                Some(chunk) => head.extend_from_slice(&chunk),
                None => break,
            }
        }
        head.truncate(limit);
        Ok(head)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: CheckinRequest,
        endpoint: &Url,
    ) -> Result<CheckinResponse, NetworkError> {
        let body = gzip(request.payload())?;
        let user_agent = HeaderValue::from_str(request.user_agent())
            .map_err(|e| NetworkError::InvalidRequest(format!("invalid user-agent: {e}")))?;
        let deadline = Duration::from_millis(self.config.timeout_ms);

        debug!("POST {} ({} bytes compressed)", endpoint, body.len());

        let exchange = retry::run(&self.config.retry, |_| {
            self.attempt(endpoint, body.clone(), user_agent.clone())
        });

        match tokio::time::timeout(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!("Checkin exchange exceeded {:?}", deadline);
                Err(NetworkError::Timeout { elapsed: deadline })
            }
        }
    }

    async fn fetch_metadata(
        &self,
        url: &Url,
        window: u64,
    ) -> Result<Option<OtaMetadata>, MetadataError> {
        let head = self.fetch_head(url, window).await?;
        debug!("Read {} bytes from the head of {}", head.len(), url);
        OtaMetadata::from_archive_head(&head)
    }
}

/// Sorts `reqwest` failures into timeouts, other connection problems and everything else
fn classify(err: reqwest::Error) -> AttemptError {
    let mut message = err.to_string();
    if let Some(source) = std::error::Error::source(&err) {
        message = format!("{message}: {source}");
    }

    if err.is_timeout() {
        AttemptError::timeout(message)
    } else if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
        AttemptError::connection(message)
    } else {
        AttemptError::Fatal(NetworkError::InvalidRequest(message))
    }
}

fn gzip(payload: &[u8]) -> Result<Bytes, NetworkError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len()), Compression::default());
    encoder
        .write_all(payload)
        .and_then(|_| encoder.finish())
        .map(Bytes::from)
        .map_err(|e| NetworkError::InvalidRequest(format!("failed to compress payload: {e}")))
}
