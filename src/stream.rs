//! Remote alert stream access
//!
//! The fetcher only depends on [`AlertSource`]: open a subscription for one
//! alert identity and get back a lazy sequence of records. [`ShodanStream`] is
//! the production implementation talking to the Shodan streaming API, where
//! the response body is newline-delimited JSON and empty lines are heartbeats.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tracing::{debug, instrument, trace};

use crate::Record;

/// Lazy sequence of records from one subscription
pub type RecordStream = BoxStream<'static, Result<Record, RemoteError>>;

/// Errors raised by the remote side
///
/// All of them are transient from the fetcher's point of view: it logs them
/// and re-opens the subscription.
#[derive(Debug)]
pub enum RemoteError {
    /// Transport-level failure (connect, TLS, dropped connection)
    Request(reqwest::Error),

    /// The API answered with a non-success status
    Status { status: u16, body: String },

    /// A line of the stream was not valid JSON
    Decode(serde_json::Error),

    /// A line outgrew the decoder's limit and was discarded
    Oversized(LineTooLong),

    /// Any other failure of a custom source
    Other(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Request(err) => write!(f, "stream request failed: {}", err),
            RemoteError::Status { status, body } if body.is_empty() => {
                write!(f, "stream API returned HTTP {}", status)
            }
            RemoteError::Status { status, body } => {
                write!(f, "stream API returned HTTP {}: {}", status, body)
            }
            RemoteError::Decode(err) => write!(f, "invalid record in stream: {}", err),
            RemoteError::Oversized(err) => {
                write!(f, "stream line exceeded {} bytes and was discarded", err.limit)
            }
            RemoteError::Other(msg) => write!(f, "stream error: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RemoteError::Request(err) => Some(err),
            RemoteError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Request(err)
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Decode(err)
    }
}

impl From<LineTooLong> for RemoteError {
    fn from(err: LineTooLong) -> Self {
        RemoteError::Oversized(err)
    }
}

/// Capability to subscribe to the alert stream of one collector identity
#[async_trait]
pub trait AlertSource: Send + Sync + 'static {
    /// Open (or resume) the alert stream for `collector_id`.
    ///
    /// Errors while opening and errors yielded by the returned stream are both
    /// treated as transient by the caller.
    async fn open_alert_stream(
        &self,
        api_key: &str,
        collector_id: &str,
    ) -> Result<RecordStream, RemoteError>;
}

/// Longest line [`LineDecoder::new`] buffers before discarding it
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// A line longer than the decoder's limit; its bytes were dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTooLong {
    pub limit: usize,
}

/// Splits a byte stream into complete, non-blank lines
///
/// Chunks may end anywhere, including inside a multi-byte character; partial
/// lines are kept until the terminating newline arrives. A line that grows
/// past `limit` bytes is reported once and skipped up to its newline.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    limit: usize,
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            discarding: false,
        }
    }

    /// Feed the next chunk and return every line it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Vec<u8>, LineTooLong>> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if byte == b'\n' {
                if std::mem::take(&mut self.discarding) {
                    continue;
                }
                let line = std::mem::take(&mut self.buffer);
                if let Some(line) = Self::non_blank(line) {
                    lines.push(Ok(line));
                }
            } else if !self.discarding {
                self.buffer.push(byte);
                if self.buffer.len() > self.limit {
                    self.buffer = Vec::new();
                    self.discarding = true;
                    lines.push(Err(LineTooLong { limit: self.limit }));
                }
            }
        }

        lines
    }

    /// Return the trailing line of a body that did not end with a newline
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.discarding = false;
        Self::non_blank(std::mem::take(&mut self.buffer))
    }

    fn non_blank(mut line: Vec<u8>) -> Option<Vec<u8>> {
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(line)
        }
    }
}

/// HTTP client for `https://stream.shodan.io`
#[derive(Debug, Clone)]
pub struct ShodanStream {
    client: reqwest::Client,
    base_url: String,
}

impl ShodanStream {
    /// Create a client for the stream API at `base_url`
    ///
    /// Only the connect phase has a timeout: a healthy subscription stays open
    /// indefinitely and may be quiet for a long time.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn alert_url(&self, collector_id: &str) -> String {
        format!("{}/shodan/alert/{}", self.base_url, collector_id)
    }
}

struct BodyState {
    response: Option<reqwest::Response>,
    decoder: LineDecoder,
    ready: VecDeque<Result<Vec<u8>, LineTooLong>>,
}

fn parse_line(line: &[u8]) -> Result<Record, RemoteError> {
    Ok(serde_json::from_slice(line)?)
}

#[async_trait]
impl AlertSource for ShodanStream {
    #[instrument(skip(self, api_key))]
    async fn open_alert_stream(
        &self,
        api_key: &str,
        collector_id: &str,
    ) -> Result<RecordStream, RemoteError> {
        let url = self.alert_url(collector_id);
        trace!("subscribing to {url}");

        let response = self
            .client
            .get(&url)
            .query(&[("key", api_key)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        debug!("subscription open");

        let state = BodyState {
            response: Some(response),
            decoder: LineDecoder::new(),
            ready: VecDeque::new(),
        };

        let records = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(line) = state.ready.pop_front() {
                    let record = line
                        .map_err(RemoteError::from)
                        .and_then(|line| parse_line(&line));
                    return Some((record, state));
                }

                let response = state.response.as_mut()?;
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        let lines = state.decoder.feed(&chunk);
                        state.ready.extend(lines);
                    }
                    Ok(None) => {
                        state.response = None;
                        if let Some(rest) = state.decoder.finish() {
                            state.ready.push_back(Ok(rest));
                        }
                    }
                    Err(e) => {
                        state.response = None;
                        return Some((Err(RemoteError::from(e)), state));
                    }
                }
            }
        });

        Ok(records.boxed())
    }
}
