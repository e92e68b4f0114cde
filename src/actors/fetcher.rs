//! StreamFetcher - Subscribes to one alert feed and enqueues every record
//!
//! ## Message Flow
//!
//! ```text
//! open_alert_stream → record → RecordChannel → [LogWriter]
//!        ↑                |
//!        └── backoff ←── error / end of stream
//! ```
//!
//! Remote errors never end the fetcher: they are logged and the subscription
//! is opened again after a bounded exponential backoff. The only ways out are
//! the cancellation token and a closed channel.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::channel::RecordChannel;
use crate::Record;
use crate::config::Tuning;
use crate::error::CollectorResult;
use crate::stream::{AlertSource, RemoteError};

/// Retry delay that doubles on every failure, up to `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Why a single subscription attempt ended
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The token was cancelled; the fetcher must return
    Cancelled,

    /// The stream failed or ran out; open it again
    Retry,
}

/// Producer half of a collector
pub struct StreamFetcher {
    collector_id: String,
    api_key: String,
    source: Arc<dyn AlertSource>,
    channel: RecordChannel,
    cancel: CancellationToken,
    backoff: Backoff,
    queue_warn_threshold: usize,
}

impl StreamFetcher {
    pub fn new(
        collector_id: impl Into<String>,
        api_key: impl Into<String>,
        source: Arc<dyn AlertSource>,
        channel: RecordChannel,
        cancel: CancellationToken,
        tuning: &Tuning,
    ) -> Self {
        Self {
            collector_id: collector_id.into(),
            api_key: api_key.into(),
            source,
            channel,
            cancel,
            backoff: Backoff::new(tuning.retry_initial(), tuning.retry_max()),
            queue_warn_threshold: tuning.queue_warn_threshold,
        }
    }

    /// Run until the cancellation token fires
    #[instrument(skip(self), fields(collector = %self.collector_id))]
    pub async fn run(mut self) -> CollectorResult<()> {
        debug!("starting fetcher");

        while !self.cancel.is_cancelled() {
            if self.subscribe_once().await? == SessionEnd::Cancelled {
                break;
            }

            let delay = self.backoff.next_delay();
            trace!("re-opening alert stream in {delay:?}");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = time::sleep(delay) => {}
            }
        }

        debug!("fetcher stopped");
        Ok(())
    }

    async fn subscribe_once(&mut self) -> CollectorResult<SessionEnd> {
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            opened = self.source.open_alert_stream(&self.api_key, &self.collector_id) => opened,
        };

        let mut records = match opened {
            Ok(records) => records,
            Err(e) => {
                warn!("failed to open alert stream: {e}");
                return Ok(SessionEnd::Retry);
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                next = records.next() => next,
            };

            match next {
                Some(Ok(record)) => {
                    self.backoff.reset();
                    self.enqueue(record)?;
                }
                Some(Err(e @ (RemoteError::Decode(_) | RemoteError::Oversized(_)))) => {
                    warn!("skipping undecodable record: {e}");
                }
                Some(Err(e)) => {
                    warn!("alert stream interrupted: {e}");
                    return Ok(SessionEnd::Retry);
                }
                None => {
                    debug!("alert stream ended");
                    return Ok(SessionEnd::Retry);
                }
            }
        }
    }

    fn enqueue(&self, record: Record) -> CollectorResult<()> {
        let depth = self.channel.send(record)?;
        trace!(depth, "record enqueued");

        if self.queue_warn_threshold > 0 && depth % self.queue_warn_threshold == 0 {
            warn!("{depth} records queued, the writer is falling behind");
        }

        Ok(())
    }
}
