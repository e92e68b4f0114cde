//! LogWriter - Drains a collector's channel into its append-only log
//!
//! Every record becomes one JSON line, written and flushed to the OS on its
//! own: no batching, no fsync. A line handed to the OS survives a crash of
//! this process but not necessarily a power loss.
//!
//! The file is opened before the writer is spawned, so an unwritable log path
//! fails the collector's start instead of a background task. On the graceful
//! path the handle is flushed and closed when `run` returns; an aborted
//! writer drops it wherever it was, possibly in the middle of a line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::channel::RecordChannel;
use crate::Record;
use crate::error::{CollectorError, CollectorResult};

/// Consumer half of a collector
pub struct LogWriter {
    collector_id: String,
    path: PathBuf,
    file: File,
    channel: RecordChannel,
    cancel: CancellationToken,
    pull_timeout: Duration,
    written: u64,
}

impl LogWriter {
    /// Open `path` for appending, creating it and its parent directories if needed
    pub async fn open(
        collector_id: impl Into<String>,
        path: &Path,
        channel: RecordChannel,
        cancel: CancellationToken,
        pull_timeout: Duration,
    ) -> CollectorResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CollectorError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| CollectorError::io(path, e))?;

        Ok(Self {
            collector_id: collector_id.into(),
            path: path.to_path_buf(),
            file,
            channel,
            cancel,
            pull_timeout,
            written: 0,
        })
    }

    /// Pull and append records until the cancellation token fires
    ///
    /// Cancellation is only observed between records: a record that was
    /// pulled is always written before the writer returns.
    #[instrument(skip(self), fields(collector = %self.collector_id))]
    pub async fn run(mut self) -> CollectorResult<()> {
        debug!("starting writer for {}", self.path.display());

        let receiver = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            receiver = self.channel.receiver() => Some(receiver),
        };
        let Some(mut receiver) = receiver else {
            return self.close().await;
        };

        loop {
            let pulled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                pulled = time::timeout(self.pull_timeout, receiver.recv()) => pulled,
            };

            match pulled {
                Ok(Some(record)) => self.append(&record).await?,
                Ok(None) => {
                    warn!("record channel closed");
                    break;
                }
                Err(_) => trace!("no record within {:?}", self.pull_timeout),
            }
        }

        drop(receiver);
        self.close().await
    }

    async fn append(&mut self, record: &Record) -> CollectorResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CollectorError::io(&self.path, e))?;
        self.file
            .flush()
            .await
            .map_err(|e| CollectorError::io(&self.path, e))?;

        self.written += 1;
        Ok(())
    }

    async fn close(mut self) -> CollectorResult<()> {
        self.file
            .flush()
            .await
            .map_err(|e| CollectorError::io(&self.path, e))?;

        debug!(written = self.written, "writer closed {}", self.path.display());
        Ok(())
    }
}
