//! CollectorController - Supervises one fetcher, one writer and their channel
//!
//! ## Lifecycle
//!
//! ```text
//! start:          writer ─► fetcher               (a consumer exists before any record)
//! shutdown:       stop fetcher ─► wait until channel empty ─► stop writer
//! restart_stream: start new fetcher ─► settle ─► stop old fetcher   (overlap mode)
//! restart_writer: stop writer ─► start new writer
//! ```
//!
//! Fetchers and writers are never reused: every start or restart spawns a new
//! instance with its own cancellation token, while the channel lives as long
//! as the controller.
//!
//! ## Known trade-offs
//!
//! - In overlap mode two fetchers feed the channel during the settle interval,
//!   so records arriving in that window can be logged twice and their relative
//!   order is not guaranteed. `RestartMode::StopFirst` avoids this and misses
//!   the alerts that arrive in the gap instead.
//! - The drain wait in `shutdown` is bounded by `drain_timeout`; records still
//!   queued after that are reported in [`ShutdownReport::undrained`].

use std::path::Path;
use std::sync::Arc;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::channel::RecordChannel;
use super::fetcher::StreamFetcher;
use super::state::{CollectorState, ShutdownReport, StopOutcome, WorkerKind};
use super::worker::WorkerHandle;
use super::writer::LogWriter;
use crate::config::{CollectorConfig, RestartMode, Tuning};
use crate::error::{CollectorError, CollectorResult};
use crate::stream::AlertSource;

pub struct CollectorController {
    config: CollectorConfig,
    api_key: String,
    source: Arc<dyn AlertSource>,
    tuning: Tuning,

    /// Owned for the controller's whole life; workers only hold clones
    channel: RecordChannel,

    fetcher: Option<WorkerHandle>,
    writer: Option<WorkerHandle>,
    state: CollectorState,
}

impl CollectorController {
    pub fn new(
        config: CollectorConfig,
        api_key: impl Into<String>,
        source: Arc<dyn AlertSource>,
        tuning: Tuning,
    ) -> Self {
        Self {
            config,
            api_key: api_key.into(),
            source,
            tuning,
            channel: RecordChannel::new(),
            fetcher: None,
            writer: None,
            state: CollectorState::Created,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn log_path(&self) -> &Path {
        &self.config.log_path
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// The hand-off channel between fetcher and writer
    pub fn channel(&self) -> &RecordChannel {
        &self.channel
    }

    /// Whether a fetcher instance is currently attached
    pub fn has_fetcher(&self) -> bool {
        self.fetcher.is_some()
    }

    /// Whether a writer instance is currently attached
    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }

    /// Running with both workers attached and alive
    pub fn is_healthy(&self) -> bool {
        let alive =
            |slot: &Option<WorkerHandle>| slot.as_ref().is_some_and(|w| !w.is_finished());
        self.state == CollectorState::Running && alive(&self.fetcher) && alive(&self.writer)
    }

    fn ensure_state(
        &self,
        allowed: CollectorState,
        operation: &'static str,
    ) -> CollectorResult<()> {
        if self.state == allowed {
            Ok(())
        } else {
            Err(CollectorError::InvalidState {
                collector: self.config.id.clone(),
                state: self.state,
                operation,
            })
        }
    }

    async fn spawn_writer(&self) -> CollectorResult<WorkerHandle> {
        let cancel = CancellationToken::new();
        let writer = LogWriter::open(
            self.config.id.as_str(),
            &self.config.log_path,
            self.channel.clone(),
            cancel.clone(),
            self.tuning.pull_timeout(),
        )
        .await?;

        Ok(WorkerHandle::spawn(
            WorkerKind::Writer,
            &self.config.id,
            cancel,
            writer.run(),
        ))
    }

    fn spawn_fetcher(&self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let fetcher = StreamFetcher::new(
            self.config.id.as_str(),
            self.api_key.as_str(),
            self.source.clone(),
            self.channel.clone(),
            cancel.clone(),
            &self.tuning,
        );

        WorkerHandle::spawn(WorkerKind::Fetcher, &self.config.id, cancel, fetcher.run())
    }

    /// Start the writer, then the fetcher
    ///
    /// Fails without spawning anything if the log file cannot be opened; the
    /// controller then stays in `Created`.
    #[instrument(skip(self), fields(collector = %self.config.id))]
    pub async fn start(&mut self) -> CollectorResult<()> {
        self.ensure_state(CollectorState::Created, "start")?;

        self.writer = Some(self.spawn_writer().await?);
        self.fetcher = Some(self.spawn_fetcher());
        self.state = CollectorState::Running;

        info!("collector started, logging to {}", self.config.log_path.display());
        Ok(())
    }

    /// Stop the current fetcher, if any
    pub async fn stop_stream(&mut self) -> Option<StopOutcome> {
        let fetcher = self.fetcher.take()?;
        Some(fetcher.stop(self.tuning.fetcher_join_timeout()).await)
    }

    /// Stop the current writer, if any
    pub async fn stop_writer(&mut self) -> Option<StopOutcome> {
        let writer = self.writer.take()?;
        Some(writer.stop(self.tuning.writer_join_timeout()).await)
    }

    /// Stop producing, let the writer empty the channel, then stop the writer
    ///
    /// Calling this on a stopped collector does nothing. A collector that
    /// never started goes straight to `Stopped`.
    #[instrument(skip(self), fields(collector = %self.config.id))]
    pub async fn shutdown(&mut self) -> ShutdownReport {
        if self.state == CollectorState::Stopped {
            debug!("collector already stopped");
            return ShutdownReport::noop(&self.config.id);
        }

        self.state = CollectorState::Draining;

        let fetcher = self.stop_stream().await;
        self.wait_for_drain().await;
        let writer = self.stop_writer().await;

        self.state = CollectorState::Stopped;

        let undrained = self.channel.pending();
        if undrained > 0 {
            error!("{undrained} queued records were not written to the log");
        }

        info!("collector stopped");

        ShutdownReport {
            collector_id: self.config.id.clone(),
            fetcher,
            writer,
            undrained,
        }
    }

    async fn wait_for_drain(&self) {
        let deadline = self.tuning.drain_timeout().map(|timeout| Instant::now() + timeout);

        loop {
            let pending = self.channel.pending();
            if pending == 0 {
                trace!("channel drained");
                return;
            }

            let writer_running = self.writer.as_ref().is_some_and(|w| !w.is_finished());
            if !writer_running {
                warn!("writer is not running, {pending} records cannot be drained");
                return;
            }

            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                warn!("drain deadline passed with {pending} records still queued");
                return;
            }

            trace!("waiting for {pending} queued records");
            time::sleep(self.tuning.drain_poll_interval()).await;
        }
    }

    /// Replace the fetcher with a new instance on the same channel
    #[instrument(skip(self), fields(collector = %self.config.id))]
    pub async fn restart_stream(&mut self) -> CollectorResult<()> {
        self.ensure_state(CollectorState::Running, "restart fetcher")?;
        self.state = CollectorState::RestartingFetcher;

        if self.fetcher.is_none() {
            self.fetcher = Some(self.spawn_fetcher());
        } else {
            match self.tuning.restart_mode {
                RestartMode::Overlap => {
                    let replacement = self.spawn_fetcher();
                    time::sleep(self.tuning.restart_settle()).await;
                    if let Some(previous) = self.fetcher.replace(replacement) {
                        previous.stop(self.tuning.fetcher_join_timeout()).await;
                    }
                }
                RestartMode::StopFirst => {
                    self.stop_stream().await;
                    self.fetcher = Some(self.spawn_fetcher());
                }
            }
        }

        self.state = CollectorState::Running;
        debug!("fetcher restarted");
        Ok(())
    }

    /// Stop the writer and start a new one on the same channel
    ///
    /// Records keep queueing while no writer is attached. If the log cannot be
    /// reopened the collector keeps running without a writer and the error is
    /// returned; `supervise` will try again.
    #[instrument(skip(self), fields(collector = %self.config.id))]
    pub async fn restart_writer(&mut self) -> CollectorResult<()> {
        self.ensure_state(CollectorState::Running, "restart writer")?;
        self.state = CollectorState::RestartingWriter;

        self.stop_writer().await;
        let writer = self.spawn_writer().await;

        self.state = CollectorState::Running;
        self.writer = Some(writer?);
        debug!("writer restarted");
        Ok(())
    }

    /// Restart any worker of a running collector that has exited on its own
    #[instrument(skip(self), fields(collector = %self.config.id))]
    pub async fn supervise(&mut self) -> CollectorResult<()> {
        if self.state != CollectorState::Running {
            return Ok(());
        }

        reap_finished(&mut self.writer).await;
        if self.writer.is_none() {
            warn!("writer is down, restarting it");
            self.restart_writer().await?;
        }

        reap_finished(&mut self.fetcher).await;
        if self.fetcher.is_none() {
            warn!("fetcher is down, restarting it");
            self.restart_stream().await?;
        }

        Ok(())
    }
}

/// Take a worker out of its slot if it has exited, logging how it ended
async fn reap_finished(slot: &mut Option<WorkerHandle>) {
    let Some(handle) = slot.take() else {
        return;
    };

    let kind = handle.kind();
    match handle.reap().await {
        Ok(Ok(())) => warn!("{kind} exited unexpectedly"),
        Ok(Err(e)) => error!("{kind} failed: {e}"),
        Err(running) => *slot = Some(running),
    }
}
