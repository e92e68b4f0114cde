//! Lifecycle states and stop/shutdown outcomes shared by the controllers

use std::fmt;

use crate::error::CollectorError;

/// Lifecycle of a collector controller
///
/// ```text
/// Created → Running ⇄ (RestartingFetcher | RestartingWriter) → Draining → Stopped
/// ```
///
/// `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Created,
    Running,
    RestartingFetcher,
    RestartingWriter,
    Draining,
    Stopped,
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectorState::Created => "created",
            CollectorState::Running => "running",
            CollectorState::RestartingFetcher => "restarting fetcher",
            CollectorState::RestartingWriter => "restarting writer",
            CollectorState::Draining => "draining",
            CollectorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// The two kinds of worker a collector runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Fetcher,
    Writer,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Fetcher => f.write_str("fetcher"),
            WorkerKind::Writer => f.write_str("writer"),
        }
    }
}

/// How a worker ended when it was asked to stop
#[derive(Debug)]
pub enum StopOutcome {
    /// The worker observed its cancellation token and returned cleanly
    Graceful,

    /// The worker had already returned (or returned while stopping) with an error
    Failed(CollectorError),

    /// The join deadline passed and the task was aborted
    ///
    /// A writer aborted this way may not have flushed its file handle.
    Forced,
}

impl StopOutcome {
    pub fn is_graceful(&self) -> bool {
        matches!(self, StopOutcome::Graceful)
    }
}

/// Result of a collector's graceful shutdown
#[derive(Debug)]
pub struct ShutdownReport {
    pub collector_id: String,

    /// `None` when there was no fetcher to stop
    pub fetcher: Option<StopOutcome>,

    /// `None` when there was no writer to stop
    pub writer: Option<StopOutcome>,

    /// Records still queued when the writer was stopped
    pub undrained: usize,
}

impl ShutdownReport {
    pub(crate) fn noop(collector_id: &str) -> Self {
        Self {
            collector_id: collector_id.to_string(),
            fetcher: None,
            writer: None,
            undrained: 0,
        }
    }

    /// Both workers ended gracefully (or were absent) and nothing was left queued
    pub fn is_clean(&self) -> bool {
        let graceful = |outcome: &Option<StopOutcome>| {
            outcome.as_ref().is_none_or(StopOutcome::is_graceful)
        };
        graceful(&self.fetcher) && graceful(&self.writer) && self.undrained == 0
    }
}
