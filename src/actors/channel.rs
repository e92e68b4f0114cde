//! Hand-off queue between a collector's fetcher and writer
//!
//! The queue is unbounded: the writer is expected to keep pace, and nothing
//! signals backpressure to the fetcher. The controller owns the channel;
//! fetchers send through cheap clones, and the single active writer holds the
//! receiving end for as long as it runs. A replacement writer picks up the
//! receiver again once the previous one is gone.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};

use crate::Record;
use crate::error::{CollectorError, CollectorResult};

#[derive(Debug, Clone)]
pub struct RecordChannel {
    sender: mpsc::UnboundedSender<Record>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Record>>>,

    /// Records sent but not yet taken by a writer
    pending: Arc<AtomicUsize>,
}

impl RecordChannel {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue a record, returning the queue depth after the push
    pub fn send(&self, record: Record) -> CollectorResult<usize> {
        let depth = self.pending.fetch_add(1, Ordering::SeqCst) + 1;

        if self.sender.send(record).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(CollectorError::ChannelClosed);
        }

        Ok(depth)
    }

    /// Number of records waiting for the writer
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Take the receiving end, waiting until the previous holder released it
    pub async fn receiver(&self) -> RecordReceiver {
        RecordReceiver {
            receiver: self.receiver.clone().lock_owned().await,
            pending: self.pending.clone(),
        }
    }
}

impl Default for RecordChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive receiving end of a [`RecordChannel`]
#[derive(Debug)]
pub struct RecordReceiver {
    receiver: OwnedMutexGuard<mpsc::UnboundedReceiver<Record>>,
    pending: Arc<AtomicUsize>,
}

impl RecordReceiver {
    /// Wait for the next record
    ///
    /// Cancel-safe: dropping the future before it resolves loses nothing.
    pub async fn recv(&mut self) -> Option<Record> {
        let record = self.receiver.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(record)
    }
}
