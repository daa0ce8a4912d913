//! Load issues reported on a side channel.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use wavestream_io::FileId;

use crate::metrics::CacheMetrics;

/// Issues are dropped once this many are waiting unread.
const ISSUE_BACKLOG: usize = 256;

/// A recoverable problem found while serving a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadIssue {
    /// The file could not be opened. Sent once per failed load.
    MissingFile { file: FileId },
    /// Storage delivered fewer bytes than the caller expected.
    SizeMismatch {
        file: FileId,
        expected: usize,
        actual: usize,
    },
}

/// Logs load issues, counts them, and forwards them to listeners.
#[derive(Clone)]
pub struct IssueReporter {
    tx: Sender<LoadIssue>,
    metrics: Arc<CacheMetrics>,
    stall_warn: Duration,
}

impl IssueReporter {
    pub fn new(metrics: Arc<CacheMetrics>, stall_warn: Duration) -> (Self, Receiver<LoadIssue>) {
        let (tx, rx) = bounded(ISSUE_BACKLOG);
        (
            Self {
                tx,
                metrics,
                stall_warn,
            },
            rx,
        )
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn missing(&self, file: &FileId) {
        warn!(%file, "wave data missing");
        self.metrics.record_missing();
        let _ = self.tx.try_send(LoadIssue::MissingFile { file: file.clone() });
    }

    pub fn size_mismatch(&self, file: &FileId, expected: usize, actual: usize) {
        warn!(%file, expected, actual, "wave data size mismatch, using the smaller size");
        self.metrics.record_size_mismatch();
        let _ = self.tx.try_send(LoadIssue::SizeMismatch {
            file: file.clone(),
            expected,
            actual,
        });
    }

    /// A blocking accessor had to wait for I/O.
    pub fn stall(&self, file: &FileId, waited: Duration) {
        self.metrics.record_stall(waited);
        if waited >= self.stall_warn {
            warn!(%file, waited_us = waited.as_micros() as u64, "blocked on wave data");
        } else {
            debug!(%file, waited_us = waited.as_micros() as u64, "blocked on wave data");
        }
    }
}
