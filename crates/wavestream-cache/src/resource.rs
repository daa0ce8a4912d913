//! One byte-range read of a wave file.
//!
//! A resource is issued and consumed on the producer thread. The read
//! completes on an I/O thread, whose callback only fills the resource's
//! [`Arrival`] cell; the producer folds that into the resource on its next
//! poll. The destination block is moved into the read request and comes back
//! with the completion, so the I/O thread never aliases memory the producer
//! can see.

use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wavestream_io::{
    AsyncIo, Cost, FileId, IoTicket, Priority, ReadCompletion, ReadRequest, ReadStatus,
};

use crate::error::{Error, Result};
use crate::key::BufferKey;
use crate::report::IssueReporter;

/// Where a resource is in its load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Loading,
    Loaded,
    /// Completed without usable data.
    Missing,
}

struct Landed {
    block: Vec<u8>,
    bytes_read: usize,
    status: ReadStatus,
    at: Instant,
}

/// Completion hand-off. Written once by the I/O thread, taken by the owner.
#[derive(Default)]
struct Arrival {
    landed: AtomicBool,
    outcome: Mutex<Option<Landed>>,
}

impl Arrival {
    fn on_completed(&self, done: ReadCompletion) {
        *self.outcome.lock() = Some(Landed {
            block: done.block,
            bytes_read: done.bytes_read,
            status: done.status,
            at: Instant::now(),
        });
        self.landed.store(true, Ordering::Release);
    }
}

/// An in-flight or completed read of `[offset, offset + length)` of a file.
pub struct AsyncWaveResource {
    file: FileId,
    io: Arc<dyn AsyncIo>,
    ticket: Option<IoTicket>,
    arrival: Arc<Arrival>,
    /// Lent to the I/O backend while a read is in flight.
    block: Vec<u8>,
    allocated: usize,
    request_offset: u64,
    requested: usize,
    delivered: usize,
    /// Bytes between the sector-aligned read start and `request_offset`.
    skip: usize,
    requested_at: Instant,
    arrived_at: Option<Instant>,
    registry_key: Option<BufferKey>,
    loaded: bool,
    missing: bool,
    post_processed: bool,
    size_checked: bool,
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

impl AsyncWaveResource {
    /// Create a resource and issue its read.
    ///
    /// A zero `length` means the file is known to be absent: no I/O is
    /// issued and the resource completes immediately as missing.
    pub fn start(
        file: FileId,
        io: Arc<dyn AsyncIo>,
        offset: u64,
        length: usize,
        alignment: u64,
        priority: Priority,
    ) -> Self {
        let now = Instant::now();
        let mut resource = Self {
            file,
            io,
            ticket: None,
            arrival: Arc::default(),
            block: Vec::new(),
            allocated: 0,
            request_offset: offset,
            requested: length,
            delivered: 0,
            skip: 0,
            requested_at: now,
            arrived_at: None,
            registry_key: None,
            loaded: false,
            missing: false,
            post_processed: false,
            size_checked: false,
        };
        resource.issue(offset, length, alignment, priority);
        resource
    }

    /// Reuse this resource and its memory for another read.
    pub fn restart(
        &mut self,
        offset: u64,
        length: usize,
        alignment: u64,
        priority: Priority,
    ) -> Result<()> {
        if self.is_loading() {
            return Err(Error::LoadInProgress(self.file.clone()));
        }
        self.issue(offset, length, alignment, priority);
        Ok(())
    }

    fn issue(&mut self, offset: u64, length: usize, alignment: u64, priority: Priority) {
        let alignment = alignment.max(1);
        let aligned_offset = offset - offset % alignment;

        self.request_offset = offset;
        self.requested = length;
        self.delivered = 0;
        self.skip = (offset - aligned_offset) as usize;
        self.loaded = false;
        self.missing = false;
        self.post_processed = false;
        self.size_checked = false;
        self.requested_at = Instant::now();
        self.arrived_at = None;

        if length == 0 {
            self.block = Vec::new();
            self.allocated = 0;
            self.ticket = None;
            self.loaded = true;
            self.missing = true;
            self.size_checked = true;
            self.arrived_at = Some(self.requested_at);
            return;
        }

        let mut block = mem::take(&mut self.block);
        block.clear();
        block.resize(align_up(self.skip + length, alignment as usize), 0);
        self.allocated = block.capacity();

        let arrival = Arc::new(Arrival::default());
        self.arrival = Arc::clone(&arrival);
        let request = ReadRequest::new(self.file.clone(), aligned_offset, block, priority);
        self.ticket = Some(
            self.io
                .issue_read(request, Box::new(move |done| arrival.on_completed(done))),
        );
    }

    /// Fold a landed completion into the resource. Returns whether loaded.
    pub fn poll(&mut self) -> bool {
        if self.loaded {
            return true;
        }
        if !self.arrival.landed.load(Ordering::Acquire) {
            return false;
        }
        let Some(landed) = self.arrival.outcome.lock().take() else {
            return false;
        };

        self.block = landed.block;
        self.allocated = self.block.capacity();
        self.arrived_at = Some(landed.at);
        self.loaded = true;

        match landed.status {
            ReadStatus::Complete => {
                self.delivered = landed.bytes_read.saturating_sub(self.skip).min(self.requested);
            }
            ReadStatus::Missing => {
                self.missing = true;
                self.size_checked = true;
            }
            ReadStatus::Aborted => {
                debug!(file = %self.file, "wave read aborted");
                self.size_checked = true;
            }
            ReadStatus::Failed(kind) => {
                warn!(file = %self.file, ?kind, "wave read failed");
                self.size_checked = true;
            }
        }
        true
    }

    /// Non-blocking: true while the read has not landed.
    pub fn is_loading(&mut self) -> bool {
        !self.poll()
    }

    /// Force the read to complete, promoting it ahead of prefetch work.
    pub fn block_until_loaded(&mut self, reporter: &IssueReporter) {
        if !self.poll() {
            if let Some(ticket) = &self.ticket {
                self.io.set_priority(ticket, Priority::Urgent);
                let started = Instant::now();
                self.io.finish(ticket, true);
                reporter.stall(&self.file, started.elapsed());
            }
            self.poll();
        }

        if self.loaded && !self.size_checked {
            self.size_checked = true;
            if self.delivered < self.requested {
                reporter.size_mismatch(&self.file, self.requested, self.delivered);
            }
        }
    }

    /// Report a missing file once, then clear the flag.
    pub fn take_missing_report(&mut self, reporter: &IssueReporter) -> bool {
        if !self.missing {
            return false;
        }
        self.missing = false;
        reporter.missing(&self.file);
        true
    }

    /// Copy `min(count, delivered - src_offset, dest.len())` bytes.
    ///
    /// Blocks until the read lands. Returns `None` when nothing was loaded or
    /// `src_offset` is outside the delivered range.
    pub fn blocking_copy(
        &mut self,
        dest: &mut [u8],
        src_offset: usize,
        count: usize,
        reporter: &IssueReporter,
    ) -> Option<usize> {
        self.block_until_loaded(reporter);
        if self.take_missing_report(reporter) {
            return None;
        }

        let data = self.data()?;
        if src_offset >= data.len() {
            return None;
        }
        let n = count.min(data.len() - src_offset).min(dest.len());
        dest[..n].copy_from_slice(&data[src_offset..src_offset + n]);
        Some(n)
    }

    /// Zero-copy variant of [`Self::blocking_copy`].
    pub fn blocking_get_pointer(&mut self, reporter: &IssueReporter) -> Option<&[u8]> {
        self.block_until_loaded(reporter);
        if self.take_missing_report(reporter) {
            return None;
        }
        self.data()
    }

    /// Delivered bytes, if any have landed.
    pub fn data(&self) -> Option<&[u8]> {
        if !self.loaded || self.missing || self.delivered == 0 {
            return None;
        }
        self.block.get(self.skip..self.skip + self.delivered)
    }

    /// Delivered bytes for in-place post-processing.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        if !self.loaded || self.missing || self.delivered == 0 {
            return None;
        }
        self.block.get_mut(self.skip..self.skip + self.delivered)
    }

    pub fn set_priority(&self, priority: Priority) {
        if let Some(ticket) = &self.ticket {
            if !ticket.is_finished() {
                self.io.set_priority(ticket, priority);
            }
        }
    }

    /// Treat the data as having arrived the moment it was asked for.
    ///
    /// Used when a cached window is handed to a new requester, so latency
    /// figures describe this request rather than the original read.
    pub fn mark_instant_arrival(&mut self) {
        let now = Instant::now();
        self.requested_at = now;
        if self.loaded {
            self.arrived_at = Some(now);
        }
    }

    pub fn state(&self) -> ResourceState {
        if self.loaded {
            if self.missing || self.delivered == 0 {
                ResourceState::Missing
            } else {
                ResourceState::Loaded
            }
        } else if self.arrival.landed.load(Ordering::Acquire) {
            ResourceState::Loaded
        } else {
            ResourceState::Loading
        }
    }

    pub fn file(&self) -> &FileId {
        &self.file
    }

    pub fn request_offset(&self) -> u64 {
        self.request_offset
    }

    pub fn requested_len(&self) -> usize {
        self.requested
    }

    /// Bytes actually delivered. Zero until loaded.
    pub fn delivered_len(&self) -> usize {
        self.delivered
    }

    /// Bytes of memory held for the block, including alignment padding.
    pub fn allocated_len(&self) -> usize {
        self.allocated
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_missing(&self) -> bool {
        self.missing
    }

    pub fn is_post_processed(&self) -> bool {
        self.post_processed
    }

    pub fn set_post_processed(&mut self) {
        self.post_processed = true;
    }

    /// Request-to-arrival time, once loaded.
    pub fn latency(&self) -> Option<Duration> {
        self.arrived_at
            .map(|at| at.saturating_duration_since(self.requested_at))
    }

    pub fn registry_key(&self) -> Option<&BufferKey> {
        self.registry_key.as_ref()
    }

    pub(crate) fn set_registry_key(&mut self, key: Option<BufferKey>) {
        self.registry_key = key;
    }
}

impl Cost for AsyncWaveResource {
    fn cost(&self) -> usize {
        mem::size_of::<Self>() + self.allocated
    }
}

impl Drop for AsyncWaveResource {
    fn drop(&mut self) {
        // The block may only be released once the read is confirmed finished;
        // an abort request alone does not stop a read already in flight.
        if let Some(ticket) = self.ticket.take() {
            if !ticket.is_finished() {
                self.io.abort(&ticket);
                self.io.finish(&ticket, true);
            }
        }
    }
}

impl fmt::Debug for AsyncWaveResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncWaveResource")
            .field("file", &self.file)
            .field("request_offset", &self.request_offset)
            .field("requested", &self.requested)
            .field("delivered", &self.delivered)
            .field("allocated", &self.allocated)
            .field("state", &self.state())
            .field("post_processed", &self.post_processed)
            .finish()
    }
}
