//! Read request and completion types shared by every backend.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use super::file::FileId;
use super::ticket::{IoStatus, IoTicket};

/// Scheduling priority of a read.
///
/// Prefetch work runs behind on-demand loads; `Urgent` is used when a caller
/// is about to block on the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    Prefetch = 0,
    #[default]
    Normal = 1,
    Urgent = 2,
}

impl Priority {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Priority::Prefetch,
            1 => Priority::Normal,
            _ => Priority::Urgent,
        }
    }
}

/// One read of `block.len()` bytes starting at `offset`.
///
/// The destination block travels with the request and comes back in the
/// [`ReadCompletion`], so the memory is never reachable from two owners.
#[derive(Debug)]
pub struct ReadRequest {
    pub file: FileId,
    pub offset: u64,
    pub block: Vec<u8>,
    pub priority: Priority,
}

impl ReadRequest {
    pub fn new(file: FileId, offset: u64, block: Vec<u8>, priority: Priority) -> Self {
        Self {
            file,
            offset,
            block,
            priority,
        }
    }
}

/// Terminal state of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Read ran; `bytes_read` may be short if the file ended early.
    Complete,
    /// The file could not be opened.
    Missing,
    /// Aborted before any bytes were transferred.
    Aborted,
    /// Opened, but seeking or reading failed.
    Failed(ErrorKind),
}

/// Delivered to the completion callback on the I/O thread.
#[derive(Debug)]
pub struct ReadCompletion {
    pub block: Vec<u8>,
    pub bytes_read: usize,
    pub status: ReadStatus,
}

/// Completion callback. Runs on whichever thread performs the read.
pub type CompletionFn = Box<dyn FnOnce(ReadCompletion) + Send + 'static>;

/// A queued read owned by a backend.
pub(crate) struct Job {
    pub request: ReadRequest,
    pub on_complete: CompletionFn,
    pub ticket: IoTicket,
}

impl Job {
    /// Perform the read and fire the callback, then release waiters.
    ///
    /// The callback always runs before the ticket settles, so a blocking
    /// `finish` observes the callback's writes.
    pub fn run(self) {
        let Job {
            mut request,
            on_complete,
            ticket,
        } = self;

        if ticket.abort_requested() || !ticket.begin() {
            on_complete(ReadCompletion {
                block: request.block,
                bytes_read: 0,
                status: ReadStatus::Aborted,
            });
            ticket.settle(IoStatus::Aborted);
            return;
        }

        let (bytes_read, status) = read_into(request.file.path(), request.offset, &mut request.block);
        on_complete(ReadCompletion {
            block: request.block,
            bytes_read,
            status,
        });
        ticket.settle(IoStatus::Complete);
    }

    /// Settle without touching storage (backend shutting down).
    pub fn cancel(self) {
        self.ticket.request_abort();
        self.run();
    }
}

/// Read as much of `block` as the file provides from `offset`.
pub(crate) fn read_into(path: &Path, offset: u64, block: &mut [u8]) -> (usize, ReadStatus) {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return (0, ReadStatus::Missing),
    };

    if let Err(e) = file.seek(SeekFrom::Start(offset)) {
        return (0, ReadStatus::Failed(e.kind()));
    }

    let mut filled = 0;
    while filled < block.len() {
        match file.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return (filled, ReadStatus::Failed(e.kind())),
        }
    }

    (filled, ReadStatus::Complete)
}
