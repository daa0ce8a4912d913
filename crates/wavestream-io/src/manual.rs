//! Manually driven read backend.
//!
//! Reads stay queued until [`ManualIo::complete_next`] or
//! [`ManualIo::complete_all`] runs them, which makes "data has not arrived
//! yet" reproducible. A blocking `finish` runs the awaited read inline, the
//! same way a synchronous fallback would.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::file::FileId;
use super::request::{CompletionFn, Job, ReadRequest};
use super::ticket::{AsyncIo, IoTicket};

#[derive(Default)]
pub struct ManualIo {
    pending: Mutex<VecDeque<Job>>,
    issued: AtomicUsize,
}

impl ManualIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads issued and not yet run.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Total reads ever issued.
    pub fn reads_issued(&self) -> usize {
        self.issued.load(Ordering::Relaxed)
    }

    /// Reads issued against `file` that have not run.
    pub fn pending_for(&self, file: &FileId) -> usize {
        self.pending
            .lock()
            .iter()
            .filter(|job| &job.request.file == file)
            .count()
    }

    /// Run the oldest pending read. Returns false if none was pending.
    pub fn complete_next(&self) -> bool {
        let job = self.pending.lock().pop_front();
        match job {
            Some(job) => {
                job.run();
                true
            }
            None => false,
        }
    }

    /// Run every pending read, including ones issued by callbacks meanwhile.
    pub fn complete_all(&self) -> usize {
        let mut count = 0;
        while self.complete_next() {
            count += 1;
        }
        count
    }

    fn take(&self, ticket: &IoTicket) -> Option<Job> {
        let mut pending = self.pending.lock();
        let idx = pending.iter().position(|job| job.ticket.id() == ticket.id())?;
        pending.remove(idx)
    }
}

impl AsyncIo for ManualIo {
    fn issue_read(&self, request: ReadRequest, on_complete: CompletionFn) -> IoTicket {
        let ticket = IoTicket::new(request.priority);
        self.issued.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().push_back(Job {
            request,
            on_complete,
            ticket: ticket.clone(),
        });
        ticket
    }

    fn finish(&self, ticket: &IoTicket, blocking: bool) -> bool {
        if ticket.is_finished() {
            return true;
        }
        if !blocking {
            return false;
        }
        if let Some(job) = self.take(ticket) {
            job.run();
        }
        ticket.wait();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IoStatus, Priority, ReadStatus};
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::Arc;

    #[test]
    fn test_reads_wait_for_completion() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello wavestream").unwrap();

        let io = ManualIo::new();
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        let ticket = io.issue_read(
            ReadRequest::new(FileId::new(file.path()), 6, vec![0; 10], Priority::Normal),
            Box::new(move |done| {
                assert_eq!(done.status, ReadStatus::Complete);
                sink.lock().extend_from_slice(&done.block[..done.bytes_read]);
            }),
        );

        assert_eq!(io.pending(), 1);
        assert!(!io.finish(&ticket, false));
        assert!(got.lock().is_empty());

        assert!(io.complete_next());
        assert_eq!(ticket.status(), IoStatus::Complete);
        assert_eq!(got.lock().as_slice(), b"wavestream");
        assert!(!io.complete_next());
    }

    #[test]
    fn test_blocking_finish_runs_inline() {
        let io = ManualIo::new();
        let first = io.issue_read(
            ReadRequest::new(FileId::new("/nonexistent/1"), 0, vec![0; 4], Priority::Normal),
            Box::new(|_| {}),
        );
        let second = io.issue_read(
            ReadRequest::new(FileId::new("/nonexistent/2"), 0, vec![0; 4], Priority::Normal),
            Box::new(|_| {}),
        );

        assert!(io.finish(&second, true));
        assert!(second.is_finished());
        assert!(!first.is_finished());
        assert_eq!(io.pending(), 1);
        assert_eq!(io.reads_issued(), 2);
    }

    #[test]
    fn test_abort_before_run() {
        let io = ManualIo::new();
        let status = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&status);
        let ticket = io.issue_read(
            ReadRequest::new(FileId::new("/nonexistent/3"), 0, vec![0; 4], Priority::Normal),
            Box::new(move |done| *sink.lock() = Some(done.status)),
        );

        io.abort(&ticket);
        io.finish(&ticket, true);
        assert_eq!(ticket.status(), IoStatus::Aborted);
        assert_eq!(*status.lock(), Some(ReadStatus::Aborted));
    }

    #[test]
    fn test_pending_for_file() {
        let io = ManualIo::new();
        let a = FileId::new("/a");
        for _ in 0..3 {
            io.issue_read(
                ReadRequest::new(a.clone(), 0, Vec::new(), Priority::Prefetch),
                Box::new(|_| {}),
            );
        }
        io.issue_read(
            ReadRequest::new(FileId::new("/b"), 0, Vec::new(), Priority::Prefetch),
            Box::new(|_| {}),
        );
        assert_eq!(io.pending_for(&a), 3);
        assert_eq!(io.complete_all(), 4);
        assert_eq!(io.pending_for(&a), 0);
    }
}
