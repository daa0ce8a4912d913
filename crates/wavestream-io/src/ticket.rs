//! Control handle for an in-flight read, and the backend trait.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use super::request::{CompletionFn, Priority, ReadRequest};

/// Progress of a read as seen through its ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Queued,
    InFlight,
    Complete,
    Aborted,
}

impl IoStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, IoStatus::Complete | IoStatus::Aborted)
    }
}

struct TicketState {
    id: u64,
    status: Mutex<IoStatus>,
    settled: Condvar,
    priority: AtomicU8,
    abort_requested: AtomicBool,
}

/// Control handle returned by [`AsyncIo::issue_read`].
///
/// Dropping the last clone releases the handle; it does not cancel the read.
#[derive(Clone)]
pub struct IoTicket(Arc<TicketState>);

impl IoTicket {
    /// Create a queued ticket. Backends call this from `issue_read`.
    pub fn new(priority: Priority) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(Arc::new(TicketState {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            status: Mutex::new(IoStatus::Queued),
            settled: Condvar::new(),
            priority: AtomicU8::new(priority as u8),
            abort_requested: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn status(&self) -> IoStatus {
        *self.0.status.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    pub fn priority(&self) -> Priority {
        Priority::from_u8(self.0.priority.load(Ordering::Relaxed))
    }

    pub fn set_priority(&self, priority: Priority) {
        self.0.priority.store(priority as u8, Ordering::Relaxed);
    }

    pub fn request_abort(&self) {
        self.0.abort_requested.store(true, Ordering::Release);
    }

    pub fn abort_requested(&self) -> bool {
        self.0.abort_requested.load(Ordering::Acquire)
    }

    /// Move `Queued -> InFlight`. Returns false if the read already settled.
    pub fn begin(&self) -> bool {
        let mut status = self.0.status.lock();
        if status.is_finished() {
            return false;
        }
        *status = IoStatus::InFlight;
        true
    }

    /// Record the terminal state and wake every waiter.
    pub fn settle(&self, terminal: IoStatus) {
        debug_assert!(terminal.is_finished());
        let mut status = self.0.status.lock();
        *status = terminal;
        self.0.settled.notify_all();
    }

    /// Block until the read has settled.
    pub fn wait(&self) {
        let mut status = self.0.status.lock();
        while !status.is_finished() {
            self.0.settled.wait(&mut status);
        }
    }
}

impl fmt::Debug for IoTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoTicket")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("priority", &self.priority())
            .finish()
    }
}

/// Asynchronous read primitive.
///
/// The completion callback runs on a backend thread and must only write
/// state owned by the request's issuer.
pub trait AsyncIo: Send + Sync {
    /// Queue a read. Never blocks on storage.
    fn issue_read(&self, request: ReadRequest, on_complete: CompletionFn) -> IoTicket;

    /// Returns true once the read has settled. With `blocking`, waits for it.
    fn finish(&self, ticket: &IoTicket, blocking: bool) -> bool {
        if blocking {
            ticket.wait();
            true
        } else {
            ticket.is_finished()
        }
    }

    /// Ask the backend to drop the read if it has not started.
    ///
    /// A read already in flight still completes; callers that free the
    /// destination must `finish` afterwards.
    fn abort(&self, ticket: &IoTicket) {
        ticket.request_abort();
    }

    fn status(&self, ticket: &IoTicket) -> IoStatus {
        ticket.status()
    }

    fn set_priority(&self, ticket: &IoTicket, priority: Priority) {
        ticket.set_priority(priority);
    }
}
