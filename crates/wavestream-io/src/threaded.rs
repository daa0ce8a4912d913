//! Worker-thread read backend.

use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thread_priority::ThreadPriority;
use tracing::debug;

use super::error::{Error, Result};
use super::request::{CompletionFn, Job, ReadRequest};
use super::ticket::{AsyncIo, IoTicket};

struct Queued {
    job: Job,
    seq: u64,
}

#[derive(Default)]
struct Queue {
    jobs: Vec<Queued>,
    next_seq: u64,
    shutdown: bool,
}

impl Queue {
    /// Highest priority first, issue order within a priority.
    ///
    /// Priority is read at pop time so `set_priority` on a queued ticket
    /// takes effect.
    fn pop(&mut self) -> Option<Job> {
        let idx = self
            .jobs
            .iter()
            .enumerate()
            .max_by_key(|(_, q)| (q.job.ticket.priority(), Reverse(q.seq)))
            .map(|(idx, _)| idx)?;
        Some(self.jobs.swap_remove(idx).job)
    }
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// Reads files on a pool of named worker threads.
///
/// Completion callbacks fire on the worker that performed the read.
pub struct ThreadedIo {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadedIo {
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::NoWorkers);
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
        });

        let mut io = Self {
            shared,
            workers: Vec::with_capacity(threads),
        };

        for index in 0..threads {
            let shared = Arc::clone(&io.shared);
            let handle = thread::Builder::new()
                .name(format!("wavestream-io-{index}"))
                .spawn(move || {
                    let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                    worker_loop(&shared);
                })
                .map_err(|source| Error::WorkerSpawn { index, source })?;
            io.workers.push(handle);
        }

        debug!(threads, "I/O workers started");
        Ok(io)
    }

    /// Reads waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    /// Stop the workers. Reads still queued settle as aborted.
    pub fn shutdown(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.available.notify_all();

        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }

        let leftover: Vec<Queued> = std::mem::take(&mut self.shared.queue.lock().jobs);
        if !leftover.is_empty() {
            debug!(count = leftover.len(), "aborting reads queued at shutdown");
        }
        for queued in leftover {
            queued.job.cancel();
        }
    }
}

impl AsyncIo for ThreadedIo {
    fn issue_read(&self, request: ReadRequest, on_complete: CompletionFn) -> IoTicket {
        let ticket = IoTicket::new(request.priority);
        let job = Job {
            request,
            on_complete,
            ticket: ticket.clone(),
        };

        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            drop(queue);
            job.cancel();
            return ticket;
        }
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.jobs.push(Queued { job, seq });
        drop(queue);

        self.shared.available.notify_one();
        ticket
    }
}

impl Drop for ThreadedIo {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    return;
                }
                if let Some(job) = queue.pop() {
                    break job;
                }
                shared.available.wait(&mut queue);
            }
        };
        job.run();
    }
}
