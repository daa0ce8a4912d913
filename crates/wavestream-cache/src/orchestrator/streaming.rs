//! Stream sessions: a ring of windows drained front to back.
//!
//! Each session locks the windows in its ring. When the reader exhausts the
//! front window, that slot is refilled with the next predicted window at
//! prefetch priority and the front moves on.

use tracing::{debug, warn};
use wavestream_io::{CacheHandle, Priority, ResourceCache};

use super::session::{SessionId, SessionInfo, SessionParams, SessionWindow, StreamSession};
use super::WaveCache;
use crate::error::{Error, Result};
use crate::resource::AsyncWaveResource;

impl<C: ResourceCache<AsyncWaveResource>> WaveCache<C> {
    /// Open a session and issue its first windows.
    ///
    /// The window holding the start position loads at normal priority, the
    /// rest of the ring at prefetch priority.
    pub fn open_session(&mut self, params: SessionParams) -> Result<SessionId> {
        let mut session = StreamSession::new(&params, self.alignment())?;
        let id = SessionId::generate();
        self.prime(&mut session, params.data_start + params.start_pos);
        debug!(
            %id,
            file = %session.file,
            buffer_size = session.buffer_size,
            buffers = session.ring.len(),
            single_play = session.single_play,
            "stream session opened"
        );
        self.sessions.insert(id, session);
        Ok(id)
    }

    /// Unlock the session's windows. Single-play windows are destroyed.
    pub fn close_session(&mut self, id: SessionId) -> Result<()> {
        let mut session = self.sessions.remove(&id).ok_or(Error::UnknownSession(id))?;
        self.release_ring(&mut session);
        debug!(%id, "stream session closed");
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Copy up to `count` bytes starting at file offset `copy_offset`.
    ///
    /// Returns 0 while the front window is still loading, once the file is
    /// missing, and at end of data without a loop point.
    pub fn read_streaming(
        &mut self,
        id: SessionId,
        dest: &mut [u8],
        copy_offset: u64,
        count: usize,
    ) -> Result<usize> {
        let mut session = self.sessions.remove(&id).ok_or(Error::UnknownSession(id))?;
        let copied = self.stream_into(&mut session, dest, copy_offset, count);
        self.sessions.insert(id, session);
        Ok(copied)
    }

    /// Restart the session's ring at `offset`.
    pub fn seek_session(&mut self, id: SessionId, offset: u64) -> Result<()> {
        let mut session = self.sessions.remove(&id).ok_or(Error::UnknownSession(id))?;
        self.prime(&mut session, offset);
        debug!(%id, offset, "stream session repositioned");
        self.sessions.insert(id, session);
        Ok(())
    }

    /// True once the front window has landed, or nothing more will.
    pub fn is_session_ready(&mut self, id: SessionId) -> Result<bool> {
        let mut session = self.sessions.remove(&id).ok_or(Error::UnknownSession(id))?;
        self.resume(&mut session);
        let ready = session.ended
            || session.failed
            || session.front_handle().map_or(true, |handle| {
                self.cache
                    .get(handle)
                    .map_or(true, |resource| !resource.is_loading())
            });
        self.sessions.insert(id, session);
        Ok(ready)
    }

    /// Borrow the front window, blocking until it lands.
    pub fn get_session_pointer(&mut self, id: SessionId) -> Result<Option<SessionWindow<'_>>> {
        let mut session = self.sessions.remove(&id).ok_or(Error::UnknownSession(id))?;
        self.resume(&mut session);
        let front = if session.failed {
            None
        } else {
            session.front_handle()
        };
        self.sessions.insert(id, session);

        let Some(handle) = front else {
            return Ok(None);
        };
        let Some(resource) = self.cache.get(handle) else {
            return Ok(None);
        };
        resource.block_until_loaded(&self.reporter);
        if resource.take_missing_report(&self.reporter) {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.failed = true;
            }
            return Ok(None);
        }

        let offset = resource.request_offset();
        Ok(resource.data().map(|data| SessionWindow { offset, data }))
    }

    pub fn session_info(&self, id: SessionId) -> Result<SessionInfo> {
        let session = self.sessions.get(&id).ok_or(Error::UnknownSession(id))?;
        let front_offset = session
            .front_handle()
            .and_then(|handle| self.cache.peek(handle))
            .map(AsyncWaveResource::request_offset);
        Ok(SessionInfo {
            front_offset,
            front_index: session.front,
            ended: session.ended,
            failed: session.failed,
            buffer_size: session.buffer_size,
            buffer_count: session.ring.len(),
        })
    }

    /// Fill the ring starting at the window holding `from`.
    fn prime(&mut self, session: &mut StreamSession, from: u64) {
        self.release_ring(session);
        session.front = 0;
        session.resume_at = None;
        session.failed = false;

        let mut window = session.window_at(from);
        session.ended = window.is_none();
        for pos in 0..session.ring.len() {
            let Some(offset) = window else {
                break;
            };
            let priority = if pos == 0 {
                Priority::Normal
            } else {
                Priority::Prefetch
            };
            let length = session.window_len(offset);
            session.ring[pos] = Some(self.find_or_create_buffer(session.key(offset), length, priority));
            window = session.window_after(offset);
        }
        session.next_offset = window;
    }

    /// Refill a ring emptied by flush.
    fn resume(&mut self, session: &mut StreamSession) {
        if let Some(offset) = session.resume_at {
            self.prime(session, offset);
        }
    }

    fn release_ring(&mut self, session: &mut StreamSession) {
        for pos in 0..session.ring.len() {
            if let Some(handle) = session.ring[pos].take() {
                self.release_window(handle, session.single_play);
            }
        }
    }

    fn release_window(&mut self, handle: CacheHandle, single_play: bool) {
        if self.cache.unlock(handle) == 0 && single_play {
            self.cache.remove(handle);
        }
    }

    fn stream_into(
        &mut self,
        session: &mut StreamSession,
        dest: &mut [u8],
        copy_offset: u64,
        count: usize,
    ) -> usize {
        if session.failed {
            return 0;
        }
        if copy_offset >= session.data_end {
            if session.loop_offset.is_none() && !session.ended {
                debug!(file = %session.file, "end of stream");
                session.ended = true;
            }
            return 0;
        }
        if session.resume_at.take().is_some() {
            self.prime(session, copy_offset);
        }

        let count = count.min(dest.len());
        let mut copied = 0;
        let mut offset = copy_offset;
        let mut skipped = false;

        for _ in 0..=session.ring.len() {
            if copied == count || offset >= session.data_end {
                break;
            }
            let Some(handle) = session.front_handle() else {
                session.ended = true;
                break;
            };
            let Some(resource) = self.cache.get(handle) else {
                break;
            };
            if resource.is_loading() {
                break;
            }

            // Already landed; this only runs the one-time size check.
            resource.block_until_loaded(&self.reporter);
            let missing = resource.take_missing_report(&self.reporter);
            if missing || resource.delivered_len() == 0 {
                warn!(file = %session.file, offset = resource.request_offset(), "stream window has no data");
                session.failed = true;
                break;
            }

            let start = resource.request_offset();
            if offset < start {
                break;
            }
            let end = start + resource.delivered_len() as u64;
            if offset < end {
                let relative = (offset - start) as usize;
                let n = resource
                    .blocking_copy(&mut dest[copied..count], relative, count - copied, &self.reporter)
                    .unwrap_or(0);
                copied += n;
                offset += n as u64;
                if offset < end {
                    break;
                }
            }

            // Front exhausted. A reader that jumped past every queued window
            // without copying anything gets a window one buffer ahead of
            // where it landed, or the window holding its position when that
            // runs past the data.
            let beyond_ring = session
                .next_offset
                .map_or(true, |next| offset >= next + session.window_len(next) as u64);
            let skip_to = if copied == 0 && offset > end && beyond_ring && !skipped {
                skipped = true;
                let ahead = offset + session.buffer_size;
                Some(if ahead < session.data_end { ahead } else { offset })
            } else {
                None
            };
            self.rotate(session, skip_to);
        }

        copied
    }

    /// Refill the front slot with the next window and advance the front.
    fn rotate(&mut self, session: &mut StreamSession, skip_to: Option<u64>) {
        let pos = session.front_pos();
        let old = session.ring[pos].take();
        let next = match skip_to {
            Some(target) => session.window_at(target),
            None => session.next_offset,
        };
        session.front += 1;

        let Some(offset) = next else {
            if let Some(old) = old {
                self.release_window(old, session.single_play);
            }
            return;
        };
        session.next_offset = session.window_after(offset);
        let length = session.window_len(offset);

        if let Some(old) = old {
            if session.single_play {
                let alignment = self.alignment();
                let recycled = self.cache.get(old).is_some_and(|resource| {
                    resource
                        .restart(offset, length, alignment, Priority::Prefetch)
                        .is_ok()
                });
                if recycled {
                    self.metrics.record_read(length as u64);
                    self.cache.refresh_cost(old);
                    self.sweep_evicted();
                    session.ring[pos] = Some(old);
                    debug!(file = %session.file, offset, "single-play window recycled");
                    return;
                }
            }
            self.release_window(old, session.single_play);
        }

        session.ring[pos] = Some(self.find_or_create_buffer(
            session.key(offset),
            length,
            Priority::Prefetch,
        ));
        debug!(file = %session.file, offset, "stream window issued");
    }
}
