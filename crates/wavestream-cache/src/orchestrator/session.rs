//! Stream session handles and window geometry.

use smallvec::SmallVec;
use std::fmt;
use wavestream_io::{CacheHandle, FileId};

use crate::error::{Error, Result};
use crate::key::BufferKey;

/// Largest ring a session may ask for.
pub const MAX_BUFFER_COUNT: usize = 8;

/// Unique identifier for a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn generate() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Session sharing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionFlags {
    /// Private windows: never shared, removed on close, recycled in place.
    pub single_play: bool,
}

impl SessionFlags {
    pub const SHARED: Self = Self { single_play: false };
    pub const SINGLE_PLAY: Self = Self { single_play: true };
}

/// Geometry of a new stream session. Offsets are bytes.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub file: FileId,
    /// Bytes of sample data.
    pub data_size: u64,
    /// File offset of the first data byte.
    pub data_start: u64,
    /// Where playback starts, relative to `data_start`.
    pub start_pos: u64,
    /// Loop restart point relative to `data_start`, or no loop.
    pub loop_pos: Option<u64>,
    /// Window size; rounded up to the sector size.
    pub buffer_size: usize,
    pub buffer_count: usize,
    pub flags: SessionFlags,
}

/// Snapshot of a session's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// File offset of the front window, if one is issued.
    pub front_offset: Option<u64>,
    /// Windows consumed so far.
    pub front_index: u64,
    /// No further windows will be issued.
    pub ended: bool,
    /// A window came back without data.
    pub failed: bool,
    pub buffer_size: u64,
    pub buffer_count: usize,
}

/// Zero-copy view of a session's front window.
#[derive(Debug, Clone, Copy)]
pub struct SessionWindow<'a> {
    /// File offset of `data[0]`.
    pub offset: u64,
    pub data: &'a [u8],
}

pub(super) type Ring = SmallVec<[Option<CacheHandle>; 4]>;

pub(super) struct StreamSession {
    pub file: FileId,
    pub ring: Ring,
    /// Windows consumed; `front % ring.len()` is the ring position being drained.
    pub front: u64,
    /// Offset of the next window to issue on rotation.
    pub next_offset: Option<u64>,
    pub data_start: u64,
    pub data_end: u64,
    /// Absolute loop restart offset.
    pub loop_offset: Option<u64>,
    pub buffer_size: u64,
    pub sector: u64,
    pub single_play: bool,
    /// Set by flush; the ring is refilled from here on next use.
    pub resume_at: Option<u64>,
    pub ended: bool,
    pub failed: bool,
}

impl StreamSession {
    pub fn new(params: &SessionParams, sector: u64) -> Result<Self> {
        if params.data_size == 0 {
            return Err(Error::InvalidSession("data size is zero".into()));
        }
        if params.buffer_size == 0 {
            return Err(Error::InvalidSession("buffer size is zero".into()));
        }
        if !(1..=MAX_BUFFER_COUNT).contains(&params.buffer_count) {
            return Err(Error::InvalidSession(format!(
                "buffer count {} outside 1..={MAX_BUFFER_COUNT}",
                params.buffer_count
            )));
        }
        if params.start_pos >= params.data_size {
            return Err(Error::InvalidSession(format!(
                "start {} past data size {}",
                params.start_pos, params.data_size
            )));
        }
        if params.loop_pos.is_some_and(|pos| pos >= params.data_size) {
            return Err(Error::InvalidSession("loop point past end of data".into()));
        }

        let sector = sector.max(1);
        Ok(Self {
            file: params.file.clone(),
            ring: SmallVec::from_elem(None, params.buffer_count),
            front: 0,
            next_offset: None,
            data_start: params.data_start,
            data_end: params.data_start + params.data_size,
            loop_offset: params.loop_pos.map(|pos| params.data_start + pos),
            buffer_size: align_up(params.buffer_size as u64, sector),
            sector,
            single_play: params.flags.single_play,
            resume_at: None,
            ended: false,
            failed: false,
        })
    }

    pub fn align_down(&self, offset: u64) -> u64 {
        offset - offset % self.sector
    }

    /// Window holding `offset`, wrapping to the loop point at end of data.
    pub fn window_at(&self, offset: u64) -> Option<u64> {
        if offset < self.data_end {
            Some(self.align_down(offset))
        } else {
            self.loop_offset.map(|restart| self.align_down(restart))
        }
    }

    pub fn window_after(&self, window: u64) -> Option<u64> {
        self.window_at(window + self.buffer_size)
    }

    pub fn window_len(&self, window: u64) -> usize {
        self.buffer_size.min(self.data_end.saturating_sub(window)) as usize
    }

    pub fn front_pos(&self) -> usize {
        (self.front % self.ring.len() as u64) as usize
    }

    pub fn front_handle(&self) -> Option<CacheHandle> {
        self.ring[self.front_pos()]
    }

    pub fn key(&self, window: u64) -> BufferKey {
        BufferKey::new(self.file.clone(), window, !self.single_play)
    }
}

pub(super) fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}
