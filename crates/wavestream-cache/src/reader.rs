//! Sample-indexed reader on top of the wave cache.
//!
//! Small sources load whole; larger ones stream through a session sized
//! from the source's byte rate. Either way the mixer asks for samples by
//! index and gets back whole frames, post-processed exactly once.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use wavestream_io::{CacheHandle, FileId, LruCache, ResourceCache};

use crate::config::StreamConfig;
use crate::error::Result;
use crate::orchestrator::{
    LoadSpec, SessionFlags, SessionId, SessionParams, SharedWaveCache, WaveCache, MAX_BUFFER_COUNT,
};
use crate::resource::AsyncWaveResource;

/// Sample layout of a source's data chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Data is compressed; streams get wider windows.
    pub compressed: bool,
}

impl WaveFormat {
    pub fn pcm(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            compressed: false,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        (usize::from(self.bits_per_sample) / 8).max(1)
    }

    /// Bytes per frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels.max(1))
    }

    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate) * self.block_align() as u64
    }
}

/// Where a source's sample data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveSource {
    pub file: FileId,
    /// File offset of the data chunk.
    pub data_start: u64,
    pub data_size: u64,
    pub format: WaveFormat,
    /// Loop restart, in frames.
    pub loop_start: Option<u64>,
    pub single_play: bool,
}

impl WaveSource {
    pub fn new(file: impl Into<FileId>, data_start: u64, data_size: u64, format: WaveFormat) -> Self {
        Self {
            file: file.into(),
            data_start,
            data_size,
            format,
            loop_start: None,
            single_play: false,
        }
    }

    pub fn with_loop(mut self, frame: u64) -> Self {
        self.loop_start = Some(frame);
        self
    }

    pub fn single_play(mut self) -> Self {
        self.single_play = true;
        self
    }

    pub fn total_frames(&self) -> u64 {
        self.data_size / self.format.block_align() as u64
    }
}

/// Converts raw delivered bytes into the mixer's in-memory representation.
pub trait PostProcess: Send {
    fn process(&mut self, format: &WaveFormat, data: &mut [u8]);
}

/// Leaves bytes untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl PostProcess for Passthrough {
    fn process(&mut self, _format: &WaveFormat, _data: &mut [u8]) {}
}

/// Converts integer PCM from the file's byte order to native order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmEndian {
    big_endian: bool,
}

impl PcmEndian {
    pub fn little() -> Self {
        Self { big_endian: false }
    }

    pub fn big() -> Self {
        Self { big_endian: true }
    }
}

impl Default for PcmEndian {
    fn default() -> Self {
        Self::little()
    }
}

impl PostProcess for PcmEndian {
    fn process(&mut self, format: &WaveFormat, data: &mut [u8]) {
        if self.big_endian == cfg!(target_endian = "big") {
            return;
        }
        let width = format.bytes_per_sample();
        if width < 2 {
            return;
        }
        for sample in data.chunks_exact_mut(width) {
            sample.reverse();
        }
    }
}

/// Stream window geometry chosen for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPlan {
    pub buffer_size: usize,
    pub buffer_count: usize,
}

impl BufferPlan {
    /// Cover the worst-case read latency for every window in the ring,
    /// widened for compressed and looping sources, then clamp and align.
    pub fn for_source(source: &WaveSource, config: &StreamConfig, sector: u64) -> Self {
        let sector = sector.max(1);
        let count = config.buffer_count.clamp(1, MAX_BUFFER_COUNT);

        let mut target = source.format.bytes_per_second() as f64
            * config.worst_case_latency().as_secs_f64()
            * count as f64;
        if source.format.compressed {
            target *= config.compressed_widening;
        }
        if source.loop_start.is_some() {
            target *= config.loop_widening;
        }

        let max = config.max_buffer_bytes.max(config.min_buffer_bytes);
        let size = (target.ceil() as u64).clamp(config.min_buffer_bytes, max);
        let buffer_size = size.div_ceil(sector) * sector;

        // The first window starts at the sector holding `data_start`.
        let span = source.data_start % sector + source.data_size;
        if span <= buffer_size {
            return Self {
                buffer_size: (span.div_ceil(sector) * sector) as usize,
                buffer_count: 1,
            };
        }

        Self {
            buffer_size: buffer_size as usize,
            buffer_count: count,
        }
    }
}

enum Mode {
    Whole { handle: CacheHandle, spec: LoadSpec },
    Streaming { session: SessionId, plan: BufferPlan },
}

/// Pulls sample frames for one source.
pub struct WaveReader<C: ResourceCache<AsyncWaveResource> = LruCache<AsyncWaveResource>> {
    cache: SharedWaveCache<C>,
    source: WaveSource,
    mode: Mode,
    post: Box<dyn PostProcess>,
    /// Post-processed whole frames for data bytes `[window_start, window_start + window.len())`.
    window: Vec<u8>,
    window_start: u64,
    /// Unprocessed bytes of a frame split across two fetches.
    carry: Vec<u8>,
    /// Data offset of the next byte to request from the session.
    fetch_pos: u64,
    scratch: Vec<u8>,
}

impl<C: ResourceCache<AsyncWaveResource>> WaveReader<C> {
    /// Start loading `source`: whole if it is small enough, streamed otherwise.
    pub fn open(cache: SharedWaveCache<C>, source: WaveSource) -> Result<Self> {
        let mode = {
            let mut guard = cache.lock();
            let config = guard.config().clone();

            if source.data_size <= config.stream.monolithic_max_bytes {
                let spec = LoadSpec::new(source.file.clone(), source.data_size as usize, source.data_start);
                let handle = guard.load_whole(&spec, false);
                Mode::Whole { handle, spec }
            } else {
                let plan = BufferPlan::for_source(&source, &config.stream, config.sector_size);
                let block_align = source.format.block_align() as u64;
                let session = guard.open_session(SessionParams {
                    file: source.file.clone(),
                    data_size: source.data_size,
                    data_start: source.data_start,
                    start_pos: 0,
                    loop_pos: source.loop_start.map(|frame| frame * block_align),
                    buffer_size: plan.buffer_size,
                    buffer_count: plan.buffer_count,
                    flags: if source.single_play {
                        SessionFlags::SINGLE_PLAY
                    } else {
                        SessionFlags::SHARED
                    },
                })?;
                Mode::Streaming { session, plan }
            }
        };

        Ok(Self {
            cache,
            source,
            mode,
            post: Box::new(PcmEndian::little()),
            window: Vec::new(),
            window_start: 0,
            carry: Vec::new(),
            fetch_pos: 0,
            scratch: Vec::new(),
        })
    }

    pub fn with_post_process(mut self, post: impl PostProcess + 'static) -> Self {
        self.post = Box::new(post);
        self
    }

    pub fn source(&self) -> &WaveSource {
        &self.source
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.mode, Mode::Streaming { .. })
    }

    /// Window geometry, when streaming.
    pub fn plan(&self) -> Option<BufferPlan> {
        match self.mode {
            Mode::Streaming { plan, .. } => Some(plan),
            Mode::Whole { .. } => None,
        }
    }

    /// True once the first data has landed or failed to.
    pub fn is_ready(&self) -> bool {
        let mut cache = self.cache.lock();
        match &self.mode {
            Mode::Whole { handle, .. } => {
                let progress = cache.is_load_complete(*handle);
                !progress.valid || progress.loaded
            }
            Mode::Streaming { session, .. } => cache.is_session_ready(*session).unwrap_or(true),
        }
    }

    /// First frame and frame count of the current window.
    pub fn window_frames(&self) -> (u64, usize) {
        let block_align = self.source.format.block_align();
        (
            self.window_start / block_align as u64,
            self.window.len() / block_align,
        )
    }

    /// Frames `[sample_index, sample_index + sample_count)`, or as many of
    /// them as are available.
    ///
    /// Returns whole frames only; an empty slice means nothing is available
    /// yet or the index is past the end of data.
    pub fn read_samples(&mut self, sample_index: u64, sample_count: usize) -> Result<&[u8]> {
        let block_align = self.source.format.block_align() as u64;
        let data_end = self.data_end();
        let start = sample_index.saturating_mul(block_align).min(data_end);
        let end = start
            .saturating_add((sample_count as u64).saturating_mul(block_align))
            .min(data_end);
        if start == end {
            return Ok(&[]);
        }

        if start < self.window_start || end > self.window_end() {
            let cache = Arc::clone(&self.cache);
            let mut cache = cache.lock();
            match self.mode {
                Mode::Whole { .. } => self.fetch_whole(&mut cache, start, end),
                Mode::Streaming { session, .. } => {
                    self.fetch_streaming(&mut cache, session, start, end)?
                }
            }
        }

        if start < self.window_start || start >= self.window_end() {
            return Ok(&[]);
        }
        let from = (start - self.window_start) as usize;
        let to = (end.min(self.window_end()) - self.window_start) as usize;
        Ok(&self.window[from..to])
    }

    /// End of whole-frame data, relative to `data_start`.
    fn data_end(&self) -> u64 {
        let block_align = self.source.format.block_align() as u64;
        self.source.data_size - self.source.data_size % block_align
    }

    fn window_end(&self) -> u64 {
        self.window_start + self.window.len() as u64
    }

    fn fetch_whole(&mut self, cache: &mut WaveCache<C>, start: u64, end: u64) {
        let Mode::Whole { handle, spec } = &mut self.mode else {
            return;
        };
        if !cache.is_load_complete(*handle).valid {
            *handle = cache.load_whole(spec, false);
        }
        if !cache.is_post_processed(*handle) {
            if let Some(data) = cache.blocking_data_mut(*handle) {
                self.post.process(&self.source.format, data);
                cache.set_post_processed(*handle);
            }
        }

        let count = (end - start) as usize;
        self.window.clear();
        self.window.resize(count, 0);
        let outcome = cache.copy_into(handle, spec, &mut self.window, start as usize, count);
        let copied = if outcome.ok { outcome.copied } else { 0 };
        if outcome.ok && !outcome.post_processed {
            self.post.process(&self.source.format, &mut self.window[..copied]);
        }

        let block_align = self.source.format.block_align();
        self.window.truncate(copied - copied % block_align);
        self.window_start = start;
    }

    fn fetch_streaming(
        &mut self,
        cache: &mut WaveCache<C>,
        session: SessionId,
        start: u64,
        end: u64,
    ) -> Result<()> {
        if start < self.window_start || start > self.fetch_pos {
            let loop_byte = self
                .source
                .loop_start
                .map(|frame| frame * self.source.format.block_align() as u64);
            let wraps = loop_byte == Some(start) && self.fetch_pos >= self.data_end();

            if start < self.window_start && !wraps {
                debug!(file = %self.source.file, from = self.window_start, to = start, "backward seek, restarting stream");
                cache.seek_session(session, self.source.data_start + start)?;
            } else if start > self.fetch_pos {
                debug!(file = %self.source.file, from = self.fetch_pos, to = start, "forward skip");
            }

            self.window.clear();
            self.carry.clear();
            self.window_start = start;
            self.fetch_pos = start;
        } else {
            let consumed = ((start - self.window_start) as usize).min(self.window.len());
            self.window.drain(..consumed);
            self.window_start += consumed as u64;
        }

        self.fill(cache, session, end)
    }

    /// Pull from the session until `end` is buffered or nothing more is ready.
    fn fill(&mut self, cache: &mut WaveCache<C>, session: SessionId, end: u64) -> Result<()> {
        for _ in 0..=MAX_BUFFER_COUNT {
            if self.fetch_pos >= end {
                break;
            }
            let need = (end - self.fetch_pos) as usize;
            let file_offset = self.source.data_start + self.fetch_pos;
            self.scratch.resize(need, 0);

            let copied = cache.read_streaming(session, &mut self.scratch[..need], file_offset, need)?;
            if copied > 0 {
                self.absorb(copied);
                continue;
            }

            // A skip can leave the session's front ahead of us; the hole
            // plays as silence.
            match cache.session_info(session)?.front_offset {
                Some(front) if front > file_offset => {
                    let gap = (front - file_offset).min(need as u64) as usize;
                    debug!(file = %self.source.file, offset = file_offset, bytes = gap, "stream gap served as silence");
                    self.scratch[..gap].fill(0);
                    self.absorb(gap);
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Move `scratch[..n]` into the window, post-processing whole frames.
    fn absorb(&mut self, n: usize) {
        self.carry.extend_from_slice(&self.scratch[..n]);
        self.fetch_pos += n as u64;

        let block_align = self.source.format.block_align();
        let whole = self.carry.len() - self.carry.len() % block_align;
        if whole == 0 {
            return;
        }
        self.post.process(&self.source.format, &mut self.carry[..whole]);
        self.window.extend_from_slice(&self.carry[..whole]);
        self.carry.drain(..whole);
    }
}

impl<C: ResourceCache<AsyncWaveResource>> Drop for WaveReader<C> {
    fn drop(&mut self) {
        if let Mode::Streaming { session, .. } = self.mode {
            let _ = self.cache.lock().close_session(session);
        }
    }
}
