// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Background image compression.
//!
//! The capture side hands raw RGBA/RGB readbacks to a dedicated worker
//! thread which compresses them to JPEG or PNG. Both handoffs are
//! freshest-wins slots, so a slow worker drops stale frames instead of
//! queueing them.
//!
//! ```text
//!   capture tick          readback done          worker thread         emitter tick
//! ┌────────────────┐    ┌───────────────┐      ┌──────────────┐      ┌──────────────┐
//! │ begin_readback │ ─► │   Readback::  │ raw  │  wait_take   │ out  │  take_frame  │
//! │ (never blocks) │    │   complete()  │ ───► │  + compress  │ ───► │  + FrameRate │
//! └────────────────┘    └───────────────┘ slot └──────────────┘ slot └──────────────┘
//! ```
//!
//! # Session lifecycle
//!
//! ```text
//!   Idle -> ReadbackPending -> RawReady -> Compressing -> FrameReady -> Idle
//! ```
//!
//! [`ImageCompressor::enable`] spawns the worker. [`ImageCompressor::disable`]
//! marks the session disposing, wakes the worker and joins it with a bounded
//! timeout (a worker that does not stop in time is logged and detached).
//! Staging buffers are released exactly once: immediately when no readback
//! is in flight, otherwise by the completion of the last in-flight readback.

use crate::{
    sensor::{Error, NANOS_PER_SEC, Result},
    slot::{SlotReader, SlotWriter, WaitResult, freshest_slot},
};
use clap::ValueEnum;
use image::{
    ExtendedColorType, ImageEncoder,
    codecs::png::{CompressionType, FilterType, PngEncoder},
};
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, error, info_span, trace, warn};

/// Staging buffers kept for reuse; more are freed on return.
const STAGING_POOL_LIMIT: usize = 3;

/// Compressed output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ImageCodec {
    #[default]
    Jpeg,
    Png,
}

impl ImageCodec {
    /// CompressedImage format string.
    pub const fn format(self) -> &'static str {
        match self {
            ImageCodec::Jpeg => "jpeg",
            ImageCodec::Png => "png",
        }
    }
}

/// JPEG chroma subsampling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ChromaSubsampling {
    #[default]
    #[value(name = "420")]
    Yuv420,
    #[value(name = "422")]
    Yuv422,
    #[value(name = "444")]
    Yuv444,
}

impl ChromaSubsampling {
    fn sampling_factor(self) -> SamplingFactor {
        match self {
            ChromaSubsampling::Yuv420 => SamplingFactor::R_4_2_0,
            ChromaSubsampling::Yuv422 => SamplingFactor::R_4_2_2,
            ChromaSubsampling::Yuv444 => SamplingFactor::R_4_4_4,
        }
    }
}

/// Channel layout of raw readbacks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum PixelLayout {
    #[default]
    Rgba,
    Rgb,
}

impl PixelLayout {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgba => 4,
            PixelLayout::Rgb => 3,
        }
    }
}

/// Image compressor settings.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub width: u32,
    pub height: u32,
    pub codec: ImageCodec,
    /// JPEG quality, 1-100.
    pub quality: u8,
    pub chroma: ChromaSubsampling,
    pub layout: PixelLayout,
    /// Readbacks arrive bottom-up and are flipped to top-down.
    pub flip_vertical: bool,
    /// Worker wait between shutdown checks.
    pub wait_timeout: Duration,
    /// How long `disable` waits for the worker to stop.
    pub join_timeout: Duration,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            codec: ImageCodec::Jpeg,
            quality: 90,
            chroma: ChromaSubsampling::Yuv420,
            layout: PixelLayout::Rgba,
            flip_vertical: true,
            wait_timeout: Duration::from_millis(500),
            join_timeout: Duration::from_secs(1),
        }
    }
}

impl CompressionConfig {
    /// Bytes in one raw readback.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.bytes_per_pixel()
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config("image resolution must be non-zero".to_owned()));
        }
        if self.codec == ImageCodec::Jpeg
            && (self.width > u16::MAX as u32 || self.height > u16::MAX as u32)
        {
            return Err(Error::Config(format!(
                "{}x{} exceeds the JPEG dimension limit",
                self.width, self.height
            )));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(Error::Config(format!(
                "quality {} outside [1, 100]",
                self.quality
            )));
        }
        Ok(())
    }
}

/// Compressed image ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    /// `jpeg` or `png`
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Capture time of the raw readback, nanoseconds.
    pub timestamp: u64,
}

/// Raw readback paired with its capture time.
#[derive(Debug)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub timestamp: u64,
}

/// Compress `pixels` according to `config`.
///
/// `scratch` holds the flipped copy when `flip_vertical` is set and is
/// reused between calls.
///
/// # Errors
///
/// [`Error::SizeMismatch`] if `pixels` does not match the configured
/// resolution and layout, or the codec error.
pub fn compress(config: &CompressionConfig, pixels: &[u8], scratch: &mut Vec<u8>) -> Result<Vec<u8>> {
    let expected = config.frame_len();
    if pixels.len() != expected {
        return Err(Error::SizeMismatch {
            expected,
            actual: pixels.len(),
        });
    }

    let src = if config.flip_vertical {
        let row = config.width as usize * config.layout.bytes_per_pixel();
        scratch.clear();
        for line in pixels.chunks_exact(row).rev() {
            scratch.extend_from_slice(line);
        }
        scratch.as_slice()
    } else {
        pixels
    };

    let mut out = Vec::with_capacity(expected / 8);
    match config.codec {
        ImageCodec::Jpeg => {
            let mut encoder = Encoder::new(&mut out, config.quality);
            encoder.set_sampling_factor(config.chroma.sampling_factor());
            let color = match config.layout {
                PixelLayout::Rgba => ColorType::Rgba,
                PixelLayout::Rgb => ColorType::Rgb,
            };
            encoder.encode(src, config.width as u16, config.height as u16, color)?;
        }
        ImageCodec::Png => {
            let color = match config.layout {
                PixelLayout::Rgba => ExtendedColorType::Rgba8,
                PixelLayout::Rgb => ExtendedColorType::Rgb8,
            };
            PngEncoder::new_with_quality(&mut out, CompressionType::Fast, FilterType::Adaptive)
                .write_image(src, config.width, config.height, color)?;
        }
    }
    Ok(out)
}

/// Stage of the current encoding session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    ReadbackPending = 1,
    RawReady = 2,
    Compressing = 3,
    FrameReady = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::ReadbackPending,
            2 => SessionState::RawReady,
            3 => SessionState::Compressing,
            4 => SessionState::FrameReady,
            _ => SessionState::Idle,
        }
    }
}

/// Compressor counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompressorStats {
    /// Frames compressed and published.
    pub compressed: u64,
    /// Compression failures.
    pub failed: u64,
    /// Raw frames overwritten before the worker took them.
    pub raw_dropped: u64,
    /// Compressed frames overwritten before the emitter took them.
    pub output_dropped: u64,
    /// Completed staging-buffer teardowns.
    pub teardowns: u64,
}

#[derive(Default)]
struct Counters {
    compressed: AtomicU64,
    failed: AtomicU64,
    raw_dropped: AtomicU64,
    output_dropped: AtomicU64,
    teardowns: AtomicU64,
}

/// State shared between the control handle, readbacks and the worker for
/// one enable/disable cycle.
struct Session {
    config: CompressionConfig,
    raw_tx: SlotWriter<RawFrame>,
    raw_rx: SlotReader<RawFrame>,
    output: Arc<SlotWriter<CompressedImage>>,
    state: Arc<AtomicU8>,
    counters: Arc<Counters>,
    /// `None` once torn down.
    pool: Mutex<Option<Vec<Vec<u8>>>>,
    disposing: AtomicBool,
    in_flight: AtomicUsize,
}

impl Session {
    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn staging_buffer(&self) -> Vec<u8> {
        let len = self.config.frame_len();
        let recycled = self.pool.lock().as_mut().and_then(|pool| pool.pop());
        match recycled {
            Some(mut buf) => {
                buf.resize(len, 0);
                buf
            }
            None => vec![0; len],
        }
    }

    fn recycle(&self, buf: Vec<u8>) {
        let mut pool = self.pool.lock();
        if let Some(pool) = pool.as_mut() {
            if pool.len() < STAGING_POOL_LIMIT {
                pool.push(buf);
            }
        }
    }

    /// Release the staging buffers. Only the first call has any effect.
    fn teardown(&self) {
        let Some(pool) = self.pool.lock().take() else {
            return;
        };
        let stale = self.raw_rx.take();
        debug!(
            pooled = pool.len(),
            stale = stale.is_some(),
            "released image staging buffers"
        );
        drop(pool);
        drop(stale);
        self.counters.teardowns.fetch_add(1, Ordering::AcqRel);
    }

    fn readback_finished(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 && self.disposing.load(Ordering::SeqCst)
        {
            trace!("last in-flight readback finished after disable");
            self.teardown();
        }
    }
}

/// An in-flight readback.
///
/// Obtained from [`ImageCompressor::begin_readback`], filled by the renderer
/// (possibly on another thread) and finished with [`Readback::complete`].
/// Dropping it without completing counts as a failed readback.
pub struct Readback {
    session: Arc<Session>,
    buffer: Option<Vec<u8>>,
    timestamp: u64,
}

impl Readback {
    /// Capture time this readback belongs to.
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Staging buffer to fill, `width * height * bytes_per_pixel` long.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or_default()
    }

    /// Hand the filled buffer to the worker.
    ///
    /// Overwrites any raw frame the worker has not yet taken. After
    /// `disable` the buffer is discarded instead.
    pub fn complete(mut self) {
        self.finish(true);
    }

    /// Copy `data` into the staging buffer and complete.
    pub fn complete_with(mut self, data: &[u8]) -> Result<()> {
        let buf = self.buffer_mut();
        if buf.len() != data.len() {
            return Err(Error::SizeMismatch {
                expected: buf.len(),
                actual: data.len(),
            });
        }
        buf.copy_from_slice(data);
        self.complete();
        Ok(())
    }

    /// Abandon the readback, e.g. on a GPU readback error.
    pub fn fail(mut self) {
        self.finish(false);
    }

    fn finish(&mut self, ok: bool) {
        let Some(data) = self.buffer.take() else {
            return;
        };
        let session = &self.session;

        if ok && !session.disposing.load(Ordering::SeqCst) {
            let frame = RawFrame {
                data,
                timestamp: self.timestamp,
            };
            session.set_state(SessionState::RawReady);
            if let Some(stale) = session.raw_tx.publish(frame) {
                session.counters.raw_dropped.fetch_add(1, Ordering::Relaxed);
                session.recycle(stale.data);
            }
        } else {
            if !ok {
                warn!(timestamp = self.timestamp, "image readback failed");
            }
            session.recycle(data);
        }

        session.readback_finished();
    }
}

impl Drop for Readback {
    fn drop(&mut self) {
        self.finish(false);
    }
}

fn run_worker(session: Arc<Session>) {
    let mut scratch = Vec::new();
    loop {
        match session.raw_rx.wait_take(session.config.wait_timeout) {
            WaitResult::Ready(frame) => {
                if session.disposing.load(Ordering::SeqCst) {
                    session.recycle(frame.data);
                    break;
                }

                let _span = info_span!("compress", timestamp = frame.timestamp).entered();
                session.set_state(SessionState::Compressing);
                match compress(&session.config, &frame.data, &mut scratch) {
                    Ok(data) => {
                        let image = CompressedImage {
                            format: session.config.codec.format(),
                            width: session.config.width,
                            height: session.config.height,
                            data,
                            timestamp: frame.timestamp,
                        };
                        trace!(bytes = image.data.len(), "compressed frame");
                        if session.output.publish(image).is_some() {
                            session
                                .counters
                                .output_dropped
                                .fetch_add(1, Ordering::Relaxed);
                        }
                        session.counters.compressed.fetch_add(1, Ordering::Relaxed);
                        session.set_state(SessionState::FrameReady);
                    }
                    Err(err) => {
                        session.counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!("image compression failed: {err}");
                    }
                }
                session.recycle(frame.data);
            }
            WaitResult::Timeout => {
                if session.disposing.load(Ordering::SeqCst) {
                    break;
                }
            }
            WaitResult::Closed => break,
        }
    }
    debug!("image compressor worker stopped");
}

/// Consumer half: takes compressed frames on the emitter's schedule.
pub struct CompressedFrames {
    rx: SlotReader<CompressedImage>,
    state: Arc<AtomicU8>,
    rate: FrameRate,
}

impl CompressedFrames {
    /// Take the newest compressed frame, if one arrived since the last
    /// call.
    pub fn take_frame(&mut self, now: u64) -> Option<CompressedImage> {
        let frame = self.rx.take();
        if frame.is_some() {
            self.rate.record();
            let _ = self.state.compare_exchange(
                SessionState::FrameReady as u8,
                SessionState::Idle as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }
        self.rate.sample(now);
        frame
    }

    /// Emitted frames per second over the last complete window.
    #[inline]
    pub fn fps(&self) -> f32 {
        self.rate.fps()
    }
}

/// Frame-rate telemetry: counts emitted frames, sampled and reset once per
/// second of the injected clock.
#[derive(Debug, Default, Clone)]
pub struct FrameRate {
    count: u32,
    window_start: Option<u64>,
    fps: f32,
}

impl FrameRate {
    #[inline]
    pub fn record(&mut self) {
        self.count += 1;
    }

    /// Close the window if a second has elapsed since it opened.
    pub fn sample(&mut self, now: u64) {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return;
        };
        let elapsed = now.saturating_sub(start);
        if elapsed >= NANOS_PER_SEC {
            self.fps = self.count as f32 * NANOS_PER_SEC as f32 / elapsed as f32;
            self.count = 0;
            self.window_start = Some(now);
        }
    }

    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }
}

/// Control handle for one image-compressing sensor.
pub struct ImageCompressor {
    config: CompressionConfig,
    output: Arc<SlotWriter<CompressedImage>>,
    state: Arc<AtomicU8>,
    counters: Arc<Counters>,
    session: Option<Arc<Session>>,
    worker: Option<JoinHandle<()>>,
}

impl ImageCompressor {
    /// Create a disabled compressor and the consumer half of its output.
    pub fn new(config: CompressionConfig) -> Result<(Self, CompressedFrames)> {
        config.validate()?;
        let (tx, rx) = freshest_slot();
        let state = Arc::new(AtomicU8::new(SessionState::Idle as u8));
        let frames = CompressedFrames {
            rx,
            state: state.clone(),
            rate: FrameRate::default(),
        };
        Ok((
            Self {
                config,
                output: Arc::new(tx),
                state,
                counters: Arc::new(Counters::default()),
                session: None,
                worker: None,
            },
            frames,
        ))
    }

    #[inline]
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.session.is_some()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> CompressorStats {
        CompressorStats {
            compressed: self.counters.compressed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            raw_dropped: self.counters.raw_dropped.load(Ordering::Relaxed),
            output_dropped: self.counters.output_dropped.load(Ordering::Relaxed),
            teardowns: self.counters.teardowns.load(Ordering::Acquire),
        }
    }

    /// Start the worker thread. Enabling twice is a no-op.
    pub fn enable(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let (raw_tx, raw_rx) = freshest_slot();
        let session = Arc::new(Session {
            config: self.config.clone(),
            raw_tx,
            raw_rx,
            output: self.output.clone(),
            state: self.state.clone(),
            counters: self.counters.clone(),
            pool: Mutex::new(Some(Vec::with_capacity(STAGING_POOL_LIMIT))),
            disposing: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        });

        let worker_session = session.clone();
        let worker = thread::Builder::new()
            .name("image_compressor".to_owned())
            .spawn(move || run_worker(worker_session))?;

        debug!(
            width = self.config.width,
            height = self.config.height,
            codec = self.config.codec.format(),
            "image compressor enabled"
        );
        session.set_state(SessionState::Idle);
        self.session = Some(session);
        self.worker = Some(worker);
        Ok(())
    }

    /// Begin a readback for a capture at `timestamp`.
    ///
    /// Returns `None` while disabled. Never blocks.
    pub fn begin_readback(&self, timestamp: u64) -> Option<Readback> {
        let session = self.session.as_ref()?;
        session.in_flight.fetch_add(1, Ordering::SeqCst);
        if session.disposing.load(Ordering::SeqCst) {
            session.readback_finished();
            return None;
        }

        let buffer = session.staging_buffer();
        session.set_state(SessionState::ReadbackPending);
        Some(Readback {
            session: session.clone(),
            buffer: Some(buffer),
            timestamp,
        })
    }

    /// Stop the worker and release staging buffers.
    ///
    /// Safe to call while readbacks are in flight, in which case the final
    /// release happens when the last of them finishes. Calling it on a
    /// compressor that was never enabled does nothing.
    pub fn disable(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.disposing.store(true, Ordering::SeqCst);
        session.raw_tx.close();

        if let Some(worker) = self.worker.take() {
            let deadline = Instant::now() + self.config.join_timeout;
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if worker.is_finished() {
                if worker.join().is_err() {
                    error!("image compressor worker panicked");
                }
            } else {
                warn!(
                    timeout_ms = self.config.join_timeout.as_millis() as u64,
                    "image compressor worker did not stop in time, detaching"
                );
            }
        }

        let in_flight = session.in_flight.load(Ordering::SeqCst);
        if in_flight == 0 {
            session.teardown();
        } else {
            debug!(in_flight, "deferring staging buffer release");
        }
        session.set_state(SessionState::Idle);
    }
}

impl Drop for ImageCompressor {
    fn drop(&mut self) {
        self.disable();
    }
}
