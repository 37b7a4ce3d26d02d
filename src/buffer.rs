// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Zero-allocation sample buffer infrastructure.
//!
//! This module provides pre-allocated buffers for ranging-sensor samples so
//! that steady-state capture performs no per-sample heap allocation. The
//! [`DoubleBuffer`] type lets a producer fill one buffer while the encoder
//! reads the last completed one.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DoubleBuffer                            │
//! │  ┌──────────────────┐     ┌──────────────────┐              │
//! │  │   Buffer A       │     │   Buffer B       │              │
//! │  │  (filling)       │ ←→  │  (ready)         │              │
//! │  │   x: [f32]       │     │   x: [f32]       │              │
//! │  │   y: [f32]       │ swap│   y: [f32]       │              │
//! │  │   z: [f32]       │     │   z: [f32]       │              │
//! │  │   intensity:[f32]│     │   intensity:[f32]│              │
//! │  └──────────────────┘     └──────────────────┘              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use edgefirst_simpub::buffer::DoubleBuffer;
//!
//! let mut db = DoubleBuffer::new(1024);
//!
//! db.filling_mut().push(1.0, 2.0, 3.0, 128.0);
//! db.filling_mut().push(f32::NAN, f32::NAN, f32::NAN, 0.0);
//!
//! let completed = db.swap();
//! assert_eq!(completed.len(), 2);
//! assert_eq!(completed.valid_count(), 1);
//! assert_eq!(db.filling().len(), 0);
//! ```

/// One ranging sample: a position plus a scalar attribute.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

impl Sample {
    pub const fn new(x: f32, y: f32, z: f32, intensity: f32) -> Self {
        Self { x, y, z, intensity }
    }

    /// Marker for "no return": NaN position.
    pub const fn invalid() -> Self {
        Self::new(f32::NAN, f32::NAN, f32::NAN, 0.0)
    }

    #[inline]
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// A sample is valid unless any component is NaN or the position is the
    /// zero vector.
    #[inline]
    pub fn is_valid(&self) -> bool {
        is_valid_position(self.x, self.y, self.z)
    }
}

/// Validity rule shared by buffers and encoders.
#[inline]
pub fn is_valid_position(x: f32, y: f32, z: f32) -> bool {
    !(x.is_nan() || y.is_nan() || z.is_nan()) && !(x == 0.0 && y == 0.0 && z == 0.0)
}

/// Pre-allocated sample buffer.
///
/// Stores samples in a structure-of-arrays layout so the packing loops in
/// [`crate::formats`] stream through contiguous coordinates.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    x: Vec<f32>,
    y: Vec<f32>,
    z: Vec<f32>,
    intensity: Vec<f32>,
    len: usize,
}

impl SampleBuffer {
    /// Create a new buffer with the specified capacity.
    ///
    /// Memory is allocated once at construction; no allocations occur during
    /// normal operation (push/clear).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: vec![0.0; capacity],
            y: vec![0.0; capacity],
            z: vec![0.0; capacity],
            intensity: vec![0.0; capacity],
            len: 0,
        }
    }

    /// Build a buffer holding exactly `samples`.
    pub fn from_samples(samples: &[Sample]) -> Self {
        let mut buf = Self::with_capacity(samples.len());
        for s in samples {
            buf.push(s.x, s.y, s.z, s.intensity);
        }
        buf
    }

    /// Returns the number of valid entries in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the maximum capacity of the buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.x.len()
    }

    /// Reset length to zero, keeping the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Grow the buffer so it can hold at least `capacity` samples.
    ///
    /// Only allocates when the sensor configuration changes.
    pub fn reserve_exact(&mut self, capacity: usize) {
        if capacity > self.capacity() {
            self.x.resize(capacity, 0.0);
            self.y.resize(capacity, 0.0);
            self.z.resize(capacity, 0.0);
            self.intensity.resize(capacity, 0.0);
        }
    }

    /// Append a sample.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if the buffer is full. In release mode,
    /// samples beyond capacity are silently ignored.
    #[inline]
    pub fn push(&mut self, x: f32, y: f32, z: f32, intensity: f32) {
        debug_assert!(
            self.len < self.capacity(),
            "SampleBuffer overflow: {} >= {}",
            self.len,
            self.capacity()
        );

        if self.len < self.capacity() {
            self.x[self.len] = x;
            self.y[self.len] = y;
            self.z[self.len] = z;
            self.intensity[self.len] = intensity;
            self.len += 1;
        }
    }

    #[inline]
    pub fn push_sample(&mut self, s: Sample) {
        self.push(s.x, s.y, s.z, s.intensity);
    }

    /// Sample at `index`, if within the valid length.
    #[inline]
    pub fn get(&self, index: usize) -> Option<Sample> {
        (index < self.len).then(|| {
            Sample::new(
                self.x[index],
                self.y[index],
                self.z[index],
                self.intensity[index],
            )
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.len).map(|i| Sample::new(self.x[i], self.y[i], self.z[i], self.intensity[i]))
    }

    #[inline]
    pub fn x(&self) -> &[f32] {
        &self.x[..self.len]
    }

    #[inline]
    pub fn y(&self) -> &[f32] {
        &self.y[..self.len]
    }

    #[inline]
    pub fn z(&self) -> &[f32] {
        &self.z[..self.len]
    }

    #[inline]
    pub fn intensity(&self) -> &[f32] {
        &self.intensity[..self.len]
    }

    /// Number of samples passing [`Sample::is_valid`].
    pub fn valid_count(&self) -> usize {
        (0..self.len)
            .filter(|&i| is_valid_position(self.x[i], self.y[i], self.z[i]))
            .count()
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// Double-buffer for zero-allocation frame swapping.
///
/// Maintains two [`SampleBuffer`]s: one being filled by the producer and one
/// holding the last complete capture. `swap()` exchanges them in O(1).
///
/// # Thread Safety
///
/// `DoubleBuffer` is not thread-safe. It is owned by a single producer; the
/// cross-thread handoff of encoded frames goes through [`crate::slot`].
#[derive(Debug)]
pub struct DoubleBuffer {
    buffers: [SampleBuffer; 2],
    filling_idx: usize,
}

impl DoubleBuffer {
    /// Allocates two buffers, each capable of holding `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: [
                SampleBuffer::with_capacity(capacity),
                SampleBuffer::with_capacity(capacity),
            ],
            filling_idx: 0,
        }
    }

    #[inline]
    pub fn filling(&self) -> &SampleBuffer {
        &self.buffers[self.filling_idx]
    }

    #[inline]
    pub fn filling_mut(&mut self) -> &mut SampleBuffer {
        &mut self.buffers[self.filling_idx]
    }

    /// Returns the buffer holding the last completed capture.
    ///
    /// Before any `swap()` call, this returns an empty buffer.
    #[inline]
    pub fn ready(&self) -> &SampleBuffer {
        &self.buffers[1 - self.filling_idx]
    }

    /// Swap buffers and return the newly completed buffer.
    ///
    /// The new filling buffer is cleared for the next capture.
    #[inline]
    pub fn swap(&mut self) -> &SampleBuffer {
        self.filling_idx = 1 - self.filling_idx;
        self.buffers[self.filling_idx].clear();
        &self.buffers[1 - self.filling_idx]
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffers[0].capacity()
    }
}

impl Default for DoubleBuffer {
    fn default() -> Self {
        Self::new(0)
    }
}
