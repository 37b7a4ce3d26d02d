// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common sensor types, error handling and time sources.
//!
//! This module provides the sensor-agnostic pieces shared by every producer
//! and encoder in the crate: the crate-wide [`Error`] type, the
//! [`SensorType`] used for CLI dispatch and logging, and the [`Clock`]
//! abstraction through which the externally driven tick injects time.

use clap::ValueEnum;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// Nanoseconds per second, the unit of every timestamp in this crate.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Result alias using the crate [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Common error type for capture, encoding and publishing.
///
/// Configuration errors (empty scan patterns, mismatched buffer sizes,
/// unsupported field types) are reported eagerly at setup or encode time.
/// Transient conditions such as "no frame captured yet" are never errors;
/// they are represented as `None` by the frame sources.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A scan pattern ended up with zero directions.
    #[error("scan pattern has no directions")]
    EmptyPattern,

    /// Downsample stride outside `[1, len]`.
    #[error("invalid stride {stride} for a pattern of {len} directions")]
    InvalidStride { stride: usize, len: usize },

    /// Raw buffer length does not match the declared dimensions.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Point field datatype outside the PointField enumeration.
    #[error("unsupported point field type: {0}")]
    UnsupportedFieldType(u8),

    /// Invalid sensor or encoder configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed scan pattern input.
    #[error("parse error: {0}")]
    Parse(String),

    /// I/O error (files, worker thread spawn).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Scan pattern JSON persistence error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Scan pattern CSV input error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// PNG encoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// JPEG encoding error.
    #[error("JPEG error: {0}")]
    Jpeg(#[from] jpeg_encoder::EncodingError),

    /// CDR serialization error.
    #[error("CDR error: {0}")]
    Cdr(#[from] edgefirst_schemas::serde_cdr::Error),
}

/// Simulated sensor kinds, used for CLI dispatch and log fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum SensorType {
    /// Raycast LiDAR producing PointCloud2
    Lidar,
    /// Depth camera producing 32FC1 / 16UC1 images
    Depth,
    /// Depth camera point cloud
    DepthPoints,
    /// Compressed colour camera
    Camera,
    /// Camera intrinsics
    CameraInfo,
    /// Inertial measurement unit
    Imu,
    /// Satellite navigation fix
    Gps,
    /// Single-beam range finder
    Range,
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SensorType::Lidar => write!(f, "lidar"),
            SensorType::Depth => write!(f, "depth"),
            SensorType::DepthPoints => write!(f, "depth_points"),
            SensorType::Camera => write!(f, "camera"),
            SensorType::CameraInfo => write!(f, "camera_info"),
            SensorType::Imu => write!(f, "imu"),
            SensorType::Gps => write!(f, "gps"),
            SensorType::Range => write!(f, "range"),
        }
    }
}

/// Source of "now" for the externally driven tick.
///
/// Schedulers and telemetry never read the wall clock directly so they can
/// be driven deterministically in tests.
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds.
    fn now(&self) -> u64;
}

/// Clock backed by [`timestamp`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        // clock_gettime only fails for an invalid clock id
        timestamp().unwrap_or_default()
    }
}

/// Manually advanced clock for tests and offline replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::Release);
    }

    /// Advance by `delta` nanoseconds and return the new time.
    pub fn advance(&self, delta: u64) -> u64 {
        self.now.fetch_add(delta, Ordering::AcqRel) + delta
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

/// Get current timestamp in nanoseconds.
///
/// On Linux, uses `CLOCK_MONOTONIC_RAW` for best accuracy.
/// On other platforms, falls back to `SystemTime`.
#[cfg(target_os = "linux")]
pub fn timestamp() -> Result<u64> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok(tp.tv_sec as u64 * NANOS_PER_SEC + tp.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn timestamp() -> Result<u64> {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| Error::Config(e.to_string()))?;
    Ok(duration.as_nanos() as u64)
}
