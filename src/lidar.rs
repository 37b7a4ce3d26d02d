// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Raycast LiDAR producer.
//!
//! Each capture casts the next `points_per_scan` directions of the scan
//! pattern (wrapping around the revolution) through an external
//! [`RayCaster`], fills the double buffer, encodes the completed buffer and
//! publishes it into a freshest-wins slot with the capture timestamp.
//!
//! ```text
//! ┌─────────────┐   cast    ┌────────────────┐  swap  ┌──────────────────┐ publish ┌──────┐
//! │ ScanPattern │ ────────► │ DoubleBuffer   │ ─────► │ PointCloudEncoder│ ──────► │ slot │
//! │ (cursor)    │ RayCaster │ (filling)      │        │ (ready buffer)   │         └──────┘
//! └─────────────┘           └────────────────┘        └──────────────────┘
//! ```

use crate::{
    buffer::DoubleBuffer,
    formats::{PointCloud, PointCloudEncoder},
    frames::Pose,
    scan_pattern::ScanPattern,
    sensor::{Error, Result},
    slot::{SlotReader, SlotWriter, freshest_slot},
};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Result of a single ray query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Distance from the ray origin in meters.
    pub distance: f32,
    /// Surface reflectance in `[0, 1]`.
    pub reflectance: f32,
}

/// Ray queries against the simulated world.
///
/// Implemented by the physics engine glue, or by
/// [`crate::scene::SyntheticScene`] when running standalone.
pub trait RayCaster: Send + Sync {
    /// Cast a ray from `origin` along the unit vector `direction`, both in
    /// the engine world frame. Returns the nearest hit within
    /// `max_distance`.
    fn cast(&self, origin: [f32; 3], direction: [f32; 3], max_distance: f32) -> Option<RayHit>;
}

/// Raycast LiDAR settings.
#[derive(Debug, Clone)]
pub struct LidarConfig {
    /// Rays cast per capture, clamped to the pattern length.
    pub points_per_scan: usize,
    pub min_range: f32,
    pub max_range: f32,
    /// Standard deviation of range noise in meters, 0 disables.
    pub noise_sigma: f32,
    /// Intensity reported for a fully reflective surface.
    pub max_intensity: f32,
    pub include_intensity: bool,
    pub drop_invalid: bool,
    pub seed: Option<u64>,
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            points_per_scan: 10_000,
            min_range: 0.5,
            max_range: 100.0,
            noise_sigma: 0.0,
            max_intensity: 255.0,
            include_intensity: true,
            drop_invalid: true,
            seed: None,
        }
    }
}

/// Raycast LiDAR sensor.
pub struct RaycastLidar {
    pattern: Arc<ScanPattern>,
    config: LidarConfig,
    points_per_scan: usize,
    cursor: usize,
    buffers: DoubleBuffer,
    encoder: PointCloudEncoder,
    noise: Option<Normal<f32>>,
    rng: StdRng,
    tx: SlotWriter<PointCloud>,
}

impl RaycastLidar {
    /// Create the sensor and the consumer half of its output slot.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyPattern`] for a pattern without directions and
    /// [`Error::Config`] for an empty or inverted range interval.
    pub fn new(
        pattern: Arc<ScanPattern>,
        config: LidarConfig,
    ) -> Result<(Self, SlotReader<PointCloud>)> {
        if pattern.is_empty() {
            return Err(Error::EmptyPattern);
        }
        if !(config.max_range > config.min_range && config.min_range >= 0.0) {
            return Err(Error::Config(format!(
                "lidar range invalid: min {} max {}",
                config.min_range, config.max_range
            )));
        }
        let noise = if config.noise_sigma > 0.0 {
            Some(Normal::new(0.0, config.noise_sigma).map_err(|e| Error::Config(e.to_string()))?)
        } else {
            None
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let points_per_scan = config.points_per_scan.clamp(1, pattern.len());
        let encoder = PointCloudEncoder::new(config.include_intensity, config.drop_invalid);
        let (tx, rx) = freshest_slot();

        debug!(
            directions = pattern.len(),
            points_per_scan, "raycast lidar configured"
        );

        Ok((
            Self {
                pattern,
                config,
                points_per_scan,
                cursor: 0,
                buffers: DoubleBuffer::new(points_per_scan),
                encoder,
                noise,
                rng,
                tx,
            },
            rx,
        ))
    }

    #[inline]
    pub fn points_per_scan(&self) -> usize {
        self.points_per_scan
    }

    #[inline]
    pub fn pattern(&self) -> &Arc<ScanPattern> {
        &self.pattern
    }

    /// Index of the pattern direction the next capture starts at.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Cast one scan from `pose` and publish it stamped with `timestamp`.
    ///
    /// Hits inside `[min_range, max_range]` produce `direction * distance`
    /// in the sensor frame; misses produce the zero vector.
    #[instrument(skip_all, fields(timestamp))]
    pub fn capture(&mut self, caster: &dyn RayCaster, pose: &Pose, timestamp: u64) -> Result<()> {
        let directions = self.pattern.directions();
        let origin = pose.origin();
        let LidarConfig {
            min_range,
            max_range,
            max_intensity,
            ..
        } = self.config;

        let filling = self.buffers.filling_mut();
        filling.clear();
        for k in 0..self.points_per_scan {
            let dir = directions[(self.cursor + k) % directions.len()];
            let hit = caster.cast(origin, pose.world_direction(dir), max_range);
            let sample = hit.and_then(|hit| {
                let d = match &self.noise {
                    Some(noise) => hit.distance + noise.sample(&mut self.rng),
                    None => hit.distance,
                };
                (d >= min_range && d <= max_range).then(|| {
                    (
                        [dir[0] * d, dir[1] * d, dir[2] * d],
                        hit.reflectance * max_intensity,
                    )
                })
            });
            match sample {
                Some((p, intensity)) => filling.push(p[0], p[1], p[2], intensity),
                None => filling.push(0.0, 0.0, 0.0, 0.0),
            }
        }
        self.cursor = (self.cursor + self.points_per_scan) % directions.len();

        let ready = self.buffers.swap();
        let cloud = self.encoder.encode(ready, timestamp)?;
        self.tx.publish(cloud);
        Ok(())
    }
}
