// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Single-value range finder built from a grid of rays.

use crate::{
    frames::Pose,
    lidar::RayCaster,
    sensor::{Error, Result},
    slot::{SlotReader, SlotWriter, freshest_slot},
};
use clap::ValueEnum;
use std::f32::consts::PI;
use tracing::trace;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
#[repr(u8)]
pub enum RadiationType {
    #[default]
    Ultrasound = 0,
    Infrared = 1,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RangeConfig {
    pub radiation_type: RadiationType,
    /// Full field of view in radians, both axes.
    pub field_of_view: f32,
    pub min_range: f32,
    pub max_range: f32,
    pub horizontal_resolution: usize,
    pub vertical_resolution: usize,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            radiation_type: RadiationType::Ultrasound,
            field_of_view: PI / 6.0,
            min_range: 0.1,
            max_range: 10.0,
            horizontal_resolution: 10,
            vertical_resolution: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeReading {
    pub radiation_type: RadiationType,
    pub field_of_view: f32,
    pub min_range: f32,
    pub max_range: f32,
    /// Nearest hit in meters, `+inf` when nothing was hit.
    pub range: f32,
    pub timestamp: u64,
}

/// Angles of an `n` sample sweep centred on zero.
fn sweep(fov: f32, n: usize) -> impl Iterator<Item = f32> {
    let step = if n > 1 { fov / (n - 1) as f32 } else { 0.0 };
    let start = if n > 1 { -fov / 2.0 } else { 0.0 };
    (0..n).map(move |i| start + step * i as f32)
}

/// Sensor-local ray for pitch `v` (positive down) and yaw `h`.
#[inline]
fn ray_direction(v: f32, h: f32) -> [f32; 3] {
    let (sv, cv) = v.sin_cos();
    let (sh, ch) = h.sin_cos();
    [cv * sh, -sv, cv * ch]
}

pub struct RangeSensor {
    config: RangeConfig,
    directions: Vec<[f32; 3]>,
    tx: SlotWriter<RangeReading>,
}

impl RangeSensor {
    pub fn new(config: RangeConfig) -> Result<(Self, SlotReader<RangeReading>)> {
        if !(config.field_of_view > 0.0 && config.field_of_view <= PI) {
            return Err(Error::Config(format!(
                "range field of view {} outside (0, pi]",
                config.field_of_view
            )));
        }
        if !(config.max_range > config.min_range && config.min_range >= 0.0) {
            return Err(Error::Config(format!(
                "range limits invalid: min {} max {}",
                config.min_range, config.max_range
            )));
        }
        if config.horizontal_resolution == 0 || config.vertical_resolution == 0 {
            return Err(Error::Config("range resolution must be positive".into()));
        }

        let directions = sweep(config.field_of_view, config.vertical_resolution)
            .flat_map(|v| {
                sweep(config.field_of_view, config.horizontal_resolution)
                    .map(move |h| ray_direction(v, h))
            })
            .collect();
        let (tx, rx) = freshest_slot();
        Ok((
            Self {
                config,
                directions,
                tx,
            },
            rx,
        ))
    }

    #[inline]
    pub fn ray_count(&self) -> usize {
        self.directions.len()
    }

    /// Cast the grid from `pose` and publish the nearest hit.
    pub fn measure(&mut self, caster: &dyn RayCaster, pose: &Pose, timestamp: u64) -> RangeReading {
        let RangeConfig {
            min_range,
            max_range,
            ..
        } = self.config;
        let origin = pose.origin();

        let range = self
            .directions
            .iter()
            .filter_map(|&local| {
                let dir = pose.world_direction(local);
                let start = [
                    origin[0] + dir[0] * min_range,
                    origin[1] + dir[1] * min_range,
                    origin[2] + dir[2] * min_range,
                ];
                caster
                    .cast(start, dir, max_range - min_range)
                    .map(|hit| hit.distance + min_range)
            })
            .fold(f32::INFINITY, f32::min);
        trace!(range, "range measured");

        let reading = RangeReading {
            radiation_type: self.config.radiation_type,
            field_of_view: self.config.field_of_view,
            min_range,
            max_range,
            range,
            timestamp,
        };
        self.tx.publish(reading);
        reading
    }
}
