// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pinhole camera intrinsics.

use crate::{scheduler::FrameSource, wire::WireMessage};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const PLUMB_BOB: &str = "plumb_bob";

/// How a physical sensor gate is fitted to the output resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateFit {
    #[default]
    Vertical,
    Horizontal,
    Fill,
    Overscan,
    None,
}

/// Physical sensor dimensions, any consistent unit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicalCamera {
    pub sensor_width: f64,
    pub sensor_height: f64,
    pub gate_fit: GateFit,
}

/// Effective vertical field of view in degrees for a `width × height`
/// output of a camera whose nominal vertical FOV is `fov_deg`.
///
/// Without physical properties the nominal FOV is returned unchanged.
pub fn vertical_fov(
    fov_deg: f64,
    width: u32,
    height: u32,
    physical: Option<&PhysicalCamera>,
) -> f64 {
    let Some(physical) = physical else {
        return fov_deg;
    };
    let sensor_ratio = physical.sensor_height / physical.sensor_width;
    let pixel_ratio = height as f64 / width as f64;
    let multiplier = pixel_ratio / sensor_ratio;

    let horizontal = match physical.gate_fit {
        GateFit::Vertical | GateFit::None => false,
        GateFit::Horizontal => true,
        GateFit::Fill => multiplier < 1.0,
        GateFit::Overscan => multiplier > 1.0,
    };
    if horizontal {
        fov_deg * multiplier
    } else {
        fov_deg
    }
}

/// Calibration message for an ideal pinhole camera.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraInfo {
    pub width: u32,
    pub height: u32,
    pub distortion_model: &'static str,
    pub d: Vec<f64>,
    pub k: [f64; 9],
    pub r: [f64; 9],
    pub p: [f64; 12],
    pub timestamp: u64,
}

impl CameraInfo {
    /// Intrinsics for a centred pinhole with vertical field of view
    /// `vfov_deg`. A non-zero `baseline` in meters describes the second
    /// camera of a stereo pair.
    pub fn pinhole(width: u32, height: u32, vfov_deg: f64, baseline: f64, timestamp: u64) -> Self {
        let cx = width as f64 / 2.0;
        let cy = height as f64 / 2.0;
        let f = (height as f64 / 2.0) / (vfov_deg.to_radians() / 2.0).tan();
        let tx = -f * baseline;

        #[rustfmt::skip]
        let k = [
            f, 0.0, cx,
            0.0, f, cy,
            0.0, 0.0, 1.0,
        ];
        #[rustfmt::skip]
        let r = [
            1.0, 0.0, 0.0,
            0.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
        ];
        #[rustfmt::skip]
        let p = [
            f, 0.0, cx, tx,
            0.0, f, cy, 0.0,
            0.0, 0.0, 1.0, 0.0,
        ];

        Self {
            width,
            height,
            distortion_model: PLUMB_BOB,
            d: vec![0.0; 5],
            k,
            r,
            p,
            timestamp,
        }
    }

    #[inline]
    pub fn focal_length(&self) -> f64 {
        self.k[0]
    }
}

/// Periodic camera info for a fixed camera, stamped at emit time.
pub struct CameraInfoSource {
    width: u32,
    height: u32,
    vfov_deg: f64,
    baseline: f64,
}

impl CameraInfoSource {
    pub fn new(
        width: u32,
        height: u32,
        fov_deg: f64,
        baseline: f64,
        physical: Option<&PhysicalCamera>,
    ) -> Self {
        Self {
            width,
            height,
            vfov_deg: vertical_fov(fov_deg, width, height, physical),
            baseline,
        }
    }
}

impl FrameSource for CameraInfoSource {
    fn take_frame(&mut self, now: u64) -> Option<WireMessage> {
        Some(
            CameraInfo::pinhole(self.width, self.height, self.vfov_deg, self.baseline, now).into(),
        )
    }
}
