// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Depth camera decoding and projection.
//!
//! The renderer produces a single-channel buffer of normalized inverse
//! distance (`0` at the far plane, `1` at the near plane) in bottom-up row
//! order. [`DepthDecoder`] converts it into a top-down metric image:
//!
//! ```text
//!   depth_m = (1 - normalized) * far
//!
//!   Float32Meters      32FC1   f32 meters          4 B/px
//!   UInt16Millimeters  16UC1   round(depth_m*1000) 2 B/px, clamped [0, 65535]
//!
//!   output row y  <-  input row (height - 1 - y)
//! ```
//!
//! [`DepthProjector`] turns unflipped metric depths into samples along
//! per-pixel rays, and [`DepthCamera`] ties both to freshest-wins slots.

use crate::{
    buffer::SampleBuffer,
    formats::{PARALLEL_THRESHOLD, PointCloud, PointCloudEncoder},
    sensor::{Error, Result},
    slot::{SlotReader, SlotWriter, freshest_slot},
};
use clap::ValueEnum;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use tracing::{debug, instrument};

/// Output representation of decoded depth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum DepthMode {
    /// 32-bit float meters (`32FC1`)
    #[default]
    #[value(name = "meters")]
    Float32Meters,
    /// 16-bit unsigned millimeters (`16UC1`)
    #[value(name = "millimeters")]
    UInt16Millimeters,
}

impl DepthMode {
    /// Image encoding string carried by the wire message.
    pub const fn encoding(self) -> &'static str {
        match self {
            DepthMode::Float32Meters => "32FC1",
            DepthMode::UInt16Millimeters => "16UC1",
        }
    }

    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            DepthMode::Float32Meters => 4,
            DepthMode::UInt16Millimeters => 2,
        }
    }
}

/// Pixel format of the raw normalized depth buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum DepthFormat {
    /// 8-bit unsigned normalized
    #[value(name = "r8")]
    R8Unorm,
    /// 16-bit unsigned normalized, little-endian
    #[default]
    #[value(name = "r16")]
    R16Unorm,
    /// 32-bit float, little-endian
    #[value(name = "r32f")]
    R32Float,
}

impl DepthFormat {
    pub const fn channel_size(self) -> usize {
        match self {
            DepthFormat::R8Unorm => 1,
            DepthFormat::R16Unorm => 2,
            DepthFormat::R32Float => 4,
        }
    }

    /// Write normalized depth `norm` into one pixel of this format.
    #[inline]
    pub fn write_normalized(self, norm: f32, px: &mut [u8]) {
        let norm = norm.clamp(0.0, 1.0);
        match self {
            DepthFormat::R8Unorm => px[0] = (norm * 255.0).round() as u8,
            DepthFormat::R16Unorm => {
                px.copy_from_slice(&((norm * 65535.0).round() as u16).to_le_bytes())
            }
            DepthFormat::R32Float => px.copy_from_slice(&norm.to_le_bytes()),
        }
    }

    /// Normalized value of pixel `index`.
    #[inline]
    fn normalized(self, raw: &[u8], index: usize) -> f32 {
        match self {
            DepthFormat::R8Unorm => raw[index] as f32 * (1.0 / 255.0),
            DepthFormat::R16Unorm => {
                let at = index * 2;
                u16::from_le_bytes([raw[at], raw[at + 1]]) as f32 * (1.0 / 65535.0)
            }
            DepthFormat::R32Float => {
                let at = index * 4;
                f32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
            }
        }
    }
}

/// Decoded depth image ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    pub width: u32,
    pub height: u32,
    /// `32FC1` or `16UC1`
    pub encoding: &'static str,
    /// Always false.
    pub is_bigendian: bool,
    /// Bytes per output row.
    pub step: u32,
    pub data: Vec<u8>,
    /// Capture time of the raw buffer, nanoseconds.
    pub timestamp: u64,
}

/// Convert one metric depth into millimeters, clamped to the u16 range.
#[inline]
pub fn meters_to_millimeters(depth_m: f32) -> u16 {
    // `as` saturates and maps NaN to 0
    (depth_m * 1000.0).round().clamp(0.0, u16::MAX as f32) as u16
}

/// Decode a normalized depth buffer into wire bytes.
///
/// # Errors
///
/// [`Error::SizeMismatch`] if `raw.len() != width * height * channel_size`.
pub fn decode(
    raw: &[u8],
    width: u32,
    height: u32,
    far_clip: f32,
    format: DepthFormat,
    mode: DepthMode,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DepthDecoder::new(width, height, far_clip, format, mode).decode_into(raw, &mut out)?;
    Ok(out)
}

/// Reusable decoder for one depth camera configuration.
#[derive(Debug, Clone, Copy)]
pub struct DepthDecoder {
    width: u32,
    height: u32,
    far_clip: f32,
    format: DepthFormat,
    mode: DepthMode,
}

impl DepthDecoder {
    pub fn new(width: u32, height: u32, far_clip: f32, format: DepthFormat, mode: DepthMode) -> Self {
        Self {
            width,
            height,
            far_clip,
            format,
            mode,
        }
    }

    #[inline]
    pub fn mode(&self) -> DepthMode {
        self.mode
    }

    /// Raw buffer length this decoder accepts.
    #[inline]
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.channel_size()
    }

    fn check(&self, raw: &[u8]) -> Result<()> {
        let expected = self.expected_len();
        if raw.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: raw.len(),
            });
        }
        Ok(())
    }

    #[inline]
    fn meters(&self, raw: &[u8], index: usize) -> f32 {
        (1.0 - self.format.normalized(raw, index)) * self.far_clip
    }

    /// Decode `raw` into `out`, flipping rows, reusing `out`'s allocation.
    #[instrument(skip_all, fields(width = self.width, height = self.height))]
    pub fn decode_into(&self, raw: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.check(raw)?;

        let (w, h) = (self.width as usize, self.height as usize);
        let bpp = self.mode.bytes_per_pixel();
        out.clear();
        out.resize(w * h * bpp, 0);
        if w == 0 || h == 0 {
            return Ok(());
        }

        let write_row = |(y, dst): (usize, &mut [u8])| {
            let src_row = (h - 1 - y) * w;
            for (x, px) in dst.chunks_exact_mut(bpp).enumerate() {
                let depth = self.meters(raw, src_row + x);
                match self.mode {
                    DepthMode::Float32Meters => px.copy_from_slice(&depth.to_le_bytes()),
                    DepthMode::UInt16Millimeters => {
                        px.copy_from_slice(&meters_to_millimeters(depth).to_le_bytes())
                    }
                }
            }
        };

        if w * h >= PARALLEL_THRESHOLD {
            out.par_chunks_exact_mut(w * bpp).enumerate().for_each(write_row);
        } else {
            out.chunks_exact_mut(w * bpp).enumerate().for_each(write_row);
        }
        Ok(())
    }

    /// Decode `raw` captured at `timestamp` into a [`DepthImage`].
    pub fn decode(&self, raw: &[u8], timestamp: u64) -> Result<DepthImage> {
        let mut data = Vec::new();
        self.decode_into(raw, &mut data)?;
        Ok(DepthImage {
            width: self.width,
            height: self.height,
            encoding: self.mode.encoding(),
            is_bigendian: false,
            step: self.width * self.mode.bytes_per_pixel() as u32,
            data,
            timestamp,
        })
    }

    /// Metric depth per pixel in the raw (bottom-up) row order.
    pub fn depth_meters_into(&self, raw: &[u8], out: &mut Vec<f32>) -> Result<()> {
        self.check(raw)?;
        let n = self.width as usize * self.height as usize;
        out.clear();
        out.extend((0..n).map(|i| self.meters(raw, i)));
        Ok(())
    }
}

/// Projects metric depth along per-pixel rays.
#[derive(Debug)]
pub struct DepthProjector {
    directions: Vec<[f32; 3]>,
    near: f32,
    far: f32,
    noise: Option<Normal<f32>>,
    rng: StdRng,
}

impl DepthProjector {
    /// Unit rays for a `width x height` image with vertical field of view
    /// `vfov_deg`, in bottom-up row order.
    pub fn new(width: u32, height: u32, vfov_deg: f32, near: f32, far: f32) -> Self {
        let z = height as f32 * 0.5 / (vfov_deg * 0.5).to_radians().tan();
        let (cx, cy) = ((width / 2) as f32, (height / 2) as f32);
        let mut directions = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let v = [x as f32 - cx, y as f32 - cy, z];
                let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
                directions.push([v[0] / n, v[1] / n, v[2] / n]);
            }
        }

        Self {
            directions,
            near,
            far,
            noise: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Add zero-mean Gaussian range noise.
    pub fn with_noise(mut self, sigma: f32, seed: Option<u64>) -> Result<Self> {
        if sigma > 0.0 {
            self.noise = Some(Normal::new(0.0, sigma).map_err(|e| Error::Config(e.to_string()))?);
        }
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        Ok(self)
    }

    #[inline]
    pub fn directions(&self) -> &[[f32; 3]] {
        &self.directions
    }

    /// Fill `out` with one sample per pixel.
    ///
    /// Depths that are non-finite or outside `(near, far)` produce a NaN
    /// position.
    pub fn project_into(&mut self, depths: &[f32], out: &mut SampleBuffer) {
        out.clear();
        out.reserve_exact(self.directions.len());
        for (dir, &depth) in self.directions.iter().zip(depths) {
            let d = match &self.noise {
                Some(noise) => depth + noise.sample(&mut self.rng),
                None => depth,
            };
            if d.is_finite() && d > self.near && d < self.far {
                out.push(dir[0] * d, dir[1] * d, dir[2] * d, 0.0);
            } else {
                out.push(f32::NAN, f32::NAN, f32::NAN, 0.0);
            }
        }
    }
}

/// Depth camera settings.
#[derive(Debug, Clone)]
pub struct DepthCameraConfig {
    pub width: u32,
    pub height: u32,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub format: DepthFormat,
    pub mode: DepthMode,
    /// Also produce a point cloud.
    pub points: bool,
    pub drop_invalid: bool,
    pub noise_sigma: f32,
    pub seed: Option<u64>,
}

impl Default for DepthCameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fov: 60.0,
            near: 0.05,
            far: 100.0,
            format: DepthFormat::R16Unorm,
            mode: DepthMode::UInt16Millimeters,
            points: false,
            drop_invalid: false,
            noise_sigma: 0.0,
            seed: None,
        }
    }
}

struct DepthPoints {
    projector: DepthProjector,
    encoder: PointCloudEncoder,
    depths: Vec<f32>,
    samples: SampleBuffer,
    tx: SlotWriter<PointCloud>,
}

/// Consumer halves returned by [`DepthCamera::new`].
pub struct DepthOutputs {
    pub image: SlotReader<DepthImage>,
    pub points: Option<SlotReader<PointCloud>>,
}

/// Depth camera producer.
///
/// Decoding runs on the thread that delivers the readback; results go into
/// freshest-wins slots.
pub struct DepthCamera {
    decoder: DepthDecoder,
    image_tx: SlotWriter<DepthImage>,
    points: Option<DepthPoints>,
}

impl DepthCamera {
    pub fn new(config: &DepthCameraConfig) -> Result<(Self, DepthOutputs)> {
        if config.width == 0 || config.height == 0 {
            return Err(Error::Config("depth camera resolution must be non-zero".to_owned()));
        }
        if !(config.far > config.near && config.near >= 0.0) {
            return Err(Error::Config(format!(
                "depth camera range invalid: near {} far {}",
                config.near, config.far
            )));
        }

        let decoder = DepthDecoder::new(
            config.width,
            config.height,
            config.far,
            config.format,
            config.mode,
        );
        let (image_tx, image_rx) = freshest_slot();

        let (points, points_rx) = if config.points {
            let projector = DepthProjector::new(
                config.width,
                config.height,
                config.fov,
                config.near,
                config.far,
            )
            .with_noise(config.noise_sigma, config.seed)?;
            let mut encoder = PointCloudEncoder::new(false, config.drop_invalid);
            if !config.drop_invalid {
                encoder = encoder.with_organized(config.width, config.height);
            }
            let (tx, rx) = freshest_slot();
            let points = DepthPoints {
                projector,
                encoder,
                depths: Vec::new(),
                samples: SampleBuffer::with_capacity((config.width * config.height) as usize),
                tx,
            };
            (Some(points), Some(rx))
        } else {
            (None, None)
        };

        debug!(
            width = config.width,
            height = config.height,
            encoding = config.mode.encoding(),
            points = config.points,
            "depth camera configured"
        );

        Ok((
            Self {
                decoder,
                image_tx,
                points,
            },
            DepthOutputs {
                image: image_rx,
                points: points_rx,
            },
        ))
    }

    #[inline]
    pub fn expected_len(&self) -> usize {
        self.decoder.expected_len()
    }

    /// Handle a completed readback of `raw` captured at `timestamp`.
    pub fn on_readback(&mut self, raw: &[u8], timestamp: u64) -> Result<()> {
        let image = self.decoder.decode(raw, timestamp)?;
        self.image_tx.publish(image);

        if let Some(points) = &mut self.points {
            self.decoder.depth_meters_into(raw, &mut points.depths)?;
            points
                .projector
                .project_into(&points.depths, &mut points.samples);
            let cloud = points.encoder.encode(&points.samples, timestamp)?;
            points.tx.publish(cloud);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn r32(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn f32_at(data: &[u8], i: usize) -> f32 {
        f32::from_le_bytes([data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]])
    }

    fn u16_at(data: &[u8], i: usize) -> u16 {
        u16::from_le_bytes([data[i * 2], data[i * 2 + 1]])
    }

    #[test]
    fn test_half_depth_4x4() {
        let raw = r32(&[0.5; 16]);
        let meters = decode(&raw, 4, 4, 10.0, DepthFormat::R32Float, DepthMode::Float32Meters).unwrap();
        assert_eq!(meters.len(), 64);
        for i in 0..16 {
            assert_eq!(f32_at(&meters, i), 5.0);
        }

        let mm = decode(&raw, 4, 4, 10.0, DepthFormat::R32Float, DepthMode::UInt16Millimeters)
            .unwrap();
        assert_eq!(mm.len(), 32);
        for i in 0..16 {
            assert_eq!(u16_at(&mm, i), 5000);
        }
    }

    #[test]
    fn test_zero_is_far_plane() {
        for format in [DepthFormat::R8Unorm, DepthFormat::R16Unorm, DepthFormat::R32Float] {
            let raw = vec![0u8; 6 * 3 * format.channel_size()];
            let out = decode(&raw, 6, 3, 25.0, format, DepthMode::Float32Meters).unwrap();
            for i in 0..18 {
                assert_eq!(f32_at(&out, i), 25.0);
            }
        }
    }

    #[test]
    fn test_vertical_flip() {
        // Row r holds normalized value r/10, so far=10 gives depth 10-r
        let (w, h) = (3usize, 4usize);
        let mut values = Vec::new();
        for r in 0..h {
            values.extend(std::iter::repeat_n(r as f32 / 10.0, w));
        }
        let raw = r32(&values);
        let out = decode(&raw, w as u32, h as u32, 10.0, DepthFormat::R32Float, DepthMode::Float32Meters)
            .unwrap();

        for y in 0..h {
            let src = (h - 1 - y) as f32;
            for x in 0..w {
                assert_relative_eq!(f32_at(&out, y * w + x), 10.0 - src, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_flip_distinct_pixels() {
        // 2x2 with unique values, 16-bit millimeters, far = 1 m
        let values = [0.1f32, 0.2, 0.3, 0.4];
        let out = decode(
            &r32(&values),
            2,
            2,
            1.0,
            DepthFormat::R32Float,
            DepthMode::UInt16Millimeters,
        )
        .unwrap();
        let got: Vec<u16> = (0..4).map(|i| u16_at(&out, i)).collect();
        assert_eq!(got, vec![700, 600, 900, 800]);
    }

    #[test]
    fn test_millimeter_clamp() {
        // Negative normalized values push depth beyond 65.535 m
        let raw = r32(&[-10.0, 2.0, f32::NAN, 0.0]);
        let out = decode(&raw, 4, 1, 100.0, DepthFormat::R32Float, DepthMode::UInt16Millimeters)
            .unwrap();
        assert_eq!(u16_at(&out, 0), 65535);
        assert_eq!(u16_at(&out, 1), 0);
        assert_eq!(u16_at(&out, 2), 0);
        assert_eq!(u16_at(&out, 3), 65535);
        assert_eq!(meters_to_millimeters(1.2345), 1235);
    }

    #[test]
    fn test_r16_unorm() {
        let raw: Vec<u8> = [65535u16, 0, 32768, 16384]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let out = decode(&raw, 4, 1, 10.0, DepthFormat::R16Unorm, DepthMode::Float32Meters).unwrap();
        assert_relative_eq!(f32_at(&out, 0), 0.0, epsilon = 1e-5);
        assert_relative_eq!(f32_at(&out, 1), 10.0);
        assert_relative_eq!(f32_at(&out, 2), 10.0 * (1.0 - 32768.0 / 65535.0), epsilon = 1e-5);
    }

    #[test]
    fn test_write_normalized_decodes_back() {
        for format in [
            DepthFormat::R8Unorm,
            DepthFormat::R16Unorm,
            DepthFormat::R32Float,
        ] {
            let mut raw = vec![0u8; format.channel_size()];
            format.write_normalized(0.25, &mut raw);
            let out = decode(&raw, 1, 1, 8.0, format, DepthMode::Float32Meters).unwrap();
            assert_relative_eq!(f32_at(&out, 0), 6.0, epsilon = 0.02);

            format.write_normalized(2.0, &mut raw);
            let out = decode(&raw, 1, 1, 8.0, format, DepthMode::Float32Meters).unwrap();
            assert_relative_eq!(f32_at(&out, 0), 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_size_mismatch() {
        let raw = vec![0u8; 10];
        let err = decode(&raw, 4, 4, 10.0, DepthFormat::R8Unorm, DepthMode::Float32Meters)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                expected: 16,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_large_image_parallel_path() {
        let (w, h) = (256u32, 128u32);
        let mut raw = Vec::with_capacity((w * h * 2) as usize);
        for y in 0..h {
            for _ in 0..w {
                raw.extend_from_slice(&((y * 100) as u16).to_le_bytes());
            }
        }
        let dec = DepthDecoder::new(w, h, 50.0, DepthFormat::R16Unorm, DepthMode::UInt16Millimeters);
        let img = dec.decode(&raw, 7).unwrap();
        assert_eq!(img.step, w * 2);
        assert_eq!(img.encoding, "16UC1");
        assert_eq!(img.timestamp, 7);
        // top output row comes from the last input row
        let normalized = ((h - 1) * 100) as f32 * (1.0 / 65535.0);
        let expected = meters_to_millimeters((1.0 - normalized) * 50.0);
        assert_eq!(u16_at(&img.data, 0), expected);
    }

    #[test]
    fn test_projector_center_ray() {
        let mut proj = DepthProjector::new(4, 4, 90.0, 0.1, 10.0);
        // pixel (2, 2) is the optical axis
        let center = proj.directions()[2 * 4 + 2];
        assert_relative_eq!(center[2], 1.0);

        let mut depths = vec![5.0; 16];
        depths[0] = 20.0;
        depths[1] = f32::INFINITY;
        depths[2] = 0.05;
        let mut out = SampleBuffer::with_capacity(16);
        proj.project_into(&depths, &mut out);
        assert_eq!(out.len(), 16);
        assert_eq!(out.valid_count(), 13);
        let s = out.get(10).unwrap();
        assert_relative_eq!(s.z, 5.0);
    }

    #[test]
    fn test_depth_camera_publishes_image_and_points() {
        let config = DepthCameraConfig {
            width: 4,
            height: 2,
            fov: 60.0,
            near: 0.1,
            far: 10.0,
            format: DepthFormat::R32Float,
            mode: DepthMode::Float32Meters,
            points: true,
            drop_invalid: true,
            ..Default::default()
        };
        let (mut cam, outputs) = DepthCamera::new(&config).unwrap();
        // normalized 1.0 is depth 0, outside (near, far)
        let mut values = vec![0.5f32; 8];
        values[3] = 1.0;
        cam.on_readback(&r32(&values), 99).unwrap();

        let img = outputs.image.take().unwrap();
        assert_eq!(img.timestamp, 99);
        assert_eq!(img.data.len(), 32);

        let points = outputs.points.unwrap();
        let cloud = points.take().unwrap();
        assert_eq!(cloud.timestamp, 99);
        assert_eq!(cloud.len(), 7);
        assert!(cloud.is_dense);

        assert!(matches!(
            cam.on_readback(&[0u8; 3], 100),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_depth_camera_rejects_bad_config() {
        let config = DepthCameraConfig {
            near: 5.0,
            far: 1.0,
            ..Default::default()
        };
        assert!(matches!(DepthCamera::new(&config), Err(Error::Config(_))));
    }
}
