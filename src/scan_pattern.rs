// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! LiDAR scan pattern tables.
//!
//! A [`ScanPattern`] is the ordered set of unit ray directions a raycast
//! LiDAR casts over one revolution, plus the angular bounds of that set.
//! Patterns are authored offline (parametric generator or CSV table),
//! persisted as JSON, and shared read-only between sensors behind an
//! [`Arc`].
//!
//! # Angle conventions
//!
//! Directions are in the engine frame (x right, y up, z forward).
//!
//! ```text
//!   azimuth φ = atan2(-x, -z)  mapped to [0, 360)
//!   zenith  θ = asin(y)        elevation, up positive
//!
//!   dir(φ, θ) = (-cosθ·sinφ, sinθ, -cosθ·cosφ)
//! ```
//!
//! so that [`azimuth`] and [`zenith`] recover the authored angles exactly.
//!
//! # Runtime derivation
//!
//! [`ScanPattern::build`] derives the runtime variant of a pattern by
//! stride downsampling and then azimuth windowing. Both steps preserve the
//! input order. A stride of one with a full-circle window returns the input
//! `Arc` itself.

use crate::sensor::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read},
    path::Path,
    sync::Arc,
};
use tracing::debug;

/// Tolerance in degrees for recognizing the `[0, 360]` window.
pub const FULL_CIRCLE_TOLERANCE: f32 = 1e-3;

/// Azimuth of a direction in degrees, in `[0, 360)`.
#[inline]
pub fn azimuth(dir: [f32; 3]) -> f32 {
    let deg = (-(dir[0] as f64)).atan2(-(dir[2] as f64)).to_degrees();
    let deg = deg.rem_euclid(360.0) as f32;
    // rem_euclid of a tiny negative rounds up to exactly 360 in f32
    if deg >= 360.0 { 0.0 } else { deg }
}

/// Elevation of a unit direction in degrees, in `[-90, 90]`.
#[inline]
pub fn zenith(dir: [f32; 3]) -> f32 {
    (dir[1] as f64).clamp(-1.0, 1.0).asin().to_degrees() as f32
}

/// Unit direction for an azimuth and elevation given in degrees.
pub fn direction_from_angles(azimuth_deg: f32, zenith_deg: f32) -> [f32; 3] {
    let (sp, cp) = (azimuth_deg as f64).to_radians().sin_cos();
    let (st, ct) = (zenith_deg as f64).to_radians().sin_cos();
    [(-ct * sp) as f32, st as f32, (-ct * cp) as f32]
}

/// Convert a downsample scale in `[0, 1)` into a direction stride.
///
/// A scale of 0 keeps every direction, 0.5 keeps every second one, 0.75
/// every fourth.
pub fn stride_for_downsample(scale: f32) -> Result<usize> {
    if !(0.0..1.0).contains(&scale) {
        return Err(Error::Config(format!(
            "downsample scale {scale} outside [0, 1)"
        )));
    }
    Ok(((1.0 / (1.0 - scale as f64)).floor() as usize).max(1))
}

/// Sweep direction of a generated pattern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum ScanDirection {
    /// Azimuth increases from `min_azimuth` towards `max_azimuth`.
    #[default]
    Cw,
    /// Azimuth decreases from just below `max_azimuth` to `min_azimuth`.
    Ccw,
}

/// Parameters for [`ScanPattern::generate`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    /// Elevation of each laser channel in degrees, emitted in this order
    /// for every azimuth step.
    pub zenith_angles: Vec<f32>,
    pub min_azimuth: f32,
    pub max_azimuth: f32,
    /// Number of azimuth steps per revolution.
    pub azimuth_resolution: usize,
    pub direction: ScanDirection,
}

impl Default for PatternSpec {
    fn default() -> Self {
        Self {
            zenith_angles: vec![-15.0, -7.5, 0.0, 7.5, 15.0],
            min_azimuth: 0.0,
            max_azimuth: 360.0,
            azimuth_resolution: 360,
            direction: ScanDirection::Cw,
        }
    }
}

/// Immutable table of ray directions with derived angular bounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanPattern {
    directions: Vec<[f32; 3]>,
    min_azimuth: f32,
    max_azimuth: f32,
    min_zenith: f32,
    max_zenith: f32,
}

impl ScanPattern {
    /// Create a pattern from directions, deriving its bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyPattern`] if `directions` is empty.
    pub fn new(directions: Vec<[f32; 3]>) -> Result<Self> {
        if directions.is_empty() {
            return Err(Error::EmptyPattern);
        }

        let mut pattern = Self {
            directions,
            min_azimuth: f32::MAX,
            max_azimuth: f32::MIN,
            min_zenith: f32::MAX,
            max_zenith: f32::MIN,
        };
        for &dir in &pattern.directions {
            let (az, ze) = (azimuth(dir), zenith(dir));
            pattern.min_azimuth = pattern.min_azimuth.min(az);
            pattern.max_azimuth = pattern.max_azimuth.max(az);
            pattern.min_zenith = pattern.min_zenith.min(ze);
            pattern.max_zenith = pattern.max_zenith.max(ze);
        }
        Ok(pattern)
    }

    /// Generate a pattern from a parametric description.
    ///
    /// For each azimuth step `i` the azimuth is
    /// `lerp(min, max, k / resolution)` with `k = i` for [`ScanDirection::Cw`]
    /// and `k = resolution - 1 - i` for [`ScanDirection::Ccw`]; every zenith
    /// angle is emitted for each azimuth. The authored azimuth range is kept
    /// as the pattern bounds.
    pub fn generate(spec: &PatternSpec) -> Result<Self> {
        if spec.zenith_angles.is_empty() || spec.azimuth_resolution == 0 {
            return Err(Error::EmptyPattern);
        }

        let n = spec.azimuth_resolution;
        let mut directions = Vec::with_capacity(n * spec.zenith_angles.len());
        for i in 0..n {
            let k = match spec.direction {
                ScanDirection::Cw => i,
                ScanDirection::Ccw => n - 1 - i,
            };
            let t = k as f32 / n as f32;
            let az = spec.min_azimuth + (spec.max_azimuth - spec.min_azimuth) * t;
            for &ze in &spec.zenith_angles {
                directions.push(direction_from_angles(az, ze));
            }
        }

        let mut pattern = Self::new(directions)?;
        pattern.min_azimuth = spec.min_azimuth;
        pattern.max_azimuth = spec.max_azimuth;
        Ok(pattern)
    }

    /// Read a pattern from CSV with a header row.
    ///
    /// The azimuth and zenith columns are the ones whose lowercase header
    /// contains `azimuth` and `zenith`; other columns are ignored. Tabular
    /// zenith values are measured downwards and shifted by
    /// `zenith_offset`, so the elevation of a row is
    /// `-(zenith - zenith_offset)`.
    pub fn from_csv<R: Read>(reader: R, zenith_offset: f32) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let mut azimuth_idx = None;
        let mut zenith_idx = None;
        for (i, header) in rdr.headers()?.iter().enumerate() {
            let header = header.to_lowercase();
            if header.contains("zenith") {
                zenith_idx = Some(i);
            } else if header.contains("azimuth") {
                azimuth_idx = Some(i);
            }
        }
        let (Some(azimuth_idx), Some(zenith_idx)) = (azimuth_idx, zenith_idx) else {
            return Err(Error::Parse(
                "missing \"azimuth\" or \"zenith\" column header".to_owned(),
            ));
        };

        let mut directions = Vec::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let field = |idx: usize, name: &str| -> Result<f32> {
                record
                    .get(idx)
                    .and_then(|v| v.parse::<f32>().ok())
                    .ok_or_else(|| Error::Parse(format!("row {}: invalid {name}", row + 1)))
            };
            let az = field(azimuth_idx, "azimuth")?;
            let ze = field(zenith_idx, "zenith")? - zenith_offset;
            directions.push(direction_from_angles(az, -ze));
        }

        debug!(directions = directions.len(), "parsed scan pattern csv");
        Self::new(directions)
    }

    /// Read a CSV pattern table from a file.
    pub fn from_csv_path(path: impl AsRef<Path>, zenith_offset: f32) -> Result<Self> {
        Self::from_csv(File::open(path)?, zenith_offset)
    }

    /// Load a JSON pattern.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let pattern: Self = serde_json::from_reader(reader)?;
        if pattern.directions.is_empty() {
            return Err(Error::EmptyPattern);
        }
        debug!(
            path = %path.as_ref().display(),
            directions = pattern.len(),
            "loaded scan pattern"
        );
        Ok(pattern)
    }

    /// Persist the pattern as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Derive a runtime pattern: keep every `stride`-th direction, then keep
    /// directions whose azimuth lies in `[azimuth_min, azimuth_max]`.
    ///
    /// When `azimuth_min > azimuth_max` the window wraps through 0°, e.g.
    /// `[350, 10]`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidStride`] if `stride` is outside `[1, len]`
    /// - [`Error::EmptyPattern`] if no direction survives
    pub fn build(
        source: &Arc<ScanPattern>,
        stride: usize,
        azimuth_min: f32,
        azimuth_max: f32,
    ) -> Result<Arc<ScanPattern>> {
        let downsampled = Self::downsample(source, stride)?;
        Self::window(&downsampled, azimuth_min, azimuth_max)
    }

    /// Keep every `stride`-th direction, starting with the first.
    pub fn downsample(source: &Arc<ScanPattern>, stride: usize) -> Result<Arc<ScanPattern>> {
        let len = source.len();
        if stride == 0 || stride > len {
            return Err(Error::InvalidStride { stride, len });
        }
        if stride == 1 {
            return Ok(source.clone());
        }

        let directions = source.directions.iter().step_by(stride).copied().collect();
        Ok(Arc::new(Self::new(directions)?))
    }

    /// Keep the directions whose azimuth lies in the window.
    ///
    /// A full-circle window returns `source` unchanged.
    pub fn window(
        source: &Arc<ScanPattern>,
        azimuth_min: f32,
        azimuth_max: f32,
    ) -> Result<Arc<ScanPattern>> {
        if is_full_circle(azimuth_min, azimuth_max) {
            return Ok(source.clone());
        }

        let wraps = azimuth_min > azimuth_max;
        let directions: Vec<_> = source
            .directions
            .iter()
            .copied()
            .filter(|&dir| {
                let az = azimuth(dir);
                if wraps {
                    az >= azimuth_min || az <= azimuth_max
                } else {
                    az >= azimuth_min && az <= azimuth_max
                }
            })
            .collect();

        Ok(Arc::new(Self::new(directions)?))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.directions.len()
    }

    /// Always false for a constructed pattern.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }

    #[inline]
    pub fn directions(&self) -> &[[f32; 3]] {
        &self.directions
    }

    #[inline]
    pub fn min_azimuth(&self) -> f32 {
        self.min_azimuth
    }

    #[inline]
    pub fn max_azimuth(&self) -> f32 {
        self.max_azimuth
    }

    #[inline]
    pub fn min_zenith(&self) -> f32 {
        self.min_zenith
    }

    #[inline]
    pub fn max_zenith(&self) -> f32 {
        self.max_zenith
    }
}

#[inline]
fn is_full_circle(azimuth_min: f32, azimuth_max: f32) -> bool {
    azimuth_min.abs() <= FULL_CIRCLE_TOLERANCE
        && (azimuth_max - 360.0).abs() <= FULL_CIRCLE_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ring(n: usize) -> Arc<ScanPattern> {
        let spec = PatternSpec {
            zenith_angles: vec![0.0],
            min_azimuth: 0.0,
            max_azimuth: 360.0,
            azimuth_resolution: n,
            direction: ScanDirection::Cw,
        };
        Arc::new(ScanPattern::generate(&spec).unwrap())
    }

    #[test]
    fn test_angles_round_trip() {
        for &(az, ze) in &[(0.0, 0.0), (45.0, 10.0), (180.0, -20.0), (270.0, 5.0), (359.0, 0.0)] {
            let dir = direction_from_angles(az, ze);
            assert_relative_eq!(azimuth(dir), az, epsilon = 1e-3);
            assert_relative_eq!(zenith(dir), ze, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_azimuth_range() {
        // engine -z is azimuth 0, -x is azimuth 90
        assert_relative_eq!(azimuth([0.0, 0.0, -1.0]), 0.0);
        assert_relative_eq!(azimuth([-1.0, 0.0, 0.0]), 90.0);
        assert_relative_eq!(azimuth([0.0, 0.0, 1.0]), 180.0);
        assert_relative_eq!(azimuth([1.0, 0.0, 0.0]), 270.0);
        assert!(azimuth([1e-9, 0.0, -1.0]) < 360.0);
    }

    #[test]
    fn test_new_empty() {
        assert!(matches!(ScanPattern::new(vec![]), Err(Error::EmptyPattern)));
    }

    #[test]
    fn test_generate_layout() {
        let spec = PatternSpec {
            zenith_angles: vec![-10.0, 10.0],
            min_azimuth: 0.0,
            max_azimuth: 360.0,
            azimuth_resolution: 4,
            direction: ScanDirection::Cw,
        };
        let p = ScanPattern::generate(&spec).unwrap();
        assert_eq!(p.len(), 8);
        assert_relative_eq!(azimuth(p.directions()[2]), 90.0, epsilon = 1e-3);
        assert_relative_eq!(zenith(p.directions()[0]), -10.0, epsilon = 1e-3);
        assert_relative_eq!(zenith(p.directions()[1]), 10.0, epsilon = 1e-3);
        assert_eq!(p.min_azimuth(), 0.0);
        assert_eq!(p.max_azimuth(), 360.0);
        assert_relative_eq!(p.min_zenith(), -10.0, epsilon = 1e-3);
        assert_relative_eq!(p.max_zenith(), 10.0, epsilon = 1e-3);
    }

    #[test]
    fn test_generate_ccw_reverses_sweep() {
        let spec = PatternSpec {
            zenith_angles: vec![0.0],
            azimuth_resolution: 4,
            direction: ScanDirection::Ccw,
            ..Default::default()
        };
        let p = ScanPattern::generate(&spec).unwrap();
        let az: Vec<f32> = p.directions().iter().map(|&d| azimuth(d)).collect();
        assert_relative_eq!(az[0], 270.0, epsilon = 1e-3);
        assert_relative_eq!(az[3], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_generate_empty() {
        let spec = PatternSpec {
            zenith_angles: vec![],
            ..Default::default()
        };
        assert!(matches!(ScanPattern::generate(&spec), Err(Error::EmptyPattern)));

        let spec = PatternSpec {
            azimuth_resolution: 0,
            ..Default::default()
        };
        assert!(matches!(ScanPattern::generate(&spec), Err(Error::EmptyPattern)));
    }

    #[test]
    fn test_build_identity_returns_same_arc() {
        let p = ring(36);
        let out = ScanPattern::build(&p, 1, 0.0, 360.0).unwrap();
        assert!(Arc::ptr_eq(&p, &out));

        let out = ScanPattern::build(&p, 1, 0.0005, 359.9995).unwrap();
        assert!(Arc::ptr_eq(&p, &out));
    }

    #[test]
    fn test_stride_keeps_order() {
        let p = ring(10);
        let out = ScanPattern::downsample(&p, 3).unwrap();
        assert_eq!(out.len(), 4);
        for (i, dir) in out.directions().iter().enumerate() {
            assert_eq!(*dir, p.directions()[i * 3]);
        }
    }

    #[test]
    fn test_invalid_stride() {
        let p = ring(10);
        assert!(matches!(
            ScanPattern::build(&p, 0, 0.0, 360.0),
            Err(Error::InvalidStride { stride: 0, len: 10 })
        ));
        assert!(matches!(
            ScanPattern::build(&p, 11, 0.0, 360.0),
            Err(Error::InvalidStride { stride: 11, len: 10 })
        ));
        assert_eq!(ScanPattern::build(&p, 10, 0.0, 360.0).unwrap().len(), 1);
    }

    #[test]
    fn test_window_bounds_and_order() {
        let p = ring(360);
        let out = ScanPattern::build(&p, 1, 90.0, 180.0).unwrap();
        assert!(!out.is_empty());
        let az: Vec<f32> = out.directions().iter().map(|&d| azimuth(d)).collect();
        for a in &az {
            assert!((90.0..=180.0).contains(a), "azimuth {a} outside window");
        }
        for w in az.windows(2) {
            assert!(w[0] < w[1]);
        }
        assert!(out.min_azimuth() >= 90.0);
        assert!(out.max_azimuth() <= 180.0);
    }

    #[test]
    fn test_window_wraps() {
        let p = ring(36);
        let out = ScanPattern::window(&p, 335.0, 25.0).unwrap();
        for &d in out.directions() {
            let a = azimuth(d);
            assert!(a >= 335.0 || a <= 25.0, "azimuth {a}");
        }
        // 0, 10, 20, 340, 350 in original order
        assert_eq!(out.len(), 5);
        assert_relative_eq!(azimuth(out.directions()[0]), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_window_empty() {
        let p = ring(4);
        assert!(matches!(
            ScanPattern::build(&p, 1, 10.0, 20.0),
            Err(Error::EmptyPattern)
        ));
    }

    #[test]
    fn test_stride_for_downsample() {
        assert_eq!(stride_for_downsample(0.0).unwrap(), 1);
        assert_eq!(stride_for_downsample(0.5).unwrap(), 2);
        assert_eq!(stride_for_downsample(0.75).unwrap(), 4);
        assert_eq!(stride_for_downsample(0.6).unwrap(), 2);
        assert!(stride_for_downsample(1.0).is_err());
        assert!(stride_for_downsample(-0.1).is_err());
    }

    #[test]
    fn test_from_csv() {
        let csv = "Channel,Azimuth (deg),Zenith (deg)\n0,0.0,90.0\n1,90.0,100.0\n2,180.0,80.0\n";
        let p = ScanPattern::from_csv(csv.as_bytes(), 90.0).unwrap();
        assert_eq!(p.len(), 3);
        assert_relative_eq!(zenith(p.directions()[0]), 0.0, epsilon = 1e-3);
        assert_relative_eq!(zenith(p.directions()[1]), -10.0, epsilon = 1e-3);
        assert_relative_eq!(zenith(p.directions()[2]), 10.0, epsilon = 1e-3);
        assert_relative_eq!(azimuth(p.directions()[1]), 90.0, epsilon = 1e-3);
    }

    #[test]
    fn test_from_csv_missing_column() {
        let csv = "azimuth,elevation\n0,0\n";
        assert!(matches!(
            ScanPattern::from_csv(csv.as_bytes(), 0.0),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_from_csv_bad_value() {
        let csv = "azimuth,zenith\n0,abc\n";
        assert!(matches!(
            ScanPattern::from_csv(csv.as_bytes(), 0.0),
            Err(Error::Parse(_))
        ));
    }
}
