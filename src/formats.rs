// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point cloud packing into the PointCloud2 binary layout.
//!
//! This module converts sample buffers into the packed, row-major,
//! little-endian table carried by PointCloud2 messages, together with the
//! field schema describing each row.
//!
//! # Formats
//!
//! ## 12-byte format (xyz)
//! ```text
//! ┌───────┬───────┬───────┐
//! │ x:f32 │ y:f32 │ z:f32 │
//! │ 4B    │ 4B    │ 4B    │
//! └───────┴───────┴───────┘
//! ```
//!
//! ## 16-byte format (xyz + intensity)
//! ```text
//! ┌───────┬───────┬───────┬───────────────┐
//! │ x:f32 │ y:f32 │ z:f32 │ intensity:f32 │
//! │ 4B    │ 4B    │ 4B    │ 4B            │
//! └───────┴───────┴───────┴───────────────┘
//! ```
//!
//! Positions are remapped into the wire frame before packing. Byte order is
//! little-endian on every host.

use crate::{
    buffer::{SampleBuffer, is_valid_position},
    frames::AxisRemap,
    sensor::{Error, Result},
};
use rayon::prelude::*;
use tracing::{instrument, trace};

/// Rows above which packing is split across the rayon pool.
pub const PARALLEL_THRESHOLD: usize = 16_384;

/// Point field data types for PointCloud2 messages.
///
/// These values correspond to the ROS sensor_msgs/PointField datatype field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PointFieldType {
    INT8 = 1,
    UINT8 = 2,
    INT16 = 3,
    UINT16 = 4,
    INT32 = 5,
    UINT32 = 6,
    FLOAT32 = 7,
    FLOAT64 = 8,
}

impl PointFieldType {
    /// Size of one scalar in bytes.
    pub const fn size(self) -> u32 {
        match self {
            PointFieldType::INT8 | PointFieldType::UINT8 => 1,
            PointFieldType::INT16 | PointFieldType::UINT16 => 2,
            PointFieldType::INT32 | PointFieldType::UINT32 | PointFieldType::FLOAT32 => 4,
            PointFieldType::FLOAT64 => 8,
        }
    }
}

impl TryFrom<u8> for PointFieldType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => PointFieldType::INT8,
            2 => PointFieldType::UINT8,
            3 => PointFieldType::INT16,
            4 => PointFieldType::UINT16,
            5 => PointFieldType::INT32,
            6 => PointFieldType::UINT32,
            7 => PointFieldType::FLOAT32,
            8 => PointFieldType::FLOAT64,
            other => return Err(Error::UnsupportedFieldType(other)),
        })
    }
}

/// One column of a packed point row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointField {
    pub name: String,
    /// Byte offset of the field within a row.
    pub offset: u32,
    pub datatype: PointFieldType,
    pub count: u32,
}

impl PointField {
    /// Bytes occupied by this field within a row.
    #[inline]
    pub fn size(&self) -> u32 {
        self.datatype.size() * self.count
    }
}

/// Lay out fields back to back from offset 0.
///
/// `datatype` values are raw PointField codes so layouts read from
/// configuration are validated here.
///
/// # Returns
///
/// The fields with offsets assigned, and the resulting row length.
pub fn layout_fields(specs: &[(&str, u8, u32)]) -> Result<(Vec<PointField>, u32)> {
    let mut offset = 0;
    let mut fields = Vec::with_capacity(specs.len());
    for &(name, datatype, count) in specs {
        let field = PointField {
            name: name.to_owned(),
            offset,
            datatype: PointFieldType::try_from(datatype)?,
            count,
        };
        offset += field.size();
        fields.push(field);
    }
    Ok((fields, offset))
}

fn fixed_field(name: &str, offset: u32) -> PointField {
    PointField {
        name: String::from(name),
        offset,
        datatype: PointFieldType::FLOAT32,
        count: 1,
    }
}

/// Build the XYZ point fields (12-byte stride).
///
/// - x: FLOAT32 at offset 0
/// - y: FLOAT32 at offset 4
/// - z: FLOAT32 at offset 8
pub fn xyz_fields() -> Vec<PointField> {
    vec![fixed_field("x", 0), fixed_field("y", 4), fixed_field("z", 8)]
}

/// Build the XYZ + intensity point fields (16-byte stride).
///
/// - x: FLOAT32 at offset 0
/// - y: FLOAT32 at offset 4
/// - z: FLOAT32 at offset 8
/// - intensity: FLOAT32 at offset 12
pub fn xyz_intensity_fields() -> Vec<PointField> {
    let mut fields = xyz_fields();
    fields.push(fixed_field("intensity", 12));
    fields
}

/// Encoded point cloud: packed rows plus their layout.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    pub fields: Vec<PointField>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub point_step: u32,
    /// Bytes per scanline, `point_step * width`.
    pub row_step: u32,
    /// Always false.
    pub is_bigendian: bool,
    /// True when invalid rows were removed.
    pub is_dense: bool,
    pub data: Vec<u8>,
    /// Capture time of the samples, nanoseconds.
    pub timestamp: u64,
}

impl PointCloud {
    /// Number of packed rows (`width * height`).
    #[inline]
    pub fn len(&self) -> usize {
        (self.width * self.height) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn field(&self, name: &str) -> Option<&PointField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Bytes of row `index`.
    pub fn row(&self, index: usize) -> Option<&[u8]> {
        let step = self.point_step as usize;
        self.data.get(index * step..(index + 1) * step)
    }

    /// Read a FLOAT32 field of row `index`.
    pub fn read_f32(&self, index: usize, name: &str) -> Option<f32> {
        let field = self.field(name)?;
        if field.datatype != PointFieldType::FLOAT32 {
            return None;
        }
        let row = self.row(index)?;
        let at = field.offset as usize;
        let bytes = row.get(at..at + 4)?;
        Some(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Position of row `index` in the wire frame.
    pub fn read_xyz(&self, index: usize) -> Option<[f32; 3]> {
        Some([
            self.read_f32(index, "x")?,
            self.read_f32(index, "y")?,
            self.read_f32(index, "z")?,
        ])
    }
}

/// Pack one row at the start of `out`.
#[inline]
fn pack_row(out: &mut [u8], pos: [f32; 3], intensity: Option<f32>) {
    out[0..4].copy_from_slice(&pos[0].to_le_bytes());
    out[4..8].copy_from_slice(&pos[1].to_le_bytes());
    out[8..12].copy_from_slice(&pos[2].to_le_bytes());
    if let Some(intensity) = intensity {
        out[12..16].copy_from_slice(&intensity.to_le_bytes());
    }
}

/// Converts sample buffers into [`PointCloud`]s.
///
/// The encoder keeps a scratch index buffer between frames so compaction of
/// invalid rows does not allocate in steady state; only the output payload
/// is allocated per frame.
#[derive(Debug, Clone)]
pub struct PointCloudEncoder {
    include_intensity: bool,
    drop_invalid: bool,
    remap: AxisRemap,
    organized: Option<(u32, u32)>,
    keep: Vec<u32>,
}

impl PointCloudEncoder {
    /// # Arguments
    ///
    /// * `include_intensity` - Append the intensity column (16-byte rows)
    /// * `drop_invalid` - Remove NaN and zero-vector rows, marking the
    ///   cloud dense
    pub fn new(include_intensity: bool, drop_invalid: bool) -> Self {
        Self {
            include_intensity,
            drop_invalid,
            remap: AxisRemap::default(),
            organized: None,
            keep: Vec::new(),
        }
    }

    /// Use `remap` instead of the engine-to-wire conversion.
    pub fn with_remap(mut self, remap: AxisRemap) -> Self {
        self.remap = remap;
        self
    }

    /// Emit a `width x height` organized cloud when rows are not dropped.
    pub fn with_organized(mut self, width: u32, height: u32) -> Self {
        self.organized = Some((width, height));
        self
    }

    #[inline]
    pub fn point_step(&self) -> u32 {
        if self.include_intensity { 16 } else { 12 }
    }

    pub fn fields(&self) -> Vec<PointField> {
        if self.include_intensity {
            xyz_intensity_fields()
        } else {
            xyz_fields()
        }
    }

    #[inline]
    pub fn drop_invalid(&self) -> bool {
        self.drop_invalid
    }

    /// Encode `samples` captured at `timestamp`.
    ///
    /// Without `drop_invalid` every input sample becomes a row. With it,
    /// invalid samples are removed and the survivors keep their original
    /// relative order.
    ///
    /// # Errors
    ///
    /// [`Error::SizeMismatch`] if an organized layout was requested whose
    /// `width * height` differs from the sample count.
    #[instrument(skip_all, fields(n = samples.len()))]
    pub fn encode(&mut self, samples: &SampleBuffer, timestamp: u64) -> Result<PointCloud> {
        let step = self.point_step() as usize;
        let (x, y, z) = (samples.x(), samples.y(), samples.z());
        let intensity = samples.intensity();
        let remap = self.remap;
        let with_intensity = self.include_intensity;

        let (width, height) = if self.drop_invalid {
            self.keep.clear();
            self.keep.extend(
                (0..samples.len())
                    .filter(|&i| is_valid_position(x[i], y[i], z[i]))
                    .map(|i| i as u32),
            );
            (self.keep.len() as u32, 1)
        } else {
            match self.organized {
                Some((w, h)) if (w * h) as usize != samples.len() => {
                    return Err(Error::SizeMismatch {
                        expected: (w * h) as usize * step,
                        actual: samples.len() * step,
                    });
                }
                Some((w, h)) => (w, h),
                None => (samples.len() as u32, 1),
            }
        };

        let rows = (width * height) as usize;
        let mut data = vec![0u8; rows * step];
        let keep = &self.keep;
        let drop_invalid = self.drop_invalid;
        let write = |(row, out): (usize, &mut [u8])| {
            let i = if drop_invalid { keep[row] as usize } else { row };
            let pos = remap.apply([x[i], y[i], z[i]]);
            pack_row(out, pos, with_intensity.then(|| intensity[i]));
        };

        if rows >= PARALLEL_THRESHOLD {
            data.par_chunks_exact_mut(step).enumerate().for_each(write);
        } else {
            data.chunks_exact_mut(step).enumerate().for_each(write);
        }

        trace!(rows, dropped = samples.len() - rows, "encoded point cloud");

        Ok(PointCloud {
            fields: self.fields(),
            width,
            height,
            point_step: step as u32,
            row_step: step as u32 * width,
            is_bigendian: false,
            is_dense: self.drop_invalid,
            data,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Sample;

    fn samples(n: usize) -> SampleBuffer {
        let mut buf = SampleBuffer::with_capacity(n);
        for i in 0..n {
            let f = i as f32 + 1.0;
            buf.push(f, f * 10.0, f * 100.0, f * 2.0);
        }
        buf
    }

    #[test]
    fn test_point_field_builders() {
        let fields = xyz_intensity_fields();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0].name, "x");
        assert_eq!(fields[0].offset, 0);
        assert_eq!(fields[3].name, "intensity");
        assert_eq!(fields[3].offset, 12);
        assert_eq!(fields[3].datatype, PointFieldType::FLOAT32);

        let xyz = xyz_fields();
        assert_eq!(xyz.len(), 3);
        assert_eq!(xyz[2].offset, 8);
    }

    #[test]
    fn test_layout_fields() {
        let (fields, step) = layout_fields(&[
            ("x", PointFieldType::FLOAT32 as u8, 1),
            ("ring", PointFieldType::UINT16 as u8, 1),
            ("t", PointFieldType::FLOAT64 as u8, 1),
        ])
        .unwrap();
        assert_eq!(fields[1].offset, 4);
        assert_eq!(fields[2].offset, 6);
        assert_eq!(step, 14);

        assert!(matches!(
            layout_fields(&[("x", 9, 1)]),
            Err(Error::UnsupportedFieldType(9))
        ));
        assert!(matches!(
            PointFieldType::try_from(0),
            Err(Error::UnsupportedFieldType(0))
        ));
    }

    #[test]
    fn test_encode_xyz_identity() {
        let mut enc = PointCloudEncoder::new(false, false).with_remap(AxisRemap::Identity);
        let cloud = enc.encode(&samples(5), 42).unwrap();

        assert_eq!(cloud.data.len(), 12 * 5);
        assert_eq!(cloud.point_step, 12);
        assert_eq!(cloud.row_step, 60);
        assert_eq!(cloud.width, 5);
        assert_eq!(cloud.height, 1);
        assert!(!cloud.is_dense);
        assert!(!cloud.is_bigendian);
        assert_eq!(cloud.timestamp, 42);

        // Verify first point
        let x0 = f32::from_le_bytes([cloud.data[0], cloud.data[1], cloud.data[2], cloud.data[3]]);
        assert_eq!(x0, 1.0);
        assert_eq!(cloud.read_xyz(4), Some([5.0, 50.0, 500.0]));
    }

    #[test]
    fn test_encode_applies_wire_remap() {
        let mut enc = PointCloudEncoder::new(true, false);
        let buf = SampleBuffer::from_samples(&[Sample::new(1.0, 2.0, 3.0, 7.0)]);
        let cloud = enc.encode(&buf, 0).unwrap();
        assert_eq!(cloud.point_step, 16);
        assert_eq!(cloud.read_xyz(0), Some([3.0, -1.0, 2.0]));
        assert_eq!(cloud.read_f32(0, "intensity"), Some(7.0));
    }

    #[test]
    fn test_encode_keeps_invalid_rows() {
        let mut buf = samples(4);
        buf.push_sample(Sample::invalid());
        let mut enc = PointCloudEncoder::new(false, false);
        let cloud = enc.encode(&buf, 0).unwrap();
        assert_eq!(cloud.len(), 5);
        assert!(cloud.read_f32(4, "x").unwrap().is_nan());
    }

    #[test]
    fn test_drop_invalid_preserves_order() {
        let buf = SampleBuffer::from_samples(&[
            Sample::new(1.0, 0.0, 0.0, 0.0),
            Sample::new(0.0, 0.0, 0.0, 0.0),
            Sample::new(2.0, 0.0, 0.0, 0.0),
            Sample::new(f32::NAN, 1.0, 1.0, 0.0),
            Sample::new(3.0, 0.0, 0.0, 0.0),
        ]);
        let mut enc = PointCloudEncoder::new(true, true).with_remap(AxisRemap::Identity);
        let cloud = enc.encode(&buf, 0).unwrap();
        assert_eq!(cloud.len(), 3);
        assert!(cloud.is_dense);
        assert_eq!(cloud.data.len(), 48);
        let xs: Vec<f32> = (0..3).map(|i| cloud.read_f32(i, "x").unwrap()).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_parallel_matches_sequential_order() {
        let n = PARALLEL_THRESHOLD * 2 + 3;
        let mut buf = SampleBuffer::with_capacity(n);
        for i in 0..n {
            if i % 7 == 0 {
                buf.push_sample(Sample::invalid());
            } else {
                buf.push(i as f32, 1.0, 1.0, 0.0);
            }
        }
        let mut enc = PointCloudEncoder::new(false, true).with_remap(AxisRemap::Identity);
        let cloud = enc.encode(&buf, 0).unwrap();
        assert_eq!(cloud.len(), buf.valid_count());
        let mut last = -1.0;
        for i in 0..cloud.len() {
            let x = cloud.read_f32(i, "x").unwrap();
            assert!(x > last);
            last = x;
        }
    }

    #[test]
    fn test_organized_layout() {
        let mut enc = PointCloudEncoder::new(false, false).with_organized(2, 3);
        let cloud = enc.encode(&samples(6), 0).unwrap();
        assert_eq!(cloud.width, 2);
        assert_eq!(cloud.height, 3);
        assert_eq!(cloud.row_step, 24);

        assert!(matches!(
            enc.encode(&samples(5), 0),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_empty() {
        let mut enc = PointCloudEncoder::new(true, true);
        let cloud = enc.encode(&SampleBuffer::default(), 0).unwrap();
        assert!(cloud.is_empty());
        assert!(cloud.data.is_empty());
    }
}
