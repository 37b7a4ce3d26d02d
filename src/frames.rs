// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Coordinate convention conversions.
//!
//! The engine uses a left-handed frame (x right, y up, z forward) while the
//! wire messages use the ROS right-handed body frame (x forward, y left,
//! z up). All conversions here are pure functions.

use nalgebra::{Point3, Quaternion, UnitQuaternion, Vector3};

/// Remap an engine-frame position or linear vector to the wire frame.
#[inline]
pub fn to_wire_frame(v: [f32; 3]) -> [f32; 3] {
    [v[2], -v[0], v[1]]
}

/// Remap an engine-frame linear vector (f64) to the wire frame.
#[inline]
pub fn to_wire_vector(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.z, -v.x, v.y)
}

/// Remap an engine-frame angular velocity to the wire frame.
///
/// Handedness flips the sense of rotation, hence the extra negations
/// compared to [`to_wire_vector`].
#[inline]
pub fn to_wire_angular(w: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(-w.z, w.x, -w.y)
}

/// Remap an engine-frame orientation to the wire frame.
#[inline]
pub fn to_wire_quaternion(q: &UnitQuaternion<f64>) -> Quaternion<f64> {
    let q = q.quaternion();
    // Quaternion::new takes (w, i, j, k)
    Quaternion::new(-q.w, q.k, -q.i, q.j)
}

/// Engine-frame displacement as east/north/up meters.
#[inline]
pub fn to_enu(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.x, v.z, v.y)
}

/// How sample positions are remapped before packing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AxisRemap {
    /// Engine frame to wire frame via [`to_wire_frame`].
    #[default]
    EngineToWire,
    /// Samples are already in the wire frame.
    Identity,
}

impl AxisRemap {
    #[inline]
    pub fn apply(self, v: [f32; 3]) -> [f32; 3] {
        match self {
            AxisRemap::EngineToWire => to_wire_frame(v),
            AxisRemap::Identity => v,
        }
    }
}

/// Sensor pose in the engine frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub position: Point3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
        }
    }
}

impl Pose {
    pub fn new(position: [f32; 3], rotation: UnitQuaternion<f32>) -> Self {
        Self {
            position: Point3::from(position),
            rotation,
        }
    }

    /// Rotate a sensor-local direction into the engine world frame.
    #[inline]
    pub fn world_direction(&self, local: [f32; 3]) -> [f32; 3] {
        let v = self.rotation * Vector3::from(local);
        [v.x, v.y, v.z]
    }

    #[inline]
    pub fn origin(&self) -> [f32; 3] {
        [self.position.x, self.position.y, self.position.z]
    }
}
