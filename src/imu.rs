// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Inertial measurement from rigid-body state.

use crate::{
    frames::{to_wire_angular, to_wire_quaternion, to_wire_vector},
    slot::{SlotReader, SlotWriter, freshest_slot},
};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use tracing::debug;

/// Rigid-body state reported by the engine, in the engine world frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RigidBodyState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    /// World-frame angular velocity in rad/s.
    pub angular_velocity: Vector3<f64>,
}

impl Default for RigidBodyState {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
        }
    }
}

/// IMU sample in the wire convention.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImuMessage {
    pub orientation: Quaternion<f64>,
    /// Body-frame angular velocity in rad/s.
    pub angular_velocity: Vector3<f64>,
    /// Linear acceleration in m/s², gravity not included.
    pub linear_acceleration: Vector3<f64>,
    pub timestamp: u64,
}

/// Differentiates body velocity into acceleration.
pub struct ImuSensor {
    last_velocity: Vector3<f64>,
    last_time: f64,
    acceleration: Vector3<f64>,
    tx: SlotWriter<ImuMessage>,
}

impl ImuSensor {
    /// Start the sensor at engine time `start_time` seconds with the body
    /// at rest.
    pub fn new(start_time: f64) -> (Self, SlotReader<ImuMessage>) {
        let (tx, rx) = freshest_slot();
        (
            Self {
                last_velocity: Vector3::zeros(),
                last_time: start_time,
                acceleration: Vector3::zeros(),
                tx,
            },
            rx,
        )
    }

    /// Last computed engine-frame acceleration.
    pub fn acceleration(&self) -> Vector3<f64> {
        self.acceleration
    }

    /// Sample `state` at engine time `time` seconds and publish the message.
    ///
    /// A non-positive time delta keeps the previous acceleration and leaves
    /// the differentiation reference untouched.
    pub fn update(&mut self, state: &RigidBodyState, time: f64, timestamp: u64) -> ImuMessage {
        let dt = time - self.last_time;
        if dt <= 0.0 {
            debug!(dt, "imu: empty time delta");
        } else {
            self.acceleration = (state.velocity - self.last_velocity) / dt;
            self.last_velocity = state.velocity;
            self.last_time = time;
        }

        let body_rate = state.rotation.inverse() * state.angular_velocity;
        let msg = ImuMessage {
            orientation: to_wire_quaternion(&state.rotation),
            angular_velocity: to_wire_angular(&body_rate),
            linear_acceleration: to_wire_vector(&self.acceleration),
            timestamp,
        };
        self.tx.publish(msg);
        msg
    }
}
