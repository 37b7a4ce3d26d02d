// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! ROS 2 message conversion and CDR serialization.
//!
//! Every message header is stamped with the capture time carried by the
//! [`WireMessage`], never the time of serialization.

use crate::{
    camera_info::CameraInfo,
    compressor::CompressedImage,
    depth::DepthImage,
    formats::PointCloud,
    gps::GpsFix,
    imu::ImuMessage,
    range::RangeReading,
    sensor::{NANOS_PER_SEC, Result},
    wire::WireMessage,
};
use edgefirst_schemas::{
    builtin_interfaces::Time,
    geometry_msgs::{Quaternion, Vector3},
    sensor_msgs::{self, NavSatStatus, PointCloud2, PointField, RegionOfInterest},
    serde_cdr,
    std_msgs::Header,
};
use serde::{Deserialize, Serialize};

/// `sensor_msgs/msg/Range`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub header: Header,
    pub radiation_type: u8,
    pub field_of_view: f32,
    pub min_range: f32,
    pub max_range: f32,
    pub range: f32,
}

const NAVSAT_STATUS_FIX: i8 = 0;
const NAVSAT_SERVICE_GPS: u16 = 1;
const COVARIANCE_TYPE_UNKNOWN: u8 = 0;

/// Split a nanosecond timestamp into a ROS time.
pub fn to_time(timestamp: u64) -> Time {
    Time {
        sec: (timestamp / NANOS_PER_SEC) as i32,
        nanosec: (timestamp % NANOS_PER_SEC) as u32,
    }
}

pub fn header(timestamp: u64, frame_id: &str) -> Header {
    Header {
        stamp: to_time(timestamp),
        frame_id: frame_id.to_owned(),
    }
}

fn vector3(v: &nalgebra::Vector3<f64>) -> Vector3 {
    Vector3 {
        x: v.x,
        y: v.y,
        z: v.z,
    }
}

pub fn point_cloud(msg: PointCloud, frame_id: &str) -> PointCloud2 {
    let fields = msg
        .fields
        .iter()
        .map(|f| PointField {
            name: f.name.clone(),
            offset: f.offset,
            datatype: f.datatype as u8,
            count: f.count,
        })
        .collect();
    PointCloud2 {
        header: header(msg.timestamp, frame_id),
        height: msg.height,
        width: msg.width,
        fields,
        is_bigendian: msg.is_bigendian,
        point_step: msg.point_step,
        row_step: msg.row_step,
        data: msg.data,
        is_dense: msg.is_dense,
    }
}

pub fn depth_image(msg: DepthImage, frame_id: &str) -> sensor_msgs::Image {
    sensor_msgs::Image {
        header: header(msg.timestamp, frame_id),
        height: msg.height,
        width: msg.width,
        encoding: msg.encoding.to_owned(),
        is_bigendian: msg.is_bigendian as u8,
        step: msg.step,
        data: msg.data,
    }
}

pub fn compressed_image(msg: CompressedImage, frame_id: &str) -> sensor_msgs::CompressedImage {
    sensor_msgs::CompressedImage {
        header: header(msg.timestamp, frame_id),
        format: msg.format.to_owned(),
        data: msg.data,
    }
}

pub fn imu(msg: &ImuMessage, frame_id: &str) -> sensor_msgs::Imu {
    let q = &msg.orientation;
    sensor_msgs::Imu {
        header: header(msg.timestamp, frame_id),
        orientation: Quaternion {
            x: q.i,
            y: q.j,
            z: q.k,
            w: q.w,
        },
        orientation_covariance: [0.0; 9],
        angular_velocity: vector3(&msg.angular_velocity),
        angular_velocity_covariance: [0.0; 9],
        linear_acceleration: vector3(&msg.linear_acceleration),
        linear_acceleration_covariance: [0.0; 9],
    }
}

pub fn nav_sat_fix(msg: &GpsFix, frame_id: &str) -> sensor_msgs::NavSatFix {
    sensor_msgs::NavSatFix {
        header: header(msg.timestamp, frame_id),
        status: NavSatStatus {
            status: NAVSAT_STATUS_FIX,
            service: NAVSAT_SERVICE_GPS,
        },
        latitude: msg.position.latitude,
        longitude: msg.position.longitude,
        altitude: msg.position.altitude,
        position_covariance: [0.0; 9],
        position_covariance_type: COVARIANCE_TYPE_UNKNOWN,
    }
}

pub fn camera_info(msg: CameraInfo, frame_id: &str) -> sensor_msgs::CameraInfo {
    sensor_msgs::CameraInfo {
        header: header(msg.timestamp, frame_id),
        height: msg.height,
        width: msg.width,
        distortion_model: msg.distortion_model.to_owned(),
        d: msg.d,
        k: msg.k,
        r: msg.r,
        p: msg.p,
        binning_x: 0,
        binning_y: 0,
        roi: RegionOfInterest {
            x_offset: 0,
            y_offset: 0,
            height: 0,
            width: 0,
            do_rectify: false,
        },
    }
}

pub fn range(msg: &RangeReading, frame_id: &str) -> Range {
    Range {
        header: header(msg.timestamp, frame_id),
        radiation_type: msg.radiation_type as u8,
        field_of_view: msg.field_of_view,
        min_range: msg.min_range,
        max_range: msg.max_range,
        range: msg.range,
    }
}

/// Serialize `msg` as CDR, returning the payload and its ROS schema name.
pub fn serialize(msg: WireMessage, frame_id: &str) -> Result<(Vec<u8>, &'static str)> {
    let schema = msg.schema();
    let payload = match msg {
        WireMessage::PointCloud(m) => serde_cdr::serialize(&point_cloud(m, frame_id))?,
        WireMessage::Image(m) => serde_cdr::serialize(&depth_image(m, frame_id))?,
        WireMessage::CompressedImage(m) => serde_cdr::serialize(&compressed_image(m, frame_id))?,
        WireMessage::Imu(m) => serde_cdr::serialize(&imu(&m, frame_id))?,
        WireMessage::NavSatFix(m) => serde_cdr::serialize(&nav_sat_fix(&m, frame_id))?,
        WireMessage::CameraInfo(m) => serde_cdr::serialize(&camera_info(m, frame_id))?,
        WireMessage::Range(m) => serde_cdr::serialize(&range(&m, frame_id))?,
    };
    Ok((payload, schema))
}
