// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_simpub::{
    camera_info::{GateFit, PhysicalCamera},
    compressor::{ChromaSubsampling, CompressionConfig, ImageCodec, PixelLayout},
    depth::{DepthCameraConfig, DepthFormat, DepthMode},
    gps::{GeoPoint, GpsConfig, GpsNoise},
    lidar::LidarConfig,
    range::{RadiationType, RangeConfig},
    scan_pattern::{PatternSpec, ScanDirection},
    sensor::SensorType,
};
use serde_json::json;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use zenoh::config::{Config, WhatAmI};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Sensors to simulate.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        default_value = "lidar,camera,camera_info,imu,gps"
    )]
    pub sensors: Vec<SensorType>,

    /// Capture tick rate in Hz, the rate the engine would render at.
    #[arg(long, env, default_value = "30")]
    pub tick_rate: f64,

    /// Emitter tick rate in Hz.
    #[arg(long, env, default_value = "100")]
    pub publish_rate: f64,

    /// Seed for every noise source, random when unset.
    #[arg(long, env)]
    pub seed: Option<u64>,

    /// Radius in meters of the circle the sensor rig drives around.
    #[arg(long, env, default_value = "5.0")]
    pub orbit_radius: f64,

    /// Angular speed of the sensor rig in rad/s.
    #[arg(long, env, default_value = "0.2")]
    pub orbit_speed: f64,

    /// Height of the sensor rig above the ground in meters.
    #[arg(long, env, default_value = "1.5")]
    pub orbit_height: f64,

    /// LiDAR scan pattern, a JSON file saved by the pattern tools.
    #[arg(long, env)]
    pub scan_pattern: Option<PathBuf>,

    /// LiDAR scan pattern as CSV with azimuth and zenith columns.
    #[arg(long, env, conflicts_with = "scan_pattern")]
    pub scan_csv: Option<PathBuf>,

    /// Offset subtracted from CSV zenith values in degrees.
    #[arg(long, env, default_value = "0")]
    pub zenith_offset: f32,

    /// Elevation of each generated LiDAR channel in degrees.
    #[arg(
        long,
        env,
        value_delimiter = ' ',
        allow_negative_numbers = true,
        default_value = "-15 -13 -11 -9 -7 -5 -3 -1 1 3 5 7 9 11 13 15"
    )]
    pub lidar_channels: Vec<f32>,

    /// Azimuth steps per revolution of the generated pattern.
    #[arg(long, env, default_value = "1024")]
    pub lidar_resolution: usize,

    /// Rotation direction of the generated pattern.
    #[arg(long, env, default_value = "cw")]
    pub lidar_direction: ScanDirection,

    /// Azimuth field of view start and stop angles in degrees.
    #[arg(long, env, num_args = 2, value_names = ["START", "STOP"], value_delimiter = ' ', default_value = "0 360")]
    pub azimuth: Vec<f32>,

    /// Fraction of pattern directions to skip, in [0, 1).
    #[arg(long, env, default_value = "0")]
    pub downsample: f32,

    /// Rays cast per capture tick, defaults to the whole pattern.
    #[arg(long, env)]
    pub points_per_scan: Option<usize>,

    #[arg(long, env, default_value = "0.5")]
    pub lidar_min_range: f32,

    #[arg(long, env, default_value = "100")]
    pub lidar_max_range: f32,

    /// Range noise standard deviation in meters.
    #[arg(long, env, default_value = "0")]
    pub lidar_noise: f32,

    /// Keep rows without a return instead of dropping them.
    #[arg(long, env)]
    pub keep_invalid: bool,

    /// Publish rate of the point cloud in Hz.
    #[arg(long, env, default_value = "10")]
    pub lidar_rate: f64,

    /// The name of the lidar frame
    #[arg(long, env, default_value = "lidar")]
    pub lidar_frame_id: String,

    /// lidar topic
    #[arg(long, env, default_value = "rt/lidar/points")]
    pub lidar_topic: String,

    /// Camera resolution, shared by the color and depth cameras.
    #[arg(long, env, num_args = 2, value_names = ["WIDTH", "HEIGHT"], value_delimiter = ' ', default_value = "640 480")]
    pub camera_size: Vec<u32>,

    /// Camera vertical field of view in degrees.
    #[arg(long, env, default_value = "60")]
    pub camera_fov: f32,

    /// Physical sensor size in millimeters, enables gate fitting.
    #[arg(long, env, num_args = 2, value_names = ["WIDTH", "HEIGHT"], value_delimiter = ' ')]
    pub sensor_size: Option<Vec<f64>>,

    #[arg(long, env, default_value = "vertical")]
    pub gate_fit: GateFit,

    /// Stereo baseline in meters reported in the camera info.
    #[arg(long, env, default_value = "0")]
    pub baseline: f64,

    #[arg(long, env, default_value = "jpeg")]
    pub codec: ImageCodec,

    /// JPEG quality
    #[arg(long, env, default_value = "90")]
    pub quality: u8,

    /// JPEG chroma subsampling
    #[arg(long, env, default_value = "420")]
    pub chroma: ChromaSubsampling,

    /// Channel layout of color readbacks.
    #[arg(long, env, default_value = "rgba")]
    pub pixel_layout: PixelLayout,

    #[arg(long, env, default_value = "30")]
    pub camera_rate: f64,

    #[arg(long, env, default_value = "camera")]
    pub camera_frame_id: String,

    #[arg(long, env, default_value = "rt/camera/compressed")]
    pub camera_topic: String,

    #[arg(long, env, default_value = "rt/camera/info")]
    pub camera_info_topic: String,

    #[arg(long, env, default_value = "1")]
    pub camera_info_rate: f64,

    #[arg(long, env, default_value = "0.05")]
    pub depth_near: f32,

    #[arg(long, env, default_value = "100")]
    pub depth_far: f32,

    #[arg(long, env, default_value = "r16")]
    pub depth_format: DepthFormat,

    #[arg(long, env, default_value = "millimeters")]
    pub depth_mode: DepthMode,

    #[arg(long, env, default_value = "30")]
    pub depth_rate: f64,

    #[arg(long, env, default_value = "depth")]
    pub depth_frame_id: String,

    #[arg(long, env, default_value = "rt/camera/depth")]
    pub depth_topic: String,

    #[arg(long, env, default_value = "rt/camera/depth/points")]
    pub depth_points_topic: String,

    #[arg(long, env, default_value = "100")]
    pub imu_rate: f64,

    #[arg(long, env, default_value = "imu")]
    pub imu_frame_id: String,

    #[arg(long, env, default_value = "rt/imu")]
    pub imu_topic: String,

    /// GPS origin latitude, longitude and altitude.
    #[arg(long, env, num_args = 3, value_names = ["LAT", "LON", "ALT"], value_delimiter = ' ', allow_negative_numbers = true, default_value = "45.4215 -75.6972 70")]
    pub gps_origin: Vec<f64>,

    /// Add Gaussian noise to the navigation fix.
    #[arg(long, env)]
    pub gps_noise: bool,

    #[arg(long, env, default_value = "10")]
    pub gps_rate: f64,

    #[arg(long, env, default_value = "gps")]
    pub gps_frame_id: String,

    #[arg(long, env, default_value = "rt/gps")]
    pub gps_topic: String,

    #[arg(long, env, default_value = "ultrasound")]
    pub range_radiation: RadiationType,

    /// Range finder field of view in radians.
    #[arg(long, env, default_value = "0.5235988")]
    pub range_fov: f32,

    #[arg(long, env, default_value = "0.1")]
    pub range_min: f32,

    #[arg(long, env, default_value = "10")]
    pub range_max: f32,

    #[arg(long, env, default_value = "10")]
    pub range_rate: f64,

    #[arg(long, env, default_value = "range")]
    pub range_frame_id: String,

    #[arg(long, env, default_value = "rt/range")]
    pub range_topic: String,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    /// zenoh connection mode
    #[arg(long, env, default_value = "peer")]
    mode: WhatAmI,

    /// connect to zenoh endpoints
    #[arg(long, env)]
    connect: Vec<String>,

    /// listen to zenoh endpoints
    #[arg(long, env)]
    listen: Vec<String>,

    /// disable zenoh multicast scouting
    #[arg(long, env)]
    no_multicast_scouting: bool,
}

impl Args {
    pub fn enabled(&self, sensor: SensorType) -> bool {
        self.sensors.contains(&sensor)
    }

    pub fn width(&self) -> u32 {
        self.camera_size[0]
    }

    pub fn height(&self) -> u32 {
        self.camera_size[1]
    }

    pub fn pattern_spec(&self) -> PatternSpec {
        PatternSpec {
            zenith_angles: self.lidar_channels.clone(),
            min_azimuth: 0.0,
            max_azimuth: 360.0,
            azimuth_resolution: self.lidar_resolution,
            direction: self.lidar_direction,
        }
    }

    pub fn lidar_config(&self) -> LidarConfig {
        LidarConfig {
            points_per_scan: self.points_per_scan.unwrap_or(usize::MAX),
            min_range: self.lidar_min_range,
            max_range: self.lidar_max_range,
            noise_sigma: self.lidar_noise,
            drop_invalid: !self.keep_invalid,
            seed: self.seed,
            ..Default::default()
        }
    }

    pub fn depth_config(&self) -> DepthCameraConfig {
        DepthCameraConfig {
            width: self.width(),
            height: self.height(),
            fov: self.camera_fov,
            near: self.depth_near,
            far: self.depth_far,
            format: self.depth_format,
            mode: self.depth_mode,
            points: self.enabled(SensorType::DepthPoints),
            drop_invalid: !self.keep_invalid,
            seed: self.seed,
            ..Default::default()
        }
    }

    pub fn compression_config(&self) -> CompressionConfig {
        CompressionConfig {
            width: self.width(),
            height: self.height(),
            codec: self.codec,
            quality: self.quality,
            chroma: self.chroma,
            layout: self.pixel_layout,
            ..Default::default()
        }
    }

    pub fn physical_camera(&self) -> Option<PhysicalCamera> {
        self.sensor_size.as_ref().map(|size| PhysicalCamera {
            sensor_width: size[0],
            sensor_height: size[1],
            gate_fit: self.gate_fit,
        })
    }

    pub fn gps_config(&self) -> GpsConfig {
        GpsConfig {
            origin: GeoPoint {
                latitude: self.gps_origin[0],
                longitude: self.gps_origin[1],
                altitude: self.gps_origin[2],
            },
            noise: self.gps_noise.then(GpsNoise::default),
            seed: self.seed,
        }
    }

    pub fn range_config(&self) -> RangeConfig {
        RangeConfig {
            radiation_type: self.range_radiation,
            field_of_view: self.range_fov,
            min_range: self.range_min,
            max_range: self.range_max,
            ..Default::default()
        }
    }
}

impl TryFrom<&Args> for Config {
    type Error = zenoh::Error;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let mut config = Config::default();

        config.insert_json5("mode", &json!(args.mode).to_string())?;

        if !args.connect.is_empty() {
            config.insert_json5("connect/endpoints", &json!(args.connect).to_string())?;
        }

        if !args.listen.is_empty() {
            config.insert_json5("listen/endpoints", &json!(args.listen).to_string())?;
        }

        if args.no_multicast_scouting {
            config.insert_json5("scouting/multicast/enabled", &json!(false).to_string())?;
        }

        config.insert_json5("scouting/multicast/interface", &json!("lo").to_string())?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["simpub"]);
        assert!(args.enabled(SensorType::Lidar));
        assert!(!args.enabled(SensorType::Depth));
        assert_eq!(args.lidar_channels.len(), 16);
        assert_eq!((args.width(), args.height()), (640, 480));
        assert_eq!(args.chroma, ChromaSubsampling::Yuv420);
        assert_eq!(args.depth_mode, DepthMode::UInt16Millimeters);
        assert!(args.lidar_config().drop_invalid);
        assert!(args.physical_camera().is_none());
    }

    #[test]
    fn test_sensor_list_and_zenoh_config() {
        let args = Args::parse_from([
            "simpub",
            "--sensors",
            "depth,depth_points,range",
            "--connect",
            "tcp/127.0.0.1:7447",
            "--mode",
            "client",
        ]);
        assert!(args.enabled(SensorType::DepthPoints));
        assert!(args.depth_config().points);
        assert!(!args.enabled(SensorType::Lidar));
        assert!(Config::try_from(&args).is_ok());
    }
}
