// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst Simulated Sensor Publisher Library
//!
//! This library turns rendered engine state into robotic sensor messages:
//! LiDAR point clouds, depth images, compressed camera frames, IMU, GNSS,
//! camera calibration and range readings.
//!
//! # Architecture
//!
//! Capture, encoding and emission run on different threads and only meet
//! at freshest-wins slots:
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────┐     ┌─────────────────┐
//! │  Capture tick   │ ──► │  Sensor       │ ──► │  SlotWriter     │
//! │  (scene, pose)  │     │  (encode)     │     │  (freshest)     │
//! └─────────────────┘     └───────────────┘     └─────────────────┘
//!                                                       │
//!                                                       ▼
//!                               ┌─────────────────────────────────────┐
//!                               │  MessageEmitter                     │
//!                               │  (per-topic FrameScheduler → sink)  │
//!                               └─────────────────────────────────────┘
//! ```
//!
//! Every message carries the timestamp of the capture that produced it,
//! not the time it was emitted.
//!
//! # Modules
//!
//! - [`sensor`]: Error type, sensor kinds and clocks
//! - [`frames`]: Engine to wire coordinate conversions
//! - [`buffer`]: Sample buffers and double buffering
//! - [`slot`]: Freshest-wins single-value handoff
//! - [`scan_pattern`]: LiDAR scan patterns
//! - [`formats`]: PointCloud2 layout and encoding
//! - [`lidar`]: Raycast LiDAR
//! - [`depth`]: Depth decoding and projection
//! - [`compressor`]: Background JPEG/PNG compression
//! - [`imu`], [`gps`], [`camera_info`], [`range`]: Pose-derived sensors
//! - [`scheduler`]: Rate-limited emission
//! - [`wire`]: Wire messages and sinks
//! - [`ros`]: ROS 2 CDR serialization
//! - [`scene`]: Analytic scene and trajectory standing in for the engine
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_simpub::{
//!     lidar::{LidarConfig, RaycastLidar},
//!     scan_pattern::{PatternSpec, ScanPattern},
//!     scene::{CircularTrajectory, SyntheticScene},
//! };
//! use std::sync::Arc;
//!
//! let pattern = Arc::new(ScanPattern::generate(&PatternSpec::default())?);
//! let (mut lidar, points) = RaycastLidar::new(pattern, LidarConfig::default())?;
//! let scene = SyntheticScene::demo();
//! let pose = CircularTrajectory::default().pose_at(0.0);
//!
//! lidar.capture(&scene, &pose, timestamp)?;
//! if let Some(cloud) = points.take() {
//!     println!("{} points", cloud.len());
//! }
//! ```

pub mod buffer;
pub mod camera_info;
pub mod compressor;
pub mod depth;
pub mod formats;
pub mod frames;
pub mod gps;
pub mod imu;
pub mod lidar;
pub mod range;
pub mod ros;
pub mod scan_pattern;
pub mod scene;
pub mod scheduler;
pub mod sensor;
pub mod slot;
pub mod wire;

// Re-exports for convenience
pub use formats::PointFieldType;
pub use sensor::{Error, Result};
pub use wire::{PublishSink, WireMessage};
