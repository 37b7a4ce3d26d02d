// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;
mod publisher;

use args::Args;
use clap::Parser;
use edgefirst_simpub::{
    camera_info::CameraInfoSource,
    compressor::ImageCompressor,
    depth::{DepthCamera, DepthFormat},
    gps::GpsSensor,
    imu::ImuSensor,
    lidar::RaycastLidar,
    range::RangeSensor,
    scan_pattern::{ScanPattern, stride_for_downsample},
    scene::{CircularTrajectory, SyntheticScene},
    scheduler::{FrameScheduler, MessageEmitter, SlotSource},
    sensor::{Clock, MonotonicClock, NANOS_PER_SEC, SensorType},
    wire::ChannelSink,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle, sleep},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

/// Messages buffered between the emitter thread and the zenoh task.
const OUTGOING_CAPACITY: usize = 64;

/// Depth camera with its render target.
struct DepthRig {
    camera: DepthCamera,
    raw: Vec<u8>,
    far: f32,
    format: DepthFormat,
}

/// Sensors driven by the capture tick.
struct CaptureRig {
    scene: SyntheticScene,
    trajectory: CircularTrajectory,
    width: u32,
    height: u32,
    fov: f32,
    lidar: Option<RaycastLidar>,
    depth: Option<DepthRig>,
    camera: Option<ImageCompressor>,
    imu: Option<ImuSensor>,
    gps: Option<GpsSensor>,
    range: Option<RangeSensor>,
}

impl CaptureRig {
    /// Advance every sensor to engine time `t` seconds, stamping the
    /// capture with `timestamp`.
    fn tick(&mut self, t: f64, timestamp: u64) -> edgefirst_simpub::Result<()> {
        let state = self.trajectory.state_at(t);
        let pose = self.trajectory.pose_at(t);

        if let Some(lidar) = &mut self.lidar {
            info_span!("lidar").in_scope(|| lidar.capture(&self.scene, &pose, timestamp))?;
        }

        if let Some(depth) = &mut self.depth {
            info_span!("depth").in_scope(|| {
                self.scene.render_depth(
                    &pose,
                    self.width,
                    self.height,
                    self.fov,
                    depth.far,
                    depth.format,
                    &mut depth.raw,
                );
                depth.camera.on_readback(&depth.raw, timestamp)
            })?;
        }

        if let Some(compressor) = &self.camera {
            // None once the compressor is disabled
            if let Some(mut readback) = compressor.begin_readback(timestamp) {
                let layout = compressor.config().layout;
                self.scene.render_color(
                    &pose,
                    self.width,
                    self.height,
                    self.fov,
                    layout,
                    readback.buffer_mut(),
                );
                readback.complete();
            }
        }

        if let Some(imu) = &mut self.imu {
            imu.update(&state, t, timestamp);
        }
        if let Some(gps) = &mut self.gps {
            gps.update(&state.position, timestamp);
        }
        if let Some(range) = &mut self.range {
            range.measure(&self.scene, &pose, timestamp);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(compressor) = &mut self.camera {
            compressor.disable();
            let stats = compressor.stats();
            info!(
                compressed = stats.compressed,
                raw_dropped = stats.raw_dropped,
                failed = stats.failed,
                "camera stopped"
            );
        }
    }
}

fn load_pattern(args: &Args) -> edgefirst_simpub::Result<Arc<ScanPattern>> {
    let source = match (&args.scan_pattern, &args.scan_csv) {
        (Some(path), _) => ScanPattern::load(path)?,
        (None, Some(path)) => ScanPattern::from_csv_path(path, args.zenith_offset)?,
        (None, None) => ScanPattern::generate(&args.pattern_spec())?,
    };
    let stride = stride_for_downsample(args.downsample)?;
    ScanPattern::build(&Arc::new(source), stride, args.azimuth[0], args.azimuth[1])
}

/// Build the enabled sensors, registering their outputs with `emitter`.
/// Returns the rig and the `(topic, frame_id)` pairs to declare.
fn build(
    args: &Args,
    emitter: &mut MessageEmitter<Arc<ChannelSink>>,
) -> edgefirst_simpub::Result<(CaptureRig, Vec<(String, String)>)> {
    let trajectory = CircularTrajectory {
        radius: args.orbit_radius,
        height: args.orbit_height,
        angular_speed: args.orbit_speed,
    };
    let mut rig = CaptureRig {
        scene: SyntheticScene::demo(),
        trajectory,
        width: args.width(),
        height: args.height(),
        fov: args.camera_fov,
        lidar: None,
        depth: None,
        camera: None,
        imu: None,
        gps: None,
        range: None,
    };
    let mut topics = Vec::new();

    if args.enabled(SensorType::Lidar) {
        let pattern = load_pattern(args)?;
        info!(
            directions = pattern.len(),
            min_zenith = pattern.min_zenith(),
            max_zenith = pattern.max_zenith(),
            "scan pattern loaded"
        );
        let (lidar, rx) = RaycastLidar::new(pattern, args.lidar_config())?;
        emitter.add(
            &args.lidar_topic,
            FrameScheduler::with_rate(Box::new(SlotSource::new(rx)), args.lidar_rate),
        );
        topics.push((args.lidar_topic.clone(), args.lidar_frame_id.clone()));
        rig.lidar = Some(lidar);
    }

    if args.enabled(SensorType::Depth) || args.enabled(SensorType::DepthPoints) {
        let config = args.depth_config();
        let (camera, outputs) = DepthCamera::new(&config)?;
        emitter.add(
            &args.depth_topic,
            FrameScheduler::with_rate(Box::new(SlotSource::new(outputs.image)), args.depth_rate),
        );
        topics.push((args.depth_topic.clone(), args.depth_frame_id.clone()));
        if let Some(points) = outputs.points {
            emitter.add(
                &args.depth_points_topic,
                FrameScheduler::with_rate(Box::new(SlotSource::new(points)), args.depth_rate),
            );
            topics.push((args.depth_points_topic.clone(), args.depth_frame_id.clone()));
        }
        rig.depth = Some(DepthRig {
            raw: vec![0u8; camera.expected_len()],
            camera,
            far: config.far,
            format: config.format,
        });
    }

    if args.enabled(SensorType::Camera) {
        let (mut compressor, frames) = ImageCompressor::new(args.compression_config())?;
        compressor.enable()?;
        emitter.add(
            &args.camera_topic,
            FrameScheduler::with_rate(Box::new(frames), args.camera_rate),
        );
        topics.push((args.camera_topic.clone(), args.camera_frame_id.clone()));
        rig.camera = Some(compressor);
    }

    if args.enabled(SensorType::CameraInfo) {
        let physical = args.physical_camera();
        let source = CameraInfoSource::new(
            args.width(),
            args.height(),
            args.camera_fov as f64,
            args.baseline,
            physical.as_ref(),
        );
        emitter.add(
            &args.camera_info_topic,
            FrameScheduler::with_rate(Box::new(source), args.camera_info_rate),
        );
        topics.push((args.camera_info_topic.clone(), args.camera_frame_id.clone()));
    }

    if args.enabled(SensorType::Imu) {
        let (imu, rx) = ImuSensor::new(0.0);
        emitter.add(
            &args.imu_topic,
            FrameScheduler::with_rate(Box::new(SlotSource::new(rx)), args.imu_rate),
        );
        topics.push((args.imu_topic.clone(), args.imu_frame_id.clone()));
        rig.imu = Some(imu);
    }

    if args.enabled(SensorType::Gps) {
        let start = trajectory.state_at(0.0).position;
        let (gps, rx) = GpsSensor::new(&args.gps_config(), start)?;
        emitter.add(
            &args.gps_topic,
            FrameScheduler::with_rate(Box::new(SlotSource::new(rx)), args.gps_rate),
        );
        topics.push((args.gps_topic.clone(), args.gps_frame_id.clone()));
        rig.gps = Some(gps);
    }

    if args.enabled(SensorType::Range) {
        let (range, rx) = RangeSensor::new(args.range_config())?;
        emitter.add(
            &args.range_topic,
            FrameScheduler::with_rate(Box::new(SlotSource::new(rx)), args.range_rate),
        );
        topics.push((args.range_topic.clone(), args.range_frame_id.clone()));
        rig.range = Some(range);
    }

    Ok((rig, topics))
}

/// Run `f` on `state` every `interval` until `running` is cleared. The
/// thread hands `state` back when it exits.
fn spawn_periodic<S, F>(
    name: &str,
    interval: Duration,
    running: Arc<AtomicBool>,
    mut state: S,
    mut f: F,
) -> std::io::Result<JoinHandle<S>>
where
    S: Send + 'static,
    F: FnMut(&mut S) + Send + 'static,
{
    thread::Builder::new().name(name.to_owned()).spawn(move || {
        let mut target_time = Instant::now() + interval;
        while running.load(Ordering::Acquire) {
            f(&mut state);
            sleep(target_time.saturating_duration_since(Instant::now()));
            target_time += interval;
        }
        state
    })
}

fn join<T>(name: &str, handle: JoinHandle<T>) -> Option<T> {
    match handle.join() {
        Ok(v) => Some(v),
        Err(_) => {
            error!("{} thread panicked", name);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(args.rust_log.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let session = zenoh::open(zenoh::Config::try_from(&args)?).await?;
    debug!("opened zenoh session");

    let (tx, rx) = kanal::bounded(OUTGOING_CAPACITY);
    let sink = Arc::new(ChannelSink::new(tx));
    let mut emitter = MessageEmitter::new(sink.clone());
    let (rig, topics) = build(&args, &mut emitter)?;
    if topics.is_empty() {
        warn!("no sensors enabled");
    }

    let declared = publisher::declare_topics(&session, topics).await?;
    let publish = tokio::spawn(publisher::publish_task(rx.to_async(), declared));

    let clock = MonotonicClock;
    let start = clock.now();
    let running = Arc::new(AtomicBool::new(true));

    let capture = spawn_periodic(
        "capture",
        Duration::from_secs_f64(1.0 / args.tick_rate),
        running.clone(),
        rig,
        move |rig| {
            let now = clock.now();
            let t = now.saturating_sub(start) as f64 / NANOS_PER_SEC as f64;
            if let Err(e) = rig.tick(t, now) {
                error!("capture failed: {:?}", e);
            }
        },
    )?;

    let mut last_report = start;
    let emit = spawn_periodic(
        "emitter",
        Duration::from_secs_f64(1.0 / args.publish_rate),
        running.clone(),
        emitter,
        move |emitter| {
            let now = clock.now();
            emitter.tick_all(now);
            if now.saturating_sub(last_report) >= 10 * NANOS_PER_SEC {
                debug!(dropped = emitter.sink().dropped(), "emitter telemetry");
                last_report = now;
            }
        },
    )?;

    info!("simpub running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("stopping");
    running.store(false, Ordering::Release);

    if let Some(mut rig) = join("capture", capture) {
        rig.shutdown();
    }
    join("emitter", emit);
    drop(sink);
    if let Err(e) = publish.await {
        error!("publisher task failed: {:?}", e);
    }
    session.close().await?;
    Ok(())
}
