// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Analytic stand-in for the real-time engine.
//!
//! A ground plane with spheres answers ray queries and renders the same
//! buffers the engine's GPU readbacks would hand over: normalized depth
//! (far = 0, near = 1) in any [`DepthFormat`] and RGBA or RGB color, both
//! in bottom-up row order. A circular trajectory supplies rigid-body state
//! for the inertial and navigation sensors.

use crate::{
    compressor::PixelLayout,
    depth::DepthFormat,
    frames::Pose,
    imu::RigidBodyState,
    lidar::{RayCaster, RayHit},
};
use nalgebra::{UnitQuaternion, Vector3};
use rayon::prelude::*;

const SKY: [u8; 4] = [135, 206, 235, 255];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    pub center: [f32; 3],
    pub radius: f32,
    pub color: [u8; 3],
    pub reflectance: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ground {
    pub height: f32,
    pub reflectance: f32,
    /// Checkerboard colors on a one meter grid.
    pub colors: [[u8; 3]; 2],
}

struct SurfaceHit {
    distance: f32,
    reflectance: f32,
    color: [u8; 3],
}

#[inline]
fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

impl Sphere {
    fn intersect(&self, origin: [f32; 3], dir: [f32; 3]) -> Option<f32> {
        let oc = [
            origin[0] - self.center[0],
            origin[1] - self.center[1],
            origin[2] - self.center[2],
        ];
        let b = dot(oc, dir);
        let c = dot(oc, oc) - self.radius * self.radius;
        let disc = b * b - c;
        if disc < 0.0 {
            return None;
        }
        let sq = disc.sqrt();
        [-b - sq, -b + sq].into_iter().find(|&t| t >= 0.0)
    }
}

impl Ground {
    fn intersect(&self, origin: [f32; 3], dir: [f32; 3]) -> Option<f32> {
        if dir[1].abs() < 1e-6 {
            return None;
        }
        let t = (self.height - origin[1]) / dir[1];
        (t >= 0.0).then_some(t)
    }

    fn color_at(&self, x: f32, z: f32) -> [u8; 3] {
        let parity = (x.floor() as i64 + z.floor() as i64).rem_euclid(2);
        self.colors[parity as usize]
    }
}

/// Ground plane and spheres in the engine world frame.
#[derive(Clone, Debug, Default)]
pub struct SyntheticScene {
    pub ground: Option<Ground>,
    pub spheres: Vec<Sphere>,
}

impl SyntheticScene {
    /// A ground plane at y = 0 ringed by spheres.
    pub fn demo() -> Self {
        let palette = [[200, 60, 60], [60, 200, 60], [60, 60, 200], [200, 200, 60]];
        let spheres = (0..8)
            .map(|i| {
                let a = i as f32 * std::f32::consts::FRAC_PI_4;
                let r = 12.0 + 3.0 * (i % 3) as f32;
                Sphere {
                    center: [r * a.sin(), 1.5, r * a.cos()],
                    radius: 1.5,
                    color: palette[i % palette.len()],
                    reflectance: 0.4 + 0.075 * i as f32,
                }
            })
            .collect();
        Self {
            ground: Some(Ground {
                height: 0.0,
                reflectance: 0.2,
                colors: [[90, 90, 90], [160, 160, 160]],
            }),
            spheres,
        }
    }

    fn trace(&self, origin: [f32; 3], dir: [f32; 3], max_distance: f32) -> Option<SurfaceHit> {
        let mut best: Option<SurfaceHit> = None;
        let mut consider = |t: f32, reflectance: f32, color: [u8; 3]| {
            if t <= max_distance && best.as_ref().is_none_or(|b| t < b.distance) {
                best = Some(SurfaceHit {
                    distance: t,
                    reflectance,
                    color,
                });
            }
        };

        if let Some(ground) = &self.ground {
            if let Some(t) = ground.intersect(origin, dir) {
                let x = origin[0] + dir[0] * t;
                let z = origin[2] + dir[2] * t;
                consider(t, ground.reflectance, ground.color_at(x, z));
            }
        }
        for sphere in &self.spheres {
            if let Some(t) = sphere.intersect(origin, dir) {
                consider(t, sphere.reflectance, sphere.color);
            }
        }
        best
    }

    /// Render normalized depth in `format` into `out`.
    ///
    /// Pixel rays match [`crate::depth::DepthProjector`] so decoding and
    /// projecting the result reproduces the hit points.
    pub fn render_depth(
        &self,
        pose: &Pose,
        width: u32,
        height: u32,
        vfov_deg: f32,
        far: f32,
        format: DepthFormat,
        out: &mut [u8],
    ) {
        let origin = pose.origin();
        let rays = CameraRays::new(width, height, vfov_deg);
        let size = format.channel_size();
        out.par_chunks_exact_mut(width as usize * size)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.chunks_exact_mut(size).enumerate() {
                    let dir = pose.world_direction(rays.direction(x as u32, y as u32));
                    let norm = match self.trace(origin, dir, far) {
                        Some(hit) => 1.0 - hit.distance / far,
                        None => 0.0,
                    };
                    format.write_normalized(norm, px);
                }
            });
    }

    /// Render color in `layout` into `out`, shading hits by reflectance.
    pub fn render_color(
        &self,
        pose: &Pose,
        width: u32,
        height: u32,
        vfov_deg: f32,
        layout: PixelLayout,
        out: &mut [u8],
    ) {
        let origin = pose.origin();
        let rays = CameraRays::new(width, height, vfov_deg);
        let bpp = layout.bytes_per_pixel();
        out.par_chunks_exact_mut(width as usize * bpp)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.chunks_exact_mut(bpp).enumerate() {
                    let dir = pose.world_direction(rays.direction(x as u32, y as u32));
                    let rgba = match self.trace(origin, dir, f32::INFINITY) {
                        Some(hit) => {
                            let shade = 0.6 + 0.4 * hit.reflectance.clamp(0.0, 1.0);
                            let [r, g, b] = hit.color.map(|c| (c as f32 * shade) as u8);
                            [r, g, b, 255]
                        }
                        None => SKY,
                    };
                    px.copy_from_slice(&rgba[..bpp]);
                }
            });
    }
}

impl RayCaster for SyntheticScene {
    fn cast(&self, origin: [f32; 3], direction: [f32; 3], max_distance: f32) -> Option<RayHit> {
        self.trace(origin, direction, max_distance)
            .map(|hit| RayHit {
                distance: hit.distance,
                reflectance: hit.reflectance,
            })
    }
}

/// Per-pixel camera rays, bottom-up rows.
struct CameraRays {
    cx: f32,
    cy: f32,
    z: f32,
}

impl CameraRays {
    fn new(width: u32, height: u32, vfov_deg: f32) -> Self {
        Self {
            cx: (width / 2) as f32,
            cy: (height / 2) as f32,
            z: height as f32 * 0.5 / (vfov_deg * 0.5).to_radians().tan(),
        }
    }

    #[inline]
    fn direction(&self, x: u32, y: u32) -> [f32; 3] {
        let v = [x as f32 - self.cx, y as f32 - self.cy, self.z];
        let n = dot(v, v).sqrt();
        [v[0] / n, v[1] / n, v[2] / n]
    }
}

/// Constant-speed circle in the horizontal plane, facing along the path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CircularTrajectory {
    pub radius: f64,
    pub height: f64,
    /// Radians per second.
    pub angular_speed: f64,
}

impl Default for CircularTrajectory {
    fn default() -> Self {
        Self {
            radius: 5.0,
            height: 1.5,
            angular_speed: 0.2,
        }
    }
}

impl CircularTrajectory {
    pub fn state_at(&self, t: f64) -> RigidBodyState {
        let a = self.angular_speed * t;
        let (s, c) = a.sin_cos();
        let speed = self.radius * self.angular_speed;
        RigidBodyState {
            position: Vector3::new(self.radius * c, self.height, self.radius * s),
            velocity: Vector3::new(-speed * s, 0.0, speed * c),
            rotation: UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -a),
            angular_velocity: Vector3::new(0.0, -self.angular_speed, 0.0),
        }
    }

    pub fn pose_at(&self, t: f64) -> Pose {
        let state = self.state_at(t);
        let p = state.position;
        Pose::new(
            [p.x as f32, p.y as f32, p.z as f32],
            state.rotation.cast::<f32>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::{DepthCamera, DepthCameraConfig, DepthMode};
    use approx::assert_relative_eq;

    fn sphere_ahead() -> SyntheticScene {
        SyntheticScene {
            ground: None,
            spheres: vec![Sphere {
                center: [0.0, 0.0, 10.0],
                radius: 1.0,
                color: [255, 0, 0],
                reflectance: 0.5,
            }],
        }
    }

    #[test]
    fn test_sphere_hit_distance() {
        let hit = sphere_ahead().cast([0.0; 3], [0.0, 0.0, 1.0], 100.0).unwrap();
        assert_relative_eq!(hit.distance, 9.0, epsilon = 1e-5);
        assert_relative_eq!(hit.reflectance, 0.5);
        assert!(sphere_ahead().cast([0.0; 3], [0.0, 0.0, 1.0], 5.0).is_none());
        assert!(sphere_ahead().cast([0.0; 3], [0.0, 0.0, -1.0], 100.0).is_none());
    }

    #[test]
    fn test_ground_hit() {
        let scene = SyntheticScene::demo();
        let d = [0.0, -(0.5f32.sqrt()), 0.5f32.sqrt()];
        let hit = scene.cast([0.0, 2.0, 0.0], d, 100.0).unwrap();
        assert_relative_eq!(hit.distance, 2.0 * 2.0f32.sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_render_depth_round_trips_through_camera() {
        let (w, h) = (8, 6);
        let config = DepthCameraConfig {
            width: w,
            height: h,
            fov: 30.0,
            far: 50.0,
            format: DepthFormat::R16Unorm,
            mode: DepthMode::Float32Meters,
            ..Default::default()
        };
        let mut raw = vec![0u8; (w * h * 2) as usize];
        sphere_ahead().render_depth(
            &Pose::default(),
            w,
            h,
            30.0,
            50.0,
            DepthFormat::R16Unorm,
            &mut raw,
        );

        let (mut camera, outputs) = DepthCamera::new(&config).unwrap();
        camera.on_readback(&raw, 1).unwrap();
        let image = outputs.image.take().unwrap();

        // centre pixel after the flip: bottom-up row h/2 lands at h-1-h/2
        let row = (h - 1 - h / 2) as usize;
        let at = row * image.step as usize + (w / 2) as usize * 4;
        let depth = f32::from_le_bytes(image.data[at..at + 4].try_into().unwrap());
        assert_relative_eq!(depth, 9.0, epsilon = 2e-3);
    }

    #[test]
    fn test_render_color_sky_and_sphere() {
        let (w, h) = (9, 9);
        let mut out = vec![0u8; (w * h * 4) as usize];
        sphere_ahead().render_color(&Pose::default(), w, h, 10.0, PixelLayout::Rgba, &mut out);
        let centre = ((h / 2) * w + w / 2) as usize * 4;
        assert_eq!(out[centre + 3], 255);
        assert!(out[centre] > 200 && out[centre + 1] == 0);
        assert_eq!(&out[0..4], &SKY);

        let mut rgb = vec![0u8; (w * h * 3) as usize];
        sphere_ahead().render_color(&Pose::default(), w, h, 10.0, PixelLayout::Rgb, &mut rgb);
        assert_eq!(&rgb[0..3], &SKY[..3]);
    }

    #[test]
    fn test_trajectory_faces_velocity() {
        let traj = CircularTrajectory::default();
        for t in [0.0, 1.3, 7.9] {
            let s = traj.state_at(t);
            let forward = s.rotation * Vector3::z();
            let v = s.velocity.normalize();
            assert_relative_eq!(forward, v, epsilon = 1e-9);
            assert_relative_eq!(s.position.y, 1.5);
        }
    }

    #[test]
    fn test_trajectory_velocity_matches_position() {
        let traj = CircularTrajectory::default();
        let dt = 1e-4;
        let p0 = traj.state_at(2.0).position;
        let p1 = traj.state_at(2.0 + dt).position;
        assert_relative_eq!((p1 - p0) / dt, traj.state_at(2.0).velocity, epsilon = 1e-3);
    }
}
