// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Simulated satellite navigation fix.
//!
//! Engine displacement from the start position is treated as east/north/up
//! meters on the local tangent plane at the configured origin and converted
//! to geodetic coordinates with the WGS-84 meridian and prime-vertical radii.

use crate::{
    frames::to_enu,
    sensor::{Error, Result},
    slot::{SlotReader, SlotWriter, freshest_slot},
};
use nalgebra::Vector3;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_E2: f64 = 6.694_379_990_14e-3;

/// Geodetic position in degrees and meters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Offset `origin` by `enu` meters.
pub fn local_to_global(enu: &Vector3<f64>, origin: &GeoPoint) -> GeoPoint {
    let lat = origin.latitude.to_radians();
    let s = lat.sin();
    let w = (1.0 - WGS84_E2 * s * s).sqrt();
    let meridian = WGS84_A * (1.0 - WGS84_E2) / (w * w * w);
    let prime_vertical = WGS84_A / w;

    GeoPoint {
        latitude: origin.latitude + (enu.y / meridian).to_degrees(),
        longitude: origin.longitude + (enu.x / (prime_vertical * lat.cos())).to_degrees(),
        altitude: origin.altitude + enu.z,
    }
}

/// Per-axis noise standard deviations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpsNoise {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl Default for GpsNoise {
    fn default() -> Self {
        // 1e-5 degrees is roughly 1.1 m
        Self {
            latitude_deg: 1e-5,
            longitude_deg: 1e-5,
            altitude_m: 5.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GpsConfig {
    pub origin: GeoPoint,
    pub noise: Option<GpsNoise>,
    pub seed: Option<u64>,
}

/// A navigation fix ready for the wire.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpsFix {
    pub position: GeoPoint,
    pub timestamp: u64,
}

struct NoiseModel {
    latitude: Normal<f64>,
    longitude: Normal<f64>,
    altitude: Normal<f64>,
    rng: StdRng,
}

pub struct GpsSensor {
    origin: GeoPoint,
    start: Vector3<f64>,
    noise: Option<NoiseModel>,
    tx: SlotWriter<GpsFix>,
}

impl GpsSensor {
    /// Anchor the configured origin at engine position `start`.
    pub fn new(config: &GpsConfig, start: Vector3<f64>) -> Result<(Self, SlotReader<GpsFix>)> {
        let noise = match config.noise {
            Some(n) => {
                let normal = |sigma: f64| {
                    Normal::new(0.0, sigma).map_err(|e| Error::Config(format!("gps noise: {e}")))
                };
                Some(NoiseModel {
                    latitude: normal(n.latitude_deg)?,
                    longitude: normal(n.longitude_deg)?,
                    altitude: normal(n.altitude_m)?,
                    rng: match config.seed {
                        Some(seed) => StdRng::seed_from_u64(seed),
                        None => StdRng::from_entropy(),
                    },
                })
            }
            None => None,
        };
        let (tx, rx) = freshest_slot();
        Ok((
            Self {
                origin: config.origin,
                start,
                noise,
                tx,
            },
            rx,
        ))
    }

    /// Convert the engine position and publish the fix.
    pub fn update(&mut self, position: &Vector3<f64>, timestamp: u64) -> GpsFix {
        let enu = to_enu(&(position - self.start));
        let mut geo = local_to_global(&enu, &self.origin);
        if let Some(n) = &mut self.noise {
            geo.latitude += n.latitude.sample(&mut n.rng);
            geo.longitude += n.longitude.sample(&mut n.rng);
            geo.altitude += n.altitude.sample(&mut n.rng);
        }
        let fix = GpsFix {
            position: geo,
            timestamp,
        };
        self.tx.publish(fix);
        fix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn origin() -> GeoPoint {
        GeoPoint {
            latitude: 45.0,
            longitude: -75.0,
            altitude: 100.0,
        }
    }

    #[test]
    fn test_start_position_is_origin() {
        let config = GpsConfig {
            origin: origin(),
            ..Default::default()
        };
        let start = Vector3::new(10.0, 2.0, -4.0);
        let (mut gps, rx) = GpsSensor::new(&config, start).unwrap();
        let fix = gps.update(&start, 99);
        assert_eq!(fix.position, origin());
        assert_eq!(rx.take().map(|f| f.timestamp), Some(99));
    }

    #[test]
    fn test_north_and_up() {
        let config = GpsConfig {
            origin: origin(),
            ..Default::default()
        };
        let (mut gps, _rx) = GpsSensor::new(&config, Vector3::zeros()).unwrap();
        // engine +z is north, +y is up
        let fix = gps.update(&Vector3::new(0.0, 3.0, 1000.0), 0);
        // about 111.1 km per degree of latitude at 45°
        assert_relative_eq!(fix.position.latitude - 45.0, 1000.0 / 111_132.0, epsilon = 1e-5);
        assert_relative_eq!(fix.position.longitude, -75.0);
        assert_relative_eq!(fix.position.altitude, 103.0);
    }

    #[test]
    fn test_east_scales_with_latitude() {
        let equator = local_to_global(&Vector3::new(1000.0, 0.0, 0.0), &GeoPoint::default());
        let north = local_to_global(
            &Vector3::new(1000.0, 0.0, 0.0),
            &GeoPoint {
                latitude: 60.0,
                ..Default::default()
            },
        );
        assert!(north.longitude > 1.9 * equator.longitude);
        assert_eq!(north.latitude, 60.0);
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let config = GpsConfig {
            origin: origin(),
            noise: Some(GpsNoise::default()),
            seed: Some(42),
        };
        let (mut a, _) = GpsSensor::new(&config, Vector3::zeros()).unwrap();
        let (mut b, _) = GpsSensor::new(&config, Vector3::zeros()).unwrap();
        let fa = a.update(&Vector3::zeros(), 0);
        let fb = b.update(&Vector3::zeros(), 0);
        assert_eq!(fa, fb);
        assert_ne!(fa.position, origin());
    }

    #[test]
    fn test_negative_noise_rejected() {
        let config = GpsConfig {
            noise: Some(GpsNoise {
                altitude_m: -1.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(GpsSensor::new(&config, Vector3::zeros()).is_err());
    }
}
