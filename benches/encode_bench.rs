// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Benchmarks for the per-capture encoding hot paths.
//!
//! Measures:
//! - PointCloud2 packing with and without invalid-row compaction, on both
//!   sides of the parallel threshold
//! - Depth readback decoding to millimeters
//! - Depth-to-point projection
//! - JPEG compression of a color readback
//!
//! Run with: cargo bench --bench encode_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use edgefirst_simpub::{
    buffer::SampleBuffer,
    compressor::{CompressionConfig, ImageCodec, compress},
    depth::{DepthDecoder, DepthFormat, DepthMode, DepthProjector},
    formats::PointCloudEncoder,
};
use std::hint::black_box;

/// Samples on a sphere-ish shell; every `invalid_every`-th one is a miss.
fn generate_samples(n: usize, invalid_every: usize) -> SampleBuffer {
    let mut samples = SampleBuffer::with_capacity(n);
    for i in 0..n {
        if invalid_every > 0 && i % invalid_every == 0 {
            samples.push(0.0, 0.0, 0.0, 0.0);
            continue;
        }
        let a = i as f32 * 2.399; // golden angle
        let r = 5.0 + (i % 97) as f32 * 0.1;
        let y = (i as f32 * 0.01).sin();
        samples.push(r * a.cos(), y, r * a.sin(), (i % 256) as f32);
    }
    samples
}

fn bench_point_cloud(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_cloud_encode");
    for &n in &[10_000usize, 65_536, 262_144] {
        let samples = generate_samples(n, 4);
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("keep_all", n), &samples, |b, s| {
            let mut encoder = PointCloudEncoder::new(true, false);
            b.iter(|| encoder.encode(black_box(s), 0))
        });
        group.bench_with_input(BenchmarkId::new("drop_invalid", n), &samples, |b, s| {
            let mut encoder = PointCloudEncoder::new(true, true);
            b.iter(|| encoder.encode(black_box(s), 0))
        });
    }
    group.finish();
}

fn depth_readback(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| (((i * 31) % 65_535) as u16).to_le_bytes())
        .collect()
}

fn bench_depth(c: &mut Criterion) {
    let (w, h) = (640, 480);
    let raw = depth_readback(w, h);
    let mut group = c.benchmark_group("depth");
    group.throughput(Throughput::Elements((w * h) as u64));

    group.bench_function("decode_millimeters", |b| {
        let decoder = DepthDecoder::new(
            w,
            h,
            20.0,
            DepthFormat::R16Unorm,
            DepthMode::UInt16Millimeters,
        );
        let mut out = Vec::new();
        b.iter(|| decoder.decode_into(black_box(&raw), &mut out))
    });

    group.bench_function("project", |b| {
        let decoder =
            DepthDecoder::new(w, h, 20.0, DepthFormat::R16Unorm, DepthMode::Float32Meters);
        let mut depths = Vec::new();
        let _ = decoder.depth_meters_into(&raw, &mut depths);
        let mut projector = DepthProjector::new(w, h, 60.0, 0.05, 20.0);
        let mut samples = SampleBuffer::with_capacity((w * h) as usize);
        b.iter(|| projector.project_into(black_box(&depths), &mut samples))
    });
    group.finish();
}

fn bench_jpeg(c: &mut Criterion) {
    let config = CompressionConfig {
        codec: ImageCodec::Jpeg,
        ..Default::default()
    };
    let pixels: Vec<u8> = (0..config.frame_len()).map(|i| (i % 251) as u8).collect();
    let mut scratch = Vec::new();
    c.bench_function("jpeg_640x480", |b| {
        b.iter(|| compress(&config, black_box(&pixels), &mut scratch))
    });
}

criterion_group!(benches, bench_point_cloud, bench_depth, bench_jpeg);
criterion_main!(benches);
