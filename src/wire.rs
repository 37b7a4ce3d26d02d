// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Wire messages and the publish sink contract.

use crate::{
    camera_info::CameraInfo,
    compressor::CompressedImage,
    depth::DepthImage,
    formats::PointCloud,
    gps::GpsFix,
    imu::ImuMessage,
    range::RangeReading,
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::trace;

/// One emitted sensor frame, stamped with its capture time.
#[derive(Clone, Debug, PartialEq)]
pub enum WireMessage {
    PointCloud(PointCloud),
    Image(DepthImage),
    CompressedImage(CompressedImage),
    Imu(ImuMessage),
    NavSatFix(GpsFix),
    CameraInfo(CameraInfo),
    Range(RangeReading),
}

impl WireMessage {
    /// Capture timestamp in nanoseconds.
    pub fn timestamp(&self) -> u64 {
        match self {
            WireMessage::PointCloud(m) => m.timestamp,
            WireMessage::Image(m) => m.timestamp,
            WireMessage::CompressedImage(m) => m.timestamp,
            WireMessage::Imu(m) => m.timestamp,
            WireMessage::NavSatFix(m) => m.timestamp,
            WireMessage::CameraInfo(m) => m.timestamp,
            WireMessage::Range(m) => m.timestamp,
        }
    }

    /// Length of the binary payload, zero for fixed-layout messages.
    pub fn payload_len(&self) -> usize {
        match self {
            WireMessage::PointCloud(m) => m.data.len(),
            WireMessage::Image(m) => m.data.len(),
            WireMessage::CompressedImage(m) => m.data.len(),
            _ => 0,
        }
    }

    /// ROS 2 type name of the message on the wire.
    pub fn schema(&self) -> &'static str {
        match self {
            WireMessage::PointCloud(_) => "sensor_msgs/msg/PointCloud2",
            WireMessage::Image(_) => "sensor_msgs/msg/Image",
            WireMessage::CompressedImage(_) => "sensor_msgs/msg/CompressedImage",
            WireMessage::Imu(_) => "sensor_msgs/msg/Imu",
            WireMessage::NavSatFix(_) => "sensor_msgs/msg/NavSatFix",
            WireMessage::CameraInfo(_) => "sensor_msgs/msg/CameraInfo",
            WireMessage::Range(_) => "sensor_msgs/msg/Range",
        }
    }
}

macro_rules! impl_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for WireMessage {
                fn from(m: $ty) -> Self {
                    WireMessage::$variant(m)
                }
            }
        )*
    };
}

impl_from! {
    PointCloud => PointCloud,
    Image => DepthImage,
    CompressedImage => CompressedImage,
    Imu => ImuMessage,
    NavSatFix => GpsFix,
    CameraInfo => CameraInfo,
    Range => RangeReading,
}

/// Downstream transport. Fire-and-forget; delivery failures are the
/// sink's concern.
pub trait PublishSink: Send + Sync {
    fn publish(&self, topic: &str, msg: WireMessage, timestamp: u64);
}

impl<T: PublishSink + ?Sized> PublishSink for Arc<T> {
    fn publish(&self, topic: &str, msg: WireMessage, timestamp: u64) {
        (**self).publish(topic, msg, timestamp)
    }
}

/// A message addressed to a topic.
#[derive(Clone, Debug, PartialEq)]
pub struct Outgoing {
    pub topic: String,
    pub message: WireMessage,
}

/// Forwards messages over a bounded channel, dropping when it is full.
pub struct ChannelSink {
    tx: kanal::Sender<Outgoing>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(tx: kanal::Sender<Outgoing>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Messages dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl PublishSink for ChannelSink {
    fn publish(&self, topic: &str, msg: WireMessage, timestamp: u64) {
        let sent = self
            .tx
            .try_send(Outgoing {
                topic: topic.to_owned(),
                message: msg,
            })
            .unwrap_or(false);
        if !sent {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(topic, timestamp, "sink full, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::GeoPoint;

    fn fix(timestamp: u64) -> WireMessage {
        GpsFix {
            position: GeoPoint::default(),
            timestamp,
        }
        .into()
    }

    #[test]
    fn test_message_metadata() {
        let msg = fix(42);
        assert_eq!(msg.timestamp(), 42);
        assert_eq!(msg.payload_len(), 0);
        assert_eq!(msg.schema(), "sensor_msgs/msg/NavSatFix");

        let img: WireMessage = CompressedImage {
            format: "jpeg",
            width: 1,
            height: 1,
            data: vec![0; 17],
            timestamp: 3,
        }
        .into();
        assert_eq!(img.payload_len(), 17);
        assert_eq!(img.schema(), "sensor_msgs/msg/CompressedImage");
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (tx, rx) = kanal::bounded(1);
        let sink = ChannelSink::new(tx);
        sink.publish("a", fix(1), 1);
        sink.publish("a", fix(2), 2);
        assert_eq!(sink.dropped(), 1);

        let out = rx.try_recv().unwrap().unwrap();
        assert_eq!(out.topic, "a");
        assert_eq!(out.message.timestamp(), 1);
    }

    #[test]
    fn test_channel_sink_closed_receiver() {
        let (tx, rx) = kanal::bounded(4);
        drop(rx);
        let sink = ChannelSink::new(tx);
        sink.publish("a", fix(1), 1);
        assert_eq!(sink.dropped(), 1);
    }
}
