// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Fixed-rate emission of the freshest encoded frames.
//!
//! The emitter owns no timer. Callers drive [`MessageEmitter::tick_all`]
//! with the current time from an injected [`crate::sensor::Clock`]; each
//! source is polled at its own period and forwards at most one frame per
//! due tick, stamped with the frame's capture time.

use crate::{
    compressor::CompressedFrames,
    slot::SlotReader,
    wire::{PublishSink, WireMessage},
};
use tracing::trace;

/// Something the emitter can poll for a new frame.
pub trait FrameSource: Send {
    /// Take the newest unconsumed frame. `None` means nothing new.
    fn take_frame(&mut self, now: u64) -> Option<WireMessage>;
}

/// Adapts a freshest-wins slot into a [`FrameSource`].
pub struct SlotSource<T> {
    rx: SlotReader<T>,
}

impl<T> SlotSource<T> {
    pub fn new(rx: SlotReader<T>) -> Self {
        Self { rx }
    }
}

impl<T> FrameSource for SlotSource<T>
where
    T: Into<WireMessage> + Send,
{
    fn take_frame(&mut self, _now: u64) -> Option<WireMessage> {
        self.rx.take().map(Into::into)
    }
}

impl FrameSource for CompressedFrames {
    fn take_frame(&mut self, now: u64) -> Option<WireMessage> {
        CompressedFrames::take_frame(self, now).map(Into::into)
    }
}

/// Polls one source at a fixed period.
pub struct FrameScheduler {
    source: Box<dyn FrameSource>,
    period: u64,
    next_due: u64,
    emitted: u64,
}

impl FrameScheduler {
    /// Poll `source` every `period` nanoseconds. A zero period polls on
    /// every tick.
    pub fn new(source: Box<dyn FrameSource>, period: u64) -> Self {
        Self {
            source,
            period,
            next_due: 0,
            emitted: 0,
        }
    }

    /// Scheduler polling at `rate` Hz.
    pub fn with_rate(source: Box<dyn FrameSource>, rate: f64) -> Self {
        let period = if rate > 0.0 {
            (crate::sensor::NANOS_PER_SEC as f64 / rate) as u64
        } else {
            0
        };
        Self::new(source, period)
    }

    #[inline]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Return the newest frame if the source is due and has one.
    ///
    /// A late tick does not cause a burst: when more than one period was
    /// missed the schedule restarts from `now`.
    pub fn tick(&mut self, now: u64) -> Option<WireMessage> {
        if now < self.next_due {
            return None;
        }
        self.next_due = self.next_due.saturating_add(self.period);
        if self.next_due <= now {
            self.next_due = now.saturating_add(self.period);
        }

        let msg = self.source.take_frame(now)?;
        self.emitted += 1;
        Some(msg)
    }
}

/// Topic-addressed schedulers feeding one sink.
pub struct MessageEmitter<S> {
    schedulers: Vec<(String, FrameScheduler)>,
    sink: S,
}

impl<S: PublishSink> MessageEmitter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            schedulers: Vec::new(),
            sink,
        }
    }

    pub fn add(&mut self, topic: impl Into<String>, scheduler: FrameScheduler) {
        self.schedulers.push((topic.into(), scheduler));
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.schedulers.iter().map(|(t, _)| t.as_str())
    }

    #[inline]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Tick every scheduler and publish what they return. Returns the
    /// number of messages published.
    pub fn tick_all(&mut self, now: u64) -> usize {
        let mut published = 0;
        for (topic, scheduler) in &mut self.schedulers {
            if let Some(msg) = scheduler.tick(now) {
                let timestamp = msg.timestamp();
                trace!(topic = %topic, timestamp, bytes = msg.payload_len(), "emit");
                self.sink.publish(topic, msg, timestamp);
                published += 1;
            }
        }
        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gps::{GeoPoint, GpsFix},
        sensor::{Clock, ManualClock},
        slot::freshest_slot,
    };
    use parking_lot::Mutex;

    fn fix(timestamp: u64) -> GpsFix {
        GpsFix {
            position: GeoPoint::default(),
            timestamp,
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, u64)>>);

    impl PublishSink for Recorder {
        fn publish(&self, topic: &str, _msg: WireMessage, timestamp: u64) {
            self.0.lock().push((topic.to_owned(), timestamp));
        }
    }

    #[test]
    fn test_tick_carries_capture_timestamp() {
        let (tx, rx) = freshest_slot();
        let mut sched = FrameScheduler::new(Box::new(SlotSource::new(rx)), 10);
        assert!(sched.tick(0).is_none());

        tx.publish(fix(3));
        // not due yet
        assert!(sched.tick(5).is_none());
        let msg = sched.tick(10).unwrap();
        assert_eq!(msg.timestamp(), 3);
        assert_eq!(sched.emitted(), 1);

        // consumed exactly once
        assert!(sched.tick(20).is_none());
    }

    #[test]
    fn test_late_tick_does_not_burst() {
        let (tx, rx) = freshest_slot();
        let mut sched = FrameScheduler::new(Box::new(SlotSource::new(rx)), 10);
        tx.publish(fix(1));
        assert!(sched.tick(100).is_some());
        tx.publish(fix(2));
        // schedule restarted at 100, next due at 110
        assert!(sched.tick(105).is_none());
        assert!(sched.tick(110).is_some());
    }

    #[test]
    fn test_emitter_with_manual_clock() {
        let clock = ManualClock::new(0);
        let (fast_tx, fast_rx) = freshest_slot();
        let (slow_tx, slow_rx) = freshest_slot();

        let mut emitter = MessageEmitter::new(Recorder::default());
        emitter.add(
            "fast",
            FrameScheduler::with_rate(Box::new(SlotSource::new(fast_rx)), 100.0),
        );
        emitter.add(
            "slow",
            FrameScheduler::with_rate(Box::new(SlotSource::new(slow_rx)), 10.0),
        );
        assert_eq!(emitter.topics().collect::<Vec<_>>(), vec!["fast", "slow"]);

        // producer at 200 Hz, emitter ticking every 5 ms for 100 ms
        for _ in 0..20 {
            let now = clock.now();
            fast_tx.publish(fix(now));
            slow_tx.publish(fix(now));
            emitter.tick_all(now);
            clock.advance(5_000_000);
        }

        let log = emitter.sink().0.lock();
        let fast: Vec<u64> = log.iter().filter(|(t, _)| t == "fast").map(|(_, ts)| *ts).collect();
        let slow: Vec<u64> = log.iter().filter(|(t, _)| t == "slow").map(|(_, ts)| *ts).collect();
        assert_eq!(fast.len(), 10);
        assert_eq!(slow.len(), 1);
        assert!(fast.windows(2).all(|w| w[0] < w[1]));
    }
}
