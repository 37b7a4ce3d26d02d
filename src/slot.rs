// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Freshest-wins single-slot handoff.
//!
//! A slot holds at most one value. Publishing into an occupied slot replaces
//! the unconsumed value, which is handed back to the writer so its storage
//! can be recycled. Taking empties the slot. There is never a queue: a slow
//! consumer sees gaps, never stale frames.
//!
//! ```text
//!   producer thread                              consumer thread
//!  ┌──────────────┐   publish()    ┌──────┐   take() / wait_take()  ┌──────────────┐
//!  │  SlotWriter  │ ─────────────► │ slot │ ──────────────────────► │  SlotReader  │
//!  └──────────────┘  (overwrites)  └──────┘      (empties)          └──────────────┘
//! ```
//!
//! Exactly one writer and one reader exist per slot; neither half is
//! `Clone`. Because the writer is the only source of values and each publish
//! replaces the previous one, the reader observes values in publish order
//! with possible gaps, so capture timestamps seen by the consumer never go
//! backwards.

use parking_lot::{Condvar, Mutex};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
    published: AtomicU64,
    superseded: AtomicU64,
    taken: AtomicU64,
}

/// Slot counters, exposed as backpressure telemetry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotStats {
    /// Values written by the producer.
    pub published: u64,
    /// Values overwritten before the consumer took them.
    pub superseded: u64,
    /// Values handed to the consumer.
    pub taken: u64,
}

/// Outcome of [`SlotReader::wait_take`].
#[derive(Debug, PartialEq, Eq)]
pub enum WaitResult<T> {
    Ready(T),
    Timeout,
    /// The writer was closed or dropped and the slot is empty.
    Closed,
}

/// Producer half of a freshest-wins slot.
pub struct SlotWriter<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half of a freshest-wins slot.
pub struct SlotReader<T> {
    shared: Arc<Shared<T>>,
}

/// Create a connected writer/reader pair around an empty slot.
pub fn freshest_slot<T>() -> (SlotWriter<T>, SlotReader<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(SlotState {
            value: None,
            closed: false,
        }),
        ready: Condvar::new(),
        published: AtomicU64::new(0),
        superseded: AtomicU64::new(0),
        taken: AtomicU64::new(0),
    });
    (
        SlotWriter {
            shared: shared.clone(),
        },
        SlotReader { shared },
    )
}

fn stats<T>(shared: &Shared<T>) -> SlotStats {
    SlotStats {
        published: shared.published.load(Ordering::Relaxed),
        superseded: shared.superseded.load(Ordering::Relaxed),
        taken: shared.taken.load(Ordering::Relaxed),
    }
}

impl<T> SlotWriter<T> {
    /// Store `value`, replacing any unconsumed value.
    ///
    /// Never blocks beyond the slot mutex. Returns the superseded value, if
    /// any, so the caller can reuse its allocation.
    pub fn publish(&self, value: T) -> Option<T> {
        let old = {
            let mut state = self.shared.state.lock();
            state.value.replace(value)
        };
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        if old.is_some() {
            self.shared.superseded.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.ready.notify_one();
        old
    }

    /// Whether the last published value is still waiting for the reader.
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().value.is_some()
    }

    /// Mark the slot closed and wake a waiting reader.
    ///
    /// A value already in the slot remains takeable.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.ready.notify_all();
    }

    pub fn stats(&self) -> SlotStats {
        stats(&self.shared)
    }
}

impl<T> Drop for SlotWriter<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> SlotReader<T> {
    /// Take the current value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        let value = self.shared.state.lock().value.take();
        if value.is_some() {
            self.shared.taken.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Take the current value, waiting up to `timeout` for one to arrive.
    pub fn wait_take(&self, timeout: Duration) -> WaitResult<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(value) = state.value.take() {
                self.shared.taken.fetch_add(1, Ordering::Relaxed);
                return WaitResult::Ready(value);
            }
            if state.closed {
                return WaitResult::Closed;
            }
            if self
                .shared
                .ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match state.value.take() {
                    Some(value) => {
                        self.shared.taken.fetch_add(1, Ordering::Relaxed);
                        WaitResult::Ready(value)
                    }
                    None if state.closed => WaitResult::Closed,
                    None => WaitResult::Timeout,
                };
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn stats(&self) -> SlotStats {
        stats(&self.shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_empty_take() {
        let (_tx, rx) = freshest_slot::<u32>();
        assert_eq!(rx.take(), None);
    }

    #[test]
    fn test_overwrite_returns_superseded() {
        let (tx, rx) = freshest_slot();
        assert_eq!(tx.publish(1), None);
        assert!(tx.is_pending());
        assert_eq!(tx.publish(2), Some(1));
        assert_eq!(rx.take(), Some(2));
        assert_eq!(rx.take(), None);
        assert!(!tx.is_pending());

        let stats = rx.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.superseded, 1);
        assert_eq!(stats.taken, 1);
    }

    #[test]
    fn test_wait_timeout() {
        let (_tx, rx) = freshest_slot::<u32>();
        let start = Instant::now();
        assert_eq!(rx.wait_take(Duration::from_millis(20)), WaitResult::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_wakes_on_publish() {
        let (tx, rx) = freshest_slot();
        let handle = thread::spawn(move || rx.wait_take(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(10));
        tx.publish(42u32);
        assert_eq!(handle.join().unwrap(), WaitResult::Ready(42));
    }

    #[test]
    fn test_close_wakes_reader() {
        let (tx, rx) = freshest_slot::<u32>();
        let handle = thread::spawn(move || rx.wait_take(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(10));
        drop(tx);
        assert_eq!(handle.join().unwrap(), WaitResult::Closed);
    }

    #[test]
    fn test_value_survives_close() {
        let (tx, rx) = freshest_slot();
        tx.publish(7u32);
        tx.close();
        assert!(rx.is_closed());
        assert_eq!(rx.wait_take(Duration::ZERO), WaitResult::Ready(7));
        assert_eq!(rx.wait_take(Duration::ZERO), WaitResult::Closed);
    }

    #[test]
    fn test_consumer_never_regresses() {
        let (tx, rx) = freshest_slot::<u64>();
        let producer = thread::spawn(move || {
            for i in 0..50_000u64 {
                tx.publish(i);
            }
        });

        let mut last = None;
        let mut seen = 0;
        loop {
            match rx.wait_take(Duration::from_millis(100)) {
                WaitResult::Ready(v) => {
                    if let Some(prev) = last {
                        assert!(v > prev, "regression: {v} after {prev}");
                    }
                    last = Some(v);
                    seen += 1;
                }
                WaitResult::Closed => break,
                WaitResult::Timeout => {}
            }
        }
        producer.join().unwrap();
        assert_eq!(last, Some(49_999));
        assert!(seen <= 50_000);
    }
}
