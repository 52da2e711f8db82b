// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Debounced boolean actuator and the physical output sink.
//!
//! The value flips at trigger time. The delay timer only closes the cooldown
//! window: while it is pending, further triggers are dropped, and its expiry
//! never changes the value again.
//!
//! ```text
//!  idle --trigger--> pending (value flipped, timer armed)
//!  pending --trigger--> pending (dropped)
//!  pending --expire(gen)--> idle
//! ```

use crate::event_loop::{LoopHandle, TimerGuard};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Boolean output (LED).
pub trait OutputSink: Send {
    fn write(&mut self, on: bool);
}

/// Output sink that logs each write.
#[derive(Debug, Clone)]
pub struct LogSink {
    label: String,
}

impl LogSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl OutputSink for LogSink {
    fn write(&mut self, on: bool) {
        tracing::info!("[{}] LED {}", self.label, if on { "ON" } else { "OFF" });
    }
}

/// Output sink that records every write; clones share the same history.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    writes: Arc<Mutex<Vec<bool>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<bool> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Last value written, if any.
    pub fn last(&self) -> Option<bool> {
        self.writes.lock().ok().and_then(|w| w.last().copied())
    }
}

impl OutputSink for RecordingSink {
    fn write(&mut self, on: bool) {
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(on);
        }
    }
}

/// Outcome of [`DebouncedActuator::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Value flipped to the contained state; the caller publishes it.
    Flipped(bool),
    /// Cooldown pending, event dropped.
    Dropped,
}

/// A boolean value guarded by a one-shot cooldown timer.
#[derive(Debug)]
pub struct DebouncedActuator {
    value: bool,
    delay: Duration,
    generation: u64,
    pending: Option<(u64, TimerGuard)>,
}

impl DebouncedActuator {
    pub fn new(initial: bool, delay: Duration) -> Self {
        Self {
            value: initial,
            delay,
            generation: 0,
            pending: None,
        }
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Flip the value and arm the cooldown, unless a cooldown is pending.
    ///
    /// `expiry` builds the loop event delivered when the cooldown ends; it
    /// receives the generation to hand back to [`expire`](Self::expire).
    pub fn trigger<E, F>(&mut self, handle: &LoopHandle<E>, expiry: F) -> Trigger
    where
        E: Send + 'static,
        F: FnOnce(u64) -> E,
    {
        if self.pending.is_some() {
            tracing::debug!("Trigger dropped: debounce pending");
            return Trigger::Dropped;
        }

        self.value = !self.value;
        self.generation += 1;
        let guard = handle.arm_once(self.delay, expiry(self.generation));
        self.pending = Some((self.generation, guard));
        Trigger::Flipped(self.value)
    }

    /// Close the cooldown armed with `generation`.
    ///
    /// Returns `false` for a stale or unknown expiry.
    pub fn expire(&mut self, generation: u64) -> bool {
        match &self.pending {
            Some((armed, _)) if *armed == generation => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Drop any pending cooldown. Its expiry, if already queued, is stale.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Adopt a value decided elsewhere (remote write, notification).
    ///
    /// Does not arm the cooldown.
    pub fn set(&mut self, value: bool) {
        self.value = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    #[derive(Debug, Clone, PartialEq)]
    enum Ev {
        Expired(u64),
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_flip() {
        let (handle, mut rx) = LoopHandle::channel();
        let mut button = DebouncedActuator::new(false, DEFAULT_DEBOUNCE);

        let outcomes: Vec<Trigger> = (0..5)
            .map(|_| button.trigger(&handle, Ev::Expired))
            .collect();

        assert_eq!(outcomes[0], Trigger::Flipped(true));
        assert!(outcomes[1..].iter().all(|t| *t == Trigger::Dropped));
        assert!(button.value());
        assert!(button.is_pending());

        let Some(Ev::Expired(generation)) = rx.recv().await else {
            panic!("expected expiry");
        };
        assert!(button.expire(generation));
        assert!(!button.is_pending());
        // expiry does not flip again
        assert!(button.value());

        assert_eq!(button.trigger(&handle, Ev::Expired), Trigger::Flipped(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_means_no_expiry() {
        let (handle, mut rx) = LoopHandle::channel();
        let mut button = DebouncedActuator::new(false, Duration::from_millis(50));

        button.trigger(&handle, Ev::Expired);
        button.cancel();
        assert!(!button.is_pending());

        time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_expiry_ignored() {
        let (handle, _rx) = LoopHandle::channel();
        let mut button = DebouncedActuator::new(false, DEFAULT_DEBOUNCE);

        button.trigger(&handle, Ev::Expired);
        button.cancel();
        button.trigger(&handle, Ev::Expired);

        assert!(!button.expire(1));
        assert!(button.is_pending());
        assert!(button.expire(2));
    }

    #[test]
    fn test_set_does_not_arm() {
        let mut button = DebouncedActuator::new(false, DEFAULT_DEBOUNCE);
        button.set(true);
        assert!(button.value());
        assert!(!button.is_pending());
    }

    #[test]
    fn test_recording_sink_shared() {
        let sink = RecordingSink::new();
        let mut clone = sink.clone();
        clone.write(true);
        clone.write(false);
        assert_eq!(sink.writes(), vec![true, false]);
        assert_eq!(sink.last(), Some(false));
    }
}
