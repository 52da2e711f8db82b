// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event loop handle and scoped timers.
//!
//! Every node runs its handlers one at a time from a single event channel.
//! Timers and external inputs (button presses) only ever *post* events into
//! that channel; they never call into a node directly.
//!
//! A [`TimerGuard`] is owned by whoever armed the timer. Dropping it aborts
//! the timer task, so a destroyed owner is never called back. An expiry that
//! was already queued before the drop is still delivered; owners tag their
//! timer events with a generation number and ignore stale ones.

use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Handle used to post events and arm timers on a node's loop.
pub struct LoopHandle<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> Clone for LoopHandle<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> fmt::Debug for LoopHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<E: Send + 'static> LoopHandle<E> {
    /// Create a handle and the receiving end the loop drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event. Returns `false` once the loop has stopped.
    pub fn post(&self, event: E) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Deliver `event` once after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm_once(&self, delay: Duration, event: E) -> TimerGuard {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(event);
        });
        TimerGuard {
            task: task.abort_handle(),
        }
    }

    /// Deliver a clone of `event` every `period`, first after one period.
    pub fn arm_periodic(&self, period: Duration, event: E) -> TimerGuard
    where
        E: Clone,
    {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if tx.send(event.clone()).is_err() {
                    break;
                }
            }
        });
        TimerGuard {
            task: task.abort_handle(),
        }
    }
}

/// Owned timer. Aborted when dropped.
pub struct TimerGuard {
    task: AbortHandle,
}

impl TimerGuard {
    /// Cancel explicitly. Equivalent to dropping the guard.
    pub fn cancel(self) {}

    /// True once a one-shot timer has fired or the timer was aborted.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl fmt::Debug for TimerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerGuard")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_arm_once_fires_after_delay() {
        let (handle, mut rx) = LoopHandle::channel();
        let _guard = handle.arm_once(Duration::from_millis(300), 7u32);

        assert!(rx.try_recv().is_err());
        time::sleep(Duration::from_millis(299)).await;
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_guard_never_fires() {
        let (handle, mut rx) = LoopHandle::channel();
        let guard = handle.arm_once(Duration::from_millis(10), 1u32);
        guard.cancel();

        time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks_until_dropped() {
        let (handle, mut rx) = LoopHandle::channel();
        let guard = handle.arm_periodic(Duration::from_secs(1), "tick");

        assert_eq!(rx.recv().await, Some("tick"));
        assert_eq!(rx.recv().await, Some("tick"));

        drop(guard);
        time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_post_after_loop_stopped() {
        let (handle, rx) = LoopHandle::<u8>::channel();
        assert!(handle.post(1));
        drop(rx);
        assert!(!handle.post(2));
    }
}
