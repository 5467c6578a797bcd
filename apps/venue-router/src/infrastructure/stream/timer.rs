//! Scheduled Tasks
//!
//! A timer handle that delivers an event into a channel after a delay, or
//! on every tick of an interval. Dropping or cancelling the handle stops it.
//! Events already delivered stay in the channel, so receivers tag them and
//! ignore stale ones.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handle to a spawned timer.
#[derive(Debug)]
pub struct ScheduledTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Deliver `event` once after `delay`.
    pub fn once<T>(delay: Duration, tx: mpsc::UnboundedSender<T>, event: T) -> Self
    where
        T: Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(event);
                }
            }
        });
        Self { cancel, handle }
    }

    /// Deliver a clone of `event` every `period`, first after one period.
    pub fn every<T>(period: Duration, tx: mpsc::UnboundedSender<T>, event: T) -> Self
    where
        T: Clone + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(event.clone()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self { cancel, handle }
    }

    /// Stop the timer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the timer task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn once_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _task = ScheduledTask::once(Duration::from_millis(100), tx, 7);
        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.recv().await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = ScheduledTask::once(Duration::from_millis(100), tx, 7);
        task.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stops_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = ScheduledTask::every(Duration::from_millis(50), tx, ());
        tokio::time::sleep(Duration::from_millis(160)).await;
        let mut ticks = 0;
        while rx.try_recv().is_ok() {
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        drop(task);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }
}
