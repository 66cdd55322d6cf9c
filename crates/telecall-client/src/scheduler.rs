//! Cancellable scheduled tasks.
//!
//! Timers never run component code themselves: each firing becomes a
//! [`Tick`] pushed into the client loop, tagged with the token of the task
//! that produced it. A component compares the token with the task it still
//! holds, so a tick that was already queued when the task was stopped is
//! recognised and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Which component a tick belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    RegistrationDeadline,
    CallCountdown,
    TranscriptFlush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub kind: TimerKind,
    pub token: u64,
}

/// Factory for scheduled tasks feeding one tick queue.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Tick>,
}

impl Scheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Tick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire once after `delay`.
    pub fn once(&self, kind: TimerKind, delay: Duration) -> ScheduledTask {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(Tick { kind, token });
        });
        ScheduledTask { kind, token, handle }
    }

    /// Fire every `period`, first firing one period from now.
    pub fn every(&self, kind: TimerKind, period: Duration) -> ScheduledTask {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(Tick { kind, token }).is_err() {
                    break;
                }
            }
        });
        ScheduledTask { kind, token, handle }
    }
}

/// A running timer. Stopped explicitly or when dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    kind: TimerKind,
    token: u64,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Whether `tick` was produced by this task.
    pub fn owns(&self, tick: &Tick) -> bool {
        tick.kind == self.kind && tick.token == self.token
    }

    pub fn stop(self) {
        // Drop does the work.
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn once_fires_after_delay() {
        let (scheduler, mut ticks) = Scheduler::new();
        let task = scheduler.once(TimerKind::RegistrationDeadline, Duration::from_secs(5));

        let started = Instant::now();
        let tick = ticks.recv().await.unwrap();
        assert!(task.owns(&tick));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn every_ticks_until_stopped() {
        let (scheduler, mut ticks) = Scheduler::new();
        let task = scheduler.every(TimerKind::TranscriptFlush, Duration::from_secs(10));

        for _ in 0..3 {
            let tick = ticks.recv().await.unwrap();
            assert!(task.owns(&tick));
        }
        task.stop();

        let after_stop = time::timeout(Duration::from_secs(60), ticks.recv()).await;
        assert!(after_stop.is_err(), "no ticks after stop");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_ticks_are_not_owned_by_new_tasks() {
        let (scheduler, mut ticks) = Scheduler::new();
        let old = scheduler.once(TimerKind::CallCountdown, Duration::from_secs(1));
        let tick = ticks.recv().await.unwrap();
        drop(old);

        let fresh = scheduler.every(TimerKind::CallCountdown, Duration::from_secs(1));
        assert!(!fresh.owns(&tick));
    }
}
