//! Cancellable periodic timer driving the update cycle

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// One timer expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Number of this tick, starting at 1
    pub sequence: u64,
    /// When the tick was scheduled
    pub at: Instant,
}

/// Cancels an [`UpdateTimer`]
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl TimerHandle {
    /// Stop the timer; pending and future `tick` calls return `None`
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Whether the timer has been cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Periodic timer with explicit cancellation
///
/// Ticks that fall due while the consumer is busy are skipped, not queued.
#[derive(Debug)]
pub struct UpdateTimer {
    interval: Interval,
    cancel_rx: watch::Receiver<bool>,
    // Keeps the channel open so `changed()` only resolves on cancel
    _cancel: Arc<watch::Sender<bool>>,
    ticks: u64,
}

impl UpdateTimer {
    /// Timer whose first tick is immediate
    pub fn new(period: Duration) -> (Self, TimerHandle) {
        Self::build(tokio::time::interval(period))
    }

    /// Timer whose first tick comes one period from now
    pub fn delayed(period: Duration) -> (Self, TimerHandle) {
        Self::build(tokio::time::interval_at(Instant::now() + period, period))
    }

    fn build(mut interval: Interval) -> (Self, TimerHandle) {
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel = Arc::new(cancel_tx);
        let timer = Self {
            interval,
            cancel_rx,
            _cancel: Arc::clone(&cancel),
            ticks: 0,
        };
        (timer, TimerHandle { cancel })
    }

    /// Period between ticks
    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    /// Resolve once the timer has been cancelled
    pub async fn cancelled(&mut self) {
        let _ = self.cancel_rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Wait for the next tick; `None` once cancelled
    pub async fn tick(&mut self) -> Option<Tick> {
        if *self.cancel_rx.borrow() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.cancel_rx.changed() => None,
            at = self.interval.tick() => {
                self.ticks = self.ticks.saturating_add(1);
                Some(Tick {
                    sequence: self.ticks,
                    at,
                })
            }
        }
    }
}
