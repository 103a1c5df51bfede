//! Time sources injected into the pollers and eligibility checks.
//!
//! Production code uses [`SystemClock`] and [`IntervalTicker`]; tests swap in
//! [`ManualClock`] and [`ManualTicker`] to drive time and ticks by hand.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Source of poll ticks. The first tick completes immediately.
#[async_trait]
pub trait Ticker: Send + 'static {
    async fn tick(&mut self);
}

/// Fixed-period ticker. Ticks missed while a pass is running are skipped, never burst.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: std::time::Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Ticker fired explicitly through its paired [`TickTrigger`].
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

#[derive(Debug, Clone)]
pub struct TickTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTicker {
    pub fn new() -> (Self, TickTrigger) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, TickTrigger { tx })
    }
}

impl TickTrigger {
    /// Returns false once the ticker has been dropped.
    pub fn fire(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        if self.rx.recv().await.is_none() {
            // All triggers dropped: never tick again.
            std::future::pending::<()>().await;
        }
    }
}
