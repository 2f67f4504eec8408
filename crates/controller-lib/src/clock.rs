//! Time source for the control loop
//!
//! The trainer and the detector never read the wall clock or sleep directly;
//! they go through a [`Clock`] so tests can drive them with virtual time.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of "now" and of the pause between ticks
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Wait for `period` before the next tick
    async fn sleep(&self, period: Duration);
}

/// Wall-clock time backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, period: Duration) {
        tokio::time::sleep(period).await;
    }
}

/// Virtual clock: `sleep` returns immediately after advancing time
#[derive(Debug)]
pub struct ManualClock {
    now_millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now_millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Move time forward without sleeping
    pub fn advance(&self, by: Duration) {
        self.now_millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.now_millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    async fn sleep(&self, period: Duration) {
        self.advance(period);
        tokio::task::yield_now().await;
    }
}
