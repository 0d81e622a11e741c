//! Wall-clock source for expiry checks

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of "now" as fractional epoch seconds
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> f64;
}

pub type SharedClock = Arc<dyn Clock>;

/// System wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

/// Clock that only moves when told to. Millisecond resolution.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn at(epoch_seconds: f64) -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicI64::new((epoch_seconds * 1000.0) as i64),
        })
    }

    pub fn advance(&self, seconds: f64) {
        self.millis
            .fetch_add((seconds * 1000.0) as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.millis.load(Ordering::SeqCst) as f64 / 1000.0
    }
}

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at(1_000.0);
        assert_eq!(clock.now(), 1_000.0);
        clock.advance(2.5);
        assert_eq!(clock.now(), 1_002.5);
    }
}
