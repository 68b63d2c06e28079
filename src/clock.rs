use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall clock in unix seconds. Every expiration decision reads through one of
/// these, so tests can drive time by hand instead of sleeping.
#[derive(Clone, Debug)]
pub enum Clock {
    System,
    Manual(Arc<AtomicI64>),
}

impl Clock {
    /// A clock that only moves when its handle is told to.
    pub fn manual(start: i64) -> (Clock, ManualClock) {
        let cell = Arc::new(AtomicI64::new(start));
        (Clock::Manual(cell.clone()), ManualClock(cell))
    }

    pub fn now_unix(&self) -> i64 {
        match self {
            Clock::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            Clock::Manual(cell) => cell.load(Ordering::SeqCst),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn manual_clock_moves_by_hand() {
        let (clock, handle) = Clock::manual(100);
        assert_eq!(clock.now_unix(), 100);
        handle.advance(5);
        assert_eq!(clock.now_unix(), 105);
        handle.set(42);
        assert_eq!(clock.now_unix(), 42);
    }
}
