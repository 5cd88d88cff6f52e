use super::envelope::TimeStamp;
use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp<Utc> {
        TimeStamp::new()
    }
}

/// A clock that only moves when told to. Used to walk envelopes past their deadlines.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<TimeStamp<Utc>>,
}

impl ManualClock {
    pub fn new(start: TimeStamp<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }
    pub fn set(&self, to: TimeStamp<Utc>) {
        *self.current.lock() = to;
    }
    /// Move the clock forward. Returns `false` and leaves the clock where it
    /// was when the result falls outside the representable range.
    pub fn advance(&self, by: TimeDelta) -> bool {
        let mut current = self.current.lock();
        match current.checked_add(by) {
            Some(next) => {
                *current = next;
                true
            }
            None => false,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeStamp<Utc> {
        self.current.lock().clone()
    }
}
