use burnbin_common::Timestamp;
use chrono::Utc;

/// Source of the current time. Read once per request by the HTTP layer and
/// handed to the engine, which never reads a clock itself.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from(Utc::now())
    }
}

#[cfg(test)]
pub struct FixedClock(pub std::sync::atomic::AtomicI64);

#[cfg(test)]
impl FixedClock {
    pub const fn at(millis: i64) -> Self {
        Self(std::sync::atomic::AtomicI64::new(millis))
    }

    pub fn set(&self, millis: i64) {
        self.0.store(millis, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.0.load(std::sync::atomic::Ordering::SeqCst))
    }
}
