//! Clock abstraction for dependency injection and testing.

use std::time::Instant;

pub trait ClockTrait: Send + Sync {
    fn now(&self) -> Instant;
    fn utc_now(&self) -> chrono::DateTime<chrono::Utc>;
}

#[derive(Default)]
pub struct SystemClock;

impl ClockTrait for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}
