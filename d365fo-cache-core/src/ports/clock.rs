// d365fo-cache-core/src/ports/clock.rs
//
// Injected for testability — TTL caches, session timestamps and retention
// cleanup all read "now" through this instead of calling `Utc::now()`
// directly, so tests can fast-forward time deterministically.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
