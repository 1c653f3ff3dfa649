//! Wall-clock source for sample timestamps

use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Source of "now" used to timestamp samples
pub trait Clock: Send + Sync + Debug {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
