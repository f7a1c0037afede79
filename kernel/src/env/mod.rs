// Environment Capabilities
//
// The feed store never reads ambient state. Current time and caller
// identity are supplied through these interfaces.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::feed::{Identity, Timestamp};

/// Source of "now" for the future-date check.
///
/// Treated as an untrusted upper bound. Sampled once per append.
pub trait CurrentTimeProvider: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Source of the identity making a call.
pub trait CurrentCallerProvider {
    fn current_caller(&self) -> Identity;
}

impl CurrentCallerProvider for Identity {
    fn current_caller(&self) -> Identity {
        *self
    }
}

/// Wall clock in whole UNIX seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl CurrentTimeProvider for SystemClock {
    fn now(&self) -> Timestamp {
        // A clock set before the epoch reads as 0.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests and deterministic runs.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicU64,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl CurrentTimeProvider for FixedClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
