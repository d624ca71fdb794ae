//! Epoch-millisecond clock abstraction.
//!
//! # Responsibility
//! - Provide the single time source used for timestamps, aliveness decay
//!   and update coalescing.
//!
//! # Invariants
//! - All core timestamps are Unix epoch milliseconds (`i64`).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Time source injected into the store.
pub trait Clock: Send + Sync {
    /// Current time as Unix epoch milliseconds.
    fn now_ms(&self) -> i64;
}

/// Wall-clock implementation used in production.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as i64,
            // Pre-epoch system clocks collapse to 0 rather than panicking.
            Err(_) => 0,
        }
    }
}

/// Manually driven clock for deterministic tests and replay tooling.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Creates a manual clock starting at the given epoch-ms instant.
    pub fn starting_at(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Sets the absolute current time.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Advances the current time by `delta_ms`.
    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
