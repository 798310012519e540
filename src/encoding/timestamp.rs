//! # Monotonic Timestamps
//!
//! Block headers carry an 8-byte stamp recording the last initialization
//! time. Stamps are microseconds since the Unix epoch, clamped so that
//! within a process `now()` never goes backwards even if the wall clock
//! does.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST: AtomicU64 = AtomicU64::new(0);

/// Returns a monotonically non-decreasing timestamp in microseconds.
pub fn now() -> u64 {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    let mut prev = LAST.load(Ordering::Relaxed);
    loop {
        let next = wall.max(prev);
        match LAST.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(seen) => prev = seen,
        }
    }
}
