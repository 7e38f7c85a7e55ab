//! Fixed-window rate limiting keyed by arbitrary string identities.
//!
//! Buckets live only in process memory: a restart clears all throttling
//! state, and multiple server processes each count independently.  Call
//! sites that need restart-safe or cross-process limits (the daily report
//! cap) must count against the durable store instead — see
//! [`crate::policy::reports_remaining_today`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sign-in throttling: at most 10 attempts per identifier per minute.
pub const SIGNIN_LIMIT: u32 = 10;
pub const SIGNIN_WINDOW: Duration = Duration::from_secs(60);

/// Chat throttling on restricted panels: at most 2 messages per 3 hours.
pub const RESTRICTED_CHAT_LIMIT: u32 = 2;
pub const RESTRICTED_CHAT_WINDOW: Duration = Duration::from_secs(3 * 60 * 60);

struct RateBucket {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window call counter.
///
/// The window is anchored to the first call after the previous window
/// expired, not to a sliding interval.  A caller can therefore issue up to
/// `limit` calls just before a window boundary and `limit` more just after
/// it.  That imprecision is part of the contract; callers needing exact
/// enforcement must use a different limiter.
pub struct RateGovernor {
    buckets: Mutex<HashMap<String, RateBucket>>,
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl RateGovernor {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Count one call against `key`.  Returns `false` once more than
    /// `limit` calls land inside the current window.
    ///
    /// A bucket whose window has passed is overwritten in place on the next
    /// call for its key, so stale keys cost one map entry at most.
    pub fn allow(&self, key: &str, limit: u32, window: Duration) -> bool {
        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| RateBucket {
                count: 0,
                reset_at: now + window,
            });
        if now > bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + window;
        }
        bucket.count += 1;
        bucket.count <= limit
    }

    /// Number of tracked keys, expired buckets included.
    pub fn tracked_keys(&self) -> usize {
        match self.buckets.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
