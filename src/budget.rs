//! Rolling daily background-execution time budget.
//!
//! Tracks the OS-granted daily allowance and the amount consumed. The
//! tracker only reports deficit; enforcement is the scheduler's job, so
//! over-budget charges from critical tasks are permitted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Serialisable snapshot of the budget state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBudgetSnapshot {
    /// Daily allowance in milliseconds.
    pub daily_limit_ms: u64,
    /// Milliseconds consumed since the last reset.
    pub used_ms: u64,
    /// When the budget next resets (the upcoming midnight, UTC).
    pub reset_at: DateTime<Utc>,
}

/// Tracks consumed background execution time against a daily limit.
///
/// `charge` is an atomic add so task-completion callbacks running off the
/// coordination loop cannot race each other; `used` is never decremented
/// except by the daily reset.
#[derive(Debug)]
pub struct TimeBudgetTracker {
    daily_limit_ms: u64,
    used_ms: AtomicU64,
    reset_at: Mutex<DateTime<Utc>>,
}

impl TimeBudgetTracker {
    /// Create a fresh tracker; the first reset boundary is the midnight
    /// after `now`.
    #[must_use]
    pub fn new(daily_limit_ms: u64, now: DateTime<Utc>) -> Self {
        Self {
            daily_limit_ms,
            used_ms: AtomicU64::new(0),
            reset_at: Mutex::new(next_midnight(now)),
        }
    }

    /// Rebuild a tracker from persisted state.
    #[must_use]
    pub fn from_snapshot(snapshot: TimeBudgetSnapshot) -> Self {
        Self {
            daily_limit_ms: snapshot.daily_limit_ms,
            used_ms: AtomicU64::new(snapshot.used_ms),
            reset_at: Mutex::new(snapshot.reset_at),
        }
    }

    /// Snapshot the current state for persistence.
    pub fn snapshot(&self) -> TimeBudgetSnapshot {
        let reset_at = *self.reset_at.lock().unwrap_or_else(|e| e.into_inner());
        TimeBudgetSnapshot {
            daily_limit_ms: self.daily_limit_ms,
            used_ms: self.used_ms.load(Ordering::Relaxed),
            reset_at,
        }
    }

    /// The configured daily allowance in milliseconds.
    #[must_use]
    pub fn daily_limit_ms(&self) -> u64 {
        self.daily_limit_ms
    }

    /// Milliseconds consumed since the last reset.
    #[must_use]
    pub fn used_ms(&self) -> u64 {
        self.used_ms.load(Ordering::Relaxed)
    }

    /// Remaining allowance: `max(0, limit - used)`.
    #[must_use]
    pub fn remaining_ms(&self) -> u64 {
        self.daily_limit_ms.saturating_sub(self.used_ms())
    }

    /// How far past the limit consumption has gone (0 when within budget).
    #[must_use]
    pub fn deficit_ms(&self) -> u64 {
        self.used_ms().saturating_sub(self.daily_limit_ms)
    }

    /// Add an observed execution duration. Never fails; over-budget
    /// charges are permitted.
    pub fn charge(&self, duration_ms: u64) {
        self.used_ms.fetch_add(duration_ms, Ordering::Relaxed);
    }

    /// Zero `used` and advance the reset boundary if a midnight has
    /// passed. Must be called before reads/charges in a coordination
    /// tick. Returns `true` when a reset happened.
    pub fn reset_if_new_day_at(&self, now: DateTime<Utc>) -> bool {
        let mut reset_at = self.reset_at.lock().unwrap_or_else(|e| e.into_inner());
        if now < *reset_at {
            return false;
        }
        self.used_ms.store(0, Ordering::Relaxed);
        *reset_at = next_midnight(now);
        debug!("time budget reset, next boundary {}", *reset_at);
        true
    }
}

/// The midnight (UTC) following `now`.
fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .unwrap_or(now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default())
        .and_utc()
}
