//! Configuration types for the background scheduling subsystem.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the scheduler.
///
/// All fields have sensible defaults; hosts typically override only
/// `quiet_hours` and `max_concurrent_tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Global enable flag. When false, ticks are no-ops and no platform
    /// registration is attempted.
    pub enabled: bool,
    /// Maximum number of task handlers running concurrently.
    pub max_concurrent_tasks: usize,
    /// Seconds between coordination ticks.
    pub tick_interval_secs: u64,
    /// Maximum execution-result history entries kept in memory and on disk.
    pub history_limit: usize,
    /// Re-evaluate the battery mode automatically on each battery sample.
    pub auto_mode_switching: bool,
    /// Target battery drain per day attributable to background work
    /// (percent, informational).
    pub daily_battery_target_percent: f32,
    /// Quiet-hours window during which non-exempt work is suppressed.
    pub quiet_hours: QuietHoursConfig,
    /// Daily background execution time budget.
    pub budget: BudgetConfig,
    /// Outbound network batching.
    pub batch: BatchConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_tasks: 2,
            tick_interval_secs: 60,
            history_limit: 100,
            auto_mode_switching: true,
            daily_battery_target_percent: 5.0,
            quiet_hours: QuietHoursConfig::default(),
            budget: BudgetConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

/// Quiet-hours window configuration.
///
/// Hours are interpreted in UTC. Windows may span midnight
/// (e.g. 22:00–07:00).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QuietHoursConfig {
    /// Whether the global quiet-hours suppression applies.
    pub enabled: bool,
    /// Window start hour (0-23, UTC).
    pub start_hour: u8,
    /// Window start minute (0-59).
    pub start_min: u8,
    /// Window end hour (0-23, UTC).
    pub end_hour: u8,
    /// Window end minute (0-59).
    pub end_min: u8,
}

impl Default for QuietHoursConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_hour: 22,
            start_min: 0,
            end_hour: 7,
            end_min: 0,
        }
    }
}

impl QuietHoursConfig {
    /// Returns `true` when the given UTC time-of-day falls inside the window.
    pub fn contains(&self, hour: u8, minute: u8) -> bool {
        if !self.enabled {
            return false;
        }
        let t = u32::from(hour) * 60 + u32::from(minute);
        let start = u32::from(self.start_hour) * 60 + u32::from(self.start_min);
        let end = u32::from(self.end_hour) * 60 + u32::from(self.end_min);

        if start == end {
            return false;
        }
        if start < end {
            t >= start && t < end
        } else {
            // Window spans midnight.
            t >= start || t < end
        }
    }

    /// Returns `true` when the given instant falls inside the window.
    pub fn contains_instant(&self, t: DateTime<Utc>) -> bool {
        self.contains(t.hour() as u8, t.minute() as u8)
    }

    /// The next instant the window ends, at or after `from`.
    ///
    /// Returns `from` unchanged when the window is disabled or `from` is
    /// already outside it.
    pub fn exit_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        if !self.contains_instant(from) {
            return from;
        }
        let end_today = from
            .date_naive()
            .and_hms_opt(u32::from(self.end_hour), u32::from(self.end_min), 0)
            .map(|t| t.and_utc())
            .unwrap_or(from);
        if end_today > from {
            end_today
        } else {
            end_today + Duration::days(1)
        }
    }
}

/// Daily background execution time budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Daily allowance of background execution time in milliseconds.
    ///
    /// 10 minutes matches the OS-granted allowance on the most
    /// restrictive supported platforms.
    pub daily_limit_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit_ms: 10 * 60 * 1000,
        }
    }
}

/// Outbound network batching configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Seconds between batch flush attempts.
    pub flush_interval_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 15 * 60,
        }
    }
}
