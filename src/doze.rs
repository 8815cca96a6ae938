//! Device idle ("Doze") state tracking and alarm-class hints.
//!
//! Records idle-state transitions reported by the host and keeps a
//! running average of idle durations. The alarm-class hint is a pure
//! function of task priority: it picks an OS alarm *type* robust to
//! Doze rather than reacting to live idle state.

use crate::scheduler::tasks::TaskPriority;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which OS alarm class a task's wake-up should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmClass {
    /// Exact alarm, fires even in Doze. Reserved for critical work.
    Exact,
    /// Inexact alarm permitted to fire while the device idles.
    InexactAllowWhileIdle,
    /// Deferred into the next Doze maintenance window.
    Deferred,
}

/// Observed idle-state transitions, updated only at transition events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DozeRecord {
    /// Epoch milliseconds of the most recent idle entry.
    pub entered_at: Option<u64>,
    /// Epoch milliseconds of the most recent idle exit.
    pub exited_at: Option<u64>,
    /// Total idle entries observed.
    pub entry_count: u64,
    /// Total idle exits observed.
    pub exit_count: u64,
    /// Running mean idle duration over all matched exits.
    pub average_duration_ms: f64,
}

/// Owns the [`DozeRecord`] and produces scheduling hints.
#[derive(Debug, Default)]
pub struct DozeCoordinator {
    record: DozeRecord,
}

impl DozeCoordinator {
    /// Create a coordinator with no observed transitions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted state.
    #[must_use]
    pub fn from_record(record: DozeRecord) -> Self {
        Self { record }
    }

    /// Current transition record.
    #[must_use]
    pub fn record(&self) -> &DozeRecord {
        &self.record
    }

    /// `true` while an idle entry has no matching exit.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        match (self.record.entered_at, self.record.exited_at) {
            (Some(entered), Some(exited)) => entered > exited,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Record an idle-state entry at the given epoch-millisecond time.
    pub fn record_entry_at(&mut self, now_ms: u64) {
        self.record.entered_at = Some(now_ms);
        self.record.entry_count += 1;
        debug!("doze entry #{} at {now_ms}", self.record.entry_count);
    }

    /// Record an idle-state exit at the given epoch-millisecond time.
    ///
    /// With a prior unmatched entry, folds the idle duration into the
    /// running mean: `avg' = (avg*(n-1) + duration) / n`.
    pub fn record_exit_at(&mut self, now_ms: u64) {
        let matched_entry = self.is_idle().then_some(self.record.entered_at).flatten();

        self.record.exited_at = Some(now_ms);
        self.record.exit_count += 1;

        if let Some(entered) = matched_entry {
            let duration = now_ms.saturating_sub(entered) as f64;
            let n = self.record.exit_count as f64;
            self.record.average_duration_ms =
                (self.record.average_duration_ms * (n - 1.0) + duration) / n;
            debug!(
                "doze exit #{}, duration {duration}ms, avg {:.0}ms",
                self.record.exit_count, self.record.average_duration_ms
            );
        }
    }

    /// Suggest the alarm class for a task of the given priority.
    #[must_use]
    pub fn suggest_alarm_class(&self, priority: TaskPriority) -> AlarmClass {
        match priority {
            TaskPriority::Critical => AlarmClass::Exact,
            TaskPriority::High => AlarmClass::InexactAllowWhileIdle,
            TaskPriority::Medium | TaskPriority::Low => AlarmClass::Deferred,
        }
    }
}

/// Current epoch time in milliseconds.
#[must_use]
pub fn now_epoch_millis() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn new_coordinator_is_not_idle() {
        let coordinator = DozeCoordinator::new();
        assert!(!coordinator.is_idle());
        assert_eq!(coordinator.record().entry_count, 0);
    }

    #[test]
    fn entry_then_exit_updates_counts_and_average() {
        let mut coordinator = DozeCoordinator::new();
        coordinator.record_entry_at(1_000);
        assert!(coordinator.is_idle());

        coordinator.record_exit_at(4_000);
        assert!(!coordinator.is_idle());

        let record = coordinator.record();
        assert_eq!(record.entry_count, 1);
        assert_eq!(record.exit_count, 1);
        assert!((record.average_duration_ms - 3_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn average_is_running_mean_over_all_exits() {
        let mut coordinator = DozeCoordinator::new();
        coordinator.record_entry_at(0);
        coordinator.record_exit_at(2_000);
        coordinator.record_entry_at(10_000);
        coordinator.record_exit_at(14_000);

        // Mean of 2000 and 4000.
        assert!((coordinator.record().average_duration_ms - 3_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unmatched_exit_counts_but_does_not_skew_average() {
        let mut coordinator = DozeCoordinator::new();
        coordinator.record_exit_at(5_000);

        let record = coordinator.record();
        assert_eq!(record.exit_count, 1);
        assert_eq!(record.entry_count, 0);
        assert!(record.average_duration_ms.abs() < f64::EPSILON);
    }

    #[test]
    fn alarm_class_is_pure_function_of_priority() {
        let mut coordinator = DozeCoordinator::new();
        assert_eq!(
            coordinator.suggest_alarm_class(TaskPriority::Critical),
            AlarmClass::Exact
        );
        assert_eq!(
            coordinator.suggest_alarm_class(TaskPriority::High),
            AlarmClass::InexactAllowWhileIdle
        );
        assert_eq!(
            coordinator.suggest_alarm_class(TaskPriority::Medium),
            AlarmClass::Deferred
        );
        assert_eq!(
            coordinator.suggest_alarm_class(TaskPriority::Low),
            AlarmClass::Deferred
        );

        // Live idle state does not change the hint.
        coordinator.record_entry_at(1);
        assert_eq!(
            coordinator.suggest_alarm_class(TaskPriority::Low),
            AlarmClass::Deferred
        );
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut coordinator = DozeCoordinator::new();
        coordinator.record_entry_at(100);
        coordinator.record_exit_at(700);

        let json = serde_json::to_string(coordinator.record()).unwrap();
        let restored: DozeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(&restored, coordinator.record());

        let rebuilt = DozeCoordinator::from_record(restored);
        assert!(!rebuilt.is_idle());
    }
}
