//! Background task definitions.
//!
//! Defines the [`BackgroundTask`] type with its frequency, constraint and
//! execution-policy vocabulary, the [`WorkHandler`] seam through which
//! hosts supply task bodies, and the [`ExecutionResult`] history record.

use crate::config::QuietHoursConfig;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Kind of recurring work a task performs.
///
/// The fixed set covers the built-in work types; hosts extend it with
/// [`TaskType::Custom`], which serialises as its bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Data synchronisation with the backend.
    Sync,
    /// Reminder delivery (never starved; typically critical priority).
    Reminder,
    /// Local maintenance (cache cleanup, compaction).
    Maintenance,
    /// Cultural calendar data refresh.
    CulturalUpdate,
    /// Analytics upload.
    Analytics,
    /// Host-defined task type.
    #[serde(untagged)]
    Custom(String),
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Reminder => write!(f, "reminder"),
            Self::Maintenance => write!(f, "maintenance"),
            Self::CulturalUpdate => write!(f, "cultural_update"),
            Self::Analytics => write!(f, "analytics"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// Static priority tier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Must not be starved (e.g. medication reminders). Bypasses the
    /// time-budget check.
    Critical,
    /// Important, budget-gated.
    High,
    /// Default tier.
    Medium,
    /// Opportunistic work.
    Low,
}

impl TaskPriority {
    /// Base weight used by the dispatch priority score.
    #[must_use]
    pub fn base_weight(&self) -> f64 {
        match self {
            Self::Critical => 10.0,
            Self::High => 7.0,
            Self::Medium => 3.0,
            Self::Low => 1.0,
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for its next run.
    #[default]
    Pending,
    /// A work handler is currently executing.
    Running,
    /// Last run succeeded.
    Completed,
    /// Last run failed or timed out.
    Failed,
    /// Cancelled by the host; never dispatched until reconfigured.
    Cancelled,
}

/// How often a task runs, plus dispatch-gating flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Frequency {
    /// Minutes between runs.
    pub interval_minutes: u32,
    /// Schedule the first run immediately instead of one interval out.
    pub run_immediately: bool,
    /// Only dispatch while the device is charging.
    pub charging_only: bool,
    /// Only dispatch on an unmetered (Wi-Fi) link.
    pub wifi_only: bool,
}

impl Default for Frequency {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            run_immediately: false,
            charging_only: false,
            wifi_only: false,
        }
    }
}

/// Gating conditions checked before dispatch. Failing a check defers the
/// task; it is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConstraints {
    /// Task needs connectivity to do useful work.
    pub requires_network: bool,
    /// Minimum battery level (0.0–1.0) below which the task defers.
    pub minimum_battery: Option<f32>,
    /// Expected background execution time, charged against the daily
    /// budget for sufficiency checks.
    pub max_background_time_ms: u64,
    /// Whether quiet hours suppress this task.
    pub respect_quiet_hours: bool,
}

impl Default for TaskConstraints {
    fn default() -> Self {
        Self {
            requires_network: false,
            minimum_battery: None,
            max_background_time_ms: 30_000,
            respect_quiet_hours: true,
        }
    }
}

/// Per-run execution policy.
///
/// The retry fields are carried for schema compatibility but reserved:
/// failed tasks reschedule on the normal `interval_minutes` cadence, never
/// on a shorter backoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    /// Handler timeout in milliseconds.
    pub timeout_ms: u64,
    /// Reserved.
    pub retry_enabled: bool,
    /// Reserved.
    pub max_retries: u32,
    /// Reserved.
    pub backoff_multiplier: f64,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retry_enabled: true,
            max_retries: 3,
            backoff_multiplier: 2.0,
        }
    }
}

/// A scheduled unit of recurring background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    /// Unique task identifier (e.g. `"medication_sync"`).
    pub id: String,
    /// Kind of work; selects the registered handler.
    pub task_type: TaskType,
    /// Static priority tier.
    pub priority: TaskPriority,
    /// Run cadence and gating flags.
    pub frequency: Frequency,
    /// Dispatch constraints.
    pub constraints: TaskConstraints,
    /// Timeout and (reserved) retry policy.
    pub policy: ExecutionPolicy,
    /// Current lifecycle state.
    #[serde(default)]
    pub state: TaskState,
    /// When the task last ran, if ever.
    pub last_run: Option<DateTime<Utc>>,
    /// When the task is next due, if scheduled.
    pub next_run: Option<DateTime<Utc>>,
    /// Whether the scheduler considers this task at all.
    pub enabled: bool,
    /// Whether OS periodic registration succeeded for this task.
    #[serde(default)]
    pub registered_with_platform: bool,
}

impl BackgroundTask {
    /// Create an enabled, pending task with default frequency, constraints
    /// and policy.
    pub fn new(id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            task_type,
            priority: TaskPriority::Medium,
            frequency: Frequency::default(),
            constraints: TaskConstraints::default(),
            policy: ExecutionPolicy::default(),
            state: TaskState::Pending,
            last_run: None,
            next_run: None,
            enabled: true,
            registered_with_platform: false,
        }
    }

    /// Returns `true` when the task should be considered by a tick at
    /// `now`: enabled, not already running or cancelled, and due.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled
            || matches!(self.state, TaskState::Running | TaskState::Cancelled)
        {
            return false;
        }
        match self.next_run {
            Some(next) => next <= now,
            None => false,
        }
    }

    /// Dispatch ranking: base tier weight plus an overdue bonus capped at
    /// 5, one point per hour past the scheduled `next_run`.
    #[must_use]
    pub fn priority_score(&self, now: DateTime<Utc>) -> f64 {
        let overdue_bonus = match self.next_run {
            Some(next) if now > next => {
                let overdue_minutes = (now - next).num_minutes() as f64;
                (overdue_minutes / 60.0).min(5.0)
            }
            _ => 0.0,
        };
        self.priority.base_weight() + overdue_bonus
    }

    /// Make the task due at `now`.
    pub fn mark_due_at(&mut self, now: DateTime<Utc>) {
        self.next_run = Some(now);
    }

    /// Recompute `next_run` one interval after `now`, pushed past the
    /// quiet-hours end when the task respects the window.
    pub fn schedule_next_run(&mut self, now: DateTime<Utc>, quiet: &QuietHoursConfig) {
        let mut next = now + Duration::minutes(i64::from(self.frequency.interval_minutes));
        if self.constraints.respect_quiet_hours {
            next = quiet.exit_after(next);
        }
        self.next_run = Some(next);
    }

    /// Merge a spec into this task. Only fields present in the spec change.
    pub fn apply_spec(&mut self, spec: &TaskSpec) {
        self.task_type = spec.task_type.clone();
        if let Some(priority) = spec.priority {
            self.priority = priority;
        }
        if let Some(frequency) = spec.frequency {
            self.frequency = frequency;
        }
        if let Some(constraints) = spec.constraints {
            self.constraints = constraints;
        }
        if let Some(policy) = spec.policy {
            self.policy = policy;
        }
        if let Some(enabled) = spec.enabled {
            self.enabled = enabled;
        }
    }
}

/// Upsert payload for [`configure_task`](crate::scheduler::TaskScheduler::configure_task).
///
/// `None` fields keep the existing task's values (or defaults for a new
/// task).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique task identifier.
    pub id: String,
    /// Kind of work.
    pub task_type: TaskType,
    /// Priority tier override.
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    /// Frequency override.
    #[serde(default)]
    pub frequency: Option<Frequency>,
    /// Constraint override.
    #[serde(default)]
    pub constraints: Option<TaskConstraints>,
    /// Execution-policy override.
    #[serde(default)]
    pub policy: Option<ExecutionPolicy>,
    /// Enable/disable override.
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl TaskSpec {
    /// Start a spec for the given task id and type.
    pub fn new(id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            task_type,
            priority: None,
            frequency: None,
            constraints: None,
            policy: None,
            enabled: None,
        }
    }

    /// Set the priority tier.
    #[must_use]
    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the run cadence in minutes.
    #[must_use]
    pub fn interval_minutes(mut self, minutes: u32) -> Self {
        let mut frequency = self.frequency.unwrap_or_default();
        frequency.interval_minutes = minutes;
        self.frequency = Some(frequency);
        self
    }

    /// Replace the full frequency block.
    #[must_use]
    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    /// Replace the constraint block.
    #[must_use]
    pub fn constraints(mut self, constraints: TaskConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Replace the execution policy.
    #[must_use]
    pub fn policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the enabled flag.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }
}

/// What a work handler reports back after a run.
#[derive(Debug, Clone, Default)]
pub struct WorkReport {
    /// Whether the work succeeded.
    pub success: bool,
    /// Items processed, for host bookkeeping.
    pub data_processed: u64,
    /// Handler's estimate of battery cost (percent).
    pub estimated_battery_cost: f32,
    /// Errors encountered, empty on success.
    pub errors: Vec<String>,
}

impl WorkReport {
    /// A successful report.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A failed report with one error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![error.into()],
            ..Self::default()
        }
    }
}

/// The seam through which hosts supply task bodies.
///
/// The scheduler never inspects task-type semantics beyond dispatching to
/// the handler registered for the matching [`TaskType`].
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Perform the task's work.
    async fn run(&self, task: &BackgroundTask) -> WorkReport;
}

/// Immutable record of one task execution, appended to bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Task that ran.
    pub task_id: String,
    /// Its type at run time.
    pub task_type: TaskType,
    /// Whether the run succeeded.
    pub success: bool,
    /// Observed wall-clock duration.
    pub duration_ms: u64,
    /// Handler's battery-cost estimate (percent).
    pub estimated_battery_cost: f32,
    /// Errors, including the synthesized `"timeout"` entry.
    pub errors: Vec<String>,
    /// When the run completed.
    pub timestamp: DateTime<Utc>,
}
