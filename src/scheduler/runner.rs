//! Scheduler coordination loop.
//!
//! A single coordination loop owns the task registry: each tick samples
//! the battery, resets the daily budget if needed, filters and sorts
//! ready tasks, dispatches up to the concurrency limit and records
//! results. Task handlers are the only true concurrency; their
//! completions are applied back on the loop.

use crate::battery::{BatteryMode, BatteryModeController};
use crate::budget::TimeBudgetTracker;
use crate::config::SchedulerConfig;
use crate::doze::{AlarmClass, DozeCoordinator, now_epoch_millis};
use crate::error::{Result, SchedulerError};
use crate::platform::{LinkType, PlatformExecutor};
use crate::scheduler::tasks::{
    BackgroundTask, ExecutionResult, TaskPriority, TaskSpec, TaskState, TaskType, WorkHandler,
    WorkReport,
};
use crate::store::{self, SchedulerState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Public snapshot used by host diagnostics tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Registered tasks.
    pub tasks: Vec<BackgroundTask>,
    /// Recent execution history.
    #[serde(default)]
    pub history: Vec<ExecutionResult>,
}

/// Aggregated run statistics; the sole observability surface for work
/// that silently did not run.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    /// Runs recorded in the (bounded) history.
    pub total_runs: usize,
    /// Successful runs.
    pub successes: usize,
    /// Failed or timed-out runs.
    pub failures: usize,
    /// Cumulative execution time across recorded runs.
    pub total_duration_ms: u64,
    /// Cumulative handler-estimated battery cost (percent).
    pub total_battery_cost: f32,
    /// Budget consumed today.
    pub budget_used_ms: u64,
    /// Budget remaining today.
    pub budget_remaining_ms: u64,
    /// Active battery mode.
    pub active_mode: BatteryMode,
}

/// Outcome of one awaited task execution, applied back on the loop.
struct Completion {
    task_id: String,
    report: WorkReport,
    duration_ms: u64,
}

/// Battery-adaptive background task scheduler.
///
/// Explicitly constructed and owned by the host's startup sequence:
/// `initialize()` loads persisted state, `run()` starts the loop, and
/// dropping the returned handle stops future ticks (in-flight work
/// completes within the current tick, which persists before returning).
pub struct TaskScheduler {
    config: SchedulerConfig,
    tasks: Vec<BackgroundTask>,
    history: Vec<ExecutionResult>,
    handlers: HashMap<TaskType, Arc<dyn WorkHandler>>,
    battery: BatteryModeController,
    budget: Arc<TimeBudgetTracker>,
    doze: DozeCoordinator,
    platform: Arc<dyn PlatformExecutor>,
    state_path: Option<PathBuf>,
    result_tx: Option<mpsc::UnboundedSender<ExecutionResult>>,
}

impl TaskScheduler {
    /// Create a scheduler persisting to the default state path.
    pub fn new(config: SchedulerConfig, platform: Arc<dyn PlatformExecutor>) -> Self {
        let battery = BatteryModeController::new(BatteryMode::Normal, config.auto_mode_switching);
        let budget = Arc::new(TimeBudgetTracker::new(
            config.budget.daily_limit_ms,
            Utc::now(),
        ));
        Self {
            config,
            tasks: Vec::new(),
            history: Vec::new(),
            handlers: HashMap::new(),
            battery,
            budget,
            doze: DozeCoordinator::new(),
            platform,
            state_path: store::default_state_path(),
            result_tx: None,
        }
    }

    /// Override the state persistence path (`None` disables persistence).
    #[must_use]
    pub fn with_state_path(mut self, path: Option<PathBuf>) -> Self {
        self.state_path = path;
        self
    }

    /// Send every [`ExecutionResult`] to the given channel as it is
    /// recorded.
    #[must_use]
    pub fn with_result_channel(mut self, tx: mpsc::UnboundedSender<ExecutionResult>) -> Self {
        self.result_tx = Some(tx);
        self
    }

    /// Register the work handler for a task type. Replaces any existing
    /// handler for that type.
    pub fn register_handler(&mut self, task_type: TaskType, handler: Arc<dyn WorkHandler>) {
        self.handlers.insert(task_type, handler);
    }

    /// Load persisted state and register enabled tasks with the platform.
    ///
    /// Call once at host startup, before `run()`.
    pub async fn initialize(&mut self) {
        self.load_state();

        let now = Utc::now();
        for task in &mut self.tasks {
            // Legacy or interrupted state may lack a schedule.
            if task.enabled && task.next_run.is_none() {
                task.schedule_next_run(now, &self.config.quiet_hours);
            }
            // A run interrupted by process death is no longer running.
            if task.state == TaskState::Running {
                task.state = TaskState::Pending;
            }
        }

        self.battery.adapt(self.platform.battery_level());

        if self.config.enabled {
            let ids: Vec<String> = self
                .tasks
                .iter()
                .filter(|t| t.enabled)
                .map(|t| t.id.clone())
                .collect();
            for id in ids {
                self.register_with_platform(&id).await;
            }
        }

        info!("scheduler initialized with {} tasks", self.tasks.len());
    }

    /// Upsert a task from a spec.
    ///
    /// Merges into an existing task or creates one with defaults, computes
    /// `next_run` when enabled, and attempts idempotent platform
    /// registration when global processing is enabled.
    pub async fn configure_task(&mut self, spec: TaskSpec) -> Result<()> {
        self.configure_task_at(spec, Utc::now()).await
    }

    /// `configure_task` with an explicit clock, for deterministic tests.
    pub async fn configure_task_at(&mut self, spec: TaskSpec, now: DateTime<Utc>) -> Result<()> {
        if spec.id.trim().is_empty() {
            return Err(SchedulerError::InvalidTask("task id must not be empty".to_owned()));
        }
        if let Some(frequency) = &spec.frequency
            && frequency.interval_minutes == 0
        {
            return Err(SchedulerError::InvalidTask(format!(
                "task '{}' has a zero interval",
                spec.id
            )));
        }

        let index = match self.tasks.iter().position(|t| t.id == spec.id) {
            Some(i) => i,
            None => {
                self.tasks
                    .push(BackgroundTask::new(spec.id.clone(), spec.task_type.clone()));
                self.tasks.len() - 1
            }
        };
        let task = &mut self.tasks[index];
        task.apply_spec(&spec);

        if task.state == TaskState::Cancelled {
            task.state = TaskState::Pending;
        }
        if task.enabled {
            if task.frequency.run_immediately {
                task.mark_due_at(now);
            } else {
                task.schedule_next_run(now, &self.config.quiet_hours);
            }
        }
        let task_id = task.id.clone();

        if self.config.enabled {
            self.register_with_platform(&task_id).await;
        }
        self.persist();
        Ok(())
    }

    /// Enable or disable a task. Disabling prevents future dispatch but
    /// never cancels an in-flight execution. Returns `true` when found.
    pub fn set_task_enabled(&mut self, task_id: &str, enabled: bool) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) else {
            return false;
        };
        task.enabled = enabled;
        if enabled {
            if task.state == TaskState::Cancelled {
                task.state = TaskState::Pending;
            }
            if task.next_run.is_none() {
                task.schedule_next_run(Utc::now(), &self.config.quiet_hours);
            }
        }
        self.persist();
        true
    }

    /// Cancel a task: no future dispatch until reconfigured. Returns
    /// `true` when found. An in-flight run finishes but is not
    /// rescheduled.
    pub fn cancel_task(&mut self, task_id: &str) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) else {
            return false;
        };
        task.state = TaskState::Cancelled;
        task.next_run = None;
        self.persist();
        true
    }

    /// Make a task due immediately. Returns `true` when found.
    pub fn mark_task_due_now(&mut self, task_id: &str) -> bool {
        self.mark_task_due_at(task_id, Utc::now())
    }

    /// `mark_task_due_now` with an explicit clock.
    pub fn mark_task_due_at(&mut self, task_id: &str, now: DateTime<Utc>) -> bool {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) {
            task.mark_due_at(now);
            return true;
        }
        false
    }

    /// Registered tasks.
    #[must_use]
    pub fn tasks(&self) -> &[BackgroundTask] {
        &self.tasks
    }

    /// Recorded execution history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[ExecutionResult] {
        &self.history
    }

    /// The time-budget tracker (shared with completion callbacks).
    #[must_use]
    pub fn budget(&self) -> &TimeBudgetTracker {
        &self.budget
    }

    /// The active battery mode.
    #[must_use]
    pub fn active_mode(&self) -> BatteryMode {
        self.battery.active_mode()
    }

    /// Force a battery mode by name, rejecting unknown names. Persists
    /// the change.
    pub fn set_battery_mode_by_name(&mut self, name: &str) -> Result<()> {
        self.battery.set_mode_by_name(name)?;
        self.persist();
        Ok(())
    }

    /// Which OS alarm class the named task's wake-up should use.
    #[must_use]
    pub fn alarm_class(&self, task_id: &str) -> Option<AlarmClass> {
        self.tasks
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| self.doze.suggest_alarm_class(t.priority))
    }

    /// Record a device idle entry reported by the host.
    pub fn on_doze_enter(&mut self) {
        self.doze.record_entry_at(now_epoch_millis());
    }

    /// Record a device idle exit reported by the host.
    pub fn on_doze_exit(&mut self) {
        self.doze.record_exit_at(now_epoch_millis());
        self.persist();
    }

    /// Opportunistic tick when the app moves to the background.
    pub async fn on_app_background(&mut self) {
        self.tick().await;
    }

    /// Diagnostics snapshot of tasks and history.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            tasks: self.tasks.clone(),
            history: self.history.clone(),
        }
    }

    /// Aggregated run statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let successes = self.history.iter().filter(|r| r.success).count();
        SchedulerStats {
            total_runs: self.history.len(),
            successes,
            failures: self.history.len() - successes,
            total_duration_ms: self.history.iter().map(|r| r.duration_ms).sum(),
            total_battery_cost: self.history.iter().map(|r| r.estimated_battery_cost).sum(),
            budget_used_ms: self.budget.used_ms(),
            budget_remaining_ms: self.budget.remaining_ms(),
            active_mode: self.battery.active_mode(),
        }
    }

    /// Run one coordination tick now.
    pub async fn tick(&mut self) {
        self.tick_at(Utc::now()).await;
    }

    /// Run one coordination tick with an explicit clock, for
    /// deterministic tests.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }

        let mode_changed = self.battery.adapt(self.platform.battery_level()).is_some();
        self.budget.reset_if_new_day_at(now);

        let in_quiet_hours = self.config.quiet_hours.contains_instant(now);

        let running = self
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Running)
            .count();
        let capacity = self.config.max_concurrent_tasks.saturating_sub(running);
        if capacity == 0 {
            debug!("tick skipped: concurrency limit reached");
            if mode_changed {
                self.persist();
            }
            return;
        }

        // Ready set, minus quiet-hours suppression and deferred tasks.
        let mut candidates: Vec<BackgroundTask> = Vec::new();
        for task in self.tasks.iter().filter(|t| t.is_ready(now)) {
            if in_quiet_hours && task.constraints.respect_quiet_hours {
                continue;
            }
            match self.deferral_reason(task, now) {
                Some(reason) => {
                    // Deferral, not an error: state and next_run untouched.
                    debug!("task {} deferred: {reason}", task.id);
                }
                None => candidates.push(task.clone()),
            }
        }

        candidates.sort_by(|a, b| {
            b.priority_score(now)
                .partial_cmp(&a.priority_score(now))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.next_run.cmp(&b.next_run))
        });

        let mut join_set: JoinSet<Completion> = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut completions: Vec<Completion> = Vec::new();

        for task in candidates.into_iter().take(capacity) {
            if let Some(entry) = self.tasks.iter_mut().find(|t| t.id == task.id) {
                entry.state = TaskState::Running;
            }

            let Some(handler) = self.handlers.get(&task.task_type).cloned() else {
                warn!("no handler registered for task type {}", task.task_type);
                completions.push(Completion {
                    task_id: task.id.clone(),
                    report: WorkReport::failed(format!(
                        "no handler registered for type {}",
                        task.task_type
                    )),
                    duration_ms: 0,
                });
                continue;
            };
            debug!("dispatching task {} ({})", task.id, task.task_type);

            let spawn_id = task.id.clone();
            let timeout = std::time::Duration::from_millis(task.policy.timeout_ms);
            let handle = join_set.spawn(async move {
                let started = std::time::Instant::now();
                match tokio::time::timeout(timeout, handler.run(&task)).await {
                    Ok(report) => Completion {
                        task_id: task.id.clone(),
                        report,
                        duration_ms: started.elapsed().as_millis() as u64,
                    },
                    Err(_) => Completion {
                        task_id: task.id.clone(),
                        report: WorkReport::failed("timeout"),
                        duration_ms: task.policy.timeout_ms,
                    },
                }
            });
            spawned.insert(handle.id(), spawn_id);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((id, completion)) => {
                    spawned.remove(&id);
                    completions.push(completion);
                }
                Err(join_error) => {
                    // A panicking handler never crashes the scheduler.
                    let task_id = spawned.remove(&join_error.id()).unwrap_or_default();
                    error!("handler for task {task_id} panicked: {join_error}");
                    completions.push(Completion {
                        task_id,
                        report: WorkReport::failed("handler panicked"),
                        duration_ms: 0,
                    });
                }
            }
        }

        let ran_any = !completions.is_empty();
        for completion in completions {
            self.apply_completion(completion, now);
        }
        if ran_any || mode_changed {
            self.persist();
        }
    }

    /// Start the coordination loop on the configured cadence.
    ///
    /// Shutdown drains naturally: abort the returned handle between
    /// ticks; each tick awaits its in-flight executions and persists
    /// before returning.
    pub fn run(mut self) -> tokio::task::JoinHandle<()> {
        let interval_secs = self.config.tick_interval_secs.max(1);
        tokio::spawn(async move {
            info!("scheduler loop started ({} tasks)", self.tasks.len());
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }

    /// Persist registry, history, mode, budget and Doze record. Failures
    /// are logged and skipped; in-memory state stays authoritative.
    pub fn persist(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let state = SchedulerState {
            version: 1,
            tasks: self.tasks.clone(),
            history: self.history.clone(),
            battery_mode: self.battery.active_mode(),
            budget: Some(self.budget.snapshot()),
            doze: self.doze.record().clone(),
        };
        if let Err(e) = store::save_state(path, &state) {
            error!("cannot persist scheduler state: {e}");
        }
    }

    /// The ordered constraint check. Returns a deferral reason, or `None`
    /// when the task may dispatch.
    fn deferral_reason(&self, task: &BackgroundTask, now: DateTime<Utc>) -> Option<&'static str> {
        let critical = task.priority == TaskPriority::Critical;

        if !critical && !self.battery.active_restrictions().background_sync {
            return Some("battery mode restricts background work");
        }
        if task.frequency.charging_only && !self.platform.is_charging() {
            return Some("waiting for charger");
        }
        let connectivity = self.platform.connectivity();
        if task.frequency.wifi_only && connectivity.link != LinkType::Wifi {
            return Some("waiting for wifi");
        }
        if let Some(minimum) = task.constraints.minimum_battery
            && self.platform.battery_level() < minimum
        {
            return Some("battery below task minimum");
        }
        if task.constraints.requires_network && !connectivity.connected {
            return Some("no connectivity");
        }
        if task.constraints.respect_quiet_hours && self.config.quiet_hours.contains_instant(now) {
            return Some("quiet hours");
        }
        if !critical && self.budget.remaining_ms() < task.constraints.max_background_time_ms {
            return Some("insufficient time budget");
        }
        None
    }

    fn apply_completion(&mut self, completion: Completion, now: DateTime<Utc>) {
        self.budget.charge(completion.duration_ms);

        let mut task_type = TaskType::Custom(String::new());
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == completion.task_id) {
            task_type = task.task_type.clone();
            task.last_run = Some(now);
            // A task cancelled mid-flight keeps its cancelled state and
            // is not rescheduled.
            if task.state == TaskState::Running {
                task.state = if completion.report.success {
                    TaskState::Completed
                } else {
                    TaskState::Failed
                };
                task.schedule_next_run(now, &self.config.quiet_hours);
            }
        }

        let result = ExecutionResult {
            task_id: completion.task_id,
            task_type,
            success: completion.report.success,
            duration_ms: completion.duration_ms,
            estimated_battery_cost: completion.report.estimated_battery_cost,
            errors: completion.report.errors,
            timestamp: now,
        };

        if !result.success {
            debug!(
                "task {} failed: {}",
                result.task_id,
                result.errors.join("; ")
            );
        }

        if let Some(tx) = &self.result_tx {
            let _ = tx.send(result.clone());
        }
        self.history.push(result);
        self.trim_history();
    }

    fn trim_history(&mut self) {
        if self.history.len() <= self.config.history_limit {
            return;
        }
        let drop_count = self.history.len().saturating_sub(self.config.history_limit);
        self.history.drain(0..drop_count);
    }

    fn load_state(&mut self) {
        let Some(path) = self.state_path.clone() else {
            return;
        };
        let state = match store::load_state(&path) {
            Ok(state) => state,
            Err(e) => {
                warn!("cannot load scheduler state: {e}");
                return;
            }
        };

        for task in state.tasks {
            if let Some(existing) = self.tasks.iter_mut().find(|t| t.id == task.id) {
                *existing = task;
            } else {
                self.tasks.push(task);
            }
        }
        self.history = state.history;
        self.trim_history();
        self.battery.set_mode(state.battery_mode);
        if let Some(budget) = state.budget {
            self.budget = Arc::new(TimeBudgetTracker::from_snapshot(budget));
        }
        self.doze = DozeCoordinator::from_record(state.doze);

        debug!("loaded scheduler state from {}", path.display());
    }

    /// Attempt idempotent OS registration for a task. Refusal degrades to
    /// loop-only coordination.
    async fn register_with_platform(&mut self, task_id: &str) {
        let Some((name, interval_secs, already_registered)) = self
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| {
                (
                    format!("lowtide.{}", t.id),
                    u64::from(t.frequency.interval_minutes) * 60,
                    t.registered_with_platform,
                )
            })
        else {
            return;
        };
        if already_registered {
            return;
        }

        let registered = match self
            .platform
            .register_periodic_task(&name, interval_secs)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                warn!("platform refused periodic registration for {task_id}; using in-app ticks");
                false
            }
            Err(e) => {
                warn!("platform registration for {task_id} failed: {e}; using in-app ticks");
                false
            }
        };

        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) {
            task.registered_with_platform = registered;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::QuietHoursConfig;
    use crate::platform::Connectivity;
    use crate::scheduler::tasks::{Frequency, TaskConstraints};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakePlatform {
        battery: Mutex<f32>,
        charging: AtomicBool,
        connectivity: Mutex<Connectivity>,
    }

    impl Default for FakePlatform {
        fn default() -> Self {
            Self {
                battery: Mutex::new(0.8),
                charging: AtomicBool::new(false),
                connectivity: Mutex::new(Connectivity::online(LinkType::Wifi)),
            }
        }
    }

    #[async_trait]
    impl PlatformExecutor for FakePlatform {
        async fn register_periodic_task(
            &self,
            _name: &str,
            _min_interval_secs: u64,
        ) -> Result<bool> {
            Ok(true)
        }

        async fn unregister_task(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        fn battery_level(&self) -> f32 {
            *self.battery.lock().unwrap()
        }

        fn is_charging(&self) -> bool {
            self.charging.load(Ordering::Relaxed)
        }

        fn connectivity(&self) -> Connectivity {
            *self.connectivity.lock().unwrap()
        }
    }

    struct RecordingHandler {
        ran: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                ran: Mutex::new(Vec::new()),
            })
        }

        fn ran_ids(&self) -> Vec<String> {
            self.ran.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkHandler for RecordingHandler {
        async fn run(&self, task: &BackgroundTask) -> WorkReport {
            self.ran.lock().unwrap().push(task.id.clone());
            WorkReport::ok()
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl WorkHandler for SlowHandler {
        async fn run(&self, _task: &BackgroundTask) -> WorkReport {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            WorkReport::ok()
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl WorkHandler for PanickingHandler {
        async fn run(&self, _task: &BackgroundTask) -> WorkReport {
            panic!("boom");
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn test_config() -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        config.quiet_hours.enabled = false;
        config
    }

    fn scheduler(config: SchedulerConfig, platform: Arc<FakePlatform>) -> TaskScheduler {
        TaskScheduler::new(config, platform).with_state_path(None)
    }

    fn due_spec(id: &str) -> TaskSpec {
        TaskSpec::new(id, TaskType::Sync).frequency(Frequency {
            interval_minutes: 30,
            run_immediately: true,
            ..Frequency::default()
        })
    }

    #[tokio::test]
    async fn configure_task_rejects_empty_id_and_zero_interval() {
        let mut sched = scheduler(test_config(), Arc::new(FakePlatform::default()));

        let err = sched
            .configure_task(TaskSpec::new("  ", TaskType::Sync))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTask(_)));

        let err = sched
            .configure_task(TaskSpec::new("sync", TaskType::Sync).interval_minutes(0))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTask(_)));
        assert!(sched.tasks().is_empty());
    }

    #[tokio::test]
    async fn due_task_runs_and_reschedules() {
        let platform = Arc::new(FakePlatform::default());
        let mut sched = scheduler(test_config(), platform);
        let handler = RecordingHandler::new();
        sched.register_handler(TaskType::Sync, handler.clone());

        let now = noon();
        sched.configure_task_at(due_spec("sync"), now).await.unwrap();
        sched.tick_at(now).await;

        assert_eq!(handler.ran_ids(), vec!["sync".to_owned()]);
        assert_eq!(sched.history().len(), 1);
        assert!(sched.history()[0].success);

        let task = &sched.tasks()[0];
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.last_run, Some(now));
        assert_eq!(task.next_run, Some(now + chrono::Duration::minutes(30)));
        assert!(task.registered_with_platform);
    }

    #[tokio::test]
    async fn concurrency_limit_prefers_higher_priority() {
        let mut config = test_config();
        config.max_concurrent_tasks = 1;
        let mut sched = scheduler(config, Arc::new(FakePlatform::default()));
        let handler = RecordingHandler::new();
        sched.register_handler(TaskType::Sync, handler.clone());

        let now = noon();
        sched
            .configure_task_at(due_spec("low").priority(TaskPriority::Low), now)
            .await
            .unwrap();
        sched
            .configure_task_at(due_spec("critical").priority(TaskPriority::Critical), now)
            .await
            .unwrap();

        sched.tick_at(now).await;
        assert_eq!(handler.ran_ids(), vec!["critical".to_owned()]);

        // The lower-priority task is still due on the next tick.
        sched.tick_at(now).await;
        assert_eq!(
            handler.ran_ids(),
            vec!["critical".to_owned(), "low".to_owned()]
        );
    }

    #[tokio::test]
    async fn dispatch_order_is_critical_then_medium_then_low() {
        let mut config = test_config();
        config.max_concurrent_tasks = 1;
        let mut sched = scheduler(config, Arc::new(FakePlatform::default()));
        let handler = RecordingHandler::new();
        sched.register_handler(TaskType::Sync, handler.clone());

        let now = noon();
        sched
            .configure_task_at(due_spec("low").priority(TaskPriority::Low), now)
            .await
            .unwrap();
        sched
            .configure_task_at(due_spec("medium").priority(TaskPriority::Medium), now)
            .await
            .unwrap();
        sched
            .configure_task_at(due_spec("critical").priority(TaskPriority::Critical), now)
            .await
            .unwrap();

        for _ in 0..3 {
            sched.tick_at(now).await;
        }
        assert_eq!(
            handler.ran_ids(),
            vec![
                "critical".to_owned(),
                "medium".to_owned(),
                "low".to_owned()
            ]
        );
    }

    #[tokio::test]
    async fn mode_change_is_persisted_when_tick_has_no_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.json");
        let platform = Arc::new(FakePlatform::default());

        let mut config = test_config();
        config.max_concurrent_tasks = 1;
        let mut sched = TaskScheduler::new(config, platform.clone())
            .with_state_path(Some(path.clone()));
        let now = noon();
        sched.configure_task_at(due_spec("sync"), now).await.unwrap();

        // Saturate the concurrency limit so the tick bails out early.
        sched.tasks[0].state = TaskState::Running;
        *platform.battery.lock().unwrap() = 0.10;
        sched.tick_at(now).await;

        assert_eq!(sched.active_mode(), BatteryMode::UltraSaver);
        let state = store::load_state(&path).unwrap();
        assert_eq!(state.battery_mode, BatteryMode::UltraSaver);
    }

    #[tokio::test]
    async fn restrictive_mode_defers_all_but_critical() {
        let platform = Arc::new(FakePlatform::default());
        *platform.battery.lock().unwrap() = 0.10;
        let mut sched = scheduler(test_config(), platform);
        let handler = RecordingHandler::new();
        sched.register_handler(TaskType::Sync, handler.clone());

        let now = noon();
        sched
            .configure_task_at(due_spec("routine").priority(TaskPriority::High), now)
            .await
            .unwrap();
        sched
            .configure_task_at(due_spec("urgent").priority(TaskPriority::Critical), now)
            .await
            .unwrap();

        sched.tick_at(now).await;
        assert_eq!(sched.active_mode(), BatteryMode::UltraSaver);
        assert_eq!(handler.ran_ids(), vec!["urgent".to_owned()]);

        // Deferral leaves the task due, not failed.
        let routine = sched.tasks().iter().find(|t| t.id == "routine").unwrap();
        assert_eq!(routine.state, TaskState::Pending);
        assert_eq!(routine.next_run, Some(now));
    }

    #[tokio::test]
    async fn exhausted_budget_blocks_all_but_critical() {
        let mut config = test_config();
        config.budget.daily_limit_ms = 1_000;
        let mut sched = scheduler(config, Arc::new(FakePlatform::default()));
        let handler = RecordingHandler::new();
        sched.register_handler(TaskType::Sync, handler.clone());

        let now = noon();
        sched.configure_task_at(due_spec("normal"), now).await.unwrap();
        sched
            .configure_task_at(due_spec("urgent").priority(TaskPriority::Critical), now)
            .await
            .unwrap();

        // Default reservation (30s) exceeds the 1s daily budget.
        sched.tick_at(now).await;
        assert_eq!(handler.ran_ids(), vec!["urgent".to_owned()]);
    }

    #[tokio::test]
    async fn quiet_hours_suppress_respecting_tasks() {
        let mut config = test_config();
        config.quiet_hours = QuietHoursConfig {
            enabled: true,
            start_hour: 22,
            start_min: 0,
            end_hour: 7,
            end_min: 0,
        };
        let mut sched = scheduler(config, Arc::new(FakePlatform::default()));
        let handler = RecordingHandler::new();
        sched.register_handler(TaskType::Sync, handler.clone());

        let late = Utc.with_ymd_and_hms(2026, 3, 10, 23, 0, 0).unwrap();
        sched.configure_task_at(due_spec("polite"), late).await.unwrap();
        sched
            .configure_task_at(
                due_spec("alarm").constraints(TaskConstraints {
                    respect_quiet_hours: false,
                    ..TaskConstraints::default()
                }),
                late,
            )
            .await
            .unwrap();

        sched.tick_at(late).await;
        assert_eq!(handler.ran_ids(), vec!["alarm".to_owned()]);
    }

    #[tokio::test]
    async fn timeout_records_failure_and_reschedules() {
        let mut sched = scheduler(test_config(), Arc::new(FakePlatform::default()));
        sched.register_handler(TaskType::Sync, Arc::new(SlowHandler));

        let now = noon();
        let spec = due_spec("slow").policy(crate::scheduler::tasks::ExecutionPolicy {
            timeout_ms: 20,
            ..crate::scheduler::tasks::ExecutionPolicy::default()
        });
        sched.configure_task_at(spec, now).await.unwrap();
        sched.tick_at(now).await;

        assert_eq!(sched.history().len(), 1);
        let result = &sched.history()[0];
        assert!(!result.success);
        assert_eq!(result.errors, vec!["timeout".to_owned()]);
        assert_eq!(result.duration_ms, 20);

        let task = &sched.tasks()[0];
        assert_eq!(task.state, TaskState::Failed);
        assert!(task.next_run > Some(now));
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let mut sched = scheduler(test_config(), Arc::new(FakePlatform::default()));
        sched.register_handler(TaskType::Sync, Arc::new(PanickingHandler));

        let now = noon();
        sched.configure_task_at(due_spec("explosive"), now).await.unwrap();
        sched.tick_at(now).await;

        assert_eq!(sched.history().len(), 1);
        assert!(!sched.history()[0].success);
        assert_eq!(sched.history()[0].errors, vec!["handler panicked".to_owned()]);
        assert_eq!(sched.tasks()[0].state, TaskState::Failed);

        // The loop keeps running after a panicking handler.
        sched.tick_at(now + chrono::Duration::hours(1)).await;
    }

    #[tokio::test]
    async fn missing_handler_records_failure() {
        let mut sched = scheduler(test_config(), Arc::new(FakePlatform::default()));
        let now = noon();
        sched.configure_task_at(due_spec("orphan"), now).await.unwrap();
        sched.tick_at(now).await;

        assert_eq!(sched.history().len(), 1);
        assert!(!sched.history()[0].success);
        assert_eq!(sched.tasks()[0].state, TaskState::Failed);
    }

    #[tokio::test]
    async fn cancelled_task_is_never_dispatched() {
        let mut sched = scheduler(test_config(), Arc::new(FakePlatform::default()));
        let handler = RecordingHandler::new();
        sched.register_handler(TaskType::Sync, handler.clone());

        let now = noon();
        sched.configure_task_at(due_spec("sync"), now).await.unwrap();
        assert!(sched.cancel_task("sync"));

        sched.tick_at(now).await;
        assert!(handler.ran_ids().is_empty());

        // Reconfiguring revives the task.
        sched.configure_task_at(due_spec("sync"), now).await.unwrap();
        sched.tick_at(now).await;
        assert_eq!(handler.ran_ids(), vec!["sync".to_owned()]);
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.json");
        let platform = Arc::new(FakePlatform::default());
        let now = noon();

        {
            let mut sched = TaskScheduler::new(test_config(), platform.clone())
                .with_state_path(Some(path.clone()));
            let handler = RecordingHandler::new();
            sched.register_handler(TaskType::Sync, handler);
            sched.configure_task_at(due_spec("sync"), now).await.unwrap();
            sched.tick_at(now).await;
        }

        let mut restored =
            TaskScheduler::new(test_config(), platform).with_state_path(Some(path));
        restored.initialize().await;

        assert_eq!(restored.tasks().len(), 1);
        assert_eq!(restored.tasks()[0].state, TaskState::Completed);
        assert_eq!(restored.history().len(), 1);
        assert!(restored.budget().used_ms() <= 20);
    }

    #[tokio::test]
    async fn stats_aggregate_history_and_budget() {
        let mut sched = scheduler(test_config(), Arc::new(FakePlatform::default()));
        let handler = RecordingHandler::new();
        sched.register_handler(TaskType::Sync, handler);

        let now = noon();
        sched.configure_task_at(due_spec("sync"), now).await.unwrap();
        sched.tick_at(now).await;

        let stats = sched.stats();
        assert_eq!(stats.total_runs, 1);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.active_mode, BatteryMode::Normal);
        assert_eq!(
            stats.budget_used_ms + stats.budget_remaining_ms,
            sched.budget().daily_limit_ms()
        );
    }
}
