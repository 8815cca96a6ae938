//! Background task scheduling.
//!
//! A single coordination loop dispatches registered tasks when their
//! schedule, battery mode, connectivity, quiet hours and time budget
//! all allow it. Hosts describe tasks with [`TaskSpec`] and supply the
//! work itself through [`WorkHandler`] implementations.

pub mod runner;
pub mod tasks;

pub use runner::{SchedulerSnapshot, SchedulerStats, TaskScheduler};
pub use tasks::{
    BackgroundTask, ExecutionPolicy, ExecutionResult, Frequency, TaskConstraints, TaskPriority,
    TaskSpec, TaskState, TaskType, WorkHandler, WorkReport,
};
