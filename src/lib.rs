//! Lowtide: battery-adaptive background task scheduling.
//!
//! Coordinates periodic background work on resource-constrained mobile
//! devices so it happens when the device can afford it, not merely when
//! a timer fires. The host embeds a [`TaskScheduler`], registers
//! [`WorkHandler`]s for its task types, and wires platform battery,
//! connectivity and wake-up APIs through a [`PlatformExecutor`].
//!
//! # Architecture
//!
//! Five cooperating components, owned by one coordination loop:
//! - **Battery modes**: maps battery level to a restriction profile
//! - **Time budget**: caps total daily background execution time
//! - **Doze tracking**: records device idle cycles and picks alarm classes
//! - **Network batching**: coalesces low-priority requests into flushes
//! - **Scheduler**: gates, orders and dispatches due tasks each tick
//!
//! [`TaskScheduler`]: scheduler::TaskScheduler
//! [`WorkHandler`]: scheduler::WorkHandler
//! [`PlatformExecutor`]: platform::PlatformExecutor

pub mod batch;
pub mod battery;
pub mod budget;
pub mod config;
pub mod doze;
pub mod error;
pub mod platform;
pub mod scheduler;
pub mod store;

pub use batch::{BatchedRequest, FlushOutcome, NetworkBatcher, RequestDispatcher};
pub use battery::{BatteryMode, BatteryModeController, ModeChange, ModeRestrictions};
pub use budget::{TimeBudgetSnapshot, TimeBudgetTracker};
pub use config::SchedulerConfig;
pub use doze::{AlarmClass, DozeCoordinator, DozeRecord};
pub use error::{Result, SchedulerError};
pub use platform::{Connectivity, InProcessExecutor, LinkType, PlatformExecutor};
pub use scheduler::{TaskScheduler, TaskSpec, WorkHandler, WorkReport};
