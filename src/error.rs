//! Error types for the lowtide scheduler.

/// Top-level error type for the background scheduling subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Caller requested an unknown battery mode.
    #[error("invalid battery mode: {0}")]
    InvalidMode(String),

    /// Task spec rejected at configuration time (bad id, zero interval).
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// Persisted state read/write failed. In-memory state remains
    /// authoritative; callers log and continue.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SchedulerError>;
