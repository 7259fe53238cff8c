//! Error types surfaced by the pool and by worker-side execution

/// Errors delivered through a task's handle.
///
/// Every failure in the pool is converted into one of these variants and
/// rejected on the specific task it belongs to; a worker failure never
/// propagates into unrelated call sites and never crashes the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The target method name is not registered in the worker runtime.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// The invoked function returned an error; the worker stays alive.
    #[error("{message}")]
    WorkerReported {
        /// Worker-supplied error message
        message: String,
        /// Structured diagnostic (e.g. a trace), when available
        detail: Option<String>,
    },

    /// The worker's transport closed unexpectedly while a task was assigned.
    #[error("worker crashed while executing the task")]
    WorkerCrashed,

    /// Dynamic offload was requested against a pool that does not support it.
    #[error("dynamic offload is not supported by this pool")]
    InvalidOffload,

    /// The task was rejected because the pool is being cleared.
    #[error("pool cleared")]
    PoolCleared,

    /// The operation was refused because the pool already started clearing.
    #[error("pool is closed")]
    PoolClosed,

    /// A queued task was withdrawn before it was assigned.
    #[error("task cancelled")]
    Cancelled,

    /// The execution-unit capability failed to create a worker.
    #[error("failed to spawn worker: {0}")]
    SpawnFailed(String),
}

impl PoolError {
    /// True for the shutdown-related rejections (`PoolCleared` / `PoolClosed`).
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PoolError::PoolCleared | PoolError::PoolClosed)
    }
}

/// Error returned by a registered method or a compiled offload function.
///
/// This is the worker-side "caught exception": the runtime converts it into
/// an error reply and keeps the execution unit alive. A panic, by contrast,
/// unwinds the unit and is observed by the scheduler as a crash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ExecError {
    /// Human-readable error message
    pub message: String,
    /// Structured diagnostic, when available
    pub detail: Option<String>,
}

impl ExecError {
    /// Create an error with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    /// Attach a structured diagnostic.
    pub fn with_detail(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: Some(detail.into()),
        }
    }
}

impl From<String> for ExecError {
    fn from(s: String) -> Self {
        ExecError::new(s)
    }
}

impl From<&str> for ExecError {
    fn from(s: &str) -> Self {
        ExecError::new(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        assert_eq!(
            PoolError::MethodNotFound("fib".to_string()).to_string(),
            "method not found: fib"
        );
        assert_eq!(
            PoolError::WorkerReported {
                message: "boom".to_string(),
                detail: None,
            }
            .to_string(),
            "boom"
        );
        assert_eq!(PoolError::Cancelled.to_string(), "task cancelled");
    }

    #[test]
    fn test_is_shutdown() {
        assert!(PoolError::PoolCleared.is_shutdown());
        assert!(PoolError::PoolClosed.is_shutdown());
        assert!(!PoolError::WorkerCrashed.is_shutdown());
        assert!(!PoolError::Cancelled.is_shutdown());
    }

    #[test]
    fn test_exec_error_from_str() {
        let err: ExecError = "bad argument".into();
        assert_eq!(err.message, "bad argument");
        assert!(err.detail.is_none());
    }

    #[test]
    fn test_exec_error_detail() {
        let err = ExecError::with_detail("boom", "at line 3");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.detail.as_deref(), Some("at line 3"));
    }
}
