//! Message protocol between the pool and its workers
//!
//! Frames are fully-owned values: nothing crossing the pool⇄worker boundary
//! is shared or mutated in place. Payloads are `serde_json::Value` so that
//! the same frames work over an in-process channel today and a serialized
//! transport (process- or socket-backed spawners) without change.

use crate::error::{ExecError, PoolError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Argument and result payload type.
pub type Value = serde_json::Value;

/// Unique identifier for a task, per process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocate a fresh unique TaskId.
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value.
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a task asks the worker to execute: exactly one of a registered
/// method name or raw offload source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskTarget {
    /// Invoke a method registered in the worker runtime.
    Method {
        /// Registered method name
        method: String,
    },
    /// Compile and invoke raw source (dynamic offload).
    Source {
        /// Executable source text, opaque to the scheduler
        source: String,
    },
}

/// Task request frame, pool → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Task identifier echoed back in the reply
    pub id: TaskId,
    /// Method name or offload source
    #[serde(flatten)]
    pub target: TaskTarget,
    /// Ordered argument list
    pub args: Vec<Value>,
}

impl TaskRequest {
    /// Build a request targeting a registered method.
    pub fn method(id: TaskId, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            target: TaskTarget::Method {
                method: method.into(),
            },
            args,
        }
    }

    /// Build a request carrying offload source.
    pub fn source(id: TaskId, source: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            target: TaskTarget::Source {
                source: source.into(),
            },
            args,
        }
    }
}

/// Discriminant carried on an error reply so the scheduler can surface the
/// typed taxonomy without parsing message text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Target name unregistered in the worker runtime
    MethodNotFound,
    /// Source task received by a runtime without a compile capability
    OffloadUnsupported,
    /// The invoked function (or the compiler) returned an error
    Execution,
}

/// Worker-supplied failure description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// What went wrong, as a machine-readable tag
    pub kind: FailureKind,
    /// Error message
    pub message: String,
    /// Structured diagnostic (e.g. a trace), when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TaskFailure {
    /// Failure for an unregistered method name.
    pub fn method_not_found(name: &str) -> Self {
        Self {
            kind: FailureKind::MethodNotFound,
            message: name.to_string(),
            detail: None,
        }
    }

    /// Failure for a source task on a runtime without a compiler.
    pub fn offload_unsupported() -> Self {
        Self {
            kind: FailureKind::OffloadUnsupported,
            message: "runtime has no compile capability".to_string(),
            detail: None,
        }
    }

    /// Failure reported by the invoked function.
    pub fn execution(err: ExecError) -> Self {
        Self {
            kind: FailureKind::Execution,
            message: err.message,
            detail: err.detail,
        }
    }

    /// Map the wire failure onto the caller-facing error taxonomy.
    pub fn into_pool_error(self) -> PoolError {
        match self.kind {
            FailureKind::MethodNotFound => PoolError::MethodNotFound(self.message),
            FailureKind::OffloadUnsupported => PoolError::InvalidOffload,
            FailureKind::Execution => PoolError::WorkerReported {
                message: self.message,
                detail: self.detail,
            },
        }
    }
}

/// Reply frame, worker → pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// Startup handshake, sent exactly once before any task is accepted
    Ready,
    /// Successful completion of the identified task
    Result {
        /// Task identifier from the request
        id: TaskId,
        /// Result payload
        result: Value,
    },
    /// Failed completion of the identified task; the worker stays alive
    Error {
        /// Task identifier from the request
        id: TaskId,
        /// Failure description
        error: TaskFailure,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_id_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_request_frame_shape() {
        let req = TaskRequest::method(TaskId::from_u64(7), "add", vec![json!(2), json!(3)]);
        let frame = serde_json::to_value(&req).unwrap();
        assert_eq!(frame, json!({ "id": 7, "method": "add", "args": [2, 3] }));

        let req = TaskRequest::source(TaskId::from_u64(8), "a + b", vec![json!(1)]);
        let frame = serde_json::to_value(&req).unwrap();
        assert_eq!(frame, json!({ "id": 8, "source": "a + b", "args": [1] }));
    }

    #[test]
    fn test_request_frame_roundtrip_target() {
        let frame = json!({ "id": 3, "source": "x", "args": [] });
        let req: TaskRequest = serde_json::from_value(frame).unwrap();
        assert!(matches!(req.target, TaskTarget::Source { ref source } if source == "x"));
    }

    #[test]
    fn test_reply_frame_tags() {
        let ready = serde_json::to_value(&WorkerReply::Ready).unwrap();
        assert_eq!(ready, json!({ "type": "ready" }));

        let ok = WorkerReply::Result {
            id: TaskId::from_u64(5),
            result: json!(55),
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({ "type": "result", "id": 5, "result": 55 })
        );

        let err = WorkerReply::Error {
            id: TaskId::from_u64(5),
            error: TaskFailure::method_not_found("nope"),
        };
        let frame = serde_json::to_value(&err).unwrap();
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["error"]["kind"], "method_not_found");
        // detail is omitted, not serialized as null
        assert!(frame["error"].get("detail").is_none());
    }

    #[test]
    fn test_failure_mapping() {
        assert_eq!(
            TaskFailure::method_not_found("fib").into_pool_error(),
            PoolError::MethodNotFound("fib".to_string())
        );
        assert_eq!(
            TaskFailure::offload_unsupported().into_pool_error(),
            PoolError::InvalidOffload
        );
        let reported = TaskFailure::execution(ExecError::with_detail("boom", "trace")).into_pool_error();
        assert_eq!(
            reported,
            PoolError::WorkerReported {
                message: "boom".to_string(),
                detail: Some("trace".to_string()),
            }
        );
    }
}
