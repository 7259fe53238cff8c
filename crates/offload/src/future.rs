//! Caller-facing futures for tasks and pool shutdown
//!
//! An explicit future type with states {pending, resolved, rejected}: the
//! scheduler settles it through the `Promise` half, callers observe it
//! through the `TaskHandle` half. Blocking waits use a mutex/condvar pair;
//! settling is idempotent and the first settle wins.

use crate::error::PoolError;
use crate::protocol::{TaskId, Value};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Observable status of a task.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Waiting in the task queue for an idle worker
    Queued,
    /// Assigned to exactly one worker and executing
    Assigned,
    /// Resolved with a result
    Completed,
    /// Rejected with an error
    Failed,
    /// Withdrawn from the queue before assignment
    Cancelled,
}

struct HandleShared {
    outcome: Mutex<Option<Result<Value, PoolError>>>,
    settled: Condvar,
    assigned: AtomicBool,
}

/// Scheduler-side settle handle for one task.
pub(crate) struct Promise {
    shared: Arc<HandleShared>,
}

impl Promise {
    /// Create a pending promise/handle pair for the given task.
    pub fn pair(id: TaskId) -> (Promise, TaskHandle) {
        let shared = Arc::new(HandleShared {
            outcome: Mutex::new(None),
            settled: Condvar::new(),
            assigned: AtomicBool::new(false),
        });
        (
            Promise {
                shared: shared.clone(),
            },
            TaskHandle { id, shared },
        )
    }

    /// Record that the task has been handed to a worker.
    pub fn mark_assigned(&self) {
        self.shared.assigned.store(true, Ordering::Release);
    }

    /// Resolve with a result. No-op if already settled.
    pub fn resolve(&self, value: Value) {
        self.settle(Ok(value));
    }

    /// Reject with an error. No-op if already settled.
    pub fn reject(&self, err: PoolError) {
        self.settle(Err(err));
    }

    fn settle(&self, outcome: Result<Value, PoolError>) {
        let mut slot = self.shared.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.shared.settled.notify_all();
        }
    }
}

/// Pending result of a submitted task.
///
/// Cheap to clone; every clone observes the same settlement.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    shared: Arc<HandleShared>,
}

impl TaskHandle {
    /// The task's identifier (usable with `Pool::cancel`).
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Current status of the task.
    pub fn status(&self) -> TaskStatus {
        match &*self.shared.outcome.lock() {
            Some(Ok(_)) => TaskStatus::Completed,
            Some(Err(PoolError::Cancelled)) => TaskStatus::Cancelled,
            Some(Err(_)) => TaskStatus::Failed,
            None => {
                if self.shared.assigned.load(Ordering::Acquire) {
                    TaskStatus::Assigned
                } else {
                    TaskStatus::Queued
                }
            }
        }
    }

    /// Block until the task settles.
    pub fn wait(&self) -> Result<Value, PoolError> {
        let mut slot = self.shared.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.shared.settled.wait(&mut slot);
        }
    }

    /// Block until the task settles or the timeout elapses.
    ///
    /// Returns `None` on timeout; the task keeps running — a caller wanting
    /// a hard deadline follows up with a forced `clear`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Value, PoolError>> {
        let mut slot = self.shared.outcome.lock();
        if slot.is_none() {
            self.shared.settled.wait_for(&mut slot, timeout);
        }
        slot.as_ref().cloned()
    }

    /// Non-blocking peek at the outcome.
    pub fn try_result(&self) -> Option<Result<Value, PoolError>> {
        self.shared.outcome.lock().as_ref().cloned()
    }

    /// Build an already-rejected handle (fail-fast paths).
    pub(crate) fn rejected(id: TaskId, err: PoolError) -> TaskHandle {
        let (promise, handle) = Promise::pair(id);
        promise.reject(err);
        handle
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

// ============================================================================
// Shutdown signaling
// ============================================================================

struct SignalShared {
    done: Mutex<bool>,
    cond: Condvar,
}

/// Pool-side settle half of a shutdown handle.
pub(crate) struct ShutdownSignal {
    shared: Arc<SignalShared>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SignalShared {
                done: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    /// Mark teardown as complete and wake all waiters. Idempotent.
    pub fn settle(&self) {
        let mut done = self.shared.done.lock();
        *done = true;
        self.shared.cond.notify_all();
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: self.shared.clone(),
        }
    }
}

/// Future settling once pool teardown has finished.
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<SignalShared>,
}

impl ShutdownHandle {
    /// Block until teardown completes.
    pub fn wait(&self) {
        let mut done = self.shared.done.lock();
        while !*done {
            self.shared.cond.wait(&mut done);
        }
    }

    /// Block up to `timeout`; returns whether teardown completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut done = self.shared.done.lock();
        if !*done {
            self.shared.cond.wait_for(&mut done, timeout);
        }
        *done
    }

    /// Non-blocking check.
    pub fn is_settled(&self) -> bool {
        *self.shared.done.lock()
    }
}
