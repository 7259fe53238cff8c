//! Pool-side representation of one execution unit

use crate::error::PoolError;
use crate::future::Promise;
use crate::protocol::TaskId;
use crate::queue::QueuedTask;
use crate::runtime::{Compile, WorkerRuntime, WorkerScript};
use crate::spawn::{ExecUnit, Spawn};
use crate::transport::{self, ClosedGuard, EventSender, Transport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Unique identifier for a worker within one pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(u32);

impl WorkerId {
    pub fn new(id: u32) -> Self {
        WorkerId(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Lifecycle state of a worker.
///
/// Transitions: `Starting → Idle → Busy → Idle → … → Terminating →
/// Terminated`, with `Busy → Terminated` directly on crash and any state
/// `→ Terminated` on forced clear. No state is re-entered after
/// `Terminated`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned, ready handshake not yet received
    Starting,
    /// Ready for an assignment
    Idle,
    /// Executing exactly one task
    Busy,
    /// Teardown in progress
    Terminating,
    /// Gone; the handle is discarded
    Terminated,
}

/// The task currently assigned to a worker.
pub(crate) struct ActiveTask {
    pub id: TaskId,
    pub promise: Promise,
}

/// Handle to one worker: lifecycle state, its transport, and the current
/// assignment. Invariant: `active` is `Some` iff the state is `Busy`.
pub(crate) struct WorkerHandle {
    id: WorkerId,
    state: WorkerState,
    transport: Transport,
    unit: Box<dyn ExecUnit>,
    active: Option<ActiveTask>,
}

impl WorkerHandle {
    /// Spawn a new execution unit and return its handle in `Starting`
    /// state. The runtime (and a dedicated script's registry) is built on
    /// the worker thread itself, so registered functions never touch the
    /// pool's thread.
    pub fn spawn(
        id: WorkerId,
        spawner: &dyn Spawn,
        events: EventSender,
        script: Option<Arc<dyn WorkerScript>>,
        compiler: Option<Arc<dyn Compile>>,
    ) -> Result<WorkerHandle, PoolError> {
        let (transport, channel) = transport::connect(id, events.clone());
        let entry = Box::new(move || {
            let guard = ClosedGuard::new(id, events);
            let methods = script.as_ref().map(|s| s.init()).unwrap_or_default();
            WorkerRuntime::new(methods, compiler).serve(channel, guard);
        });

        let name = format!("offload-worker-{}", id.as_u32());
        let unit = spawner
            .spawn(&name, entry)
            .map_err(|e| PoolError::SpawnFailed(e.to_string()))?;
        debug!(worker = id.as_u32(), "spawned worker");

        Ok(WorkerHandle {
            id,
            state: WorkerState::Starting,
            transport,
            unit,
            active: None,
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Idle
    }

    pub fn is_busy(&self) -> bool {
        self.state == WorkerState::Busy
    }

    pub fn is_starting(&self) -> bool {
        self.state == WorkerState::Starting
    }

    /// Ready handshake received: `Starting → Idle`.
    pub fn mark_ready(&mut self) {
        if self.state == WorkerState::Starting {
            self.state = WorkerState::Idle;
        }
    }

    /// Ship a task to an idle worker: `Idle → Busy`.
    ///
    /// On a dead transport the task is handed back for the caller to roll
    /// back (requeue at the head) and the worker is left for the pending
    /// `Closed` event to reap.
    pub fn assign(&mut self, task: QueuedTask) -> Result<(), QueuedTask> {
        debug_assert!(self.is_idle() && self.active.is_none());

        let id = task.id();
        if !self.transport.send(task.request.clone()) {
            return Err(task);
        }
        task.promise.mark_assigned();
        self.active = Some(ActiveTask {
            id,
            promise: task.promise,
        });
        self.state = WorkerState::Busy;
        trace!(worker = self.id.as_u32(), task = id.as_u64(), "assigned task");
        Ok(())
    }

    /// Reply received for the current task: `Busy → Idle`. Returns the
    /// assignment so the caller can settle its promise.
    pub fn finish(&mut self) -> Option<ActiveTask> {
        let active = self.active.take()?;
        self.state = WorkerState::Idle;
        Some(active)
    }

    /// Id of the currently assigned task, if any.
    pub fn active_task(&self) -> Option<TaskId> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Tear the worker down and surrender any in-flight assignment.
    ///
    /// `join = Some(bound)` waits (bounded) for the unit to exit after its
    /// transport drops — the graceful path. `join = None` detaches
    /// immediately: forced clear, or reaping a unit that is already dead.
    pub fn retire(mut self, join: Option<Duration>) -> Option<ActiveTask> {
        self.state = WorkerState::Terminating;
        let active = self.active.take();

        // Dropping the transport is the termination signal.
        drop(self.transport);
        match join {
            Some(bound) => self.unit.join(bound),
            None => self.unit.terminate(),
        }

        self.state = WorkerState::Terminated;
        debug!(worker = self.id.as_u32(), "worker terminated");
        active
    }
}
