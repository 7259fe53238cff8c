//! Bidirectional message channel between the pool and one worker
//!
//! Requests flow over a dedicated per-worker channel; every worker's replies
//! flow into one shared event channel, tagged with the worker id, which the
//! pool's event loop drains. Unexpected closure is detected with an armed
//! guard living on the worker thread: if the thread unwinds (a crash), the
//! guard's `Drop` emits a `Closed` event; an orderly runtime exit disarms it
//! first.

use crate::protocol::{TaskRequest, WorkerReply};
use crate::worker::WorkerId;
use crossbeam::channel::{self, Receiver, RecvError, Sender};

/// Event observed by the pool's event loop.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// A protocol frame from the worker runtime
    Reply(WorkerReply),
    /// The worker's execution unit went away without an orderly exit
    Closed,
}

pub(crate) type EventSender = Sender<(WorkerId, WorkerEvent)>;
pub(crate) type EventReceiver = Receiver<(WorkerId, WorkerEvent)>;

/// Create the shared event channel for a pool.
pub(crate) fn event_channel() -> (EventSender, EventReceiver) {
    channel::unbounded()
}

/// Pool-side endpoint: ships task requests to one worker.
///
/// Dropping it is the termination signal — the worker's receive loop
/// observes the disconnect and exits.
pub(crate) struct Transport {
    tx: Sender<TaskRequest>,
}

impl Transport {
    /// Send a request. Returns false if the worker end is gone.
    pub fn send(&self, request: TaskRequest) -> bool {
        self.tx.send(request).is_ok()
    }
}

/// Worker-side endpoint: receives requests, emits replies.
pub(crate) struct WorkerChannel {
    worker_id: WorkerId,
    rx: Receiver<TaskRequest>,
    events: EventSender,
}

impl WorkerChannel {
    /// Block for the next request; `Err` means the pool dropped the
    /// transport and the worker should exit.
    pub fn recv(&self) -> Result<TaskRequest, RecvError> {
        self.rx.recv()
    }

    /// Send a reply frame. Returns false if the pool is gone.
    pub fn send(&self, reply: WorkerReply) -> bool {
        self.events
            .send((self.worker_id, WorkerEvent::Reply(reply)))
            .is_ok()
    }
}

/// Crash detector armed for the lifetime of the worker thread.
pub(crate) struct ClosedGuard {
    worker_id: WorkerId,
    events: EventSender,
    armed: bool,
}

impl ClosedGuard {
    pub fn new(worker_id: WorkerId, events: EventSender) -> Self {
        Self {
            worker_id,
            events,
            armed: true,
        }
    }

    /// Defuse before an orderly exit.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClosedGuard {
    fn drop(&mut self) {
        if self.armed {
            // Pool may already be gone; nothing to report then.
            let _ = self.events.send((self.worker_id, WorkerEvent::Closed));
        }
    }
}

/// Wire up both endpoints for one worker.
pub(crate) fn connect(worker_id: WorkerId, events: EventSender) -> (Transport, WorkerChannel) {
    let (tx, rx) = channel::unbounded();
    (
        Transport { tx },
        WorkerChannel {
            worker_id,
            rx,
            events,
        },
    )
}
