//! The pool: a bounded set of workers, a FIFO task queue, and the
//! scheduler tying them together
//!
//! Pool state is mutated only under one mutex, shared by caller threads
//! (submit, cancel, clear) and the pool's event-loop thread (worker
//! replies, crash events). Workers themselves run as genuinely parallel
//! execution units and communicate exclusively through message frames.

use crate::error::PoolError;
use crate::future::{Promise, ShutdownHandle, ShutdownSignal, TaskHandle};
use crate::protocol::{TaskId, TaskRequest, Value, WorkerReply};
use crate::proxy::ProxyHandle;
use crate::queue::{QueuedTask, TaskQueue};
use crate::runtime::{Compile, WorkerScript, METHODS_METHOD};
use crate::spawn::{Spawn, ThreadSpawner};
use crate::transport::{event_channel, EventReceiver, EventSender, WorkerEvent};
use crate::worker::{WorkerHandle, WorkerId};
use crossbeam::channel::RecvTimeoutError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default worker bound: platform core count minus one, floor 1.
fn default_max_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Builder for [`Pool`].
pub struct PoolBuilder {
    max_workers: usize,
    min_workers: usize,
    script: Option<Arc<dyn WorkerScript>>,
    compiler: Option<Arc<dyn Compile>>,
    spawner: Arc<dyn Spawn>,
    join_timeout: Duration,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            min_workers: 0,
            script: None,
            compiler: None,
            spawner: Arc::new(ThreadSpawner),
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl PoolBuilder {
    /// Upper bound on simultaneously live workers (floor 1).
    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n.max(1);
        self
    }

    /// Pre-spawn this many workers at construction instead of spawning
    /// lazily on demand. Clamped to `max_workers`.
    pub fn min_workers(mut self, n: usize) -> Self {
        self.min_workers = n;
        self
    }

    /// Dedicated mode: every worker builds its registry from this script.
    /// Dynamic offload (`run`) is refused on a dedicated pool.
    pub fn script(mut self, script: Arc<dyn WorkerScript>) -> Self {
        self.script = Some(script);
        self
    }

    /// Dynamic-offload mode: workers compile `run` source with this
    /// capability.
    pub fn compiler(mut self, compiler: Arc<dyn Compile>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Execution-unit capability; defaults to OS threads.
    pub fn spawner(mut self, spawner: Arc<dyn Spawn>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Bound on graceful worker joins at teardown.
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Create the pool and start its event loop.
    pub fn build(self) -> Pool {
        let (events_tx, events_rx) = event_channel();
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let min_workers = self.min_workers.min(self.max_workers);

        let shared = Arc::new(PoolShared {
            config: PoolConfig {
                max_workers: self.max_workers,
                script: self.script,
                compiler: self.compiler,
                spawner: self.spawner,
                join_timeout: self.join_timeout,
            },
            state: Mutex::new(PoolState {
                phase: Phase::Running,
                workers: Vec::new(),
                queue: TaskQueue::new(),
                next_worker_id: 0,
                proxy_methods: None,
            }),
            events_tx,
            shutdown_flag: shutdown_flag.clone(),
            drain: ShutdownSignal::new(),
        });

        // The event loop holds only a weak reference and exits on its own
        // once the pool is torn down; the handle is not kept.
        let weak = Arc::downgrade(&shared);
        let _ = thread::Builder::new()
            .name("offload-pool".to_string())
            .spawn(move || event_loop(weak, events_rx, shutdown_flag))
            .expect("Failed to spawn pool event loop thread");

        if min_workers > 0 {
            let mut st = shared.state.lock();
            for _ in 0..min_workers {
                if let Err(err) = shared.spawn_worker(&mut st) {
                    warn!(error = %err, "pre-spawn failed");
                    break;
                }
            }
        }

        Pool { shared }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Live workers in any state
    pub total_workers: usize,
    /// Workers currently executing a task
    pub busy_workers: usize,
    /// Workers ready for an assignment
    pub idle_workers: usize,
    /// Tasks waiting in the queue
    pub pending_tasks: usize,
    /// Tasks currently assigned to a worker
    pub active_tasks: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Running,
    Draining,
    Closed,
}

struct PoolConfig {
    max_workers: usize,
    script: Option<Arc<dyn WorkerScript>>,
    compiler: Option<Arc<dyn Compile>>,
    spawner: Arc<dyn Spawn>,
    join_timeout: Duration,
}

struct PoolState {
    phase: Phase,
    workers: Vec<WorkerHandle>,
    queue: TaskQueue,
    next_worker_id: u32,
    proxy_methods: Option<Vec<String>>,
}

struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    events_tx: EventSender,
    shutdown_flag: Arc<AtomicBool>,
    drain: ShutdownSignal,
}

/// A bounded worker pool.
///
/// Cheap to clone; clones share one scheduler. The pool is torn down
/// forcibly when the last clone is dropped, or explicitly via
/// [`Pool::clear`].
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    /// Submit a task targeting a registered method.
    ///
    /// Returns immediately with a pending handle. An unregistered name is
    /// discovered at the worker and rejects the handle asynchronously with
    /// `MethodNotFound`.
    pub fn exec(&self, method: &str, args: Vec<Value>) -> TaskHandle {
        self.submit(TaskRequest::method(TaskId::new(), method, args))
    }

    /// Submit raw offload source for ad-hoc execution.
    ///
    /// Valid only against a pool in dynamic-offload mode; a dedicated pool
    /// (or one built without a compile capability) rejects immediately
    /// with `InvalidOffload`.
    pub fn run(&self, source: &str, args: Vec<Value>) -> TaskHandle {
        if self.shared.config.script.is_some() || self.shared.config.compiler.is_none() {
            return TaskHandle::rejected(TaskId::new(), PoolError::InvalidOffload);
        }
        self.submit(TaskRequest::source(TaskId::new(), source, args))
    }

    /// Future resolving to a method-call façade once the worker's
    /// registered names are known (one introspection task per pool,
    /// cached afterwards).
    pub fn proxy(&self) -> ProxyHandle {
        {
            let st = self.shared.state.lock();
            if st.phase != Phase::Running {
                return ProxyHandle::rejected(PoolError::PoolClosed);
            }
            if let Some(names) = st.proxy_methods.clone() {
                return ProxyHandle::resolved(self.clone(), names);
            }
        }
        let introspection = self.exec(METHODS_METHOD, vec![]);
        ProxyHandle::pending(self.clone(), introspection)
    }

    /// Withdraw a still-queued task; its handle rejects with `Cancelled`.
    ///
    /// Returns false for a task that is already assigned, settled, or
    /// unknown — an in-flight task cannot be cooperatively cancelled, only
    /// aborted via `clear(true)`.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut st = self.shared.state.lock();
        match st.queue.remove(id) {
            Some(task) => {
                task.promise.reject(PoolError::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Terminate the pool.
    ///
    /// Graceful (`force = false`): stop accepting work, reject everything
    /// still queued with `PoolCleared`, let each busy worker finish its
    /// current task, then terminate all workers. Returns immediately; the
    /// handle settles when the drain completes.
    ///
    /// Forced (`force = true`): terminate every worker even mid-task and
    /// reject every assigned and queued task with `PoolCleared`,
    /// synchronously — the handle is settled before return.
    ///
    /// Idempotent; `exec`/`run`/`proxy` after `clear` fail fast with
    /// `PoolClosed`.
    pub fn clear(&self, force: bool) -> ShutdownHandle {
        self.shared.clear(force)
    }

    /// Current worker/queue counters.
    pub fn stats(&self) -> PoolStats {
        let st = self.shared.state.lock();
        let busy = st.workers.iter().filter(|w| w.is_busy()).count();
        let idle = st.workers.iter().filter(|w| w.is_idle()).count();
        PoolStats {
            total_workers: st.workers.len(),
            busy_workers: busy,
            idle_workers: idle,
            pending_tasks: st.queue.len(),
            active_tasks: busy,
        }
    }

    fn submit(&self, request: TaskRequest) -> TaskHandle {
        let mut st = self.shared.state.lock();
        if st.phase != Phase::Running {
            return TaskHandle::rejected(request.id, PoolError::PoolClosed);
        }
        let (promise, handle) = Promise::pair(request.id);
        st.queue.push(QueuedTask { request, promise });
        self.shared.dispatch(&mut st);
        handle
    }

    pub(crate) fn cache_proxy_methods(&self, names: Vec<String>) {
        let mut st = self.shared.state.lock();
        if st.proxy_methods.is_none() {
            st.proxy_methods = Some(names);
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Pool")
            .field("max_workers", &self.shared.config.max_workers)
            .field("stats", &stats)
            .finish()
    }
}

impl PoolShared {
    /// Assign queued tasks to idle workers in strict FIFO order, spawning
    /// new workers lazily up to the bound — at most one unit per
    /// still-uncovered queued task. Tasks beyond capacity stay queued:
    /// the queue is the sole backpressure mechanism.
    fn dispatch(&self, st: &mut PoolState) {
        while !st.queue.is_empty() && st.phase == Phase::Running {
            if let Some(pos) = st.workers.iter().position(WorkerHandle::is_idle) {
                let task = match st.queue.pop() {
                    Some(task) => task,
                    None => break,
                };
                if let Err(task) = st.workers[pos].assign(task) {
                    // Transport already dead: roll the task back to the
                    // queue head and reap the worker; the pending Closed
                    // event will find nothing left to do.
                    st.queue.push_front(task);
                    let worker = st.workers.remove(pos);
                    worker.retire(None);
                }
                continue;
            }

            let starting = st.workers.iter().filter(|w| w.is_starting()).count();
            if st.workers.len() < self.config.max_workers && starting < st.queue.len() {
                match self.spawn_worker(st) {
                    Ok(()) => continue,
                    Err(err) => {
                        warn!(error = %err, "worker spawn failed");
                        if st.workers.is_empty() {
                            // No unit will ever serve this queue: surface
                            // the failure on the head task.
                            if let Some(task) = st.queue.pop() {
                                task.promise.reject(err);
                            }
                        }
                        break;
                    }
                }
            }
            break;
        }
    }

    fn spawn_worker(&self, st: &mut PoolState) -> Result<(), PoolError> {
        let id = WorkerId::new(st.next_worker_id);
        st.next_worker_id += 1;
        let worker = WorkerHandle::spawn(
            id,
            self.config.spawner.as_ref(),
            self.events_tx.clone(),
            self.config.script.clone(),
            self.config.compiler.clone(),
        )?;
        st.workers.push(worker);
        Ok(())
    }

    fn handle_event(&self, worker_id: WorkerId, event: WorkerEvent) {
        let mut st = self.state.lock();
        match event {
            WorkerEvent::Reply(WorkerReply::Ready) => {
                let Some(pos) = st.workers.iter().position(|w| w.id() == worker_id) else {
                    return;
                };
                if st.phase == Phase::Running {
                    st.workers[pos].mark_ready();
                    self.dispatch(&mut st);
                } else {
                    // A late starter is not needed during teardown.
                    let worker = st.workers.remove(pos);
                    worker.retire(None);
                    self.maybe_finish_drain(&mut st);
                }
            }
            WorkerEvent::Reply(WorkerReply::Result { id, result }) => {
                self.settle_reply(&mut st, worker_id, id, Ok(result));
            }
            WorkerEvent::Reply(WorkerReply::Error { id, error }) => {
                self.settle_reply(&mut st, worker_id, id, Err(error.into_pool_error()));
            }
            WorkerEvent::Closed => {
                let Some(pos) = st.workers.iter().position(|w| w.id() == worker_id) else {
                    return;
                };
                warn!(worker = worker_id.as_u32(), "worker transport closed unexpectedly");
                let worker = st.workers.remove(pos);
                if let Some(active) = worker.retire(None) {
                    active.promise.reject(PoolError::WorkerCrashed);
                }
                match st.phase {
                    // Crashed capacity is not replaced proactively; the
                    // spawn rule in dispatch replaces it lazily if the
                    // queue still needs it.
                    Phase::Running => self.dispatch(&mut st),
                    _ => self.maybe_finish_drain(&mut st),
                }
            }
        }
    }

    fn settle_reply(
        &self,
        st: &mut PoolState,
        worker_id: WorkerId,
        task_id: TaskId,
        outcome: Result<Value, PoolError>,
    ) {
        let Some(pos) = st.workers.iter().position(|w| w.id() == worker_id) else {
            trace!(worker = worker_id.as_u32(), "reply from a discarded worker");
            return;
        };
        let Some(active) = st.workers[pos].finish() else {
            warn!(worker = worker_id.as_u32(), "reply from a worker with no assignment");
            return;
        };
        if active.id != task_id {
            warn!(
                worker = worker_id.as_u32(),
                expected = active.id.as_u64(),
                got = task_id.as_u64(),
                "reply id does not match the worker's assignment"
            );
        }
        match outcome {
            Ok(value) => active.promise.resolve(value),
            Err(err) => active.promise.reject(err),
        }

        match st.phase {
            Phase::Running => self.dispatch(st),
            Phase::Draining => {
                // Drained: this worker finished its last task.
                let worker = st.workers.remove(pos);
                worker.retire(Some(self.config.join_timeout));
                self.maybe_finish_drain(st);
            }
            Phase::Closed => {}
        }
    }

    fn maybe_finish_drain(&self, st: &mut PoolState) {
        if st.phase == Phase::Draining && st.workers.is_empty() {
            st.phase = Phase::Closed;
            self.drain.settle();
            self.shutdown_flag.store(true, Ordering::Release);
            debug!("pool drain complete");
        }
    }

    fn clear(&self, force: bool) -> ShutdownHandle {
        let handle = self.drain.handle();
        let mut st = self.state.lock();
        match st.phase {
            Phase::Closed => return handle,
            // A second graceful clear while draining is a no-op; a forced
            // clear upgrades the drain to an immediate abort.
            Phase::Draining if !force => return handle,
            _ => {}
        }

        // No worker will ever claim a queued task once clearing starts:
        // reject them now rather than at the end of the drain.
        for task in st.queue.drain() {
            task.promise.reject(PoolError::PoolCleared);
        }

        if force {
            st.phase = Phase::Closed;
            for worker in std::mem::take(&mut st.workers) {
                if let Some(active) = worker.retire(None) {
                    active.promise.reject(PoolError::PoolCleared);
                }
            }
            self.drain.settle();
            self.shutdown_flag.store(true, Ordering::Release);
            debug!("pool cleared (forced)");
        } else {
            st.phase = Phase::Draining;
            let mut busy = Vec::new();
            for worker in std::mem::take(&mut st.workers) {
                if worker.is_busy() {
                    busy.push(worker);
                } else {
                    worker.retire(None);
                }
            }
            st.workers = busy;
            debug!(in_flight = st.workers.len(), "pool draining");
            self.maybe_finish_drain(&mut st);
        }
        handle
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        // Last owner gone: forced teardown of anything still live.
        let st = self.state.get_mut();
        for task in st.queue.drain() {
            task.promise.reject(PoolError::PoolCleared);
        }
        for worker in std::mem::take(&mut st.workers) {
            if let Some(active) = worker.retire(None) {
                active.promise.reject(PoolError::PoolCleared);
            }
        }
        st.phase = Phase::Closed;
        self.drain.settle();
        self.shutdown_flag.store(true, Ordering::Release);
    }
}

fn event_loop(shared: Weak<PoolShared>, events: EventReceiver, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        match events.recv_timeout(Duration::from_millis(50)) {
            Ok((worker_id, event)) => match shared.upgrade() {
                Some(shared) => shared.handle_event(worker_id, event),
                None => break,
            },
            Err(RecvTimeoutError::Timeout) => {
                if shared.upgrade().is_none() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    trace!("pool event loop exited");
}
