//! Execution-unit capability
//!
//! The OS primitive behind a worker is consumed as a capability: something
//! that can spawn an isolated, genuinely parallel unit around an entry
//! point, and later tear it down. The default implementation is OS threads;
//! a process-backed spawner can implement the same traits and gain a true
//! kill on `terminate`.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Handle to one live execution unit.
pub trait ExecUnit: Send {
    /// Forced teardown, best effort, never blocks.
    ///
    /// Thread-backed units cannot be preempted mid-closure: the unit is
    /// detached and exits once its transport disconnects; anything it sends
    /// afterwards goes nowhere.
    fn terminate(self: Box<Self>);

    /// Graceful teardown: wait for the unit to exit, bounded by `timeout`.
    /// A unit that outlives the bound is detached.
    fn join(self: Box<Self>, timeout: Duration);
}

/// Capability for creating execution units.
pub trait Spawn: Send + Sync {
    /// Spawn a unit named `name` running `entry` to completion.
    fn spawn(
        &self,
        name: &str,
        entry: Box<dyn FnOnce() + Send>,
    ) -> io::Result<Box<dyn ExecUnit>>;
}

/// Default spawner: one named OS thread per worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl Spawn for ThreadSpawner {
    fn spawn(
        &self,
        name: &str,
        entry: Box<dyn FnOnce() + Send>,
    ) -> io::Result<Box<dyn ExecUnit>> {
        let handle = thread::Builder::new().name(name.to_string()).spawn(entry)?;
        Ok(Box::new(ThreadUnit { handle }))
    }
}

struct ThreadUnit {
    handle: JoinHandle<()>,
}

impl ExecUnit for ThreadUnit {
    fn terminate(self: Box<Self>) {
        drop(self.handle);
    }

    fn join(self: Box<Self>, timeout: Duration) {
        join_with_timeout(self.handle, timeout);
    }
}

/// Join a thread with timeout, detach if stuck.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return;
        }
        if start.elapsed() > timeout {
            drop(handle);
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_thread_spawner_runs_entry() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let unit = ThreadSpawner
            .spawn("test-unit", Box::new(move || flag.store(true, Ordering::Release)))
            .expect("spawn");
        unit.join(Duration::from_secs(1));

        assert!(ran.load(Ordering::Acquire));
    }

    #[test]
    fn test_join_detaches_stuck_unit() {
        let unit = ThreadSpawner
            .spawn(
                "stuck-unit",
                Box::new(|| thread::sleep(Duration::from_millis(200))),
            )
            .expect("spawn");

        // Join bound is shorter than the unit's runtime: must return anyway.
        let start = Instant::now();
        unit.join(Duration::from_millis(20));
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[test]
    fn test_terminate_does_not_block() {
        let unit = ThreadSpawner
            .spawn(
                "detached-unit",
                Box::new(|| thread::sleep(Duration::from_millis(100))),
            )
            .expect("spawn");

        let start = Instant::now();
        unit.terminate();
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
