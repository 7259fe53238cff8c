//! Offload - bounded worker pool over isolated execution units
//!
//! Offloads function execution from a single control flow onto a bounded
//! pool of workers, each running as a genuinely parallel OS execution unit
//! and communicating only via message passing. Long-running or CPU-bound
//! work never blocks the caller: submissions return pending handles that
//! settle when the worker replies.
//!
//! # Example
//!
//! ```ignore
//! use offload::{Methods, Pool, WorkerScript};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct MathScript;
//!
//! impl WorkerScript for MathScript {
//!     fn init(&self) -> Methods {
//!         let mut methods = Methods::new();
//!         methods.register("add", |args| {
//!             let a = args[0].as_i64().unwrap_or(0);
//!             let b = args[1].as_i64().unwrap_or(0);
//!             Ok(json!(a + b))
//!         });
//!         methods
//!     }
//! }
//!
//! let pool = Pool::builder().script(Arc::new(MathScript)).build();
//! let result = pool.exec("add", vec![json!(2), json!(3)]).wait();
//! assert_eq!(result, Ok(json!(5)));
//! pool.clear(false).wait();
//! ```
//!
//! Guarantees: strict FIFO dispatch, at most one assignment per task,
//! never more than `max_workers` live units, crash isolation (a worker
//! dying mid-task rejects only that task's handle), and two termination
//! modes — graceful drain and immediate abort.

pub mod error;
pub mod future;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod runtime;
pub mod spawn;
pub mod worker;

mod queue;
mod transport;

pub use error::{ExecError, PoolError};
pub use future::{ShutdownHandle, TaskHandle, TaskStatus};
pub use pool::{Pool, PoolBuilder, PoolStats};
pub use protocol::{
    FailureKind, TaskFailure, TaskId, TaskRequest, TaskTarget, Value, WorkerReply,
};
pub use proxy::{Proxy, ProxyHandle};
pub use runtime::{Compile, CompiledFn, Methods, WorkerFn, WorkerRuntime, WorkerScript};
pub use spawn::{ExecUnit, Spawn, ThreadSpawner};
pub use worker::{WorkerId, WorkerState};
