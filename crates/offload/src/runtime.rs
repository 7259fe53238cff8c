//! Worker runtime: the code hosted inside an execution unit
//!
//! Receives task requests, resolves them against a method registry or a
//! compile capability, and replies with a result or error frame. An `Err`
//! from the invoked function is a reported application error — it becomes
//! an error reply and the worker stays alive. A panic is the crash path:
//! it unwinds the execution unit and the scheduler observes the transport
//! closing.

use crate::error::ExecError;
use crate::protocol::{TaskFailure, TaskRequest, TaskTarget, Value, WorkerReply};
use crate::transport::{ClosedGuard, WorkerChannel};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A function invocable by name from the pool.
pub type WorkerFn = Arc<dyn Fn(&[Value]) -> Result<Value, ExecError> + Send + Sync>;

/// A function produced by compiling offload source.
pub type CompiledFn = Box<dyn Fn(&[Value]) -> Result<Value, ExecError> + Send>;

/// Capability for turning opaque source text into an invocable function.
///
/// Dynamic offload is decoupled from the scheduler, which only ever sees
/// source as an opaque string; the runtime owns this seam. A compile
/// failure is a reported error, not a crash.
pub trait Compile: Send + Sync {
    fn compile(&self, source: &str) -> Result<CompiledFn, ExecError>;
}

/// Factory for a dedicated worker's method registry.
///
/// Each execution unit builds its own registry instance, so registered
/// functions never share state across workers unless they capture it
/// explicitly.
pub trait WorkerScript: Send + Sync {
    fn init(&self) -> Methods;
}

/// Reserved method name answering introspection with the registered names.
pub const METHODS_METHOD: &str = "methods";

/// Name → function mapping registered with a worker runtime.
#[derive(Default, Clone)]
pub struct Methods {
    table: FxHashMap<String, WorkerFn>,
}

impl Methods {
    pub fn new() -> Self {
        Self {
            table: FxHashMap::default(),
        }
    }

    /// Register a function under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, ExecError> + Send + Sync + 'static,
    {
        self.table.insert(name.into(), Arc::new(function));
    }

    /// Look up a registered function.
    pub fn get(&self, name: &str) -> Option<&WorkerFn> {
        self.table.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Registered names, sorted for a stable introspection reply.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// The runtime hosted by one execution unit.
pub struct WorkerRuntime {
    methods: Methods,
    compiler: Option<Arc<dyn Compile>>,
}

impl WorkerRuntime {
    /// Build a runtime from its constructor-time registry and an optional
    /// compile capability (present only in dynamic-offload mode).
    pub fn new(methods: Methods, compiler: Option<Arc<dyn Compile>>) -> Self {
        Self { methods, compiler }
    }

    /// Serve requests until the pool drops the transport.
    ///
    /// Sends exactly one ready handshake before accepting any task. Panics
    /// from invoked functions are deliberately not caught here — they
    /// unwind the unit, the armed guard reports the closure, and the
    /// scheduler handles the crash.
    pub(crate) fn serve(self, channel: WorkerChannel, guard: ClosedGuard) {
        if !channel.send(WorkerReply::Ready) {
            // Pool is already gone; nothing to serve.
            guard.disarm();
            return;
        }

        while let Ok(request) = channel.recv() {
            let reply = self.handle(request);
            if !channel.send(reply) {
                break;
            }
        }

        guard.disarm();
    }

    /// Execute one request and build the reply frame.
    pub fn handle(&self, request: TaskRequest) -> WorkerReply {
        let id = request.id;
        let outcome = match &request.target {
            TaskTarget::Method { method } => self.invoke_method(method, &request.args),
            TaskTarget::Source { source } => self.invoke_source(source, &request.args),
        };
        match outcome {
            Ok(result) => WorkerReply::Result { id, result },
            Err(failure) => WorkerReply::Error { id, error: failure },
        }
    }

    fn invoke_method(&self, name: &str, args: &[Value]) -> Result<Value, TaskFailure> {
        if let Some(function) = self.methods.get(name) {
            return function(args).map_err(TaskFailure::execution);
        }
        if name == METHODS_METHOD {
            let names: Vec<Value> = self.methods.names().into_iter().map(Value::from).collect();
            return Ok(Value::Array(names));
        }
        Err(TaskFailure::method_not_found(name))
    }

    fn invoke_source(&self, source: &str, args: &[Value]) -> Result<Value, TaskFailure> {
        let compiler = self
            .compiler
            .as_ref()
            .ok_or_else(TaskFailure::offload_unsupported)?;
        let function = compiler.compile(source).map_err(TaskFailure::execution)?;
        function(args).map_err(TaskFailure::execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FailureKind, TaskId};
    use serde_json::json;

    fn args_as_i64(args: &[Value], index: usize) -> Result<i64, ExecError> {
        args.get(index)
            .and_then(Value::as_i64)
            .ok_or_else(|| ExecError::new(format!("argument {} must be an integer", index)))
    }

    fn test_methods() -> Methods {
        let mut methods = Methods::new();
        methods.register("add", |args: &[Value]| {
            Ok(json!(args_as_i64(args, 0)? + args_as_i64(args, 1)?))
        });
        methods.register("boom", |_args: &[Value]| Err(ExecError::new("boom")));
        methods
    }

    struct SumCompiler;

    impl Compile for SumCompiler {
        fn compile(&self, source: &str) -> Result<CompiledFn, ExecError> {
            match source {
                "(a, b) => a + b" => Ok(Box::new(|args: &[Value]| {
                    Ok(json!(args_as_i64(args, 0)? + args_as_i64(args, 1)?))
                })),
                _ => Err(ExecError::new("compile error")),
            }
        }
    }

    #[test]
    fn test_method_invocation() {
        let runtime = WorkerRuntime::new(test_methods(), None);
        let reply = runtime.handle(TaskRequest::method(
            TaskId::from_u64(1),
            "add",
            vec![json!(2), json!(3)],
        ));
        assert_eq!(
            reply,
            WorkerReply::Result {
                id: TaskId::from_u64(1),
                result: json!(5),
            }
        );
    }

    #[test]
    fn test_unknown_method() {
        let runtime = WorkerRuntime::new(test_methods(), None);
        let reply = runtime.handle(TaskRequest::method(TaskId::from_u64(2), "nope", vec![]));
        match reply {
            WorkerReply::Error { error, .. } => {
                assert_eq!(error.kind, FailureKind::MethodNotFound);
                assert_eq!(error.message, "nope");
            }
            other => panic!("expected error reply, got {:?}", other),
        }
    }

    #[test]
    fn test_reported_error_keeps_runtime_usable() {
        let runtime = WorkerRuntime::new(test_methods(), None);
        let reply = runtime.handle(TaskRequest::method(TaskId::from_u64(3), "boom", vec![]));
        match reply {
            WorkerReply::Error { error, .. } => {
                assert_eq!(error.kind, FailureKind::Execution);
                assert_eq!(error.message, "boom");
            }
            other => panic!("expected error reply, got {:?}", other),
        }

        // Same runtime still executes the next task.
        let reply = runtime.handle(TaskRequest::method(
            TaskId::from_u64(4),
            "add",
            vec![json!(1), json!(1)],
        ));
        assert!(matches!(reply, WorkerReply::Result { .. }));
    }

    #[test]
    fn test_methods_introspection() {
        let runtime = WorkerRuntime::new(test_methods(), None);
        let reply = runtime.handle(TaskRequest::method(TaskId::from_u64(5), METHODS_METHOD, vec![]));
        assert_eq!(
            reply,
            WorkerReply::Result {
                id: TaskId::from_u64(5),
                result: json!(["add", "boom"]),
            }
        );
    }

    #[test]
    fn test_registered_methods_shadows_introspection() {
        let mut methods = test_methods();
        methods.register(METHODS_METHOD, |_args| Ok(json!("custom")));
        let runtime = WorkerRuntime::new(methods, None);
        let reply = runtime.handle(TaskRequest::method(TaskId::from_u64(6), METHODS_METHOD, vec![]));
        assert_eq!(
            reply,
            WorkerReply::Result {
                id: TaskId::from_u64(6),
                result: json!("custom"),
            }
        );
    }

    #[test]
    fn test_source_invocation() {
        let runtime = WorkerRuntime::new(Methods::new(), Some(Arc::new(SumCompiler)));
        let reply = runtime.handle(TaskRequest::source(
            TaskId::from_u64(7),
            "(a, b) => a + b",
            vec![json!(3), json!(4)],
        ));
        assert_eq!(
            reply,
            WorkerReply::Result {
                id: TaskId::from_u64(7),
                result: json!(7),
            }
        );
    }

    #[test]
    fn test_source_without_compiler() {
        let runtime = WorkerRuntime::new(test_methods(), None);
        let reply = runtime.handle(TaskRequest::source(TaskId::from_u64(8), "x", vec![]));
        match reply {
            WorkerReply::Error { error, .. } => {
                assert_eq!(error.kind, FailureKind::OffloadUnsupported);
            }
            other => panic!("expected error reply, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_error_is_reported() {
        let runtime = WorkerRuntime::new(Methods::new(), Some(Arc::new(SumCompiler)));
        let reply = runtime.handle(TaskRequest::source(TaskId::from_u64(9), "garbage", vec![]));
        match reply {
            WorkerReply::Error { error, .. } => {
                assert_eq!(error.kind, FailureKind::Execution);
                assert_eq!(error.message, "compile error");
            }
            other => panic!("expected error reply, got {:?}", other),
        }
    }
}
