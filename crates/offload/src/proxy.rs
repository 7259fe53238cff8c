//! Method-call façade over the pool's `exec` operation
//!
//! Purely derived from the worker's registered names — no independent
//! state. The name list comes from one implicit introspection task per
//! pool; the pool caches it for subsequent `proxy` calls.

use crate::error::PoolError;
use crate::future::TaskHandle;
use crate::pool::Pool;
use crate::protocol::{TaskId, Value};

/// Façade whose entries mirror the worker's registered method names and
/// forward straight to [`Pool::exec`].
pub struct Proxy {
    pool: Pool,
    methods: Vec<String>,
}

impl Proxy {
    pub(crate) fn new(pool: Pool, methods: Vec<String>) -> Self {
        Self { pool, methods }
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn has(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m == name)
    }

    /// Invoke a registered method through the pool.
    ///
    /// The name set is already known, so an unknown name rejects locally
    /// with `MethodNotFound` instead of making a round trip.
    pub fn call(&self, name: &str, args: Vec<Value>) -> TaskHandle {
        if !self.has(name) {
            return TaskHandle::rejected(TaskId::new(), PoolError::MethodNotFound(name.to_string()));
        }
        self.pool.exec(name, args)
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy").field("methods", &self.methods).finish()
    }
}

enum Inner {
    Settled(Result<(Pool, Vec<String>), PoolError>),
    Pending {
        pool: Pool,
        introspection: TaskHandle,
    },
}

/// Future resolving to a [`Proxy`].
pub struct ProxyHandle {
    inner: Inner,
}

impl ProxyHandle {
    pub(crate) fn resolved(pool: Pool, methods: Vec<String>) -> Self {
        Self {
            inner: Inner::Settled(Ok((pool, methods))),
        }
    }

    pub(crate) fn rejected(err: PoolError) -> Self {
        Self {
            inner: Inner::Settled(Err(err)),
        }
    }

    pub(crate) fn pending(pool: Pool, introspection: TaskHandle) -> Self {
        Self {
            inner: Inner::Pending {
                pool,
                introspection,
            },
        }
    }

    /// Block until the method list is known.
    pub fn wait(self) -> Result<Proxy, PoolError> {
        match self.inner {
            Inner::Settled(outcome) => outcome.map(|(pool, methods)| Proxy::new(pool, methods)),
            Inner::Pending {
                pool,
                introspection,
            } => {
                let reply = introspection.wait()?;
                let methods: Vec<String> = serde_json::from_value(reply).map_err(|e| {
                    PoolError::WorkerReported {
                        message: format!("malformed introspection reply: {}", e),
                        detail: None,
                    }
                })?;
                pool.cache_proxy_methods(methods.clone());
                Ok(Proxy::new(pool, methods))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use crate::runtime::{Methods, WorkerScript};
    use serde_json::json;
    use std::sync::Arc;

    struct MathScript;

    impl WorkerScript for MathScript {
        fn init(&self) -> Methods {
            let mut methods = Methods::new();
            methods.register("double", |args: &[Value]| {
                let n = args
                    .first()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| ExecError::new("expected an integer"))?;
                Ok(json!(n * 2))
            });
            methods
        }
    }

    #[test]
    fn test_proxy_resolves_and_calls() {
        let pool = Pool::builder().script(Arc::new(MathScript)).max_workers(1).build();

        let proxy = pool.proxy().wait().expect("proxy");
        assert_eq!(proxy.methods(), ["double".to_string()]);
        assert!(proxy.has("double"));

        assert_eq!(proxy.call("double", vec![json!(21)]).wait(), Ok(json!(42)));
        pool.clear(true);
    }

    #[test]
    fn test_unknown_name_rejects_locally() {
        let pool = Pool::builder().script(Arc::new(MathScript)).max_workers(1).build();

        let proxy = pool.proxy().wait().expect("proxy");
        assert_eq!(
            proxy.call("nope", vec![]).wait(),
            Err(PoolError::MethodNotFound("nope".to_string()))
        );
        pool.clear(true);
    }

    #[test]
    fn test_second_proxy_served_from_cache() {
        let pool = Pool::builder().script(Arc::new(MathScript)).max_workers(1).build();

        pool.proxy().wait().expect("first proxy");
        // The cached list resolves without another introspection round:
        // the handle is settled at construction time.
        let handle = pool.proxy();
        assert!(matches!(&handle.inner, Inner::Settled(Ok(_))));
        let proxy = handle.wait().expect("second proxy");
        assert!(proxy.has("double"));
        pool.clear(true);
    }
}
