//! # Function-backed callable (`CallableFn`)
//!
//! [`CallableFn`] wraps a closure `F: Fn(Invocation) -> Fut`, producing a fresh
//! future per call. No state is shared between executions; if a callable needs
//! shared state, capture an `Arc<...>` explicitly inside the closure.
//!
//! ## Example
//! ```rust
//! use serde_json::{json, Value};
//! use taskqueue::{CallableFn, CallableRef, Invocation, TaskError};
//!
//! let sum: CallableRef = CallableFn::arc("math.sum", |inv: Invocation| async move {
//!     let total: i64 = inv.args.iter().filter_map(Value::as_i64).sum();
//!     Ok::<_, TaskError>(json!(total))
//! });
//!
//! assert_eq!(sum.binding().symbol, "math.sum");
//! ```

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::TaskError;
use crate::tasks::callable::{Binding, BoxCallFuture, Callable, Invocation};

/// Function-backed callable.
///
/// Wraps a closure that *creates* a new future per call.
#[derive(Debug)]
pub struct CallableFn<F> {
    binding: Binding,
    f: F,
}

impl<F> CallableFn<F> {
    /// Creates a free callable registered under `symbol`.
    ///
    /// Prefer [`CallableFn::arc`] when you immediately need a [`CallableRef`](crate::CallableRef).
    pub fn new(symbol: impl Into<String>, f: F) -> Self {
        Self {
            binding: Binding::free(symbol),
            f,
        }
    }

    /// Creates a callable bound to `owner` (the analogue of a bound method).
    pub fn bound(symbol: impl Into<String>, owner: impl Into<String>, f: F) -> Self {
        Self {
            binding: Binding::bound(symbol, owner),
            f,
        }
    }

    /// Creates a free callable and returns it as a shared handle.
    pub fn arc(symbol: impl Into<String>, f: F) -> Arc<Self> {
        Arc::new(Self::new(symbol, f))
    }
}

impl<F, Fut> Callable for CallableFn<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static, // Fn, not FnMut
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    fn binding(&self) -> &Binding {
        &self.binding
    }

    fn call(&self, inv: Invocation) -> BoxCallFuture {
        let fut = (self.f)(inv);
        Box::pin(fut)
    }
}
