//! # Callable abstraction.
//!
//! A task wraps a [`Callable`]: an async, cancelable unit of executable logic
//! invoked with positional and keyword arguments. The common handle type is
//! [`CallableRef`], an `Arc<dyn Callable>` shared by every task that uses it.
//!
//! Each callable exposes a stable [`Binding`] (symbol plus optional owner
//! reference). Snapshots persist the binding instead of the callable itself;
//! a [`CallableRegistry`](crate::CallableRegistry) resolves it again.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Boxed future returned by [`Callable::call`].
pub type BoxCallFuture = Pin<Box<dyn Future<Output = Result<Value, TaskError>> + Send + 'static>>;

/// Shared handle to a callable.
pub type CallableRef = Arc<dyn Callable>;

/// Stable identity of a callable: a symbol and, for bound callables, the owner it is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Binding {
    /// Symbol the callable is registered under, e.g. `"repo.sync"`.
    pub symbol: String,
    /// Owner reference for bound callables, e.g. a repository id.
    pub owner: Option<String>,
}

impl Binding {
    /// Binding of a free callable.
    pub fn free(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            owner: None,
        }
    }

    /// Binding of a callable bound to `owner`.
    pub fn bound(symbol: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            owner: Some(owner.into()),
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}@{}", self.symbol, owner),
            None => f.write_str(&self.symbol),
        }
    }
}

/// Arguments and cancellation context handed to one execution.
#[derive(Clone, Debug)]
pub struct Invocation {
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments (sorted by name).
    pub kwargs: BTreeMap<String, Value>,
    /// Cancelled on task cancellation, timeout, or queue shutdown.
    pub token: CancellationToken,
}

impl Invocation {
    /// Returns the keyword argument `name`, if present.
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }
}

/// # Asynchronous, cancelable executable unit.
///
/// Implementors should check `inv.token` at safe points and return
/// `Err(TaskError::Canceled)` promptly once it is cancelled. The runner also
/// drops the returned future on cancel or timeout, so work is preempted at
/// `.await` points; blocking code between them cannot be interrupted.
///
/// # Example
/// ```
/// use serde_json::Value;
/// use taskqueue::{Binding, BoxCallFuture, Callable, Invocation, TaskError};
///
/// struct Echo(Binding);
///
/// impl Callable for Echo {
///     fn binding(&self) -> &Binding { &self.0 }
///
///     fn call(&self, inv: Invocation) -> BoxCallFuture {
///         Box::pin(async move {
///             if inv.token.is_cancelled() {
///                 return Err(TaskError::Canceled);
///             }
///             Ok(Value::Array(inv.args))
///         })
///     }
/// }
/// ```
pub trait Callable: Send + Sync + 'static {
    /// Returns the stable binding used for fingerprints and snapshots.
    fn binding(&self) -> &Binding;

    /// Starts one execution.
    fn call(&self, inv: Invocation) -> BoxCallFuture;
}
