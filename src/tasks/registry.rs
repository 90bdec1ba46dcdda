//! # Callable registry.
//!
//! Snapshots store a callable's [`Binding`] rather than the callable itself. The
//! host process registers every callable it may persist at startup, and
//! [`CallableRegistry::resolve`] turns a stored binding back into a live
//! [`CallableRef`].
//!
//! ```text
//! register(callable)             symbol ─► that callable (free function)
//! register_method(symbol, f)     symbol ─► f(owner) ─► callable bound to owner
//! ```
//!
//! The registry is an explicit value passed to whoever rebuilds tasks; there is
//! no process-wide table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SnapshotError;
use crate::tasks::callable::{Binding, CallableRef};

type OwnerResolver = Arc<dyn Fn(&str) -> Option<CallableRef> + Send + Sync>;

enum Entry {
    Free(CallableRef),
    Method(OwnerResolver),
}

/// Lookup table from callable symbols to live callables.
#[derive(Default)]
pub struct CallableRegistry {
    entries: HashMap<String, Entry>,
}

impl CallableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callable under its own binding symbol.
    ///
    /// Re-registering a symbol replaces the previous entry.
    pub fn register(&mut self, callable: CallableRef) -> &mut Self {
        let symbol = callable.binding().symbol.clone();
        self.entries.insert(symbol, Entry::Free(callable));
        self
    }

    /// Registers a resolver for callables bound to an owner.
    ///
    /// `resolve` receives the stored owner reference and returns the callable
    /// bound to it, or `None` when that owner no longer exists.
    pub fn register_method<F>(&mut self, symbol: impl Into<String>, resolve: F) -> &mut Self
    where
        F: Fn(&str) -> Option<CallableRef> + Send + Sync + 'static,
    {
        self.entries
            .insert(symbol.into(), Entry::Method(Arc::new(resolve)));
        self
    }

    /// Returns true if `symbol` is registered.
    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.contains_key(symbol)
    }

    /// Resolves a stored binding.
    ///
    /// # Errors
    /// - [`SnapshotError::UnknownCallable`] if the symbol is not registered.
    /// - [`SnapshotError::UnresolvedOwner`] if a method resolver rejects the owner
    ///   (or the binding carries no owner).
    pub fn resolve(&self, binding: &Binding) -> Result<CallableRef, SnapshotError> {
        let entry = self
            .entries
            .get(&binding.symbol)
            .ok_or_else(|| SnapshotError::UnknownCallable {
                symbol: binding.symbol.clone(),
            })?;

        match entry {
            Entry::Free(callable) => Ok(Arc::clone(callable)),
            Entry::Method(resolve) => binding
                .owner
                .as_deref()
                .and_then(|owner| resolve(owner))
                .ok_or_else(|| SnapshotError::UnresolvedOwner {
                    symbol: binding.symbol.clone(),
                    owner: binding.owner.clone().unwrap_or_default(),
                }),
        }
    }
}

impl fmt::Debug for CallableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut symbols: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        symbols.sort_unstable();
        f.debug_struct("CallableRegistry")
            .field("symbols", &symbols)
            .finish()
    }
}
