//! Render context: the variables a query template can reference.
//!
//! A [`Context`] maps variable names to values for one render call. Values are
//! either available up front, or *deferred*: produced by an async closure the
//! first time the template looks them up. Deferred entries can only be used
//! with the suspending render functions.
//!
//! # Example
//!
//! ```rust
//! use sqlstencil::Context;
//!
//! let ctx = Context::new()
//!     .with("table", "users")
//!     .with("ids", vec![1, 2, 3]);
//! assert!(ctx.contains("ids"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use minijinja::value::ValueKind;
use minijinja::Value;
use serde::Serialize;

use crate::error::{FilterError, QueryError, Result};
use crate::suspend::BoxFuture;
use crate::template::scope::SCOPE_KEY;

/// Produces a deferred context value.
pub type DeferredFn =
    Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<Value, FilterError>> + Send + Sync>;

/// A context entry.
#[derive(Clone)]
pub enum ContextEntry {
    /// A value known before rendering.
    Value(Value),
    /// A value resolved on first lookup during a suspending render.
    Deferred(DeferredFn),
}

impl fmt::Debug for ContextEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextEntry::Value(value) => f.debug_tuple("Value").field(value).finish(),
            ContextEntry::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Variables for one render call.
///
/// Cloning is cheap; entries are shared until the clone is modified.
#[derive(Debug, Clone, Default)]
pub struct Context {
    entries: Arc<BTreeMap<String, ContextEntry>>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from any serializable map or struct.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Context`] if `data` does not serialize to a map.
    pub fn from_serialize<T: Serialize>(data: &T) -> Result<Self> {
        let value = Value::from_serialize(data);
        if value.kind() != ValueKind::Map {
            return Err(QueryError::Context(format!(
                "expected a map of variables, got {}",
                value.kind()
            )));
        }

        let mut ctx = Context::new();
        for key in value.try_iter().map_err(|e| QueryError::Context(e.to_string()))? {
            let item = value
                .get_item(&key)
                .map_err(|e| QueryError::Context(e.to_string()))?;
            let name = match key.as_str() {
                Some(name) => name.to_string(),
                None => key.to_string(),
            };
            ctx.insert(name, item);
        }
        Ok(ctx)
    }

    /// Adds or replaces a variable.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        Arc::make_mut(&mut self.entries).insert(name.into(), ContextEntry::Value(value.into()));
    }

    /// Adds or replaces a variable holding any serializable value.
    pub fn insert_serialize<T: Serialize>(&mut self, name: impl Into<String>, value: &T) {
        self.insert(name, Value::from_serialize(value));
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds a variable whose value is produced asynchronously on first lookup.
    ///
    /// The closure runs at most once per render call.
    pub fn insert_deferred<F, Fut>(&mut self, name: impl Into<String>, produce: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, FilterError>> + Send + 'static,
    {
        let deferred: DeferredFn = Arc::new(move || Box::pin(produce()));
        Arc::make_mut(&mut self.entries).insert(name.into(), ContextEntry::Deferred(deferred));
    }

    /// Removes a variable.
    pub fn remove(&mut self, name: &str) -> Option<ContextEntry> {
        Arc::make_mut(&mut self.entries).remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ContextEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Variable names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Rejects names the renderer reserves for itself.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.contains(SCOPE_KEY) {
            return Err(QueryError::ReservedName(SCOPE_KEY.to_string()));
        }
        Ok(())
    }
}
