//! Filter registry.
//!
//! Filters are resolved by name through an explicit [`FilterRegistry`] at render
//! time. A name that does not resolve is a [`QueryError::UnknownFilter`], never a
//! silent no-op.
//!
//! Registered filters work on [`ClassifiedValue`]s: they receive the tagged
//! input and decide the tag of their output. Returning the input's tag unchanged
//! keeps a `Raw` value raw through a filter chain.
//!
//! ## Built-in Filters
//!
//! | Filter | Output |
//! |--------|--------|
//! | `identifier` | quoted identifier, `Raw` |
//! | `inclause` | `(p1, p2, …)`, one parameter per element |
//! | `bind(name)` | `Parameter` with an explicit name hint |
//! | `sqlsafe` | the value's text, `Raw` |
//! | `safe` | same as MiniJinja's `safe`, rejecting reserved characters |
//!
//! MiniJinja's own filters (`upper`, `default`, `join`, …) remain available
//! for names not taken by the registry.

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use minijinja::Value;

use crate::classify::ClassifiedValue;
use crate::error::{FilterError, QueryError, Result};
use crate::style::ParamStyle;
use crate::suspend::{BoxFuture, EvalMode};
use crate::template::rewrite::RESERVED_PREFIX;

/// Render-time information handed to every filter call.
#[derive(Debug, Clone, Copy)]
pub struct FilterScope<'a> {
    identifier_quote: Option<char>,
    param_style: &'a ParamStyle,
    mode: EvalMode,
}

impl<'a> FilterScope<'a> {
    pub fn new(identifier_quote: Option<char>, param_style: &'a ParamStyle, mode: EvalMode) -> Self {
        Self {
            identifier_quote,
            param_style,
            mode,
        }
    }

    /// Quote character for identifiers; `None` renders them bare.
    pub fn identifier_quote(&self) -> Option<char> {
        self.identifier_quote
    }

    pub fn param_style(&self) -> &'a ParamStyle {
        self.param_style
    }

    pub fn mode(&self) -> EvalMode {
        self.mode
    }
}

/// A synchronous filter.
pub type FilterFn = Arc<
    dyn Fn(&FilterScope<'_>, ClassifiedValue, &[Value]) -> std::result::Result<ClassifiedValue, FilterError>
        + Send
        + Sync,
>;

/// A filter whose evaluation suspends.
pub type AsyncFilterFn = Arc<
    dyn Fn(
            &FilterScope<'_>,
            ClassifiedValue,
            Vec<Value>,
        ) -> BoxFuture<'static, std::result::Result<ClassifiedValue, FilterError>>
        + Send
        + Sync,
>;

/// A registered filter.
#[derive(Clone)]
pub enum Filter {
    Sync(FilterFn),
    Async(AsyncFilterFn),
}

impl Filter {
    /// Wraps a synchronous filter function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&FilterScope<'_>, ClassifiedValue, &[Value]) -> std::result::Result<ClassifiedValue, FilterError>
            + Send
            + Sync
            + 'static,
    {
        Filter::Sync(Arc::new(f))
    }

    /// Wraps an async filter function.
    ///
    /// The returned future must own what it needs; the scope is only borrowed
    /// for the duration of the call.
    pub fn from_async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(&FilterScope<'_>, ClassifiedValue, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<ClassifiedValue, FilterError>> + Send + 'static,
    {
        Filter::Async(Arc::new(move |scope, value, args| Box::pin(f(scope, value, args))))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Filter::Async(_))
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Sync(_) => f.write_str("Filter::Sync(..)"),
            Filter::Async(_) => f.write_str("Filter::Async(..)"),
        }
    }
}

/// Name → filter mapping.
///
/// By default a later registration replaces an earlier one with the same name.
/// With overrides disabled it fails with [`QueryError::DuplicateFilter`] instead.
#[derive(Debug, Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, Filter>,
    allow_override: bool,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterRegistry {
    /// Creates an empty registry that allows overrides.
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
            allow_override: true,
        }
    }

    /// Creates a registry holding the built-in filters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    /// Allows or forbids replacing an existing filter.
    pub fn set_allow_override(&mut self, allow: bool) {
        self.allow_override = allow;
    }

    pub fn allows_override(&self) -> bool {
        self.allow_override
    }

    /// Registers `filter` under `name`.
    ///
    /// # Errors
    ///
    /// - [`QueryError::ReservedName`] for names starting with the internal prefix
    /// - [`QueryError::DuplicateFilter`] if the name is taken and overrides are disabled
    pub fn register(&mut self, name: impl Into<String>, filter: Filter) -> Result<()> {
        let name = name.into();
        if name.starts_with(RESERVED_PREFIX) {
            return Err(QueryError::ReservedName(name));
        }
        if !self.allow_override && self.filters.contains_key(&name) {
            return Err(QueryError::DuplicateFilter(name));
        }
        self.filters.insert(name, filter);
        Ok(())
    }

    /// Removes a filter, returning it if it was registered.
    pub fn unregister(&mut self, name: &str) -> Option<Filter> {
        self.filters.remove(name)
    }

    /// Looks up a filter by name.
    pub fn resolve(&self, name: &str) -> Result<Filter> {
        self.filters
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownFilter(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough() -> Filter {
        Filter::from_fn(|_, value, _| Ok(value))
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = FilterRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec!["bind", "identifier", "inclause", "safe", "sqlsafe"]
        );
    }

    #[test]
    fn test_last_registration_wins_by_default() {
        let mut registry = FilterRegistry::new();
        registry.register("f", passthrough()).unwrap();
        registry
            .register("f", Filter::from_async_fn(|_, value, _| async move { Ok(value) }))
            .unwrap();
        assert!(registry.resolve("f").unwrap().is_async());
    }

    #[test]
    fn test_duplicate_rejected_when_overrides_disabled() {
        let mut registry = FilterRegistry::new();
        registry.set_allow_override(false);
        registry.register("f", passthrough()).unwrap();

        let err = registry.register("f", passthrough()).unwrap_err();
        assert!(matches!(err, QueryError::DuplicateFilter(name) if name == "f"));
    }

    #[test]
    fn test_reserved_prefix_rejected() {
        let mut registry = FilterRegistry::new();
        let err = registry
            .register(format!("{}emit", RESERVED_PREFIX), passthrough())
            .unwrap_err();
        assert!(matches!(err, QueryError::ReservedName(_)));
    }

    #[test]
    fn test_resolve_unknown() {
        let mut registry = FilterRegistry::with_builtins();
        assert!(registry.unregister("bind").is_some());
        let err = registry.resolve("bind").unwrap_err();
        assert!(matches!(err, QueryError::UnknownFilter(name) if name == "bind"));
    }
}
