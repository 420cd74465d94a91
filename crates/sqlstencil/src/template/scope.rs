//! Per-pass render scope.
//!
//! A [`RenderScope`] is the root context of one render pass. Variable lookups
//! go through it to the caller's [`Context`]; the emit filter and the filter
//! dispatchers reach it through [`SCOPE_KEY`] to record captures, failures and
//! suspensions.
//!
//! MiniJinja only sees its own error type. When a filter or lookup fails for a
//! reason the caller should see as a typed [`QueryError`], the scope records
//! that error and hands MiniJinja a generic one to abort rendering. After the
//! pass the recorded error wins over whatever MiniJinja reports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use minijinja::value::{Enumerator, Object, ObjectRepr, Rest};
use minijinja::{Error, ErrorKind, State, Value};
use tracing::trace;

use super::renderer::RenderOptions;
use crate::capture::CaptureList;
use crate::classify::{classify, ClassifiedValue, ParameterList};
use crate::context::{Context, ContextEntry};
use crate::error::{FilterError, QueryError};
use crate::filters::{Filter, FilterRegistry, FilterScope};
use crate::format::MarkedQuery;
use crate::marker;
use crate::suspend::{BoxFuture, EvalMode, FilterOutputs, Resolutions, Suspension};

/// Context key under which a pass exposes its scope.
pub const SCOPE_KEY: &str = "__sqlstencil_scope";

/// How a render pass ended.
#[derive(Debug)]
pub(crate) enum PassOutcome {
    Complete(MarkedQuery),
    Suspended(Suspension),
    Failed(QueryError),
}

#[derive(Debug)]
struct ScopeState {
    context: Context,
    options: RenderOptions,
    mode: EvalMode,
    resolutions: Arc<Resolutions>,
    filter_outputs: Arc<FilterOutputs>,
    captures: Mutex<CaptureList>,
    failure: Mutex<Option<QueryError>>,
    suspension: Mutex<Option<Suspension>>,
    async_calls: AtomicUsize,
    sync_calls: AtomicUsize,
}

/// Root context object of one render pass.
#[derive(Debug, Clone)]
pub(crate) struct RenderScope(Arc<ScopeState>);

impl RenderScope {
    pub(crate) fn new(
        context: Context,
        options: RenderOptions,
        mode: EvalMode,
        resolutions: Arc<Resolutions>,
        filter_outputs: Arc<FilterOutputs>,
    ) -> Self {
        RenderScope(Arc::new(ScopeState {
            context,
            options,
            mode,
            resolutions,
            filter_outputs,
            captures: Mutex::new(CaptureList::new()),
            failure: Mutex::new(None),
            suspension: Mutex::new(None),
            async_calls: AtomicUsize::new(0),
            sync_calls: AtomicUsize::new(0),
        }))
    }

    /// The engine value to render with.
    pub(crate) fn to_value(&self) -> Value {
        Value::from_object(self.clone())
    }

    fn from_state(state: &State) -> Result<Arc<RenderScope>, Error> {
        state
            .lookup(SCOPE_KEY)
            .and_then(|value| value.downcast_object::<RenderScope>())
            .ok_or_else(outside_render)
    }

    fn is_suspended(&self) -> bool {
        lock(&self.0.suspension).is_some()
    }

    /// Records `err` unless an earlier failure is already recorded, and
    /// returns the engine error that aborts the pass.
    fn fail(&self, err: QueryError) -> Error {
        let message = err.to_string();
        let mut failure = lock(&self.0.failure);
        if failure.is_none() {
            *failure = Some(err);
        }
        Error::new(ErrorKind::InvalidOperation, message)
    }

    /// Records the pending suspension and aborts the pass.
    fn suspend(&self, suspension: Suspension) -> Error {
        trace!(name = suspension.name(), "render pass suspended");
        let message = format!("suspended at `{}`", suspension.name());
        let mut pending = lock(&self.0.suspension);
        if pending.is_none() {
            *pending = Some(suspension);
        }
        Error::new(ErrorKind::InvalidOperation, message)
    }

    fn halted() -> Error {
        Error::new(ErrorKind::InvalidOperation, "render pass suspended")
    }

    fn filter_scope(&self) -> FilterScope<'_> {
        FilterScope::new(
            self.0.options.identifier_quote,
            &self.0.options.param_style,
            self.0.mode,
        )
    }

    fn capture(&self, hint: Option<String>, value: Value) -> String {
        let index = lock(&self.0.captures).push(hint, value);
        marker::encode(index)
    }

    /// Consumes the pass state once MiniJinja has returned.
    pub(crate) fn finish(self, result: Result<String, Error>) -> PassOutcome {
        if let Some(suspension) = lock(&self.0.suspension).take() {
            return PassOutcome::Suspended(suspension);
        }
        if let Some(err) = lock(&self.0.failure).take() {
            return PassOutcome::Failed(err);
        }
        match result {
            Ok(text) => PassOutcome::Complete(MarkedQuery {
                text,
                captures: std::mem::take(&mut *lock(&self.0.captures)),
            }),
            Err(err) => PassOutcome::Failed(err.into()),
        }
    }

    /// Resolves a deferred context entry.
    fn deferred(&self, name: &str, produce: &crate::context::DeferredFn) -> Option<Value> {
        if self.is_suspended() {
            return None;
        }
        match self.0.mode {
            EvalMode::Sequential => {
                self.fail(QueryError::RequiresSuspending {
                    name: name.to_string(),
                });
                None
            }
            EvalMode::Suspending => {
                if let Some(value) = self.0.resolutions.lookup(name) {
                    return Some(value.clone());
                }
                self.suspend(Suspension::Lookup {
                    name: name.to_string(),
                    future: produce(),
                });
                None
            }
        }
    }

    /// Runs a sync filter call, or reuses its output from an earlier pass.
    fn run_sync<F>(&self, name: &str, run: F) -> Result<Value, Error>
    where
        F: FnOnce() -> std::result::Result<ClassifiedValue, FilterError>,
    {
        let mut ordinal = None;
        if self.0.mode == EvalMode::Suspending {
            let next = self.0.sync_calls.fetch_add(1, Ordering::SeqCst);
            match self.0.filter_outputs.get(next, name) {
                Ok(Some(output)) => return Ok(output.into_value()),
                Ok(None) => ordinal = Some(next),
                Err(err) => return Err(self.fail(err)),
            }
        }

        match run() {
            Ok(output) => {
                if let Some(ordinal) = ordinal {
                    self.0.filter_outputs.record(ordinal, name, &output);
                }
                Ok(output.into_value())
            }
            Err(source) => Err(self.fail(QueryError::FilterExecution {
                filter: name.to_string(),
                source,
            })),
        }
    }

    /// Answers an async filter call from an earlier pass, or suspends on it.
    fn await_filter<F>(&self, name: &str, start: F) -> Result<Value, Error>
    where
        F: FnOnce() -> BoxFuture<'static, Result<ClassifiedValue, FilterError>>,
    {
        if self.0.mode == EvalMode::Sequential {
            return Err(self.fail(QueryError::RequiresSuspending {
                name: name.to_string(),
            }));
        }

        let ordinal = self.0.async_calls.fetch_add(1, Ordering::SeqCst);
        match self.0.resolutions.filter(ordinal, name) {
            Ok(Some(value)) => Ok(value.clone().into_value()),
            Ok(None) => Err(self.suspend(Suspension::Filter {
                name: name.to_string(),
                ordinal,
                future: start(),
            })),
            Err(err) => Err(self.fail(err)),
        }
    }
}

impl Object for RenderScope {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let name = key.as_str()?;
        if name == SCOPE_KEY {
            return Some(self.to_value());
        }
        match self.0.context.get(name)? {
            ContextEntry::Value(value) => Some(value.clone()),
            ContextEntry::Deferred(produce) => self.deferred(name, produce),
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Values(self.0.context.names().map(Value::from).collect())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn outside_render() -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        "query filters can only run inside a query render",
    )
}

/// The emit filter: writes an expression's final value into the output.
///
/// `Raw` text is written as is. A parameter is captured and replaced by its
/// marker; a parameter list (from `inclause`) becomes a parenthesized list of
/// markers, one capture per element.
pub(crate) fn emit(value: Value, scope: Value, hint: Option<String>) -> Result<Value, Error> {
    let scope = scope
        .downcast_object::<RenderScope>()
        .ok_or_else(outside_render)?;
    if scope.is_suspended() {
        return Err(RenderScope::halted());
    }
    if value.is_undefined() {
        return Err(scope.fail(QueryError::UndefinedValue {
            name: hint.unwrap_or_else(|| "<expression>".to_string()),
        }));
    }

    if let Some(list) = value.downcast_object_ref::<ParameterList>() {
        let markers: Vec<String> = list
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let item_hint = hint.as_ref().map(|hint| format!("{}_{}", hint, i + 1));
                scope.capture(item_hint, item.clone())
            })
            .collect();
        return Ok(Value::from_safe_string(format!("({})", markers.join(", "))));
    }

    match classify(value) {
        ClassifiedValue::Raw(text) => Ok(Value::from_safe_string(text)),
        ClassifiedValue::Parameter { value, name_hint } => {
            let marker = scope.capture(name_hint.or(hint), value);
            Ok(Value::from_safe_string(marker))
        }
    }
}

/// Runs the registered filter `name` on behalf of MiniJinja.
pub(crate) fn dispatch(
    registry: &std::sync::RwLock<FilterRegistry>,
    name: &str,
    state: &State,
    value: Value,
    args: Rest<Value>,
) -> Result<Value, Error> {
    let scope = RenderScope::from_state(state)?;
    if scope.is_suspended() {
        return Err(RenderScope::halted());
    }

    let resolved = registry
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .resolve(name);
    let filter = match resolved {
        Ok(filter) => filter,
        Err(err) => return Err(scope.fail(err)),
    };

    let input = classify(value);
    let filter_scope = scope.filter_scope();
    match filter {
        Filter::Sync(run) => scope.run_sync(name, || run(&filter_scope, input, &args)),
        Filter::Async(run) => {
            let args = args.0;
            scope.await_filter(name, || run(&filter_scope, input, args))
        }
    }
}
