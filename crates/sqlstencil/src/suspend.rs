//! Suspension points and their resolutions.
//!
//! MiniJinja evaluates templates synchronously. Suspending evaluation is built on
//! top of it as an explicit continuation model:
//!
//! 1. A render *pass* runs the template. The first suspension point that has no
//!    resolution yet (an async filter call or a deferred context value) records
//!    its future as a [`Suspension`] and aborts the pass.
//! 2. The driver awaits that one future and stores the outcome in
//!    [`Resolutions`].
//! 3. The driver replays the pass from the start. Earlier suspension points now
//!    answer from their resolutions, so the pass gets one step further.
//!
//! Since every pass is deterministic, suspension points are reached, and awaited,
//! in exactly the order a sequential render would evaluate them. Each pass owns a
//! fresh capture list and only the final, complete pass is formatted, so the
//! suspending result is identical to the sequential one.
//!
//! Synchronous filter calls are not repeated by replays: their outputs are kept
//! in [`FilterOutputs`] by call ordinal, and a later pass reuses them. Every
//! filter therefore runs once per render call, as it would sequentially.
//!
//! A render with N suspension points costs N + 1 passes over the template.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use minijinja::Value;

use crate::classify::ClassifiedValue;
use crate::error::{FilterError, QueryError, Result};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How expression evaluation is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Every evaluation completes before the next; suspension points are errors.
    Sequential,
    /// Suspension points are awaited in evaluation order.
    Suspending,
}

/// A suspension point reached by a render pass, waiting to be awaited.
pub enum Suspension {
    /// First lookup of a deferred context value.
    Lookup {
        name: String,
        future: BoxFuture<'static, std::result::Result<Value, FilterError>>,
    },
    /// An async filter invocation, identified by its call ordinal in the pass.
    Filter {
        name: String,
        ordinal: usize,
        future: BoxFuture<'static, std::result::Result<ClassifiedValue, FilterError>>,
    },
}

impl Suspension {
    pub fn name(&self) -> &str {
        match self {
            Suspension::Lookup { name, .. } | Suspension::Filter { name, .. } => name,
        }
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suspension::Lookup { name, .. } => {
                f.debug_struct("Lookup").field("name", name).finish_non_exhaustive()
            }
            Suspension::Filter { name, ordinal, .. } => f
                .debug_struct("Filter")
                .field("name", name)
                .field("ordinal", ordinal)
                .finish_non_exhaustive(),
        }
    }
}

/// Outcomes of the suspension points awaited so far in one render call.
#[derive(Debug, Clone, Default)]
pub struct Resolutions {
    lookups: HashMap<String, Value>,
    filters: Vec<(String, ClassifiedValue)>,
}

impl Resolutions {
    /// Resolved value of a deferred context entry.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.lookups.get(name)
    }

    /// Resolved result of the async filter call at `ordinal`.
    ///
    /// Fails if that call was made to a different filter in an earlier pass.
    pub fn filter(&self, ordinal: usize, name: &str) -> Result<Option<&ClassifiedValue>> {
        match self.filters.get(ordinal) {
            None => Ok(None),
            Some((expected, _)) if expected != name => Err(QueryError::ReplayDiverged {
                ordinal,
                expected: expected.clone(),
                found: name.to_string(),
            }),
            Some((_, value)) => Ok(Some(value)),
        }
    }

    /// Number of suspension points resolved.
    pub fn len(&self) -> usize {
        self.lookups.len() + self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Awaits a suspension and records its outcome.
    ///
    /// A failing future aborts the render: the error is returned and nothing is recorded.
    pub async fn resolve(&mut self, suspension: Suspension) -> Result<()> {
        match suspension {
            Suspension::Lookup { name, future } => {
                let value = future
                    .await
                    .map_err(|source| QueryError::DeferredValue {
                        name: name.clone(),
                        source,
                    })?;
                self.lookups.insert(name, value);
            }
            Suspension::Filter {
                name,
                ordinal,
                future,
            } => {
                if ordinal != self.filters.len() {
                    return Err(QueryError::ReplayDiverged {
                        ordinal,
                        expected: format!("async call #{}", self.filters.len()),
                        found: name,
                    });
                }
                let value = future
                    .await
                    .map_err(|source| QueryError::FilterExecution {
                        filter: name.clone(),
                        source,
                    })?;
                self.filters.push((name, value));
            }
        }
        Ok(())
    }
}

/// Outputs of the synchronous filter calls made so far in one render call.
#[derive(Debug, Default)]
pub struct FilterOutputs {
    calls: Mutex<Vec<(String, ClassifiedValue)>>,
}

impl FilterOutputs {
    /// Output recorded for the sync filter call at `ordinal`.
    ///
    /// Fails if an earlier pass made that call to a different filter.
    pub fn get(&self, ordinal: usize, name: &str) -> Result<Option<ClassifiedValue>> {
        let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        match calls.get(ordinal) {
            None => Ok(None),
            Some((expected, _)) if expected != name => Err(QueryError::ReplayDiverged {
                ordinal,
                expected: expected.clone(),
                found: name.to_string(),
            }),
            Some((_, output)) => Ok(Some(output.clone())),
        }
    }

    /// Records the output of the call at `ordinal`. Only the next unrecorded
    /// ordinal is accepted.
    pub fn record(&self, ordinal: usize, name: &str, output: &ClassifiedValue) {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        if ordinal == calls.len() {
            calls.push((name.to_string(), output.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_records_in_order() {
        let mut resolutions = Resolutions::default();
        resolutions
            .resolve(Suspension::Filter {
                name: "fetch".into(),
                ordinal: 0,
                future: Box::pin(async { Ok(ClassifiedValue::parameter(1)) }),
            })
            .await
            .unwrap();
        resolutions
            .resolve(Suspension::Lookup {
                name: "tenant".into(),
                future: Box::pin(async { Ok(Value::from("acme")) }),
            })
            .await
            .unwrap();

        assert_eq!(resolutions.len(), 2);
        assert_eq!(resolutions.lookup("tenant"), Some(&Value::from("acme")));
        assert_eq!(
            resolutions.filter(0, "fetch").unwrap(),
            Some(&ClassifiedValue::parameter(1))
        );
        assert_eq!(resolutions.filter(1, "fetch").unwrap(), None);
    }

    #[tokio::test]
    async fn test_replay_divergence_is_detected() {
        let mut resolutions = Resolutions::default();
        resolutions
            .resolve(Suspension::Filter {
                name: "fetch".into(),
                ordinal: 0,
                future: Box::pin(async { Ok(ClassifiedValue::parameter(1)) }),
            })
            .await
            .unwrap();

        let err = resolutions.filter(0, "other").unwrap_err();
        assert!(matches!(err, QueryError::ReplayDiverged { ordinal: 0, .. }));
    }

    #[tokio::test]
    async fn test_failed_future_is_not_recorded() {
        let mut resolutions = Resolutions::default();
        let err = resolutions
            .resolve(Suspension::Lookup {
                name: "tenant".into(),
                future: Box::pin(async { Err::<Value, FilterError>("offline".into()) }),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::DeferredValue { ref name, .. } if name == "tenant"));
        assert!(resolutions.is_empty());
    }

    #[test]
    fn test_filter_outputs_answer_by_ordinal() {
        let outputs = FilterOutputs::default();
        outputs.record(0, "upper", &ClassifiedValue::parameter("A"));
        outputs.record(2, "upper", &ClassifiedValue::parameter("skipped"));

        assert_eq!(outputs.len(), 1);
        assert_eq!(
            outputs.get(0, "upper").unwrap(),
            Some(ClassifiedValue::parameter("A"))
        );
        assert_eq!(outputs.get(1, "upper").unwrap(), None);
        assert!(matches!(
            outputs.get(0, "lower"),
            Err(QueryError::ReplayDiverged { ordinal: 0, .. })
        ));
    }
}
