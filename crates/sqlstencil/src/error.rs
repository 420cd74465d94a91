//! Error types for query compilation and rendering.
//!
//! This module provides [`QueryError`], the single error type returned by every
//! public operation. It abstracts over the underlying template engine's errors so
//! callers can match on what went wrong (bad syntax, an undefined value, a failing
//! filter) without depending on MiniJinja's error kinds.
//!
//! None of these errors are retried internally. A render either succeeds with a
//! complete [`RenderedQuery`](crate::RenderedQuery) or fails with one of these.

use thiserror::Error;

use crate::template::loader::LoadError;

/// Error returned by a filter implementation.
///
/// Custom filters may fail with any error type; the original error is kept as
/// the `source` of [`QueryError::FilterExecution`].
pub type FilterError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for query template operations.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed template source, raised at compile time.
    #[error("template syntax error: {0}")]
    TemplateSyntax(String),

    /// No template registered or loadable under this name.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// An expression evaluated to an undefined value.
    #[error("undefined value `{name}` used in query")]
    UndefinedValue { name: String },

    /// A filter name could not be resolved.
    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    /// A filter raised an error; the original error is the source.
    #[error("filter `{filter}` failed: {source}")]
    FilterExecution {
        filter: String,
        #[source]
        source: FilterError,
    },

    /// A filter is already registered and overrides are disabled.
    #[error("filter `{0}` is already registered")]
    DuplicateFilter(String),

    /// The name collides with one reserved by the library.
    #[error("`{0}` is reserved for internal use")]
    ReservedName(String),

    /// The parameter style name is not recognized.
    #[error("unsupported parameter style `{0}`")]
    UnsupportedStyle(String),

    /// A deferred value or async filter was reached during a synchronous render.
    #[error("`{name}` suspends and can only be evaluated by an async render")]
    RequiresSuspending { name: String },

    /// A deferred context value failed to resolve.
    #[error("deferred value `{name}` failed: {source}")]
    DeferredValue {
        name: String,
        #[source]
        source: FilterError,
    },

    /// A replayed render reached a different suspension point than before.
    #[error("render replay diverged at async call #{ordinal}: expected `{expected}`, found `{found}`")]
    ReplayDiverged {
        ordinal: usize,
        expected: String,
        found: String,
    },

    /// Rendered text contains reserved marker characters that do not form a valid marker.
    #[error("marker collision: {0}")]
    MarkerCollision(String),

    /// Template file loading failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The render context could not be built from the supplied data.
    #[error("context error: {0}")]
    Context(String),

    /// Any other error raised by the template engine while rendering.
    #[error("template error: {0}")]
    Engine(#[source] minijinja::Error),
}

/// Result type for query template operations.
pub type Result<T> = std::result::Result<T, QueryError>;

impl From<serde_yaml::Error> for QueryError {
    fn from(err: serde_yaml::Error) -> Self {
        QueryError::Config(err.to_string())
    }
}

impl From<minijinja::Error> for QueryError {
    fn from(err: minijinja::Error) -> Self {
        use minijinja::ErrorKind;
        use std::error::Error as _;

        if let Some(load) = err.source().and_then(|s| s.downcast_ref::<LoadError>()) {
            return QueryError::Load(load.clone());
        }

        match err.kind() {
            ErrorKind::SyntaxError | ErrorKind::BadEscape => {
                QueryError::TemplateSyntax(err.to_string())
            }
            ErrorKind::TemplateNotFound => QueryError::TemplateNotFound(
                err.detail()
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string()),
            ),
            ErrorKind::UndefinedError => QueryError::UndefinedValue {
                name: err.detail().unwrap_or("<expression>").to_string(),
            },
            ErrorKind::UnknownFilter => QueryError::UnknownFilter(
                err.detail()
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string()),
            ),
            _ => QueryError::Engine(err),
        }
    }
}

impl QueryError {
    /// Returns `true` for errors raised while compiling template source.
    pub fn is_syntax_error(&self) -> bool {
        matches!(self, QueryError::TemplateSyntax(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = QueryError::UndefinedValue {
            name: "missing".to_string(),
        };
        assert!(err.to_string().contains("undefined value"));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_filter_execution_keeps_source() {
        let cause: FilterError = "expected a string".into();
        let err = QueryError::FilterExecution {
            filter: "shout".to_string(),
            source: cause,
        };
        let source = err.source().expect("source preserved");
        assert_eq!(source.to_string(), "expected a string");
    }

    #[test]
    fn test_from_minijinja_syntax_error() {
        let mj_err = minijinja::Error::new(minijinja::ErrorKind::SyntaxError, "unexpected end");
        let err: QueryError = mj_err.into();
        assert!(err.is_syntax_error());
    }

    #[test]
    fn test_from_minijinja_template_not_found() {
        let mj_err = minijinja::Error::new(
            minijinja::ErrorKind::TemplateNotFound,
            "template 'users' not found",
        );
        let err: QueryError = mj_err.into();
        assert!(matches!(err, QueryError::TemplateNotFound(_)));
    }

    #[test]
    fn test_from_minijinja_other_kinds_are_engine_errors() {
        let mj_err = minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, "nope");
        let err: QueryError = mj_err.into();
        assert!(matches!(err, QueryError::Engine(_)));
    }
}
