//! # sqlstencil - SQL Query Templates with Bound Parameters
//!
//! `sqlstencil` compiles Jinja-style templates into parameterized SQL. A render
//! produces the query text, with a placeholder wherever a value is bound, and
//! the ordered parameters to execute it with.
//!
//! Every value written by a template expression is classified as either
//! inline SQL text or a bound parameter. Plain values are always bound; only
//! filters such as `identifier` turn a value into inline text. Untrusted input
//! therefore never reaches the query text by accident.
//!
//! ## Core Concepts
//!
//! - [`QueryEngine`]: compiles templates, owns filters and template loading
//! - [`QueryTemplate`]: a compiled template, rendered many times
//! - [`Context`]: the variables of one render
//! - [`ParamStyle`]: placeholder syntax of the target driver (`:name`, `?`, `$1`, …)
//! - [`RenderedQuery`]: the query text and its [`Params`]
//! - [`ClassifiedValue`]: the `Raw` / `Parameter` tag filters work with
//!
//! ## Quick Start
//!
//! ```rust
//! use sqlstencil::{Context, ParamStyle, QueryEngine, RenderOptions};
//!
//! let mut engine = QueryEngine::new();
//! engine.add_template(
//!     "active_users",
//!     r#"
//! SELECT * FROM {{ table | identifier }}
//! WHERE status = {{ status }}
//! {% if ids %}AND id IN {{ ids | inclause }}{% endif %}
//! "#,
//! ).unwrap();
//!
//! let ctx = Context::new()
//!     .with("table", "users")
//!     .with("status", "active")
//!     .with("ids", vec![3, 5]);
//!
//! let query = engine
//!     .render_with(
//!         "active_users",
//!         &ctx,
//!         &RenderOptions::new().with_style(ParamStyle::Asyncpg),
//!     )
//!     .unwrap();
//!
//! assert_eq!(
//!     query.query.trim(),
//!     "SELECT * FROM \"users\"\nWHERE status = $1\nAND id IN ($2, $3)"
//! );
//! assert_eq!(query.params.len(), 3);
//! ```
//!
//! ## Parameter Styles
//!
//! | Style | Placeholder | Parameters |
//! |-------|-------------|------------|
//! | `named` (default) | `:email` | mapping |
//! | `qmark` | `?` | sequence |
//! | `numeric` | `:1` | sequence |
//! | `format` | `%s` | sequence |
//! | `pyformat` | `%(email)s` | mapping |
//! | `asyncpg` | `$1` | sequence |
//!
//! Mapping styles name each parameter after the expression it came from. A
//! name used twice gets a suffix: `{{ a }} {{ a }}` renders as `:a :a_1`.
//!
//! ## Async Filters and Deferred Values
//!
//! Filters registered with [`QueryEngine::register_async_filter`] and context
//! values added with [`Context::insert_deferred`] are awaited during
//! [`QueryTemplate::render_async`], strictly in the order a synchronous render
//! would evaluate them.
//!
//! ## Loading Templates
//!
//! Templates can be loaded from directories, either configured through
//! [`EngineConfig::search_paths`] or added with [`QueryEngine::add_search_path`].
//! `{% include %}` and `{% extends %}` resolve against the same directories.

pub mod capture;
pub mod classify;
pub mod config;
pub mod context;
mod error;
pub mod filters;
pub mod format;
pub mod marker;
pub mod prelude;
pub mod style;
pub mod suspend;
pub mod template;

pub use capture::{Capture, CaptureList};
pub use classify::{classify, ClassifiedValue};
pub use config::EngineConfig;
pub use context::{Context, ContextEntry};
pub use error::{FilterError, QueryError, Result};
pub use filters::{AsyncFilterFn, Filter, FilterFn, FilterRegistry, FilterScope};
pub use format::{format_query, MarkedQuery, Params, RenderedQuery};
pub use style::{ContainerKind, CustomStyle, ParamStyle};
pub use suspend::{BoxFuture, EvalMode};
pub use template::{LoadError, QueryEngine, QueryTemplate, RenderOptions, SearchPath};

/// Re-exported so callers can build context values without a direct dependency.
pub use minijinja::Value;
