//! Prelude for convenient imports.
//!
//! ```rust
//! use sqlstencil::prelude::*;
//!
//! let engine = QueryEngine::new();
//! let query = engine
//!     .render_str("SELECT {{ n }}", &Context::new().with("n", 1))
//!     .unwrap();
//! assert_eq!(query.query, "SELECT :n");
//! ```

pub use crate::{
    ClassifiedValue, Context, EngineConfig, FilterScope, ParamStyle, Params, QueryEngine,
    QueryError, QueryTemplate, RenderOptions, RenderedQuery, Value,
};
