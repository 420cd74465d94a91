//! Template compilation and rendering.
//!
//! This module binds the query pipeline to MiniJinja. Templates are processed
//! in two passes:
//!
//! **Pass 1 - MiniJinja**: variable lookup, control flow, filters. Every `{{ }}`
//! expression ends in the emit filter, which writes `Raw` text inline and
//! replaces each parameter with a marker token.
//!
//! ```text
//! Template: SELECT * FROM {{ table | identifier }} WHERE id = {{ id }}
//! After:    SELECT * FROM "users" WHERE id = \u{FDD0}0\u{FDD1}
//! ```
//!
//! **Pass 2 - Formatting**: markers become placeholders of the chosen
//! [`ParamStyle`](crate::ParamStyle).
//!
//! ```text
//! Input:  SELECT * FROM "users" WHERE id = \u{FDD0}0\u{FDD1}
//! Output: SELECT * FROM "users" WHERE id = $1          [42]
//! ```
//!
//! ## Key Types
//!
//! - [`QueryEngine`]: environment, filters and template loading
//! - [`QueryTemplate`]: a compiled template, rendered many times
//! - [`RenderOptions`]: per-render parameter style and identifier quoting
//! - [`SearchPath`]: template directories

mod engine;
pub mod loader;
mod renderer;
pub mod rewrite;
pub(crate) mod scope;

pub use engine::QueryEngine;
pub use loader::{LoadError, SearchPath, TemplateFile, TEMPLATE_EXTENSIONS};
pub use renderer::{QueryTemplate, RenderOptions};
pub use rewrite::{extract_name_hint, RewriteError};
