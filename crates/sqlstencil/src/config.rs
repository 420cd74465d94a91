//! Engine configuration.
//!
//! [`EngineConfig`] holds the defaults a [`QueryEngine`](crate::QueryEngine) is
//! built with. It can be written in code or loaded from YAML:
//!
//! ```yaml
//! param_style: asyncpg
//! identifier_quote: '`'
//! strict_undefined: true
//! search_paths:
//!   - ./queries
//! ```
//!
//! Every field is optional; missing fields keep their defaults. Unknown fields
//! are rejected so typos surface as errors.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{QueryError, Result};
use crate::style::ParamStyle;

/// Defaults and environment settings for a query engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Placeholder style used when a render call does not pick one.
    pub param_style: ParamStyle,
    /// Quote character for the `identifier` filter; `None` inlines validated bare names.
    pub identifier_quote: Option<char>,
    /// Fail on any use of an undefined variable, not only when it is written.
    pub strict_undefined: bool,
    /// Let a filter registration replace an existing filter of the same name.
    pub allow_filter_override: bool,
    /// Remove the first newline after a block tag.
    pub trim_blocks: bool,
    /// Strip whitespace before a block tag on its line.
    pub lstrip_blocks: bool,
    /// Keep the trailing newline of template sources.
    pub keep_trailing_newline: bool,
    /// Directories named templates are loaded from, in search order.
    pub search_paths: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            param_style: ParamStyle::Named,
            identifier_quote: Some('"'),
            strict_undefined: false,
            allow_filter_override: true,
            trim_blocks: false,
            lstrip_blocks: false,
            keep_trailing_newline: false,
            search_paths: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads a YAML configuration file.
    ///
    /// Relative search paths are resolved against the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            QueryError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            for dir in &mut config.search_paths {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
        }
        Ok(config)
    }

    /// Sets the default parameter style.
    pub fn with_param_style(mut self, style: ParamStyle) -> Self {
        self.param_style = style;
        self
    }

    /// Sets the identifier quote character.
    pub fn with_identifier_quote(mut self, quote: Option<char>) -> Self {
        self.identifier_quote = quote;
        self
    }

    /// Adds a template search directory.
    pub fn with_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(dir.into());
        self
    }
}
