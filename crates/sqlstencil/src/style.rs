//! Parameter styles: placeholder syntax and parameter container shape.
//!
//! | Style | Placeholder | Container |
//! |-------|-------------|-----------|
//! | `named` | `:name` | mapping |
//! | `qmark` | `?` | sequence |
//! | `numeric` | `:1`, `:2`, … | sequence |
//! | `format` | `%s` | sequence |
//! | `pyformat` | `%(name)s` | mapping |
//! | `asyncpg` | `$1`, `$2`, … | sequence |
//! | custom | caller-supplied | caller-supplied (default sequence) |
//!
//! Styles are parsed from their names with [`FromStr`]; an unknown name fails
//! with [`QueryError::UnsupportedStyle`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::error::QueryError;

/// Shape of the parameter container a style produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerKind {
    /// Name → value mapping.
    Mapping,
    /// Ordered sequence of values.
    #[default]
    Sequence,
}

/// Formats one placeholder from its key and 1-based position.
pub type PlaceholderFn = Arc<dyn Fn(&str, usize) -> String + Send + Sync>;

/// A caller-defined parameter style.
///
/// The formatter receives the parameter key and its 1-based position. For a
/// [`ContainerKind::Mapping`] container the key is the deduplicated mapping key;
/// for a sequence it is the name hint, or the position when there is none.
#[derive(Clone)]
pub struct CustomStyle {
    container: ContainerKind,
    formatter: PlaceholderFn,
}

impl CustomStyle {
    /// Creates a custom style producing a parameter sequence.
    pub fn new<F>(formatter: F) -> Self
    where
        F: Fn(&str, usize) -> String + Send + Sync + 'static,
    {
        Self {
            container: ContainerKind::Sequence,
            formatter: Arc::new(formatter),
        }
    }

    /// Sets the container kind.
    pub fn with_container(mut self, container: ContainerKind) -> Self {
        self.container = container;
        self
    }

    pub fn container(&self) -> ContainerKind {
        self.container
    }

    pub fn format(&self, key: &str, position: usize) -> String {
        (self.formatter)(key, position)
    }
}

impl fmt::Debug for CustomStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomStyle")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

/// Placeholder convention of the target database driver.
#[derive(Debug, Clone, Default)]
pub enum ParamStyle {
    /// `:name`
    #[default]
    Named,
    /// `?`
    Qmark,
    /// `:1`
    Numeric,
    /// `%s`
    Format,
    /// `%(name)s`
    Pyformat,
    /// `$1`
    Asyncpg,
    /// Caller-supplied formatter.
    Custom(CustomStyle),
}

impl ParamStyle {
    /// Names accepted by [`FromStr`].
    pub const NAMES: &'static [&'static str] =
        &["named", "qmark", "numeric", "format", "pyformat", "asyncpg"];

    /// Creates a custom style producing a parameter sequence.
    pub fn custom<F>(formatter: F) -> Self
    where
        F: Fn(&str, usize) -> String + Send + Sync + 'static,
    {
        ParamStyle::Custom(CustomStyle::new(formatter))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParamStyle::Named => "named",
            ParamStyle::Qmark => "qmark",
            ParamStyle::Numeric => "numeric",
            ParamStyle::Format => "format",
            ParamStyle::Pyformat => "pyformat",
            ParamStyle::Asyncpg => "asyncpg",
            ParamStyle::Custom(_) => "custom",
        }
    }

    /// The container this style binds parameters with.
    pub fn container(&self) -> ContainerKind {
        match self {
            ParamStyle::Named | ParamStyle::Pyformat => ContainerKind::Mapping,
            ParamStyle::Qmark | ParamStyle::Numeric | ParamStyle::Format | ParamStyle::Asyncpg => {
                ContainerKind::Sequence
            }
            ParamStyle::Custom(custom) => custom.container(),
        }
    }

    /// Placeholder text for the parameter with `key` at 1-based `position`.
    pub fn placeholder(&self, key: &str, position: usize) -> String {
        match self {
            ParamStyle::Named => format!(":{}", key),
            ParamStyle::Qmark => "?".to_string(),
            ParamStyle::Numeric => format!(":{}", position),
            ParamStyle::Format => "%s".to_string(),
            ParamStyle::Pyformat => format!("%({})s", key),
            ParamStyle::Asyncpg => format!("${}", position),
            ParamStyle::Custom(custom) => custom.format(key, position),
        }
    }
}

impl fmt::Display for ParamStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParamStyle {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "named" => Ok(ParamStyle::Named),
            "qmark" => Ok(ParamStyle::Qmark),
            "numeric" => Ok(ParamStyle::Numeric),
            "format" => Ok(ParamStyle::Format),
            "pyformat" => Ok(ParamStyle::Pyformat),
            "asyncpg" => Ok(ParamStyle::Asyncpg),
            other => Err(QueryError::UnsupportedStyle(other.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for ParamStyle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
