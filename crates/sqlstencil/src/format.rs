//! Placeholder formatting: the second, purely textual pass.
//!
//! The renderer leaves a marker token wherever a parameter was bound and
//! records the value in a [`CaptureList`]. [`format_query`] walks the marked
//! text left to right, replaces each marker with the placeholder of the chosen
//! [`ParamStyle`] and assembles the parameter container in the same order.
//!
//! ## Keys for mapping styles
//!
//! Mapping styles (`named`, `pyformat`, custom mapping) derive each key from the
//! capture's name hint, with dots replaced by `__`. A capture without a hint
//! uses `param_<n>`, `n` being its 1-based placeholder position. The first use
//! of a key keeps it bare; later uses get `_1`, `_2`, … appended, skipping any
//! candidate that is already taken:
//!
//! ```text
//! {{ a }} {{ a }}    named →  :a :a_1     {a: 5, a_1: 5}
//! {{ a }} {{ a }}    qmark →  ? ?         [5, 5]
//! ```

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use minijinja::Value;
use serde::Serialize;

use crate::capture::CaptureList;
use crate::error::{QueryError, Result};
use crate::marker::{self, Segment};
use crate::style::{ContainerKind, ParamStyle};

/// Values to bind, shaped by the parameter style.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Params {
    /// Key → value, in placeholder order.
    Named(IndexMap<String, Value>),
    /// Values in placeholder order.
    Positional(Vec<Value>),
}

impl Params {
    pub fn len(&self) -> usize {
        match self {
            Params::Named(map) => map.len(),
            Params::Positional(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a value by key. Always `None` for positional parameters.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Params::Named(map) => map.get(key),
            Params::Positional(_) => None,
        }
    }

    /// Looks up a value by 0-based position, for either shape.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Params::Named(map) => map.get_index(index).map(|(_, value)| value),
            Params::Positional(values) => values.get(index),
        }
    }

    /// Values in placeholder order.
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Params::Named(map) => map.values().collect(),
            Params::Positional(values) => values.iter().collect(),
        }
    }

    /// Drops the keys of a mapping, keeping placeholder order.
    pub fn into_positional(self) -> Vec<Value> {
        match self {
            Params::Named(map) => map.into_values().collect(),
            Params::Positional(values) => values,
        }
    }
}

/// Final query text and the parameters to bind with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedQuery {
    pub query: String,
    pub params: Params,
}

impl RenderedQuery {
    pub fn into_parts(self) -> (String, Params) {
        (self.query, self.params)
    }
}

/// Renderer output: text with marker tokens, and the values they stand for.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkedQuery {
    pub text: String,
    pub captures: CaptureList,
}

impl MarkedQuery {
    /// Replaces markers with placeholders of `style`.
    pub fn format(&self, style: &ParamStyle) -> Result<RenderedQuery> {
        format_query(&self.text, &self.captures, style)
    }
}

/// Replaces every marker in `marked` with a placeholder and collects the parameters.
///
/// # Errors
///
/// [`QueryError::MarkerCollision`] if the text holds reserved characters that do
/// not form a marker, or a marker refers to a capture that does not exist.
pub fn format_query(
    marked: &str,
    captures: &CaptureList,
    style: &ParamStyle,
) -> Result<RenderedQuery> {
    let segments = marker::segments(marked).map_err(QueryError::MarkerCollision)?;

    let mut query = String::with_capacity(marked.len());
    let mut keys = KeyAllocator::default();
    let mut named = IndexMap::new();
    let mut positional = Vec::new();
    let container = style.container();

    for segment in segments {
        let index = match segment {
            Segment::Text(text) => {
                query.push_str(text);
                continue;
            }
            Segment::Marker(index) => index,
        };
        let capture = captures.get(index).ok_or_else(|| {
            QueryError::MarkerCollision(format!(
                "marker #{} has no captured value ({} captured)",
                index,
                captures.len()
            ))
        })?;

        let position = positional.len() + named.len() + 1;
        let base = capture
            .name_hint
            .as_deref()
            .map(key_from_hint)
            .unwrap_or_else(|| format!("param_{}", position));

        match container {
            ContainerKind::Mapping => {
                let key = keys.allocate(&base);
                query.push_str(&style.placeholder(&key, position));
                named.insert(key, capture.value.clone());
            }
            ContainerKind::Sequence => {
                let key = match capture.name_hint {
                    Some(_) => base,
                    None => position.to_string(),
                };
                query.push_str(&style.placeholder(&key, position));
                positional.push(capture.value.clone());
            }
        }
    }

    let params = match container {
        ContainerKind::Mapping => Params::Named(named),
        ContainerKind::Sequence => Params::Positional(positional),
    };
    Ok(RenderedQuery { query, params })
}

/// Turns a name hint into a bind-parameter key.
fn key_from_hint(hint: &str) -> String {
    hint.replace('.', "__")
}

/// Hands out unique mapping keys.
#[derive(Debug, Default)]
struct KeyAllocator {
    taken: HashSet<String>,
    suffixes: HashMap<String, usize>,
}

impl KeyAllocator {
    fn allocate(&mut self, base: &str) -> String {
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }
        let counter = self.suffixes.entry(base.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}_{}", base, counter);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}
