//! Built-in SQL filters.
//!
//! `identifier` is the library's injection-safety boundary: it is the only
//! built-in that turns caller-supplied text into inline SQL while guaranteeing
//! the result is a single quoted (or validated bare) name.

use minijinja::value::ValueKind;
use minijinja::Value;
use thiserror::Error;

use super::{Filter, FilterRegistry, FilterScope};
use crate::classify::{ClassifiedValue, ParameterList};
use crate::error::FilterError;
use crate::marker;

/// Errors raised by the built-in filters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuiltinFilterError {
    #[error("expected {expected}, got {found}")]
    UnsupportedInput {
        expected: &'static str,
        found: String,
    },

    #[error("identifier segment is empty")]
    EmptyIdentifier,

    #[error("`{0}` is not a valid unquoted identifier")]
    BareIdentifier(String),

    #[error("value contains reserved marker characters")]
    ReservedCharacter,

    #[error("missing required argument `{0}`")]
    MissingArgument(&'static str),
}

type FilterResult = Result<ClassifiedValue, FilterError>;

/// Adds the built-in filters to `registry`, replacing any filters of the same names.
pub(crate) fn register_builtins(registry: &mut FilterRegistry) {
    let builtins: [(&str, Filter); 5] = [
        ("identifier", Filter::from_fn(identifier)),
        ("inclause", Filter::from_fn(inclause)),
        ("bind", Filter::from_fn(bind)),
        ("sqlsafe", Filter::from_fn(sqlsafe)),
        ("safe", Filter::from_fn(safe)),
    ];
    for (name, filter) in builtins {
        registry.filters.insert(name.to_string(), filter);
    }
}

/// `{{ table | identifier }}`: quotes a name for inline use.
///
/// A string is one segment; a sequence supplies several, joined with `.`.
pub fn identifier(scope: &FilterScope<'_>, input: ClassifiedValue, _args: &[Value]) -> FilterResult {
    let value = match input {
        ClassifiedValue::Raw(_) => return Ok(input),
        ClassifiedValue::Parameter { value, .. } => value,
    };

    let segments: Vec<String> = if let Some(text) = value.as_str() {
        vec![text.to_string()]
    } else if value.kind() == ValueKind::Seq {
        let mut segments = Vec::new();
        for item in value.try_iter()? {
            match item.as_str() {
                Some(text) => segments.push(text.to_string()),
                None => return Err(unsupported("a sequence of strings", &item).into()),
            }
        }
        segments
    } else {
        return Err(unsupported("a string or a sequence of strings", &value).into());
    };

    if segments.is_empty() {
        return Err(BuiltinFilterError::EmptyIdentifier.into());
    }
    let quoted = segments
        .iter()
        .map(|segment| quote_identifier(segment, scope.identifier_quote()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ClassifiedValue::Raw(quoted.join(".")))
}

/// Quotes one identifier segment, doubling embedded quote characters.
///
/// Without a quote character the segment must already be a bare identifier.
pub fn quote_identifier(segment: &str, quote: Option<char>) -> Result<String, BuiltinFilterError> {
    if segment.is_empty() {
        return Err(BuiltinFilterError::EmptyIdentifier);
    }
    if marker::find_reserved(segment).is_some() {
        return Err(BuiltinFilterError::ReservedCharacter);
    }

    let Some(quote) = quote else {
        if !is_bare_identifier(segment) {
            return Err(BuiltinFilterError::BareIdentifier(segment.to_string()));
        }
        return Ok(segment.to_string());
    };

    let mut out = String::with_capacity(segment.len() + 2);
    out.push(quote);
    for ch in segment.chars() {
        if ch == quote {
            out.push(quote);
        }
        out.push(ch);
    }
    out.push(quote);
    Ok(out)
}

fn is_bare_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '$')
}

/// `{{ ids | inclause }}`: binds each element as its own parameter, as `(p1, p2, …)`.
pub fn inclause(_scope: &FilterScope<'_>, input: ClassifiedValue, _args: &[Value]) -> FilterResult {
    let value = match input {
        ClassifiedValue::Parameter { value, .. } => value,
        ClassifiedValue::Raw(text) => {
            return Err(unsupported("a sequence", &Value::from(text)).into());
        }
    };
    if !matches!(value.kind(), ValueKind::Seq | ValueKind::Iterable) {
        return Err(unsupported("a sequence", &value).into());
    }

    let items: Vec<Value> = value.try_iter()?.collect();
    Ok(ClassifiedValue::parameter(Value::from_object(ParameterList {
        items,
    })))
}

/// `{{ value | bind("name") }}`: binds as a parameter under an explicit name.
pub fn bind(_scope: &FilterScope<'_>, input: ClassifiedValue, args: &[Value]) -> FilterResult {
    let name = args
        .first()
        .and_then(Value::as_str)
        .ok_or(BuiltinFilterError::MissingArgument("name"))?;
    Ok(input.with_name_hint(name))
}

/// `{{ fragment | sqlsafe }}`: writes the value's text inline.
pub fn sqlsafe(_scope: &FilterScope<'_>, input: ClassifiedValue, _args: &[Value]) -> FilterResult {
    let value = match input {
        ClassifiedValue::Raw(_) => return Ok(input),
        ClassifiedValue::Parameter { value, .. } => value,
    };

    let text = match value.kind() {
        ValueKind::String => value.as_str().unwrap_or_default().to_string(),
        ValueKind::Number | ValueKind::Bool => value.to_string(),
        ValueKind::None => "NULL".to_string(),
        _ => return Err(unsupported("a string, number or boolean", &value).into()),
    };
    inline_text(text)
}

/// `{{ fragment | safe }}`: MiniJinja's `safe`, with the reserved-character check of `sqlsafe`.
pub fn safe(_scope: &FilterScope<'_>, input: ClassifiedValue, _args: &[Value]) -> FilterResult {
    let value = match input {
        ClassifiedValue::Raw(_) => return Ok(input),
        ClassifiedValue::Parameter { value, .. } => value,
    };
    let text = match value.as_str() {
        Some(text) => text.to_string(),
        None => value.to_string(),
    };
    inline_text(text)
}

fn inline_text(text: String) -> FilterResult {
    if marker::find_reserved(&text).is_some() {
        return Err(BuiltinFilterError::ReservedCharacter.into());
    }
    Ok(ClassifiedValue::Raw(text))
}

fn unsupported(expected: &'static str, found: &Value) -> BuiltinFilterError {
    BuiltinFilterError::UnsupportedInput {
        expected,
        found: found.kind().to_string(),
    }
}
