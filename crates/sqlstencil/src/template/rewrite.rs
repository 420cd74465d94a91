//! Compile-time rewrite of expression tags.
//!
//! Every `{{ EXPR }}` in a template is rewritten into
//!
//! ```text
//! {{ (EXPR) | __sqlstencil_emit(__sqlstencil_scope, "hint") }}
//! ```
//!
//! so that the final value of each expression passes through the emit filter
//! before it is written. The render scope is passed by name so that macros,
//! which only see the variables their body references, capture it too.
//!
//! The hint is the expression's leading variable name, or `none` when the
//! expression does not start with one. Whitespace control
//! (`{{-`, `-}}`, `{{+`, `+}}`) and line breaks are kept, so engine error
//! locations still point at the caller's source. Comments, block tags and
//! `{% raw %}` sections are copied unchanged.

use thiserror::Error;

use super::scope::SCOPE_KEY;
use crate::error::QueryError;
use crate::marker;

/// Prefix of every name the library reserves inside the template engine.
pub const RESERVED_PREFIX: &str = "__sqlstencil";

/// Filter every rewritten expression is piped through.
pub const EMIT_FILTER: &str = "__sqlstencil_emit";

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "true", "false", "none", "True", "False",
    "None",
];

/// Source that cannot be rewritten.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewriteError {
    #[error("reserved marker character in template source (line {line})")]
    ReservedCharacter { line: usize },

    #[error("empty expression (line {line})")]
    EmptyExpression { line: usize },

    #[error("unterminated {what} (line {line})")]
    Unterminated { what: &'static str, line: usize },
}

impl From<RewriteError> for QueryError {
    fn from(err: RewriteError) -> Self {
        QueryError::TemplateSyntax(err.to_string())
    }
}

impl From<RewriteError> for minijinja::Error {
    fn from(err: RewriteError) -> Self {
        minijinja::Error::new(minijinja::ErrorKind::SyntaxError, err.to_string())
    }
}

/// Rewrites all expression tags of `source`.
pub fn rewrite(source: &str) -> Result<String, RewriteError> {
    if let Some(pos) = marker::find_reserved(source) {
        return Err(RewriteError::ReservedCharacter {
            line: line_of(source, pos),
        });
    }

    let mut out = String::with_capacity(source.len() + source.len() / 4);
    let mut pos = 0;

    while let Some(found) = find_tag_start(source, pos) {
        out.push_str(&source[pos..found]);
        let rest = &source[found..];

        pos = if rest.starts_with("{#") {
            let end = rest.find("#}").ok_or(RewriteError::Unterminated {
                what: "comment",
                line: line_of(source, found),
            })?;
            let end = found + end + 2;
            out.push_str(&source[found..end]);
            end
        } else if rest.starts_with("{%") {
            let end = found + close_of(rest, "%}").ok_or(RewriteError::Unterminated {
                what: "block tag",
                line: line_of(source, found),
            })?;
            let end = if tag_name(&source[found..end]) == "raw" {
                end_of_raw(source, end).ok_or(RewriteError::Unterminated {
                    what: "raw section",
                    line: line_of(source, found),
                })?
            } else {
                end
            };
            out.push_str(&source[found..end]);
            end
        } else {
            let end = found + close_of(rest, "}}").ok_or(RewriteError::Unterminated {
                what: "expression",
                line: line_of(source, found),
            })?;
            rewrite_expression(&source[found..end], &mut out).ok_or(
                RewriteError::EmptyExpression {
                    line: line_of(source, found),
                },
            )?;
            end
        };
    }

    out.push_str(&source[pos..]);
    Ok(out)
}

/// Rewrites one `{{ … }}` tag. Returns `None` for an empty expression.
fn rewrite_expression(tag: &str, out: &mut String) -> Option<()> {
    let mut inner = &tag[2..tag.len() - 2];
    let open = whitespace_control(inner.chars().next());
    if open.is_some() {
        inner = &inner[1..];
    }
    let close = whitespace_control(inner.chars().last());
    if close.is_some() {
        inner = &inner[..inner.len() - 1];
    }

    let expr = inner.trim();
    if expr.is_empty() {
        return None;
    }
    let hint = match extract_name_hint(expr) {
        Some(hint) => format!("\"{}\"", hint),
        None => "none".to_string(),
    };

    out.push_str("{{");
    out.extend(open);
    out.push_str(" (");
    out.push_str(expr);
    out.push_str(") | ");
    out.push_str(EMIT_FILTER);
    out.push('(');
    out.push_str(SCOPE_KEY);
    out.push_str(", ");
    out.push_str(&hint);
    out.push_str(") ");
    out.extend(close);
    out.push_str("}}");
    Some(())
}

fn whitespace_control(ch: Option<char>) -> Option<char> {
    ch.filter(|ch| *ch == '-' || *ch == '+')
}

/// The leading dotted name chain of an expression, if the expression is a
/// plain variable reference optionally followed by filters.
///
/// ```rust
/// use sqlstencil::template::rewrite::extract_name_hint;
///
/// assert_eq!(extract_name_hint("user.email | lower").as_deref(), Some("user.email"));
/// assert_eq!(extract_name_hint("a + b"), None);
/// assert_eq!(extract_name_hint("'literal'"), None);
/// ```
pub fn extract_name_hint(expr: &str) -> Option<String> {
    let expr = expr.trim();
    let mut chain = Vec::new();
    let mut rest = expr;

    loop {
        let len = identifier_len(rest);
        if len == 0 {
            return None;
        }
        chain.push(&rest[..len]);
        rest = &rest[len..];
        match rest.strip_prefix('.') {
            Some(after) => rest = after,
            None => break,
        }
    }

    if KEYWORDS.contains(&chain[0]) || chain[0].starts_with(RESERVED_PREFIX) {
        return None;
    }
    let rest = rest.trim_start();
    if rest.is_empty() || rest.starts_with('|') {
        Some(chain.join("."))
    } else {
        None
    }
}

fn identifier_len(text: &str) -> usize {
    let mut len = 0;
    for (i, ch) in text.char_indices() {
        let ok = if i == 0 {
            ch.is_ascii_alphabetic() || ch == '_'
        } else {
            ch.is_ascii_alphanumeric() || ch == '_'
        };
        if !ok {
            break;
        }
        len = i + ch.len_utf8();
    }
    len
}

fn find_tag_start(source: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && matches!(bytes[i + 1], b'{' | b'%' | b'#') {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Byte offset just past the `closing` delimiter of the tag starting `tag`,
/// skipping string literals and nested brackets.
fn close_of(tag: &str, closing: &str) -> Option<usize> {
    let bytes = tag.as_bytes();
    let close = closing.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 2;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' if depth > 0 => depth -= 1,
            _ if depth == 0 && bytes[i..].starts_with(close) => return Some(i + close.len()),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Name of a block tag: `{%- raw %}` → `raw`.
fn tag_name(tag: &str) -> &str {
    let inner = &tag[2..tag.len() - 2];
    let inner = inner.trim_start_matches(['-', '+']).trim_start();
    &inner[..identifier_len(inner)]
}

/// Byte offset just past the `{% endraw %}` closing a raw section that starts at `from`.
fn end_of_raw(source: &str, from: usize) -> Option<usize> {
    let mut pos = from;
    loop {
        let start = pos + source[pos..].find("{%")?;
        let end = start + source[start..].find("%}")? + 2;
        let inner = source[start + 2..end - 2]
            .trim_matches(['-', '+'])
            .trim();
        if inner == "endraw" {
            return Some(end);
        }
        pos = start + 2;
    }
}

fn line_of(source: &str, pos: usize) -> usize {
    source[..pos].matches('\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_simple_expression() {
        assert_eq!(
            rewrite("a = {{ a }}").unwrap(),
            "a = {{ (a) | __sqlstencil_emit(__sqlstencil_scope, \"a\") }}"
        );
    }

    #[test]
    fn test_keeps_whitespace_control() {
        assert_eq!(
            rewrite("{{- x | upper -}}").unwrap(),
            "{{- (x | upper) | __sqlstencil_emit(__sqlstencil_scope, \"x\") -}}"
        );
    }

    #[test]
    fn test_literal_has_no_hint() {
        assert_eq!(
            rewrite("{{ 'x' ~ y }}").unwrap(),
            "{{ ('x' ~ y) | __sqlstencil_emit(__sqlstencil_scope, none) }}"
        );
    }

    #[test]
    fn test_string_literals_may_hold_braces() {
        let out = rewrite("{{ a | default('}}') }}").unwrap();
        assert_eq!(
            out,
            "{{ (a | default('}}')) | __sqlstencil_emit(__sqlstencil_scope, \"a\") }}"
        );
    }

    #[test]
    fn test_map_literal_inside_expression() {
        let out = rewrite("{{ {'k': v}['k'] }}").unwrap();
        assert_eq!(out, "{{ ({'k': v}['k']) | __sqlstencil_emit(__sqlstencil_scope, none) }}");
    }

    #[test]
    fn test_blocks_and_comments_untouched() {
        let source = "{# {{ not me }} #}{% for x in xs %}{{ x }}{% endfor %}";
        assert_eq!(
            rewrite(source).unwrap(),
            "{# {{ not me }} #}{% for x in xs %}{{ (x) | __sqlstencil_emit(__sqlstencil_scope, \"x\") }}{% endfor %}"
        );
    }

    #[test]
    fn test_raw_section_untouched() {
        let source = "{% raw %}{{ literal }}{%- endraw %} {{ y }}";
        assert_eq!(
            rewrite(source).unwrap(),
            "{% raw %}{{ literal }}{%- endraw %} {{ (y) | __sqlstencil_emit(__sqlstencil_scope, \"y\") }}"
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            rewrite("a\n{{ }}"),
            Err(RewriteError::EmptyExpression { line: 2 })
        );
        assert!(matches!(
            rewrite("{{ a"),
            Err(RewriteError::Unterminated { what: "expression", .. })
        ));
        assert!(matches!(
            rewrite("{# a"),
            Err(RewriteError::Unterminated { what: "comment", .. })
        ));
        assert!(matches!(
            rewrite("{% raw %} x"),
            Err(RewriteError::Unterminated { what: "raw section", .. })
        ));
        assert_eq!(
            rewrite("x\u{FDD0}"),
            Err(RewriteError::ReservedCharacter { line: 1 })
        );
    }

    #[test]
    fn test_name_hints() {
        assert_eq!(extract_name_hint("email").as_deref(), Some("email"));
        assert_eq!(extract_name_hint(" user.id ").as_deref(), Some("user.id"));
        assert_eq!(extract_name_hint("ids | inclause").as_deref(), Some("ids"));
        assert_eq!(extract_name_hint("items[0]"), None);
        assert_eq!(extract_name_hint("f(x)"), None);
        assert_eq!(extract_name_hint("not flag"), None);
        assert_eq!(extract_name_hint("none"), None);
        assert_eq!(extract_name_hint("42"), None);
        assert_eq!(extract_name_hint("a.1"), None);
    }
}
