//! `@name` marker rewriting.
//!
//! Drivers only understand positional placeholders, so named markers are
//! replaced in order of appearance and the bound values are reordered to
//! match. Markers inside string literals, quoted identifiers and comments are
//! left alone, as are `@@` system variables and markers with no bound
//! parameter.

use std::collections::HashMap;

use common::models::Dialect;

use super::value::BoundParameter;
use super::{expanded_name, PARAMETER_MARKER};

/// Positional placeholder syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1, $2, ...`
    Dollar,
    /// `?`
    Question,
}

impl PlaceholderStyle {
    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Postgres => PlaceholderStyle::Dollar,
            _ => PlaceholderStyle::Question,
        }
    }
}

/// SQL text with positional placeholders and the parameters in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenSql {
    pub sql: String,
    pub parameters: Vec<BoundParameter>,
}

/// Rewrites every `@name` marker in `sql` that has a bound parameter.
///
/// A marker whose parameter was expanded into `name_0, name_1, ...` becomes a
/// comma-separated placeholder list. A marker used twice binds its value twice.
pub fn rewrite_placeholders(sql: &str, parameters: &[BoundParameter], style: PlaceholderStyle) -> RewrittenSql {
    let by_name: HashMap<String, &BoundParameter> = parameters
        .iter()
        .map(|p| (p.name.to_lowercase(), p))
        .collect();

    let mut out = String::with_capacity(sql.len());
    let mut ordered: Vec<BoundParameter> = Vec::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => i = copy_quoted(&chars, i, c, &mut out),
            '[' => i = copy_quoted(&chars, i, ']', &mut out),
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..].iter().position(|&c| c == '\n').map_or(chars.len(), |p| i + p);
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = find_block_comment_end(&chars, i + 2);
                out.extend(&chars[i..end]);
                i = end;
            }
            PARAMETER_MARKER if chars.get(i + 1) == Some(&PARAMETER_MARKER) => {
                let end = i + 2 + identifier_len(&chars[i + 2..]);
                out.extend(&chars[i..end]);
                i = end;
            }
            PARAMETER_MARKER => {
                let len = identifier_len(&chars[i + 1..]);
                let end = i + 1 + len;
                let marker: String = chars[i..end].iter().collect();
                let group = resolve(&marker, &by_name);
                if len == 0 || group.is_empty() {
                    out.push_str(&marker);
                } else {
                    let placeholders: Vec<String> = group
                        .into_iter()
                        .map(|p| {
                            ordered.push(p.clone());
                            placeholder(style, ordered.len())
                        })
                        .collect();
                    out.push_str(&placeholders.join(", "));
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    RewrittenSql {
        sql: out,
        parameters: ordered,
    }
}

/// Bound parameters for `marker`: the direct match, or its expanded elements.
fn resolve<'a>(marker: &str, by_name: &HashMap<String, &'a BoundParameter>) -> Vec<&'a BoundParameter> {
    let key = marker.to_lowercase();
    if let Some(p) = by_name.get(&key) {
        return vec![*p];
    }
    (0..)
        .map(|i| by_name.get(&expanded_name(&key, i)).copied())
        .take_while(Option::is_some)
        .flatten()
        .collect()
}

fn placeholder(style: PlaceholderStyle, position: usize) -> String {
    match style {
        PlaceholderStyle::Dollar => format!("${}", position),
        PlaceholderStyle::Question => "?".to_string(),
    }
}

fn identifier_len(chars: &[char]) -> usize {
    chars
        .iter()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '#'))
        .count()
}

/// Copies a quoted run starting at `start` and returns the index after it.
/// A doubled closing quote is an escape.
fn copy_quoted(chars: &[char], start: usize, close: char, out: &mut String) -> usize {
    out.push(chars[start]);
    let mut i = start + 1;
    while i < chars.len() {
        out.push(chars[i]);
        if chars[i] == close {
            if chars.get(i + 1) == Some(&close) {
                out.push(close);
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

fn find_block_comment_end(chars: &[char], from: usize) -> usize {
    let mut i = from;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}
