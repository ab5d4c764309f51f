//! Raw query overrides with named and positional markers.
//!
//! # Responsibility
//! - Compile caller-supplied SQL once into text segments and parameter slots.
//! - Render it per call with plain `?` markers and a flat value list.
//!
//! # Invariants
//! - Text outside markers is reproduced verbatim.
//! - Markers inside quoted literals/identifiers are left alone.
//! - `:name` binds the declared parameter with that name, `?N` binds the
//!   N-th parameter (1-based), bare `?` binds the next parameter in order.
//! - A collection argument renders as `(?, ?, ...)`; an empty collection
//!   renders as `(NULL)` so `IN` matches nothing.

use crate::model::value::{Arg, Value};
use crate::query::parser::ParseError;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Param(usize),
}

/// Raw statement compiled against a declared parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSql {
    source: String,
    segments: Vec<Segment>,
}

impl CompiledSql {
    /// Compiles `sql`; `names[i]` is the declared name of parameter `i`.
    pub fn compile(
        operation: &str,
        sql: &str,
        names: &[Option<String>],
    ) -> Result<Self, ParseError> {
        let chars: Vec<char> = sql.chars().collect();
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut quote: Option<char> = None;
        let mut next_positional = 0;
        let mut index = 0;

        while index < chars.len() {
            let current = chars[index];

            if let Some(open) = quote {
                text.push(current);
                if current == open {
                    quote = None;
                }
                index += 1;
                continue;
            }

            match current {
                '\'' | '"' => {
                    quote = Some(current);
                    text.push(current);
                    index += 1;
                }
                ':' if is_named_marker(&chars, index) => {
                    let start = index + 1;
                    let mut end = start;
                    while end < chars.len() && is_ident_char(chars[end]) {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    let position = names
                        .iter()
                        .position(|declared| declared.as_deref() == Some(name.as_str()))
                        .ok_or_else(|| ParseError::UnknownParameter {
                            operation: operation.to_string(),
                            parameter: name.clone(),
                        })?;
                    flush(&mut segments, &mut text);
                    segments.push(Segment::Param(position));
                    index = end;
                }
                '?' => {
                    let start = index + 1;
                    let mut end = start;
                    while end < chars.len() && chars[end].is_ascii_digit() {
                        end += 1;
                    }
                    let position = if end > start {
                        let digits: String = chars[start..end].iter().collect();
                        let ordinal: usize = digits.parse().unwrap_or(0);
                        if ordinal == 0 {
                            return Err(ParseError::UnknownParameter {
                                operation: operation.to_string(),
                                parameter: format!("?{digits}"),
                            });
                        }
                        ordinal - 1
                    } else {
                        next_positional += 1;
                        next_positional - 1
                    };
                    if position >= names.len() {
                        return Err(ParseError::ParameterCountMismatch {
                            operation: operation.to_string(),
                            expected: position + 1,
                            declared: names.len(),
                        });
                    }
                    flush(&mut segments, &mut text);
                    segments.push(Segment::Param(position));
                    index = end;
                }
                other => {
                    text.push(other);
                    index += 1;
                }
            }
        }
        flush(&mut segments, &mut text);

        Ok(Self {
            source: sql.to_string(),
            segments,
        })
    }

    /// Original SQL text as declared.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct parameter indexes referenced by markers.
    pub fn referenced(&self) -> BTreeSet<usize> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Param(position) => Some(*position),
                Segment::Text(_) => None,
            })
            .collect()
    }

    /// Renders SQL with `?` markers and the values to bind, in marker order.
    ///
    /// Arguments must already be checked against the declaration.
    pub fn render(&self, args: &[Arg]) -> (String, Vec<Value>) {
        let mut sql = String::with_capacity(self.source.len());
        let mut params = Vec::new();

        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Param(position) => match args.get(*position) {
                    Some(Arg::Scalar(value)) => {
                        sql.push('?');
                        params.push(value.clone());
                    }
                    Some(Arg::List(values)) => {
                        sql.push_str(&in_list_markers(values.len()));
                        params.extend(values.iter().cloned());
                    }
                    None => {
                        sql.push('?');
                        params.push(Value::Null);
                    }
                },
            }
        }

        (sql, params)
    }
}

/// `(?, ?, ?)` for `count` elements, `(NULL)` when empty.
pub(crate) fn in_list_markers(count: usize) -> String {
    if count == 0 {
        return "(NULL)".to_string();
    }
    format!("({})", vec!["?"; count].join(", "))
}

fn flush(segments: &mut Vec<Segment>, text: &mut String) {
    if !text.is_empty() {
        segments.push(Segment::Text(std::mem::take(text)));
    }
}

fn is_named_marker(chars: &[char], index: usize) -> bool {
    let after_colon = index > 0 && chars[index - 1] == ':';
    let starts_ident = chars
        .get(index + 1)
        .is_some_and(|c| c.is_ascii_alphabetic() || *c == '_');
    !after_colon && starts_ident
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
