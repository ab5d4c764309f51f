//! Operation-name parser.
//!
//! # Responsibility
//! - Turn names such as `findByUsernameAndAgeGreaterThan` into a predicate
//!   chain, ordering and result shape.
//!
//! # Invariants
//! - Parsing is pure: same name, descriptor and parameters always yield the
//!   same result. No I/O.
//! - Every produced clause references a field of the descriptor.
//! - Clause `n` binds parameter `n`.
//!
//! Grammar:
//! `<verb>[Subject][By<Segment>(And<Segment>)*][OrderBy(<Field>(Asc|Desc)?)+]`
//! where verb is `find|count|delete|update` and a segment is a field name
//! optionally suffixed with `GreaterThanEqual|GreaterThan|LessThan|In`.

use crate::metadata::EntityDescriptor;
use crate::model::page::{Direction, Order};
use crate::query::plan::{
    Comparison, MutationKind, ParamKind, PredicateChain, PredicateClause, ResultShape, ReturnKind,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static OPERATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(find|count|delete|update)([A-Z][A-Za-z0-9]*?)??(?:By([A-Z][A-Za-z0-9]*))?$")
        .expect("valid operation regex")
});
static ORDER_TERM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Z][A-Za-z0-9]*?)(Asc|Desc)").expect("valid order term regex")
});

const AND: &str = "And";
const ORDER_BY: &str = "OrderBy";
const KEYWORDS: &[(&str, Comparison)] = &[
    ("GreaterThanEqual", Comparison::GreaterThanEqual),
    ("GreaterThan", Comparison::GreaterThan),
    ("LessThan", Comparison::LessThan),
    ("In", Comparison::InSet),
];

/// Malformed declaration, reported when the repository is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnknownVerb(String),
    MalformedName(String),
    UnknownField {
        operation: String,
        entity: String,
        field: String,
    },
    UnknownAssociation {
        operation: String,
        entity: String,
        association: String,
    },
    ParameterCountMismatch {
        operation: String,
        expected: usize,
        declared: usize,
    },
    ParameterKindMismatch {
        operation: String,
        position: usize,
        message: String,
    },
    ReturnKindMismatch {
        operation: String,
        message: String,
    },
    UnknownParameter {
        operation: String,
        parameter: String,
    },
    UnsupportedDirective {
        operation: String,
        message: String,
    },
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownVerb(name) => write!(
                f,
                "operation `{name}` does not start with find|count|delete|update"
            ),
            Self::MalformedName(name) => write!(f, "operation name `{name}` is malformed"),
            Self::UnknownField {
                operation,
                entity,
                field,
            } => write!(
                f,
                "operation `{operation}` references unknown field `{field}` on `{entity}`"
            ),
            Self::UnknownAssociation {
                operation,
                entity,
                association,
            } => write!(
                f,
                "operation `{operation}` fetches `{association}`, which is not an association of `{entity}`"
            ),
            Self::ParameterCountMismatch {
                operation,
                expected,
                declared,
            } => write!(
                f,
                "operation `{operation}` binds {expected} parameter(s) but declares {declared}"
            ),
            Self::ParameterKindMismatch {
                operation,
                position,
                message,
            } => write!(
                f,
                "operation `{operation}` parameter {position}: {message}"
            ),
            Self::ReturnKindMismatch { operation, message } => {
                write!(f, "operation `{operation}` return kind: {message}")
            }
            Self::UnknownParameter {
                operation,
                parameter,
            } => write!(
                f,
                "operation `{operation}` references undeclared parameter `{parameter}`"
            ),
            Self::UnsupportedDirective { operation, message } => {
                write!(f, "operation `{operation}`: {message}")
            }
        }
    }
}

impl Error for ParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Find,
    Count,
    Delete,
    Update,
}

/// Output of [`parse_operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOperation {
    pub verb: Verb,
    /// `None` when the name carries no `By` part (all rows).
    pub predicate: Option<PredicateChain>,
    pub order: Vec<Order>,
    pub shape: ResultShape,
}

/// Parses a derived operation name against `descriptor`.
pub fn parse_operation(
    name: &str,
    descriptor: &EntityDescriptor,
    params: &[ParamKind],
    returns: ReturnKind,
) -> Result<ParsedOperation, ParseError> {
    let (head, order_part) = match name.find(ORDER_BY) {
        Some(index) => (&name[..index], Some(&name[index + ORDER_BY.len()..])),
        None => (name, None),
    };

    let captures = OPERATION_RE.captures(head).ok_or_else(|| {
        if ["find", "count", "delete", "update"]
            .iter()
            .any(|verb| head.starts_with(verb))
        {
            ParseError::MalformedName(name.to_string())
        } else {
            ParseError::UnknownVerb(name.to_string())
        }
    })?;

    let verb = match &captures[1] {
        "find" => Verb::Find,
        "count" => Verb::Count,
        "delete" => Verb::Delete,
        _ => Verb::Update,
    };
    let shape = infer_shape(name, verb, returns)?;

    let predicate = match captures.get(3) {
        Some(part) => Some(parse_predicate(name, part.as_str(), descriptor, params)?),
        None => {
            if !params.is_empty() {
                return Err(ParseError::ParameterCountMismatch {
                    operation: name.to_string(),
                    expected: 0,
                    declared: params.len(),
                });
            }
            None
        }
    };

    let order = match order_part {
        Some(part) => {
            if verb != Verb::Find {
                return Err(ParseError::UnsupportedDirective {
                    operation: name.to_string(),
                    message: "ordering applies only to find operations".to_string(),
                });
            }
            parse_order(name, part, descriptor)?
        }
        None => Vec::new(),
    };

    Ok(ParsedOperation {
        verb,
        predicate,
        order,
        shape,
    })
}

fn infer_shape(name: &str, verb: Verb, returns: ReturnKind) -> Result<ResultShape, ParseError> {
    let shape = match (verb, returns) {
        (Verb::Find, ReturnKind::Single) => ResultShape::Single,
        (Verb::Find, ReturnKind::List) => ResultShape::List,
        (Verb::Find, ReturnKind::Page) => ResultShape::Page,
        (Verb::Find, ReturnKind::Projection) => ResultShape::Projection,
        (Verb::Count, ReturnKind::Count) => ResultShape::Count,
        (Verb::Delete, ReturnKind::Affected) => ResultShape::Mutation(MutationKind::Delete),
        (Verb::Update, ReturnKind::Affected) => ResultShape::Mutation(MutationKind::Update),
        (verb, returns) => {
            return Err(ParseError::ReturnKindMismatch {
                operation: name.to_string(),
                message: format!("{verb:?} operations cannot return {returns:?}"),
            });
        }
    };
    Ok(shape)
}

fn parse_predicate(
    name: &str,
    part: &str,
    descriptor: &EntityDescriptor,
    params: &[ParamKind],
) -> Result<PredicateChain, ParseError> {
    let segments = split_segments(part, AND);
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(ParseError::MalformedName(name.to_string()));
    }
    if segments.len() != params.len() {
        return Err(ParseError::ParameterCountMismatch {
            operation: name.to_string(),
            expected: segments.len(),
            declared: params.len(),
        });
    }

    let mut clauses = Vec::with_capacity(segments.len());
    for (position, (segment, kind)) in segments.iter().zip(params).enumerate() {
        let (field, keyword) = resolve_segment(segment, descriptor).ok_or_else(|| {
            ParseError::UnknownField {
                operation: name.to_string(),
                entity: descriptor.name().to_string(),
                field: decapitalize(segment),
            }
        })?;

        let comparison = match (keyword, kind) {
            (None, ParamKind::Scalar) => Comparison::Equals,
            (None | Some(Comparison::InSet), ParamKind::Collection) => Comparison::InSet,
            (Some(Comparison::InSet), ParamKind::Scalar) => {
                return Err(ParseError::ParameterKindMismatch {
                    operation: name.to_string(),
                    position,
                    message: format!("`{field}In` needs a collection parameter"),
                });
            }
            (Some(other), ParamKind::Collection) => {
                return Err(ParseError::ParameterKindMismatch {
                    operation: name.to_string(),
                    position,
                    message: format!(
                        "`{}` comparison on `{field}` needs a scalar parameter",
                        other.as_sql()
                    ),
                });
            }
            (Some(other), ParamKind::Scalar) => other,
        };

        clauses.push(PredicateClause {
            field,
            comparison,
            position,
        });
    }

    Ok(PredicateChain::new(clauses))
}

/// Resolves one segment to a field name and optional keyword.
///
/// Keyword suffixes win when the remaining prefix names a field; otherwise
/// the whole segment is tried as a field name (`loggedIn`).
fn resolve_segment(
    segment: &str,
    descriptor: &EntityDescriptor,
) -> Option<(String, Option<Comparison>)> {
    for (keyword, comparison) in KEYWORDS {
        if let Some(prefix) = segment.strip_suffix(keyword) {
            if prefix.is_empty() {
                continue;
            }
            let field = decapitalize(prefix);
            if descriptor.resolve(&field).is_some() {
                return Some((field, Some(*comparison)));
            }
        }
    }

    let field = decapitalize(segment);
    descriptor.resolve(&field).map(|_| (field, None))
}

fn parse_order(
    name: &str,
    part: &str,
    descriptor: &EntityDescriptor,
) -> Result<Vec<Order>, ParseError> {
    let mut orders = Vec::new();
    let mut cursor = 0;

    for captures in ORDER_TERM_RE.captures_iter(part) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if whole.start() != cursor {
            return Err(ParseError::MalformedName(name.to_string()));
        }
        let direction = if &captures[2] == "Desc" {
            Direction::Desc
        } else {
            Direction::Asc
        };
        orders.push(order_term(name, &captures[1], direction, descriptor)?);
        cursor = whole.end();
    }

    let rest = &part[cursor..];
    if !rest.is_empty() {
        orders.push(order_term(name, rest, Direction::Asc, descriptor)?);
    }
    if orders.is_empty() {
        return Err(ParseError::MalformedName(name.to_string()));
    }

    Ok(orders)
}

fn order_term(
    name: &str,
    segment: &str,
    direction: Direction,
    descriptor: &EntityDescriptor,
) -> Result<Order, ParseError> {
    let field = decapitalize(segment);
    if descriptor.resolve(&field).is_none() {
        return Err(ParseError::UnknownField {
            operation: name.to_string(),
            entity: descriptor.name().to_string(),
            field,
        });
    }
    Ok(Order { field, direction })
}

/// Splits on `keyword` only where it is followed by an uppercase letter, so
/// field names such as `brandName` stay intact.
fn split_segments<'a>(source: &'a str, keyword: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut search = 0;

    while let Some(found) = source[search..].find(keyword) {
        let at = search + found;
        let next = at + keyword.len();
        let at_boundary = at > start
            && source[next..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_uppercase());
        if at_boundary {
            parts.push(&source[start..at]);
            start = next;
            search = next;
        } else {
            search = at + 1;
        }
    }

    parts.push(&source[start..]);
    parts
}

fn decapitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
