//! Query plans: the parsed, reusable form of a declared operation.
//!
//! # Responsibility
//! - Hold predicate chains, result shapes, ordering and fetch joins.
//! - Validate call arguments against the declared parameter list.
//!
//! # Invariants
//! - A plan is built once at repository construction and never mutated.
//! - Every field named by a plan exists on its descriptor.
//! - Parameter positions bind strictly by index; clause `n` reads argument
//!   `position`, and callers must pass arguments in declaration order.

use crate::metadata::EntityDescriptor;
use crate::model::page::Order;
use crate::model::value::Arg;
use crate::query::fetch::FetchJoin;
use crate::query::raw::CompiledSql;
use std::sync::Arc;

/// Comparison operator of one predicate clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    InSet,
}

impl Comparison {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::GreaterThan => ">",
            Self::GreaterThanEqual => ">=",
            Self::LessThan => "<",
            Self::InSet => "IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateClause {
    pub field: String,
    pub comparison: Comparison,
    /// Index of the bound argument.
    pub position: usize,
}

/// Clauses joined by `AND`, in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicateChain {
    clauses: Vec<PredicateClause>,
}

impl PredicateChain {
    pub fn new(clauses: Vec<PredicateClause>) -> Self {
        Self { clauses }
    }

    pub fn clauses(&self) -> &[PredicateClause] {
        &self.clauses
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Declared kind of one operation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Scalar,
    /// Set/sequence parameter; a bare field bound to it compares with `IN`.
    Collection,
}

/// Declared return category of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Single,
    List,
    Page,
    Count,
    /// First column of each row.
    Scalars,
    /// Rows mapped into a caller-supplied projection type.
    Projection,
    /// Affected row count of a bulk statement.
    Affected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Update,
    Delete,
}

/// Result shape a plan produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Single,
    List,
    Page,
    Count,
    ScalarList,
    Projection,
    Mutation(MutationKind),
}

impl ResultShape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::List => "list",
            Self::Page => "page",
            Self::Count => "count",
            Self::ScalarList => "scalar_list",
            Self::Projection => "projection",
            Self::Mutation(MutationKind::Update) => "bulk_update",
            Self::Mutation(MutationKind::Delete) => "bulk_delete",
        }
    }

    pub fn is_mutation(self) -> bool {
        matches!(self, Self::Mutation(_))
    }
}

/// How a page query learns whether more pages exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PagingStrategy {
    /// Separate `COUNT(*)` query; total is known.
    #[default]
    Counted,
    /// Over-fetch one row; total stays unknown.
    Windowed,
}

impl PagingStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counted => "counted",
            Self::Windowed => "windowed",
        }
    }
}

/// Whether a bulk statement drops cached entities of its type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    #[default]
    Invalidate,
    /// Explicit opt-out; only for statements known not to touch cached state.
    Retain,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinKind {
    #[default]
    Left,
    Inner,
}

impl JoinKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Left => "LEFT JOIN",
            Self::Inner => "INNER JOIN",
        }
    }
}

/// Associations to resolve in the same statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchDirective {
    joins: Vec<(String, JoinKind)>,
}

impl FetchDirective {
    pub fn new() -> Self {
        Self::default()
    }

    /// Left-joins every named association.
    pub fn left<I, S>(associations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        associations
            .into_iter()
            .fold(Self::new(), |directive, name| {
                directive.join(name, JoinKind::Left)
            })
    }

    /// Adds one association; a repeated name keeps its latest join kind.
    pub fn join(mut self, association: impl Into<String>, kind: JoinKind) -> Self {
        let association = association.into();
        match self.joins.iter_mut().find(|(name, _)| *name == association) {
            Some(existing) => existing.1 = kind,
            None => self.joins.push((association, kind)),
        }
        self
    }

    pub fn joins(&self) -> &[(String, JoinKind)] {
        &self.joins
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }
}

/// Where a plan's statement comes from.
#[derive(Debug, Clone)]
pub enum QuerySource {
    /// Derived from the operation name; `None` selects every row.
    Derived(Option<PredicateChain>),
    Raw {
        query: CompiledSql,
        count_query: Option<CompiledSql>,
        /// The SQL orders its own rows.
        ordered: bool,
    },
}

/// Parsed, executable form of one declared operation.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub operation: String,
    pub descriptor: Arc<EntityDescriptor>,
    pub source: QuerySource,
    pub shape: ResultShape,
    pub params: Vec<ParamKind>,
    pub order: Vec<Order>,
    pub fetch: Vec<FetchJoin>,
    pub paging: PagingStrategy,
    pub cache: CachePolicy,
}

impl QueryPlan {
    pub fn entity(&self) -> &str {
        self.descriptor.name()
    }

    pub fn predicate(&self) -> Option<&PredicateChain> {
        match &self.source {
            QuerySource::Derived(predicate) => predicate.as_ref(),
            QuerySource::Raw { .. } => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.source, QuerySource::Raw { .. })
    }

    /// Whether rows arrive in a defined order without any request sort.
    pub fn is_presorted(&self) -> bool {
        matches!(self.source, QuerySource::Raw { ordered: true, .. })
    }

    /// Checks argument count and scalar/collection kinds.
    pub fn check_args(&self, args: &[Arg]) -> Result<(), String> {
        if args.len() != self.params.len() {
            return Err(format!(
                "expected {} argument(s), got {}",
                self.params.len(),
                args.len()
            ));
        }

        for (index, (arg, kind)) in args.iter().zip(&self.params).enumerate() {
            match (kind, arg) {
                (ParamKind::Scalar, Arg::Scalar(_)) | (ParamKind::Collection, Arg::List(_)) => {}
                (ParamKind::Scalar, Arg::List(_)) => {
                    return Err(format!("argument {index} must be a scalar value"));
                }
                (ParamKind::Collection, Arg::Scalar(_)) => {
                    return Err(format!("argument {index} must be a collection"));
                }
            }
        }

        Ok(())
    }
}
