//! Operation declarations and their compiled query plans.
//!
//! # Responsibility
//! - Describe repository operations (derived from the name or raw SQL).
//! - Compile each declaration once into a [`QueryPlan`].
//!
//! # Invariants
//! - Plans are validated against the registry at compile time; a plan that
//!   compiles never names an unknown field or association.
//! - Fetch directives are accepted only on derived, row-returning plans.
//!
//! # See also
//! - `repo::composition` for where plans are built and cached.

pub mod fetch;
pub mod parser;
pub mod plan;
pub mod raw;
pub(crate) mod sql;

use crate::metadata::registry::{EntityRegistry, RegistryError};
use crate::metadata::EntityDescriptor;
use fetch::resolve_fetch;
use parser::{parse_operation, ParseError};
use plan::{
    CachePolicy, FetchDirective, MutationKind, PagingStrategy, ParamKind, QueryPlan,
    QuerySource, ResultShape, ReturnKind,
};
use raw::CompiledSql;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Failure to compile a declaration into a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    Parse(ParseError),
    Registry(RegistryError),
}

impl Display for PlanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PlanError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Registry(err) => Some(err),
        }
    }
}

impl From<ParseError> for PlanError {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

impl From<RegistryError> for PlanError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParamDecl {
    kind: ParamKind,
    name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawDecl {
    sql: String,
    count_sql: Option<String>,
    ordered: bool,
}

/// Declared repository operation.
///
/// ```
/// use repokit_core::{Declaration, ReturnKind};
///
/// let by_age = Declaration::derived("findByAge")
///     .param()
///     .returns(ReturnKind::Page);
/// assert_eq!(by_age.name(), "findByAge");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    name: String,
    raw: Option<RawDecl>,
    params: Vec<ParamDecl>,
    returns: ReturnKind,
    fetch: FetchDirective,
    paging: PagingStrategy,
    cache: CachePolicy,
}

impl Declaration {
    /// Operation whose query is derived from `name`. Returns a list unless
    /// [`Declaration::returns`] says otherwise.
    pub fn derived(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw: None,
            params: Vec::new(),
            returns: ReturnKind::List,
            fetch: FetchDirective::default(),
            paging: PagingStrategy::default(),
            cache: CachePolicy::default(),
        }
    }

    /// Operation backed by caller-supplied SQL.
    pub fn raw(name: impl Into<String>, sql: impl Into<String>) -> Self {
        let mut declaration = Self::derived(name);
        declaration.raw = Some(RawDecl {
            sql: sql.into(),
            count_sql: None,
            ordered: false,
        });
        declaration
    }

    /// Appends an unnamed scalar parameter.
    pub fn param(self) -> Self {
        self.push_param(ParamKind::Scalar, None)
    }

    /// Appends a scalar parameter addressable as `:name` in raw SQL.
    pub fn named_param(self, name: impl Into<String>) -> Self {
        self.push_param(ParamKind::Scalar, Some(name.into()))
    }

    /// Appends an unnamed collection parameter.
    pub fn collection(self) -> Self {
        self.push_param(ParamKind::Collection, None)
    }

    pub fn named_collection(self, name: impl Into<String>) -> Self {
        self.push_param(ParamKind::Collection, Some(name.into()))
    }

    pub fn returns(mut self, returns: ReturnKind) -> Self {
        self.returns = returns;
        self
    }

    pub fn fetch(mut self, directive: FetchDirective) -> Self {
        self.fetch = directive;
        self
    }

    pub fn paging(mut self, strategy: PagingStrategy) -> Self {
        self.paging = strategy;
        self
    }

    /// Count statement for raw page queries. Ignored on derived operations.
    pub fn count_query(mut self, sql: impl Into<String>) -> Self {
        if let Some(raw) = self.raw.as_mut() {
            raw.count_sql = Some(sql.into());
        }
        self
    }

    /// Marks raw SQL as carrying its own `ORDER BY`, so unsorted page
    /// requests window it as written. A sorted request still re-orders the
    /// result by its own terms. Ignored on derived operations, which order
    /// through `OrderBy` in the name.
    pub fn ordered(mut self) -> Self {
        if let Some(raw) = self.raw.as_mut() {
            raw.ordered = true;
        }
        self
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_raw(&self) -> bool {
        self.raw.is_some()
    }

    fn push_param(mut self, kind: ParamKind, name: Option<String>) -> Self {
        self.params.push(ParamDecl { kind, name });
        self
    }

    fn param_kinds(&self) -> Vec<ParamKind> {
        self.params.iter().map(|param| param.kind).collect()
    }

    /// Compiles this declaration against `descriptor`.
    pub fn plan(
        &self,
        descriptor: Arc<EntityDescriptor>,
        registry: &EntityRegistry,
    ) -> Result<QueryPlan, PlanError> {
        let params = self.param_kinds();

        let (source, shape, order) = match &self.raw {
            None => {
                let parsed = parse_operation(&self.name, &descriptor, &params, self.returns)?;
                (
                    QuerySource::Derived(parsed.predicate),
                    parsed.shape,
                    parsed.order,
                )
            }
            Some(raw) => {
                let names: Vec<Option<String>> =
                    self.params.iter().map(|param| param.name.clone()).collect();
                let query = CompiledSql::compile(&self.name, &raw.sql, &names)?;
                let count_query = raw
                    .count_sql
                    .as_deref()
                    .map(|sql| CompiledSql::compile(&self.name, sql, &names))
                    .transpose()?;
                (
                    QuerySource::Raw {
                        query,
                        count_query,
                        ordered: raw.ordered,
                    },
                    raw_shape(self.returns, &raw.sql),
                    Vec::new(),
                )
            }
        };

        let fetch = if self.fetch.is_empty() {
            Vec::new()
        } else {
            self.check_fetchable(shape)?;
            resolve_fetch(&self.name, &descriptor, &self.fetch, registry)?
        };

        Ok(QueryPlan {
            operation: self.name.clone(),
            descriptor,
            source,
            shape,
            params,
            order,
            fetch,
            paging: self.paging,
            cache: self.cache,
        })
    }

    fn check_fetchable(&self, shape: ResultShape) -> Result<(), ParseError> {
        let message = if self.raw.is_some() {
            Some("fetch directives cannot rewrite raw queries")
        } else {
            match shape {
                ResultShape::Count => Some("count queries never fetch associations"),
                ResultShape::Mutation(_) => Some("bulk statements never fetch associations"),
                ResultShape::ScalarList => Some("scalar queries never fetch associations"),
                _ => None,
            }
        };

        match message {
            Some(message) => Err(ParseError::UnsupportedDirective {
                operation: self.name.clone(),
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn raw_shape(returns: ReturnKind, sql: &str) -> ResultShape {
    match returns {
        ReturnKind::Single => ResultShape::Single,
        ReturnKind::List => ResultShape::List,
        ReturnKind::Page => ResultShape::Page,
        ReturnKind::Count => ResultShape::Count,
        ReturnKind::Scalars => ResultShape::ScalarList,
        ReturnKind::Projection => ResultShape::Projection,
        ReturnKind::Affected => {
            let statement = sql.trim_start();
            let is_delete = statement
                .get(..6)
                .is_some_and(|verb| verb.eq_ignore_ascii_case("delete"));
            if is_delete {
                ResultShape::Mutation(MutationKind::Delete)
            } else {
                ResultShape::Mutation(MutationKind::Update)
            }
        }
    }
}
