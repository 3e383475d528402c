//! Turns caller-facing queries and options into what the transport executes.
//!
//! The interesting decision here is pushdown: a [`Query`] whose operators are all in the
//! transport's [`Capabilities`] is rendered into a Mango selector; anything else is
//! kept as a residual evaluated locally by the [`Matcher`](crate::matcher::Matcher).

use bson::Bson;
use std::collections::HashSet;

use crate::{
    codec::{ID_KEY, REV_KEY, internal_field_name, storage_value},
    config::RevisionMode,
    error::{WebDbError, WebDbResult},
    query::{
        FieldSpec, OperatorKind, Predicate, Query, QueryVisitor, Sort, SortDirection,
        SortSpec, is_truthy,
    },
};

/// The operator kinds a transport evaluates natively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    operators: HashSet<OperatorKind>,
}

impl Capabilities {
    /// Every operator, including the logical ones.
    pub fn all() -> Self {
        let mut operators: HashSet<_> = OperatorKind::FIELD_OPERATORS.into_iter().collect();
        operators.extend([OperatorKind::And, OperatorKind::Or, OperatorKind::Not]);
        Capabilities { operators }
    }

    /// Nothing is pushed down; every non-empty query is evaluated locally.
    pub fn none() -> Self {
        Capabilities { operators: HashSet::new() }
    }

    /// Only the listed operators are pushed down. Add `And`/`Or`/`Not` explicitly if
    /// the transport handles logical clauses.
    pub fn only(operators: impl IntoIterator<Item = OperatorKind>) -> Self {
        Capabilities { operators: operators.into_iter().collect() }
    }

    /// `true` if the transport evaluates `kind` natively.
    pub fn supports(&self, kind: OperatorKind) -> bool {
        self.operators.contains(&kind)
    }

    /// `true` if every operator in `query` is supported. Unrecognized operators never are.
    pub fn covers(&self, query: &Query) -> bool {
        match query.operator_kinds() {
            Some(kinds) => kinds.iter().all(|kind| self.supports(*kind)),
            None => false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::all()
    }
}

/// Options accepted by `list`, `find` and `get`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub skip: usize,
    pub fields: Option<FieldSpec>,
}

impl FindOptions {
    pub fn new() -> Self {
        FindOptions::default()
    }

    pub fn sort(mut self, sort: impl Into<SortSpec>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn fields(mut self, fields: impl Into<FieldSpec>) -> Self {
        self.fields = Some(fields.into());
        self
    }
}

/// Normalizes a sort specification into ordered sort keys.
///
/// Positive (and zero) numbers and `"asc"` sort ascending, negative numbers and
/// `"desc"` descending. The public `id` becomes `_id`.
///
/// # Errors
///
/// Returns [`WebDbError::InvalidQuery`] for any other direction value.
pub fn normalize_sort(spec: &SortSpec) -> WebDbResult<Vec<Sort>> {
    spec.entries
        .iter()
        .map(|(field, direction)| {
            let direction = match direction {
                Bson::Int32(n) if *n < 0 => SortDirection::Desc,
                Bson::Int64(n) if *n < 0 => SortDirection::Desc,
                Bson::Double(n) if *n < 0.0 => SortDirection::Desc,
                Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => SortDirection::Asc,
                Bson::String(s) if s.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                Bson::String(s) if s.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                other => {
                    return Err(WebDbError::InvalidQuery(format!(
                        "invalid sort direction for {field}: {other}"
                    )));
                }
            };

            Ok(Sort {
                field: internal_field_name(field).to_string(),
                direction,
            })
        })
        .collect()
}

/// Normalizes a projection into the stored field names to request.
///
/// Returns `None` (no projection) when no field is flagged truthy. Otherwise `_id` is
/// added unless `id` was explicitly flagged falsy, and `_rev` is added when revisions
/// are exposed.
pub fn normalize_fields(spec: &FieldSpec, revisions: RevisionMode) -> Option<Vec<String>> {
    let mut included: Vec<String> = Vec::new();
    let mut exclude_id = false;

    for (field, flag) in &spec.entries {
        let field = internal_field_name(field);
        if is_truthy(flag) {
            if !included.iter().any(|f| f == field) {
                included.push(field.to_string());
            }
        } else if field == ID_KEY {
            exclude_id = true;
        }
    }

    if included.is_empty() {
        return None;
    }

    if exclude_id {
        included.retain(|f| f != ID_KEY);
    } else if !included.iter().any(|f| f == ID_KEY) {
        included.push(ID_KEY.to_string());
    }

    if revisions.exposes() && !included.iter().any(|f| f == REV_KEY) {
        included.push(REV_KEY.to_string());
    }

    Some(included)
}

/// Where a query is evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Selector handed to the transport.
    pub selector: bson::Document,
    /// Query evaluated locally over what the transport returns, if any.
    pub residual: Option<Query>,
}

impl QueryPlan {
    pub fn is_local(&self) -> bool {
        self.residual.is_some()
    }
}

/// Decides between pushdown and local evaluation.
///
/// Pushdown is all-or-nothing: a query that uses even one unsupported operator is
/// evaluated entirely in memory over an unfiltered scan.
///
/// # Errors
///
/// Returns [`WebDbError::InvalidQuery`] if the query cannot be rendered as a selector.
pub fn plan_query(query: &Query, capabilities: &Capabilities) -> WebDbResult<QueryPlan> {
    if query.is_empty() {
        return Ok(QueryPlan { selector: bson::Document::new(), residual: None });
    }

    if capabilities.covers(query) {
        Ok(QueryPlan { selector: to_selector(query)?, residual: None })
    } else {
        Ok(QueryPlan { selector: bson::Document::new(), residual: Some(query.clone()) })
    }
}

/// Renders a query as a Mango selector.
///
/// # Errors
///
/// Returns [`WebDbError::InvalidQuery`] if the query contains an unrecognized operator.
pub fn to_selector(query: &Query) -> WebDbResult<bson::Document> {
    SelectorWriter.visit_query(query)
}

struct SelectorWriter;

impl SelectorWriter {
    fn list(&mut self, queries: &[Query]) -> WebDbResult<Bson> {
        queries
            .iter()
            .map(|query| self.visit_query(query).map(Bson::Document))
            .collect::<WebDbResult<Vec<_>>>()
            .map(Bson::Array)
    }
}

impl QueryVisitor for SelectorWriter {
    type Output = bson::Document;
    type Error = WebDbError;

    fn visit_query(&mut self, query: &Query) -> WebDbResult<bson::Document> {
        let rendered = query
            .clauses()
            .iter()
            .map(|clause| self.visit_clause(clause))
            .collect::<WebDbResult<Vec<_>>>()?;

        // Merge single-key selectors; fall back to $and when a key repeats.
        let mut merged = bson::Document::new();
        let mut repeated = false;
        for selector in &rendered {
            for (key, value) in selector {
                if merged.contains_key(key) {
                    repeated = true;
                }
                merged.insert(key.clone(), value.clone());
            }
        }

        if repeated {
            let parts = rendered.into_iter().map(Bson::Document).collect::<Vec<_>>();
            let mut conjunction = bson::Document::new();
            conjunction.insert(OperatorKind::And.key(), parts);
            return Ok(conjunction);
        }

        Ok(merged)
    }

    fn visit_and(&mut self, queries: &[Query]) -> WebDbResult<bson::Document> {
        let mut selector = bson::Document::new();
        selector.insert(OperatorKind::And.key(), self.list(queries)?);
        Ok(selector)
    }

    fn visit_or(&mut self, queries: &[Query]) -> WebDbResult<bson::Document> {
        let mut selector = bson::Document::new();
        selector.insert(OperatorKind::Or.key(), self.list(queries)?);
        Ok(selector)
    }

    fn visit_not(&mut self, query: &Query) -> WebDbResult<bson::Document> {
        let mut selector = bson::Document::new();
        selector.insert(OperatorKind::Not.key(), self.visit_query(query)?);
        Ok(selector)
    }

    fn visit_field(&mut self, path: &str, predicate: &Predicate) -> WebDbResult<bson::Document> {
        let value = match predicate {
            Predicate::Literal(Bson::Document(literal)) => {
                let mut eq = bson::Document::new();
                eq.insert(OperatorKind::Eq.key(), storage_value(Bson::Document(literal.clone())));
                Bson::Document(eq)
            }
            Predicate::Literal(value) => storage_value(value.clone()),
            Predicate::Operator(kind, operand) => {
                let mut op = bson::Document::new();
                op.insert(kind.key(), storage_value(operand.clone()));
                Bson::Document(op)
            }
            Predicate::Unrecognized(name, _) => {
                return Err(WebDbError::InvalidQuery(format!(
                    "operator {name} cannot be pushed down"
                )));
            }
        };

        let mut selector = bson::Document::new();
        selector.insert(internal_field_name(path), value);
        Ok(selector)
    }
}
