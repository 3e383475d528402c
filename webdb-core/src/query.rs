//! Query construction for collection operations.
//!
//! A [`Query`] is a conjunction of [`Clause`]s. A field clause pairs a field path with
//! a [`Predicate`]: either a plain literal (equality) or an operator with its operand.
//! `$and`, `$or` and `$not` nest whole sub-queries.
//!
//! Queries are built fluently:
//!
//! ```ignore
//! use webdb_core::query::{Filter, Query};
//!
//! let query = Query::builder()
//!     .filter(Filter::is("kind", "invoice"))
//!     .filter(Filter::gte("total", 100))
//!     .build();
//! ```
//!
//! or parsed from a Mango-style selector document:
//!
//! ```ignore
//! let query = Query::from_document(&doc! { "total": { "$gte": 100 } })?;
//! ```

use bson::Bson;
use std::{collections::HashSet, convert::Infallible};

use crate::error::{WebDbError, WebDbResult};

/// Operator kinds understood by the predicate matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Exists,
    Regex,
    And,
    Or,
    Not,
}

impl OperatorKind {
    /// Field-level operators in dispatch priority order.
    pub const FIELD_OPERATORS: [OperatorKind; 10] = [
        OperatorKind::Eq,
        OperatorKind::Ne,
        OperatorKind::Gt,
        OperatorKind::Gte,
        OperatorKind::Lt,
        OperatorKind::Lte,
        OperatorKind::In,
        OperatorKind::Nin,
        OperatorKind::Exists,
        OperatorKind::Regex,
    ];

    /// Returns the selector key for this operator (e.g. `"$gte"`).
    pub fn key(&self) -> &'static str {
        match self {
            OperatorKind::Eq => "$eq",
            OperatorKind::Ne => "$ne",
            OperatorKind::Gt => "$gt",
            OperatorKind::Gte => "$gte",
            OperatorKind::Lt => "$lt",
            OperatorKind::Lte => "$lte",
            OperatorKind::In => "$in",
            OperatorKind::Nin => "$nin",
            OperatorKind::Exists => "$exists",
            OperatorKind::Regex => "$regex",
            OperatorKind::And => "$and",
            OperatorKind::Or => "$or",
            OperatorKind::Not => "$not",
        }
    }
}

/// What a single field is tested against.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Plain value: the field must equal it.
    Literal(Bson),
    /// A recognized operator and its operand.
    Operator(OperatorKind, Bson),
    /// An operator key nobody understands. Never matches.
    Unrecognized(String, Bson),
}

impl Predicate {
    /// The operator kind a transport would need to evaluate this predicate natively.
    pub fn kind(&self) -> Option<OperatorKind> {
        match self {
            Predicate::Literal(_) => Some(OperatorKind::Eq),
            Predicate::Operator(kind, _) => Some(*kind),
            Predicate::Unrecognized(..) => None,
        }
    }
}

/// One conjunct of a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Tests one field.
    Field {
        /// Field name or dotted path. `id` designates the document identifier.
        path: String,
        predicate: Predicate,
    },
    /// All sub-queries must match.
    And(Vec<Query>),
    /// At least one sub-query must match.
    Or(Vec<Query>),
    /// The sub-query must not match.
    Not(Box<Query>),
}

/// A conjunction of clauses. The empty query matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    /// Creates a query matching every document.
    pub fn all() -> Self {
        Query { clauses: Vec::new() }
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Parses a Mango-style selector document.
    ///
    /// Operator objects are values whose keys all start with `$`; any other value is a
    /// literal. Unknown operators parse into [`Predicate::Unrecognized`] and never match.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::InvalidQuery`] when `$and`/`$or` is not a list of documents
    /// or `$not` is not a document.
    pub fn from_document(document: &bson::Document) -> WebDbResult<Self> {
        let mut clauses = Vec::with_capacity(document.len());

        for (key, value) in document {
            let clause = match key.as_str() {
                "$and" => Clause::And(parse_query_list(key, value)?),
                "$or" => Clause::Or(parse_query_list(key, value)?),
                "$not" => match value {
                    Bson::Document(inner) => Clause::Not(Box::new(Query::from_document(inner)?)),
                    _ => {
                        return Err(WebDbError::InvalidQuery(
                            "$not expects a selector document".to_string(),
                        ));
                    }
                },
                _ => Clause::Field {
                    path: key.clone(),
                    predicate: parse_predicate(value),
                },
            };

            clauses.push(clause);
        }

        Ok(Query { clauses })
    }

    /// Returns the clauses of this query.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Returns `true` if this query matches every document.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Appends a clause.
    pub fn and(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Every operator kind used anywhere in this query, or `None` if the query
    /// contains an unrecognized operator.
    pub fn operator_kinds(&self) -> Option<HashSet<OperatorKind>> {
        let mut collector = OperatorCollector::default();
        match collector.visit_query(self) {
            Ok(()) => {}
            Err(never) => match never {},
        }

        if collector.unrecognized {
            None
        } else {
            Some(collector.kinds)
        }
    }

    /// If this query is exactly `{id: "<string>"}`, returns that identifier.
    pub fn identifier_lookup(&self) -> Option<&str> {
        match self.clauses.as_slice() {
            [Clause::Field { path, predicate }] if path == "id" || path == "_id" => match predicate {
                Predicate::Literal(Bson::String(id))
                | Predicate::Operator(OperatorKind::Eq, Bson::String(id)) => Some(id),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<Clause> for Query {
    fn from(clause: Clause) -> Self {
        Query { clauses: vec![clause] }
    }
}

impl From<Vec<Clause>> for Query {
    fn from(clauses: Vec<Clause>) -> Self {
        Query { clauses }
    }
}

impl TryFrom<bson::Document> for Query {
    type Error = WebDbError;

    fn try_from(document: bson::Document) -> WebDbResult<Self> {
        Query::from_document(&document)
    }
}

fn parse_query_list(key: &str, value: &Bson) -> WebDbResult<Vec<Query>> {
    let items = value
        .as_array()
        .ok_or_else(|| WebDbError::InvalidQuery(format!("{key} expects a list of selectors")))?;

    items
        .iter()
        .map(|item| match item {
            Bson::Document(inner) => Query::from_document(inner),
            _ => Err(WebDbError::InvalidQuery(format!(
                "{key} expects a list of selectors"
            ))),
        })
        .collect()
}

fn parse_predicate(value: &Bson) -> Predicate {
    let operators = match value {
        Bson::Document(inner) if !inner.is_empty() && inner.keys().all(|k| k.starts_with('$')) => {
            inner
        }
        _ => return Predicate::Literal(value.clone()),
    };

    for kind in OperatorKind::FIELD_OPERATORS {
        if let Some(operand) = operators.get(kind.key()) {
            return Predicate::Operator(kind, operand.clone());
        }
    }

    match operators.iter().next() {
        Some((name, operand)) => Predicate::Unrecognized(name.clone(), operand.clone()),
        None => Predicate::Literal(value.clone()),
    }
}

/// JavaScript-style truthiness, used for `$exists` operands and projection flags.
pub(crate) fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(flag) => *flag,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0 && !n.is_nan(),
        Bson::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Helper for constructing clauses.
///
/// ```ignore
/// use webdb_core::query::Filter;
///
/// let clause = Filter::is_in("status", vec!["open", "pending"]);
/// ```
pub struct Filter;

impl Filter {
    /// Plain literal match: the field must equal `value`.
    pub fn is(field: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Filter::field(field, Predicate::Literal(value.into()))
    }

    /// Creates an `$eq` filter expression.
    ///
    /// Matches documents where the field equals the specified value. Numbers compare
    /// by value across widths.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Filter::op(field, OperatorKind::Eq, value)
    }

    /// Creates a `$ne` filter expression.
    ///
    /// Matches documents where the field is absent or differs from the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Filter::op(field, OperatorKind::Ne, value)
    }

    /// Creates a greater-than filter expression.
    ///
    /// Matches documents where the field is greater than the specified value. Values of
    /// different types never compare.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Filter::op(field, OperatorKind::Gt, value)
    }

    /// Creates a greater-than-or-equal filter expression.
    ///
    /// Matches documents where the field is greater than or equal to the specified value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Filter::op(field, OperatorKind::Gte, value)
    }

    /// Creates a less-than filter expression.
    ///
    /// Matches documents where the field is less than the specified value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Filter::op(field, OperatorKind::Lt, value)
    }

    /// Creates a less-than-or-equal filter expression.
    ///
    /// Matches documents where the field is less than or equal to the specified value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Filter::op(field, OperatorKind::Lte, value)
    }

    /// The field must equal one of `values`.
    pub fn is_in<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Clause {
        Filter::op(field, OperatorKind::In, Bson::Array(values.into_iter().map(Into::into).collect()))
    }

    /// The field must equal none of `values`.
    pub fn not_in<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Clause {
        Filter::op(field, OperatorKind::Nin, Bson::Array(values.into_iter().map(Into::into).collect()))
    }

    /// The field must be present (an explicit null counts as present).
    pub fn exists(field: impl Into<String>) -> Clause {
        Filter::op(field, OperatorKind::Exists, true)
    }

    /// The field must be absent.
    pub fn not_exists(field: impl Into<String>) -> Clause {
        Filter::op(field, OperatorKind::Exists, false)
    }

    /// The field must be a string matching `pattern`.
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Clause {
        Filter::op(field, OperatorKind::Regex, Bson::String(pattern.into()))
    }

    /// Creates a logical AND filter expression.
    ///
    /// Matches documents that satisfy every one of the given queries.
    pub fn and(queries: impl IntoIterator<Item = impl Into<Query>>) -> Clause {
        Clause::And(queries.into_iter().map(Into::into).collect())
    }

    /// Creates a logical OR filter expression.
    ///
    /// Matches documents that satisfy at least one of the given queries.
    pub fn or(queries: impl IntoIterator<Item = impl Into<Query>>) -> Clause {
        Clause::Or(queries.into_iter().map(Into::into).collect())
    }

    /// Creates a logical NOT filter expression.
    ///
    /// Matches documents that do not satisfy the given query.
    pub fn not(query: impl Into<Query>) -> Clause {
        Clause::Not(Box::new(query.into()))
    }

    fn op(field: impl Into<String>, kind: OperatorKind, operand: impl Into<Bson>) -> Clause {
        Filter::field(field, Predicate::Operator(kind, operand.into()))
    }

    fn field(field: impl Into<String>, predicate: Predicate) -> Clause {
        Clause::Field { path: field.into(), predicate }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Adds a clause; all clauses must match.
    pub fn filter(mut self, clause: Clause) -> Self {
        self.query.clauses.push(clause);
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// The direction keyword used in transport sort specifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// A normalized sort key: which field and in which direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// Caller-facing sort specification: an ordered list of field → direction value.
///
/// Direction values follow the usual conventions: a positive number is ascending,
/// a negative number descending, and the strings `"asc"`/`"desc"` are accepted as
/// well. Earlier entries take precedence; later ones break ties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    pub(crate) entries: Vec<(String, Bson)>,
}

impl SortSpec {
    pub fn new() -> Self {
        SortSpec::default()
    }

    pub fn asc(mut self, field: impl Into<String>) -> Self {
        self.entries.push((field.into(), Bson::Int32(1)));
        self
    }

    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.entries.push((field.into(), Bson::Int32(-1)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<bson::Document> for SortSpec {
    fn from(document: bson::Document) -> Self {
        SortSpec { entries: document.into_iter().collect() }
    }
}

/// Caller-facing projection: field name → flag (truthy includes the field).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSpec {
    pub(crate) entries: Vec<(String, Bson)>,
}

impl FieldSpec {
    pub fn new() -> Self {
        FieldSpec::default()
    }

    pub fn include(mut self, field: impl Into<String>) -> Self {
        self.entries.push((field.into(), Bson::Boolean(true)));
        self
    }

    /// Only meaningful for `id`: suppresses the otherwise forced identifier.
    pub fn exclude(mut self, field: impl Into<String>) -> Self {
        self.entries.push((field.into(), Bson::Boolean(false)));
        self
    }
}

impl From<bson::Document> for FieldSpec {
    fn from(document: bson::Document) -> Self {
        FieldSpec { entries: document.into_iter().collect() }
    }
}

impl<const N: usize> From<[&str; N]> for FieldSpec {
    fn from(fields: [&str; N]) -> Self {
        fields
            .into_iter()
            .fold(FieldSpec::new(), |spec, field| spec.include(field))
    }
}

/// Walks a [`Query`]. Implemented by the in-memory matcher, the selector renderer
/// and the operator collector.
pub trait QueryVisitor {
    type Output;
    type Error: Into<WebDbError>;

    /// Visits a whole query (the implicit conjunction of its clauses).
    fn visit_query(&mut self, query: &Query) -> Result<Self::Output, Self::Error>;
    fn visit_and(&mut self, queries: &[Query]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, queries: &[Query]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, query: &Query) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        path: &str,
        predicate: &Predicate,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_clause(&mut self, clause: &Clause) -> Result<Self::Output, Self::Error> {
        match clause {
            Clause::Field { path, predicate } => self.visit_field(path, predicate),
            Clause::And(queries) => self.visit_and(queries),
            Clause::Or(queries) => self.visit_or(queries),
            Clause::Not(query) => self.visit_not(query),
        }
    }
}

impl From<Infallible> for WebDbError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

#[derive(Default)]
struct OperatorCollector {
    kinds: HashSet<OperatorKind>,
    unrecognized: bool,
}

impl QueryVisitor for OperatorCollector {
    type Output = ();
    type Error = Infallible;

    fn visit_query(&mut self, query: &Query) -> Result<(), Infallible> {
        for clause in query.clauses() {
            self.visit_clause(clause)?;
        }
        Ok(())
    }

    fn visit_and(&mut self, queries: &[Query]) -> Result<(), Infallible> {
        self.kinds.insert(OperatorKind::And);
        queries.iter().try_for_each(|q| self.visit_query(q))
    }

    fn visit_or(&mut self, queries: &[Query]) -> Result<(), Infallible> {
        self.kinds.insert(OperatorKind::Or);
        queries.iter().try_for_each(|q| self.visit_query(q))
    }

    fn visit_not(&mut self, query: &Query) -> Result<(), Infallible> {
        self.kinds.insert(OperatorKind::Not);
        self.visit_query(query)
    }

    fn visit_field(&mut self, _path: &str, predicate: &Predicate) -> Result<(), Infallible> {
        match predicate.kind() {
            Some(kind) => {
                self.kinds.insert(kind);
            }
            None => self.unrecognized = true,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn parses_literals_and_operators() {
        let query = Query::from_document(&doc! {
            "name": "a",
            "n": { "$gt": 1 },
            "nested": { "x": 1 },
        })
        .unwrap();

        assert_eq!(
            query.clauses(),
            &[
                Filter::is("name", "a"),
                Filter::gt("n", 1),
                Filter::is("nested", doc! { "x": 1 }),
            ]
        );
    }

    #[test]
    fn operator_priority_picks_first_recognized_key() {
        let query = Query::from_document(&doc! { "n": { "$lt": 5, "$eq": 3 } }).unwrap();
        assert_eq!(query.clauses(), &[Filter::eq("n", 3)]);
    }

    #[test]
    fn unknown_operator_is_kept_as_unrecognized() {
        let query = Query::from_document(&doc! { "n": { "$near": 1 } }).unwrap();
        assert!(matches!(
            &query.clauses()[0],
            Clause::Field { predicate: Predicate::Unrecognized(name, _), .. } if name == "$near"
        ));
        assert!(query.operator_kinds().is_none());
    }

    #[test]
    fn malformed_logical_operands_are_invalid() {
        assert!(matches!(
            Query::from_document(&doc! { "$or": { "a": 1 } }),
            Err(WebDbError::InvalidQuery(_))
        ));
        assert!(matches!(
            Query::from_document(&doc! { "$and": [1, 2] }),
            Err(WebDbError::InvalidQuery(_))
        ));
        assert!(matches!(
            Query::from_document(&doc! { "$not": [] }),
            Err(WebDbError::InvalidQuery(_))
        ));
    }

    #[test]
    fn collects_operator_kinds_recursively() {
        let query = Query::from_document(&doc! {
            "$or": [ { "a": 1 }, { "b": { "$regex": "^x" } } ],
            "$not": { "c": { "$in": [1, 2] } },
        })
        .unwrap();

        let kinds = query.operator_kinds().unwrap();
        for kind in [
            OperatorKind::Or,
            OperatorKind::Eq,
            OperatorKind::Regex,
            OperatorKind::Not,
            OperatorKind::In,
        ] {
            assert!(kinds.contains(&kind), "missing {kind:?}");
        }
        assert!(!kinds.contains(&OperatorKind::And));
    }

    #[test]
    fn identifier_lookup_only_for_single_id_equality() {
        let by_id = Query::from(Filter::is("id", "x"));
        assert_eq!(by_id.identifier_lookup(), Some("x"));

        let with_more = Query::builder()
            .filter(Filter::is("id", "x"))
            .filter(Filter::is("n", 1))
            .build();
        assert_eq!(with_more.identifier_lookup(), None);
        assert_eq!(Query::from(Filter::gt("id", "x")).identifier_lookup(), None);
    }
}
