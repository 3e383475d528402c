//! In-memory predicate evaluation.
//!
//! The [`Matcher`] decides whether a stored document satisfies a [`Query`]. Collections
//! use it when the transport cannot evaluate a query natively, and the in-memory
//! transport uses it to implement `find`.

use bson::Bson;
use regex::{Regex, RegexBuilder};
use std::{cmp::Ordering, collections::HashMap, convert::Infallible};

use crate::{
    codec::internal_field_name,
    query::{OperatorKind, Predicate, Query, QueryVisitor, is_truthy},
};

/// Comparable view of a BSON value.
///
/// Integers of every width (and timestamps, as epoch millis) compare exactly as `i64`.
/// Doubles compare with integers by value, so `Int32(1) == Double(1.0)` but
/// `Int64(2^53 + 1) != Double(2^53)` and `String("1") != Int32(1)`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Number(f64),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Binary, object ids and other opaque values: equal only to an identical value.
    Opaque(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Int(i64::from(*value)),
            Bson::Int64(value) => Comparable::Int(*value),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::Int(value.timestamp_millis()),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>(),
            ),
            other => Comparable::Opaque(other),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Int(_) | Comparable::Number(_), _) => {
                compare_numbers(self, other) == Some(Ordering::Equal)
            }
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Opaque(a), Comparable::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Int(_) | Comparable::Number(_), _) => compare_numbers(self, other),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Orders two numeric values without losing integer precision. `None` for NaN or a
/// non-numeric operand.
fn compare_numbers(left: &Comparable<'_>, right: &Comparable<'_>) -> Option<Ordering> {
    match (left, right) {
        (Comparable::Int(a), Comparable::Int(b)) => Some(a.cmp(b)),
        (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
        (Comparable::Int(a), Comparable::Number(b)) => int_cmp_double(*a, *b),
        (Comparable::Number(a), Comparable::Int(b)) => int_cmp_double(*b, *a).map(Ordering::reverse),
        _ => None,
    }
}

fn int_cmp_double(int: i64, double: f64) -> Option<Ordering> {
    // 2^63 is exactly representable; every i64 lies in [-2^63, 2^63).
    const BOUND: f64 = 9_223_372_036_854_775_808.0;

    if double.is_nan() {
        return None;
    }
    if double >= BOUND {
        return Some(Ordering::Less);
    }
    if double < -BOUND {
        return Some(Ordering::Greater);
    }

    let whole = double.trunc();
    let by_whole = int.cmp(&(whole as i64));
    if by_whole != Ordering::Equal {
        return Some(by_whole);
    }
    0.0_f64.partial_cmp(&(double - whole))
}

fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Resolves a field path against a stored document.
///
/// The exact key wins; otherwise a dotted path descends into nested documents. The
/// public name `id` resolves to `_id`.
pub fn lookup<'a>(document: &'a bson::Document, path: &str) -> Option<&'a Bson> {
    let path = internal_field_name(path);
    if let Some(value) = document.get(path) {
        return Some(value);
    }
    if !path.contains('.') {
        return None;
    }

    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

fn collation_rank(value: Option<&Bson>) -> u8 {
    match value {
        None => 0,
        Some(Bson::Null | Bson::Undefined) => 1,
        Some(Bson::Boolean(_)) => 2,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::DateTime(_)) => 3,
        Some(Bson::String(_)) => 4,
        Some(Bson::Array(_)) => 5,
        Some(Bson::Document(_)) => 6,
        Some(_) => 7,
    }
}

fn nan_last(value: &Comparable<'_>) -> bool {
    matches!(value, Comparable::Number(n) if n.is_nan())
}

/// Total order used for sorting: missing < null < booleans < numbers < strings <
/// arrays < documents < anything else.
pub fn collate(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let by_rank = collation_rank(left).cmp(&collation_rank(right));
    if by_rank != Ordering::Equal {
        return by_rank;
    }

    match (left, right) {
        (Some(Bson::Boolean(a)), Some(Bson::Boolean(b))) => a.cmp(b),
        (Some(Bson::String(a)), Some(Bson::String(b))) => a.cmp(b),
        (Some(Bson::Array(a)), Some(Bson::Array(b))) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let ordering = collate(Some(x), Some(y));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (Some(Bson::Document(a)), Some(Bson::Document(b))) => {
            for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                let ordering = ka.cmp(kb).then_with(|| collate(Some(va), Some(vb)));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (Some(a), Some(b)) if collation_rank(left) == 3 => {
            let (a, b) = (Comparable::from(a), Comparable::from(b));
            compare_numbers(&a, &b).unwrap_or_else(|| nan_last(&a).cmp(&nan_last(&b)))
        }
        _ => Ordering::Equal,
    }
}

/// Evaluates queries against stored documents, caching compiled regular expressions.
#[derive(Debug, Default)]
pub struct Matcher {
    patterns: HashMap<(String, String), Option<Regex>>,
}

impl Matcher {
    pub fn new() -> Self {
        Matcher::default()
    }

    /// Returns `true` if `document` satisfies every clause of `query`.
    pub fn matches(&mut self, query: &Query, document: &bson::Document) -> bool {
        let mut evaluation = Evaluation { matcher: self, document };
        match evaluation.visit_query(query) {
            Ok(matched) => matched,
            Err(never) => match never {},
        }
    }

    /// Keeps the documents that satisfy `query`, preserving order.
    pub fn filter(&mut self, query: &Query, documents: Vec<bson::Document>) -> Vec<bson::Document> {
        documents
            .into_iter()
            .filter(|document| self.matches(query, document))
            .collect()
    }

    /// Tests a single field value (`None` when the field is absent) against a predicate.
    pub fn matches_value(&mut self, value: Option<&Bson>, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::Literal(expected) => value.is_some_and(|v| values_equal(v, expected)),
            Predicate::Operator(kind, operand) => self.apply_operator(*kind, value, operand),
            Predicate::Unrecognized(..) => false,
        }
    }

    fn apply_operator(&mut self, kind: OperatorKind, value: Option<&Bson>, operand: &Bson) -> bool {
        match kind {
            OperatorKind::Eq => value.is_some_and(|v| values_equal(v, operand)),
            OperatorKind::Ne => !value.is_some_and(|v| values_equal(v, operand)),
            OperatorKind::Gt | OperatorKind::Gte | OperatorKind::Lt | OperatorKind::Lte => {
                let Some(value) = value else {
                    return false;
                };
                match Comparable::from(value).partial_cmp(&Comparable::from(operand)) {
                    Some(ordering) => match kind {
                        OperatorKind::Gt => ordering == Ordering::Greater,
                        OperatorKind::Gte => ordering != Ordering::Less,
                        OperatorKind::Lt => ordering == Ordering::Less,
                        _ => ordering != Ordering::Greater,
                    },
                    None => false,
                }
            }
            OperatorKind::In => match (value, operand.as_array()) {
                (Some(value), Some(candidates)) => {
                    candidates.iter().any(|candidate| values_equal(value, candidate))
                }
                _ => false,
            },
            OperatorKind::Nin => match (value, operand.as_array()) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(value), Some(candidates)) => {
                    !candidates.iter().any(|candidate| values_equal(value, candidate))
                }
            },
            OperatorKind::Exists => value.is_some() == is_truthy(operand),
            OperatorKind::Regex => match value {
                Some(Bson::String(text)) => {
                    self.regex(operand).is_some_and(|regex| regex.is_match(text))
                }
                _ => false,
            },
            // Logical operators are clauses, never field predicates.
            OperatorKind::And | OperatorKind::Or | OperatorKind::Not => false,
        }
    }

    fn regex(&mut self, operand: &Bson) -> Option<&Regex> {
        let key = match operand {
            Bson::String(pattern) => (pattern.clone(), String::new()),
            Bson::RegularExpression(regex) => {
                (regex.pattern.as_str().to_owned(), regex.options.as_str().to_owned())
            }
            _ => return None,
        };

        self.patterns
            .entry(key)
            .or_insert_with_key(|(pattern, options)| {
                let compiled = RegexBuilder::new(pattern)
                    .case_insensitive(options.contains('i'))
                    .multi_line(options.contains('m'))
                    .dot_matches_new_line(options.contains('s'))
                    .ignore_whitespace(options.contains('x'))
                    .build();

                match compiled {
                    Ok(regex) => Some(regex),
                    Err(err) => {
                        tracing::debug!(%pattern, error = %err, "regex failed to compile; treating as non-match");
                        None
                    }
                }
            })
            .as_ref()
    }
}

struct Evaluation<'m, 'd> {
    matcher: &'m mut Matcher,
    document: &'d bson::Document,
}

impl QueryVisitor for Evaluation<'_, '_> {
    type Output = bool;
    type Error = Infallible;

    fn visit_query(&mut self, query: &Query) -> Result<bool, Infallible> {
        for clause in query.clauses() {
            if !self.visit_clause(clause)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn visit_and(&mut self, queries: &[Query]) -> Result<bool, Infallible> {
        for query in queries {
            if !self.visit_query(query)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn visit_or(&mut self, queries: &[Query]) -> Result<bool, Infallible> {
        for query in queries {
            if self.visit_query(query)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn visit_not(&mut self, query: &Query) -> Result<bool, Infallible> {
        Ok(!self.visit_query(query)?)
    }

    fn visit_field(&mut self, path: &str, predicate: &Predicate) -> Result<bool, Infallible> {
        let value = lookup(self.document, path);
        Ok(self.matcher.matches_value(value, predicate))
    }
}
