//! Filter evaluation for in-memory documents.
//!
//! Filters are MongoDB-style documents. A top-level key is either a logical operator
//! (`$and`, `$or`, `$nor`) or a dotted field path whose condition is a literal value (equality) or
//! an operator document such as `{ "$gte": 3, "$lt": 9 }`.
//!
//! Field paths traverse embedded documents and fan out across arrays, and equality against an
//! array field also matches any of its elements, as a MongoDB server would.

use bson::{Bson, Document, datetime::DateTime};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

use docrepo_core::error::{DocumentStoreError, DocumentStoreResult};

/// Comparable view of a BSON value.
///
/// Numbers of every width are normalized to `f64`; values of different kinds never compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    Array(&'a [Bson]),
    Map(&'a Document),
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(f64::from(*value)),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(items) => Comparable::Array(items),
            Bson::Document(document) => Comparable::Map(document),
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
    /// Position of this kind in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Other(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting: by kind first, then by value.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| Comparable::from(x) == Comparable::from(y))
            }
            (Comparable::Map(a), Comparable::Map(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
                        ka == kb && Comparable::from(va) == Comparable::from(vb)
                    })
            }
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

fn unsupported(operator: &str) -> DocumentStoreError {
    DocumentStoreError::InvalidOperation(format!("unsupported query operator {operator}"))
}

/// Returns `true` for a non-empty document whose keys are all operators.
pub(crate) fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|key| key.starts_with('$'))
}

/// Collects every value reachable at `path`.
///
/// A numeric segment indexes into an array; any other segment applied to an array is applied to
/// each embedded document in it.
pub(crate) fn values_at<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments = path.split('.').collect::<Vec<_>>();
    let mut found = Vec::new();

    if let [head, rest @ ..] = segments.as_slice() {
        if let Some(value) = document.get(*head) {
            collect(value, rest, &mut found);
        }
    }

    found
}

fn collect<'a>(value: &'a Bson, segments: &[&str], found: &mut Vec<&'a Bson>) {
    let [head, rest @ ..] = segments else {
        found.push(value);
        return;
    };

    match value {
        Bson::Document(document) => {
            if let Some(child) = document.get(*head) {
                collect(child, rest, found);
            }
        }
        Bson::Array(items) => match head.parse::<usize>() {
            Ok(index) => {
                if let Some(item) = items.get(index) {
                    collect(item, rest, found);
                }
            }
            Err(_) => {
                for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                    collect(item, segments, found);
                }
            }
        },
        _ => {}
    }
}

/// Expands values into themselves plus, for arrays, their elements.
fn candidates<'a>(values: &[&'a Bson]) -> impl Iterator<Item = &'a Bson> {
    values.iter().copied().flat_map(|value: &'a Bson| {
        let elements: &'a [Bson] = match value {
            Bson::Array(items) => items,
            _ => &[],
        };
        std::iter::once(value).chain(elements)
    })
}

fn equals_any(values: &[&Bson], target: &Bson) -> bool {
    if matches!(target, Bson::Null) && values.is_empty() {
        return true;
    }

    let target = Comparable::from(target);
    candidates(values).any(|value| Comparable::from(value) == target)
}

fn compare_any(values: &[&Bson], target: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let target = Comparable::from(target);
    candidates(values).any(|value| {
        Comparable::from(value)
            .partial_cmp(&target)
            .is_some_and(&accept)
    })
}

fn operand_array<'a>(operator: &str, operand: &'a Bson) -> DocumentStoreResult<&'a [Bson]> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(DocumentStoreError::InvalidOperation(format!(
            "{operator} requires an array"
        ))),
    }
}

fn build_regex(pattern: &Bson, options: Option<&str>) -> DocumentStoreResult<Regex> {
    let Bson::String(pattern) = pattern else {
        return Err(DocumentStoreError::InvalidOperation("$regex requires a string".to_string()));
    };
    let flags = options.unwrap_or_default();

    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|e| DocumentStoreError::InvalidOperation(format!("invalid $regex: {e}")))
}

fn regex_matches_any(values: &[&Bson], regex: &Regex) -> bool {
    candidates(values).any(|value| matches!(value, Bson::String(s) if regex.is_match(s)))
}

/// Evaluates an operator document against the values found at one path.
fn operators_match(values: &[&Bson], operators: &Document) -> DocumentStoreResult<bool> {
    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => equals_any(values, operand),
            "$ne" => !equals_any(values, operand),
            "$gt" => compare_any(values, operand, |o| o == Ordering::Greater),
            "$gte" => compare_any(values, operand, |o| o != Ordering::Less),
            "$lt" => compare_any(values, operand, |o| o == Ordering::Less),
            "$lte" => compare_any(values, operand, |o| o != Ordering::Greater),
            "$in" => operand_array(operator, operand)?
                .iter()
                .any(|item| equals_any(values, item)),
            "$nin" => !operand_array(operator, operand)?
                .iter()
                .any(|item| equals_any(values, item)),
            "$all" => operand_array(operator, operand)?
                .iter()
                .all(|item| equals_any(values, item)),
            "$exists" => {
                let wanted = !matches!(operand, Bson::Boolean(false) | Bson::Null)
                    && !matches!(operand, Bson::Int32(0) | Bson::Int64(0));
                values.is_empty() != wanted
            }
            "$size" => {
                let size = match operand {
                    Bson::Int32(n) => i64::from(*n),
                    Bson::Int64(n) => *n,
                    Bson::Double(n) => *n as i64,
                    _ => return Err(DocumentStoreError::InvalidOperation("$size requires a number".to_string())),
                };
                values
                    .iter()
                    .any(|value| matches!(value, Bson::Array(items) if items.len() as i64 == size))
            }
            "$regex" => {
                let options = operators.get_str("$options").ok();
                regex_matches_any(values, &build_regex(operand, options)?)
            }
            "$options" => true,
            "$not" => match operand {
                Bson::Document(inner) => !operators_match(values, inner)?,
                _ => return Err(DocumentStoreError::InvalidOperation("$not requires an operator document".to_string())),
            },
            "$elemMatch" => {
                let Bson::Document(condition) = operand else {
                    return Err(DocumentStoreError::InvalidOperation("$elemMatch requires a document".to_string()));
                };
                elem_match(values, condition)?
            }
            other => return Err(unsupported(other)),
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn elem_match(values: &[&Bson], condition: &Document) -> DocumentStoreResult<bool> {
    for value in values {
        let Bson::Array(items) = value else { continue };

        for item in items {
            let matched = if is_operator_document(condition) {
                operators_match(&[item], condition)?
            } else {
                match item {
                    Bson::Document(element) => matches(element, condition)?,
                    _ => false,
                }
            };

            if matched {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

/// Evaluates `condition` against the values at one path.
pub(crate) fn condition_matches(values: &[&Bson], condition: &Bson) -> DocumentStoreResult<bool> {
    match condition {
        Bson::Document(operators) if is_operator_document(operators) => {
            operators_match(values, operators)
        }
        literal => Ok(equals_any(values, literal)),
    }
}

fn logical_clauses<'a>(operator: &str, operand: &'a Bson) -> DocumentStoreResult<Vec<&'a Document>> {
    operand_array(operator, operand)?
        .iter()
        .map(|clause| match clause {
            Bson::Document(clause) => Ok(clause),
            _ => Err(DocumentStoreError::InvalidOperation(format!(
                "{operator} clauses must be documents"
            ))),
        })
        .collect()
}

/// Returns `true` when `document` satisfies `filter`. An empty filter matches everything.
pub(crate) fn matches(document: &Document, filter: &Document) -> DocumentStoreResult<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in logical_clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" | "$nor" => {
                let mut any = false;
                for clause in logical_clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                if key == "$or" { any } else { !any }
            }
            operator if operator.starts_with('$') => return Err(unsupported(operator)),
            path => condition_matches(&values_at(document, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}
