//! Filter and sort construction.
//!
//! Operations take their filter as a plain MongoDB-style [`Document`], so any filter the store
//! understands can be passed through. [`Filter`] builds the common cases as typed [`Expr`] values
//! that render into such a document. Operations accept either through [`IntoFilter`]:
//!
//! ```ignore
//! use docrepo::query::{Filter, IntoFilter};
//!
//! let filter: bson::Document = Filter::eq("status", "active")
//!     .and(Filter::gt("age", 18))
//!     .into_filter()?;
//! ```
//!
//! Available builders:
//!
//! - `id` (returns a document directly)
//! - `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - `starts_with`, `ends_with`, `contains`, `not_contains`
//! - `exists`, `not_exists`
//! - `any_of`, `none_of`
//! - `and`, `or`

use bson::{Bson, Document, doc};

use crate::{
    document::ID_FIELD,
    error::{DocumentStoreError, DocumentStoreResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Ordering applied to a find, on a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Desc }
    }

    /// Returns the sort as a `{ field: 1 | -1 }` document.
    pub fn to_document(&self) -> Document {
        let order = match self.direction {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        };

        doc! { self.field.clone(): order }
    }
}

/// Comparison applied to a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-insensitive substring for strings, containment of every value for arrays.
    Contains,
    NotContains,
    /// Case-insensitive prefix.
    StartsWith,
    /// Case-insensitive suffix.
    EndsWith,
    /// `$in`; a single value is treated as a one-element list.
    AnyOf,
    /// `$nin`; a single value is treated as a one-element list.
    NoneOf,
}

/// A filter predicate.
#[derive(Debug, Clone)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Exists(String, bool),
    Field { field: String, op: FieldOp, value: Bson },
}

impl Expr {
    pub fn field(field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Self {
        Expr::Field { field: field.into(), op, value: value.into() }
    }

    /// Conjunction; chained calls extend one `$and` list instead of nesting.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut all) => {
                all.push(other);
                Expr::And(all)
            }
            expr => Expr::And(vec![expr, other]),
        }
    }

    /// Disjunction; chained calls extend one `$or` list instead of nesting.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut any) => {
                any.push(other);
                Expr::Or(any)
            }
            expr => Expr::Or(vec![expr, other]),
        }
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Renders the predicate as a filter document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Validation`] when a pattern operator is given a
    /// non-string value.
    pub fn to_document(&self) -> DocumentStoreResult<Document> {
        match self {
            Expr::And(all) => Ok(doc! { "$and": clauses(all)? }),
            Expr::Or(any) => Ok(doc! { "$or": clauses(any)? }),
            // `$not` only applies to a field; `$nor` negates a whole clause.
            Expr::Not(expr) => Ok(doc! { "$nor": [expr.to_document()?] }),
            Expr::Exists(field, present) => Ok(doc! { field.clone(): { "$exists": *present } }),
            Expr::Field { field, op, value } => Ok(doc! { field.clone(): condition(*op, value)? }),
        }
    }
}

/// A value usable as the filter of an operation.
///
/// Implemented for plain filter documents and for [`Expr`]. Rendering an expression can fail;
/// the operation then returns that error before reaching the backend.
pub trait IntoFilter {
    fn into_filter(self) -> DocumentStoreResult<Document>;
}

impl IntoFilter for Document {
    fn into_filter(self) -> DocumentStoreResult<Document> {
        Ok(self)
    }
}

impl IntoFilter for &Document {
    fn into_filter(self) -> DocumentStoreResult<Document> {
        Ok(self.clone())
    }
}

impl IntoFilter for Expr {
    fn into_filter(self) -> DocumentStoreResult<Document> {
        self.to_document()
    }
}

impl IntoFilter for &Expr {
    fn into_filter(self) -> DocumentStoreResult<Document> {
        self.to_document()
    }
}

fn clauses(exprs: &[Expr]) -> DocumentStoreResult<Vec<Document>> {
    exprs.iter().map(Expr::to_document).collect()
}

fn condition(op: FieldOp, value: &Bson) -> DocumentStoreResult<Document> {
    Ok(match op {
        FieldOp::Eq => doc! { "$eq": value },
        FieldOp::Ne => doc! { "$ne": value },
        FieldOp::Gt => doc! { "$gt": value },
        FieldOp::Gte => doc! { "$gte": value },
        FieldOp::Lt => doc! { "$lt": value },
        FieldOp::Lte => doc! { "$lte": value },
        FieldOp::Contains => match value {
            Bson::Array(values) => doc! { "$all": values },
            Bson::String(_) => pattern(op, value, "", "")?,
            _ => doc! { "$eq": value },
        },
        FieldOp::NotContains => match value {
            Bson::Array(values) => doc! { "$nin": values },
            Bson::String(_) => doc! { "$not": pattern(op, value, "", "")? },
            _ => doc! { "$ne": value },
        },
        FieldOp::StartsWith => pattern(op, value, "^", "")?,
        FieldOp::EndsWith => pattern(op, value, "", "$")?,
        FieldOp::AnyOf => doc! { "$in": listed(value) },
        FieldOp::NoneOf => doc! { "$nin": listed(value) },
    })
}

fn pattern(op: FieldOp, value: &Bson, prefix: &str, suffix: &str) -> DocumentStoreResult<Document> {
    let Bson::String(text) = value else {
        return Err(DocumentStoreError::Validation(format!(
            "{op:?} requires a string value"
        )));
    };

    Ok(doc! {
        "$regex": format!("{prefix}{}{suffix}", escape(text)),
        "$options": "i",
    })
}

fn listed(value: &Bson) -> Bson {
    match value {
        Bson::Array(_) => value.clone(),
        single => Bson::Array(vec![single.clone()]),
    }
}

fn escape(text: &str) -> String {
    text.chars().fold(String::with_capacity(text.len()), |mut out, c| {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
        out
    })
}

/// Shorthand constructors for [`Expr`].
pub struct Filter;

impl Filter {
    /// Matches the document whose `_id` is `id`.
    pub fn id(id: impl Into<String>) -> Document {
        doc! { ID_FIELD: id.into() }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Lte, value)
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::StartsWith, value)
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::EndsWith, value)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Contains, value)
    }

    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::NotContains, value)
    }

    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn any_of(field: impl Into<String>, values: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::AnyOf, values)
    }

    pub fn none_of(field: impl Into<String>, values: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::NoneOf, values)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_conjunctions_stay_flat() {
        let filter = Filter::eq("status", "active")
            .and(Filter::gt("age", 18))
            .and(Filter::exists("email"))
            .into_filter()
            .unwrap();

        assert_eq!(
            filter,
            doc! {
                "$and": [
                    { "status": { "$eq": "active" } },
                    { "age": { "$gt": 18 } },
                    { "email": { "$exists": true } },
                ]
            }
        );
    }

    #[test]
    fn negation_uses_nor() {
        let filter = Filter::exists("deleted").not().to_document().unwrap();

        assert_eq!(filter, doc! { "$nor": [{ "deleted": { "$exists": true } }] });
    }

    #[test]
    fn patterns_are_escaped_and_typed() {
        let filter = Filter::starts_with("name", "a.b").to_document().unwrap();

        assert_eq!(filter, doc! { "name": { "$regex": "^a\\.b", "$options": "i" } });
        assert!(matches!(
            Filter::ends_with("name", 3).to_document(),
            Err(DocumentStoreError::Validation(_))
        ));
    }

    #[test]
    fn unrenderable_filters_are_rejected() {
        let filter = Filter::contains("name", "x").and(Filter::ends_with("code", 7));

        assert!(matches!(
            filter.into_filter(),
            Err(DocumentStoreError::Validation(_))
        ));
    }

    #[test]
    fn documents_pass_through_unchanged() {
        let filter = doc! { "$where": "custom" };

        assert_eq!((&filter).into_filter().unwrap(), filter);
        assert_eq!(filter.clone().into_filter().unwrap(), filter);
    }

    #[test]
    fn single_values_become_lists() {
        let filter = Filter::any_of("tag", "a").to_document().unwrap();

        assert_eq!(filter, doc! { "tag": { "$in": ["a"] } });
    }

    #[test]
    fn sort_documents() {
        assert_eq!(Sort::desc("_id").to_document(), doc! { "_id": -1 });
        assert_eq!(Sort::asc("name").to_document(), doc! { "name": 1 });
    }
}
