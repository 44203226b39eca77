//! Array mutation primitives.
//!
//! Each primitive targets the array at a dotted path inside the document matching a filter,
//! issues one or two native updates and reports whether anything changed.

use bson::{Bson, Document, doc};

use crate::{
    backend::{StoreBackend, UpdateOptions},
    cancel::CancellationToken,
    connection::ConnectionHandle,
    error::{DocumentStoreError, DocumentStoreResult, LogFailure, log_failure},
    query::IntoFilter,
};

/// Identifier the positional update binds matching elements to.
pub const ELEMENT_IDENTIFIER: &str = "elem";

/// Builds the array filter for a positional update from a caller-supplied condition.
///
/// A field condition such as `{ "sku": "A" }` is rewritten to `{ "elem.sku": "A" }`; keys already
/// addressing `elem` are kept. An operator condition such as `{ "$gt": 3 }` and any scalar bind
/// the element itself: `{ "elem": { "$gt": 3 } }`.
pub fn element_filter(condition: Bson) -> Document {
    match condition {
        Bson::Document(condition)
            if !condition.is_empty() && !condition.keys().all(|key| key.starts_with('$')) =>
        {
            condition
                .into_iter()
                .map(|(key, value)| {
                    let addresses_element = key == ELEMENT_IDENTIFIER
                        || key.starts_with(&format!("{ELEMENT_IDENTIFIER}."));
                    let key = if addresses_element || key.starts_with('$') {
                        key
                    } else {
                        format!("{ELEMENT_IDENTIFIER}.{key}")
                    };
                    (key, value)
                })
                .collect()
        }
        other => doc! { ELEMENT_IDENTIFIER: other },
    }
}

/// Resolves a dotted path inside `document`. Numeric segments index into arrays.
pub fn lookup_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(nested) => nested.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn validate_path(path: &str) -> DocumentStoreResult<()> {
    if path.trim().is_empty() {
        return Err(DocumentStoreError::Validation(
            "array path must not be empty".to_string(),
        ));
    }

    Ok(())
}

/// Checks the path and renders the filter, logging a failure under `operation`.
fn prepare(
    operation: &'static str,
    collection: &str,
    path: &str,
    filter: impl IntoFilter,
) -> DocumentStoreResult<Document> {
    validate_path(path)
        .and_then(|()| filter.into_filter())
        .log_failure(operation, collection)
}

impl<B: StoreBackend> ConnectionHandle<B> {
    /// Appends `value` to the array at `path`, creating the array if it is absent.
    pub async fn array_push(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        path: &str,
        value: Bson,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let filter = prepare("array_push", collection, path, filter)?;

        self.modify(collection, filter, doc! { "$push": { path: value } }, None, cancel)
            .await
    }

    /// Sets the element at `index`. Bounds are not checked beforehand; the backend decides.
    pub async fn array_set(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        path: &str,
        index: usize,
        value: Bson,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let filter = prepare("array_set", collection, path, filter)?;

        self.modify(
            collection,
            filter,
            doc! { "$set": { format!("{path}.{index}"): value } },
            None,
            cancel,
        )
        .await
    }

    /// Sets every element matching `condition` to `value`.
    ///
    /// See [`element_filter`] for how the condition is bound to each element.
    pub async fn array_update(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        path: &str,
        condition: Bson,
        value: Bson,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let filter = prepare("array_update", collection, path, filter)?;

        self.modify(
            collection,
            filter,
            doc! { "$set": { format!("{path}.$[{ELEMENT_IDENTIFIER}]"): value } },
            Some(vec![element_filter(condition)]),
            cancel,
        )
        .await
    }

    /// Removes every element matching `condition`.
    ///
    /// The condition is an element value, or an operator/field mapping matched per element.
    pub async fn array_pull(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        path: &str,
        condition: Bson,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let filter = prepare("array_pull", collection, path, filter)?;

        self.modify(collection, filter, doc! { "$pull": { path: condition } }, None, cancel)
            .await
    }

    /// Removes the element at `index`.
    ///
    /// The slot is first unset, which leaves a `null`, and then every `null` in the array is
    /// pulled. Nulls that were already in the array are removed as well.
    pub async fn array_remove_at(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        path: &str,
        index: usize,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let filter = prepare("array_remove_at", collection, path, filter)?;

        let unset = self
            .modify(
                collection,
                filter.clone(),
                doc! { "$unset": { format!("{path}.{index}"): 1 } },
                None,
                cancel,
            )
            .await?;
        let pulled = self
            .modify(collection, filter, doc! { "$pull": { path: Bson::Null } }, None, cancel)
            .await?;

        Ok(unset || pulled)
    }

    /// Replaces the whole array at `path` with `values`.
    ///
    /// Returns `Ok(false)` when no document matches.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidOperation`] when the field is absent or is not an
    /// array.
    pub async fn array_replace_all(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        path: &str,
        values: Vec<Bson>,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let filter = prepare("array_replace_all", collection, path, filter)?;

        let Some(current) = self.find_one(collection, filter.clone(), cancel).await? else {
            return Ok(false);
        };

        if !matches!(lookup_path(&current, path), Some(Bson::Array(_))) {
            let error = DocumentStoreError::InvalidOperation(format!(
                "field '{path}' is not an array"
            ));
            log_failure("array_replace_all", collection, &error);
            return Err(error);
        }

        self.modify(collection, filter, doc! { "$set": { path: values } }, None, cancel)
            .await
    }

    async fn modify(
        &mut self,
        collection: &str,
        filter: Document,
        update: Document,
        array_filters: Option<Vec<Document>>,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let options = UpdateOptions { upsert: false, array_filters };
        let outcome = self
            .apply_update(collection, filter, update, options, cancel)
            .await?;

        Ok(outcome.modified_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_conditions_are_bound_to_the_element() {
        assert_eq!(
            element_filter(Bson::Document(doc! { "sku": "A", "elem.qty": { "$gt": 1 } })),
            doc! { "elem.sku": "A", "elem.qty": { "$gt": 1 } }
        );
    }

    #[test]
    fn operator_and_scalar_conditions_bind_the_element_itself() {
        assert_eq!(
            element_filter(Bson::Document(doc! { "$gte": 3 })),
            doc! { "elem": { "$gte": 3 } }
        );
        assert_eq!(element_filter(Bson::String("x".into())), doc! { "elem": "x" });
    }

    #[test]
    fn lookup_follows_documents_and_indexes() {
        let document = doc! { "a": { "b": [ { "c": 1 }, { "c": 2 } ] } };

        assert_eq!(lookup_path(&document, "a.b.1.c"), Some(&Bson::Int32(2)));
        assert!(matches!(lookup_path(&document, "a.b"), Some(Bson::Array(_))));
        assert_eq!(lookup_path(&document, "a.x"), None);
        assert_eq!(lookup_path(&document, "a.b.7"), None);
    }
}
