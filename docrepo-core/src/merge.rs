//! Partial updates: whole-document merge and flattened `$set`.
//!
//! Two update modes sit on top of the document operations:
//!
//! - [`update_one`](ConnectionHandle::update_one) reads the current document, deep-merges the
//!   update into it and writes the result back with a single upserting replace. Fields the
//!   update does not name survive.
//! - [`update_some_props`](ConnectionHandle::update_some_props) flattens a partial document into
//!   dotted paths and applies them as one native `$set`, so nested siblings survive too.
//!
//! The `_id` field is never written by either mode.

use bson::{Bson, Document, doc};

use crate::{
    backend::{StoreBackend, UpdateOptions, UpdateOutcome},
    cancel::CancellationToken,
    connection::ConnectionHandle,
    document::ID_FIELD,
    error::{DocumentStoreError, DocumentStoreResult, LogFailure},
    query::IntoFilter,
};

/// Controls how [`deep_merge`] treats list-valued fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Concatenate arrays present on both sides instead of replacing them.
    pub merge_arrays: bool,
}

impl MergeOptions {
    pub fn merge_arrays() -> Self {
        Self { merge_arrays: true }
    }
}

/// Merges `update` into `target` in place.
///
/// For every key of `update`: if both sides hold a mapping the merge recurses, if both hold
/// arrays and [`MergeOptions::merge_arrays`] is set the arrays are concatenated, otherwise the
/// update value replaces the existing one. Keys absent from `update` are left untouched.
pub fn deep_merge(target: &mut Document, update: &Document, options: MergeOptions) {
    for (key, incoming) in update {
        if let Some(existing) = target.get_mut(key) {
            match (existing, incoming) {
                (Bson::Document(existing), Bson::Document(incoming)) => {
                    deep_merge(existing, incoming, options);
                    continue;
                }
                (Bson::Array(existing), Bson::Array(incoming)) if options.merge_arrays => {
                    existing.extend(incoming.iter().cloned());
                    continue;
                }
                _ => {}
            }
        }

        target.insert(key.clone(), incoming.clone());
    }
}

/// Flattens nested mappings into dotted paths.
///
/// `{ "address": { "city": "X" } }` becomes `{ "address.city": "X" }`. Arrays and scalars are
/// kept as leaf values; an empty mapping is kept as a leaf so it is not lost.
pub fn flatten_document(document: &Document) -> Document {
    let mut flat = Document::new();
    flatten_into(&mut flat, None, document);
    flat
}

fn flatten_into(flat: &mut Document, prefix: Option<&str>, document: &Document) {
    for (key, value) in document {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };

        match value {
            Bson::Document(nested) if !nested.is_empty() => flatten_into(flat, Some(&path), nested),
            _ => {
                flat.insert(path, value.clone());
            }
        }
    }
}

/// Expands dotted keys back into nested mappings, the inverse of [`flatten_document`].
///
/// Keys that address the same parent are merged: `{ "a.x": 1, "a.y": 2 }` becomes
/// `{ "a": { "x": 1, "y": 2 } }`.
pub fn expand_paths(document: &Document) -> Document {
    let mut expanded = Document::new();

    for (key, value) in document {
        let segments = key.split('.').collect::<Vec<_>>();
        insert_path(&mut expanded, &segments, value.clone());
    }

    expanded
}

fn insert_path(target: &mut Document, segments: &[&str], value: Bson) {
    match segments {
        [] => {}
        [leaf] => {
            if let (Some(Bson::Document(existing)), Bson::Document(incoming)) =
                (target.get_mut(*leaf), &value)
            {
                deep_merge(existing, incoming, MergeOptions::default());
                return;
            }
            target.insert(*leaf, value);
        }
        [head, rest @ ..] => {
            if !matches!(target.get(*head), Some(Bson::Document(_))) {
                target.insert(head.to_string(), Document::new());
            }
            if let Some(Bson::Document(child)) = target.get_mut(*head) {
                insert_path(child, rest, value);
            }
        }
    }
}

/// How an update document is executed.
#[derive(Debug, PartialEq)]
pub(crate) enum UpdatePlan {
    /// Deep-merge this payload into the current document.
    Merge(Document),
    /// Assign each dotted path of this `$set` body on the current document.
    Set(Document),
    /// Hand this operator document to the backend unchanged.
    Native(Document),
}

impl UpdatePlan {
    /// Classifies an update document.
    ///
    /// Plain mappings merge. An operator document whose only operator is `$set` is unwrapped
    /// and its paths assigned on the current document. Any other operator document runs
    /// natively with `_id` removed from its operands.
    pub(crate) fn classify(update: Document) -> DocumentStoreResult<Self> {
        if update.is_empty() {
            return Err(DocumentStoreError::Validation(
                "update must not be empty".to_string(),
            ));
        }

        let operators = update.keys().filter(|key| key.starts_with('$')).count();

        if operators == 0 {
            return Ok(UpdatePlan::Merge(update));
        }
        if operators != update.len() {
            return Err(DocumentStoreError::Validation(
                "update cannot mix operators and plain fields".to_string(),
            ));
        }

        if update.len() == 1 {
            match update.get("$set") {
                Some(Bson::Document(set)) => {
                    let set = set
                        .iter()
                        .filter(|(path, _)| !addresses_id(path))
                        .map(|(path, value)| (path.clone(), value.clone()))
                        .collect();
                    return Ok(UpdatePlan::Set(set));
                }
                Some(_) => {
                    return Err(DocumentStoreError::Validation(
                        "$set requires a document".to_string(),
                    ));
                }
                None => {}
            }
        }

        Ok(UpdatePlan::Native(strip_id_operands(update)))
    }
}

fn addresses_id(path: &str) -> bool {
    path == ID_FIELD || path.strip_prefix(ID_FIELD).is_some_and(|rest| rest.starts_with('.'))
}

/// Assigns `value` at the dotted `path` of `target`, the way a native `$set` does.
///
/// Missing intermediate fields are created as mappings. A numeric segment addresses an array
/// slot, padding the array with `null` up to that index. At the end of the path a mapping
/// deep-merges into an existing mapping; anything else replaces the current value.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidOperation`] when the path runs through a scalar, or
/// through an array with a segment that is not an index.
pub fn assign_path(
    target: &mut Document,
    path: &str,
    value: Bson,
    options: MergeOptions,
) -> DocumentStoreResult<()> {
    let segments = path.split('.').collect::<Vec<_>>();
    assign_in_document(target, path, &segments, value, options)
}

fn assign_in_document(
    target: &mut Document,
    path: &str,
    segments: &[&str],
    value: Bson,
    options: MergeOptions,
) -> DocumentStoreResult<()> {
    let [head, rest @ ..] = segments else {
        return Ok(());
    };

    if rest.is_empty() {
        deep_merge(target, &doc! { *head: value }, options);
        return Ok(());
    }

    if !matches!(target.get(*head), Some(Bson::Document(_) | Bson::Array(_))) {
        if !matches!(target.get(*head), None | Some(Bson::Null)) {
            return Err(path_conflict(path, head));
        }
        target.insert(*head, Document::new());
    }

    match target.get_mut(*head) {
        Some(nested) => assign_in_value(nested, path, rest, value, options),
        None => Ok(()),
    }
}

fn assign_in_value(
    target: &mut Bson,
    path: &str,
    segments: &[&str],
    value: Bson,
    options: MergeOptions,
) -> DocumentStoreResult<()> {
    match target {
        Bson::Document(nested) => assign_in_document(nested, path, segments, value, options),
        Bson::Array(items) => {
            let [head, rest @ ..] = segments else {
                return Ok(());
            };
            let index = head.parse::<usize>().map_err(|_| path_conflict(path, head))?;
            if items.len() <= index {
                items.resize(index + 1, Bson::Null);
            }

            let slot = &mut items[index];
            if rest.is_empty() {
                match (&mut *slot, value) {
                    (Bson::Document(existing), Bson::Document(incoming)) => {
                        deep_merge(existing, &incoming, options);
                    }
                    (slot, value) => *slot = value,
                }
                return Ok(());
            }

            if matches!(slot, Bson::Null) {
                *slot = Bson::Document(Document::new());
            }
            assign_in_value(slot, path, rest, value, options)
        }
        _ => Err(path_conflict(path, segments.first().copied().unwrap_or_default())),
    }
}

fn path_conflict(path: &str, segment: &str) -> DocumentStoreError {
    DocumentStoreError::InvalidOperation(format!(
        "cannot set '{path}': segment '{segment}' does not fit the stored document"
    ))
}

/// Removes `_id` from the operands of every operator in `update`.
pub(crate) fn strip_id_operands(mut update: Document) -> Document {
    for (_, operands) in update.iter_mut() {
        if let Bson::Document(operands) = operands {
            operands.remove(ID_FIELD);
        }
    }
    update
}

impl<B: StoreBackend> ConnectionHandle<B> {
    /// Merges `update` into the document matching `filter` and returns the modified-count.
    ///
    /// Arrays are replaced wholesale; see [`update_one_with`](Self::update_one_with).
    pub async fn update_one(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        update: Document,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<u64> {
        self.update_one_with(collection, filter, update, MergeOptions::default(), cancel)
            .await
    }

    /// Merges `update` into the document matching `filter` using `options`.
    ///
    /// When no document matches, the update itself is stored (upsert). `_id` is never
    /// written from the update.
    pub async fn update_one_with(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        update: Document,
        options: MergeOptions,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<u64> {
        Ok(self
            .merge_update(collection, filter, update, options, cancel)
            .await?
            .modified_count)
    }

    /// Runs the merge algorithm and returns the full outcome, including any upserted id.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidOperation`] when a `$set` path runs through a
    /// scalar, or through an array with a segment that is not an index.
    pub async fn merge_update(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        update: Document,
        options: MergeOptions,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let (filter, plan) = self
            .ensure_alive()
            .and_then(|()| filter.into_filter())
            .and_then(|filter| UpdatePlan::classify(update).map(|plan| (filter, plan)))
            .log_failure("update_one", collection)?;

        let mut replacement = match plan {
            UpdatePlan::Native(update) => {
                return self
                    .apply_update(collection, filter, update, UpdateOptions::default(), cancel)
                    .await;
            }
            UpdatePlan::Merge(payload) => {
                match self.find_one(collection, filter.clone(), cancel).await? {
                    Some(mut current) => {
                        deep_merge(&mut current, &payload, options);
                        current
                    }
                    None => payload,
                }
            }
            UpdatePlan::Set(set) => {
                match self.find_one(collection, filter.clone(), cancel).await? {
                    Some(mut current) => {
                        set.into_iter()
                            .try_for_each(|(path, value)| {
                                assign_path(&mut current, &path, value, options)
                            })
                            .log_failure("update_one", collection)?;
                        current
                    }
                    None => expand_paths(&set),
                }
            }
        };

        replacement.remove(ID_FIELD);

        self.replace_one(collection, filter, replacement, true, cancel)
            .await
    }

    /// Sets only the fields present in `partial`, addressing nested fields by dotted path.
    ///
    /// Returns the modified-count; 0 when nothing matched or nothing changed. An empty
    /// `partial` returns 0 without contacting the backend.
    pub async fn update_some_props(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        partial: &Document,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<u64> {
        let filter = self
            .ensure_alive()
            .and_then(|()| filter.into_filter())
            .log_failure("update_some_props", collection)?;

        let mut flat = flatten_document(partial);
        flat.remove(ID_FIELD);

        if flat.is_empty() {
            return Ok(0);
        }

        Ok(self
            .apply_update(
                collection,
                filter,
                doc! { "$set": flat },
                UpdateOptions::default(),
                cancel,
            )
            .await?
            .modified_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_preserves_untouched_fields() {
        let mut current = doc! { "_id": "1", "name": "John", "age": 20 };

        deep_merge(&mut current, &doc! { "age": 30 }, MergeOptions::default());

        assert_eq!(current, doc! { "_id": "1", "name": "John", "age": 30 });
    }

    #[test]
    fn merge_recurses_into_nested_mappings() {
        let mut current = doc! { "address": { "city": "A", "zip": "1" } };

        deep_merge(
            &mut current,
            &doc! { "address": { "city": "B" }, "phone": "555" },
            MergeOptions::default(),
        );

        assert_eq!(
            current,
            doc! { "address": { "city": "B", "zip": "1" }, "phone": "555" }
        );
    }

    #[test]
    fn arrays_replace_or_concatenate() {
        let mut replaced = doc! { "tags": ["a", "b"] };
        deep_merge(&mut replaced, &doc! { "tags": ["c"] }, MergeOptions::default());
        assert_eq!(replaced, doc! { "tags": ["c"] });

        let mut merged = doc! { "tags": ["a", "b"] };
        deep_merge(&mut merged, &doc! { "tags": ["c"] }, MergeOptions::merge_arrays());
        assert_eq!(merged, doc! { "tags": ["a", "b", "c"] });
    }

    #[test]
    fn scalar_replaces_mapping() {
        let mut current = doc! { "address": { "city": "A" } };

        deep_merge(&mut current, &doc! { "address": "unknown" }, MergeOptions::default());

        assert_eq!(current, doc! { "address": "unknown" });
    }

    #[test]
    fn flatten_produces_dotted_paths() {
        let flat = flatten_document(&doc! {
            "name": "Ann",
            "address": { "city": "X", "geo": { "lat": 1.5 } },
            "tags": ["a"],
            "meta": {},
        });

        assert_eq!(
            flat,
            doc! {
                "name": "Ann",
                "address.city": "X",
                "address.geo.lat": 1.5,
                "tags": ["a"],
                "meta": {},
            }
        );
    }

    #[test]
    fn expand_is_inverse_of_flatten() {
        let nested = doc! { "address": { "city": "X", "zip": "9" }, "age": 3 };

        assert_eq!(expand_paths(&flatten_document(&nested)), nested);
        assert_eq!(
            expand_paths(&doc! { "a.x": 1, "a.y": 2 }),
            doc! { "a": { "x": 1, "y": 2 } }
        );
    }

    #[test]
    fn set_only_updates_keep_their_paths() {
        let plan = UpdatePlan::classify(doc! {
            "$set": { "age": 30, "address.city": "Y", "_id": "x" }
        })
        .unwrap();

        assert_eq!(plan, UpdatePlan::Set(doc! { "age": 30, "address.city": "Y" }));
    }

    #[test]
    fn assign_updates_array_slots_in_place() {
        let mut current = doc! { "tags": ["a", "b"], "items": [{ "sku": "X", "qty": 1 }] };

        assign_path(&mut current, "tags.0", Bson::from("x"), MergeOptions::default()).unwrap();
        assign_path(&mut current, "tags.3", Bson::from("d"), MergeOptions::default()).unwrap();
        assign_path(&mut current, "items.0.qty", Bson::from(4), MergeOptions::default()).unwrap();

        assert_eq!(
            current,
            doc! {
                "tags": ["x", "b", null, "d"],
                "items": [{ "sku": "X", "qty": 4 }],
            }
        );
    }

    #[test]
    fn assign_creates_missing_mappings_and_merges_leaves() {
        let mut current = doc! { "address": { "city": "A", "zip": "1" } };

        assign_path(&mut current, "address", Bson::Document(doc! { "city": "B" }), MergeOptions::default())
            .unwrap();
        assign_path(&mut current, "meta.source.kind", Bson::from("api"), MergeOptions::default()).unwrap();

        assert_eq!(
            current,
            doc! {
                "address": { "city": "B", "zip": "1" },
                "meta": { "source": { "kind": "api" } },
            }
        );
    }

    #[test]
    fn assign_rejects_paths_through_scalars_and_named_array_segments() {
        let mut current = doc! { "name": "Ann", "tags": ["a"] };

        assert!(matches!(
            assign_path(&mut current, "name.first", Bson::from("A"), MergeOptions::default()),
            Err(DocumentStoreError::InvalidOperation(_))
        ));
        assert!(matches!(
            assign_path(&mut current, "tags.first", Bson::from("A"), MergeOptions::default()),
            Err(DocumentStoreError::InvalidOperation(_))
        ));
        assert_eq!(current, doc! { "name": "Ann", "tags": ["a"] });
    }

    #[test]
    fn other_operators_run_natively_without_id() {
        let plan = UpdatePlan::classify(doc! {
            "$set": { "_id": "x", "name": "N" },
            "$push": { "tags": "t" },
        })
        .unwrap();

        assert_eq!(
            plan,
            UpdatePlan::Native(doc! { "$set": { "name": "N" }, "$push": { "tags": "t" } })
        );
    }

    #[test]
    fn invalid_updates_are_rejected() {
        assert!(matches!(
            UpdatePlan::classify(doc! {}),
            Err(DocumentStoreError::Validation(_))
        ));
        assert!(matches!(
            UpdatePlan::classify(doc! { "$set": { "a": 1 }, "b": 2 }),
            Err(DocumentStoreError::Validation(_))
        ));
    }
}
