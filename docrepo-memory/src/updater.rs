//! Update-operator application for in-memory documents.
//!
//! Supports `$set`, `$unset`, `$push` (with `$each`) and `$pull`. Paths are dotted; numeric
//! segments index into arrays and `$[name]` addresses every element accepted by the array filter
//! bound to `name` (`$[]` addresses every element).

use bson::{Bson, Document};

use docrepo_core::{
    document::ID_FIELD,
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::evaluator::{Comparable, condition_matches, is_operator_document, matches};

fn invalid(message: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::InvalidOperation(message.into())
}

/// Applies `update` to `document` in place and returns `true` if the document changed.
///
/// The document is left untouched when any operator fails.
pub(crate) fn apply(
    document: &mut Document,
    update: &Document,
    array_filters: &[Document],
) -> DocumentStoreResult<bool> {
    if !is_operator_document(update) {
        return Err(invalid("update document must contain only update operators"));
    }

    let mut updated = document.clone();

    for (operator, operands) in update {
        let Bson::Document(operands) = operands else {
            return Err(invalid(format!("{operator} requires a document")));
        };

        for (path, operand) in operands {
            if addresses_id(path) {
                return Err(invalid(format!("{operator} cannot modify the immutable field '{path}'")));
            }

            let segments = path.split('.').collect::<Vec<_>>();

            match operator.as_str() {
                "$set" => set_in_document(&mut updated, &segments, operand, array_filters)?,
                "$unset" => unset_in_document(&mut updated, &segments),
                "$push" => push(&mut updated, path, &segments, operand)?,
                "$pull" => pull(&mut updated, path, &segments, operand)?,
                other => return Err(invalid(format!("unsupported update operator {other}"))),
            }
        }
    }

    if updated == *document {
        return Ok(false);
    }

    *document = updated;
    Ok(true)
}

fn addresses_id(path: &str) -> bool {
    path == ID_FIELD || path.strip_prefix(ID_FIELD).is_some_and(|rest| rest.starts_with('.'))
}

/// Returns the identifier of a `$[name]` segment; `$[]` yields an empty name.
fn positional(segment: &str) -> Option<&str> {
    segment.strip_prefix("$[")?.strip_suffix(']')
}

fn element_accepted(name: &str, element: &Bson, array_filters: &[Document]) -> DocumentStoreResult<bool> {
    if name.is_empty() {
        return Ok(true);
    }

    let bound = array_filters
        .iter()
        .filter(|filter| {
            filter
                .keys()
                .any(|key| key.split('.').next() == Some(name))
        })
        .collect::<Vec<_>>();

    if bound.is_empty() {
        return Err(invalid(format!("no array filter found for identifier '{name}'")));
    }

    let mut scope = Document::new();
    scope.insert(name, element.clone());

    for filter in bound {
        if !matches(&scope, filter)? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn set_in_document(
    document: &mut Document,
    segments: &[&str],
    value: &Bson,
    array_filters: &[Document],
) -> DocumentStoreResult<()> {
    match segments {
        [] => Ok(()),
        [leaf] => {
            document.insert(*leaf, value.clone());
            Ok(())
        }
        [head, rest @ ..] => {
            if matches!(document.get(*head), None | Some(Bson::Null)) {
                document.insert(*head, Document::new());
            }
            match document.get_mut(*head) {
                Some(child) => set_in_value(child, head, rest, value, array_filters),
                None => Ok(()),
            }
        }
    }
}

fn set_in_value(
    target: &mut Bson,
    name: &str,
    segments: &[&str],
    value: &Bson,
    array_filters: &[Document],
) -> DocumentStoreResult<()> {
    match target {
        Bson::Document(document) => set_in_document(document, segments, value, array_filters),
        Bson::Array(items) => set_in_array(items, segments, value, array_filters),
        _ => Err(invalid(format!(
            "cannot create field '{}' in non-container field '{name}'",
            segments.first().copied().unwrap_or_default()
        ))),
    }
}

fn set_in_array(
    items: &mut Vec<Bson>,
    segments: &[&str],
    value: &Bson,
    array_filters: &[Document],
) -> DocumentStoreResult<()> {
    let [head, rest @ ..] = segments else {
        return Ok(());
    };

    if let Some(name) = positional(head) {
        for item in items.iter_mut() {
            if !element_accepted(name, item, array_filters)? {
                continue;
            }
            if rest.is_empty() {
                *item = value.clone();
            } else {
                set_in_value(item, head, rest, value, array_filters)?;
            }
        }
        return Ok(());
    }

    let index = head
        .parse::<usize>()
        .map_err(|_| invalid(format!("cannot create field '{head}' in an array")))?;

    while items.len() <= index {
        items.push(Bson::Null);
    }

    let slot = &mut items[index];
    if rest.is_empty() {
        *slot = value.clone();
        return Ok(());
    }
    if matches!(slot, Bson::Null) {
        *slot = Bson::Document(Document::new());
    }

    set_in_value(slot, head, rest, value, array_filters)
}

/// Removes the field at `segments`. An array element is replaced by `null` instead of removed.
fn unset_in_document(document: &mut Document, segments: &[&str]) {
    match segments {
        [] => {}
        [leaf] => {
            document.remove(*leaf);
        }
        [head, rest @ ..] => {
            if let Some(child) = document.get_mut(*head) {
                unset_in_value(child, rest);
            }
        }
    }
}

fn unset_in_value(target: &mut Bson, segments: &[&str]) {
    match target {
        Bson::Document(document) => unset_in_document(document, segments),
        Bson::Array(items) => {
            let [head, rest @ ..] = segments else { return };
            let Some(item) = head.parse::<usize>().ok().and_then(|index| items.get_mut(index)) else {
                return;
            };
            if rest.is_empty() {
                *item = Bson::Null;
            } else {
                unset_in_value(item, rest);
            }
        }
        _ => {}
    }
}

fn value_at_mut<'a>(document: &'a mut Document, segments: &[&str]) -> Option<&'a mut Bson> {
    let [head, rest @ ..] = segments else {
        return None;
    };
    let mut current = document.get_mut(*head)?;

    for segment in rest {
        current = match current {
            Bson::Document(nested) => nested.get_mut(*segment)?,
            Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn push(document: &mut Document, path: &str, segments: &[&str], operand: &Bson) -> DocumentStoreResult<()> {
    let values = match operand {
        Bson::Document(modifiers) if modifiers.contains_key("$each") => match modifiers.get("$each") {
            Some(Bson::Array(each)) => each.clone(),
            _ => return Err(invalid("$each requires an array")),
        },
        single => vec![single.clone()],
    };

    match value_at_mut(document, segments) {
        Some(Bson::Array(items)) => {
            items.extend(values);
            Ok(())
        }
        Some(_) => Err(invalid(format!("the field '{path}' must be an array"))),
        None => set_in_document(document, segments, &Bson::Array(values), &[]),
    }
}

fn pull(document: &mut Document, path: &str, segments: &[&str], condition: &Bson) -> DocumentStoreResult<()> {
    let items = match value_at_mut(document, segments) {
        Some(Bson::Array(items)) => items,
        Some(_) => return Err(invalid(format!("cannot apply $pull to non-array field '{path}'"))),
        None => return Ok(()),
    };

    let mut kept = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        if !element_pulled(&item, condition)? {
            kept.push(item);
        }
    }
    *items = kept;

    Ok(())
}

fn element_pulled(element: &Bson, condition: &Bson) -> DocumentStoreResult<bool> {
    match (element, condition) {
        (_, Bson::Document(operators)) if is_operator_document(operators) => {
            condition_matches(&[element], condition)
        }
        (Bson::Document(element), Bson::Document(fields)) => matches(element, fields),
        _ => Ok(Comparable::from(element) == Comparable::from(condition)),
    }
}

/// Builds the document an upsert starts from: every equality condition of `filter` as a field.
pub(crate) fn seed_from_filter(filter: &Document) -> DocumentStoreResult<Document> {
    let mut seed = Document::new();

    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        if let Bson::Document(operators) = condition {
            if is_operator_document(operators) {
                match operators.get("$eq") {
                    Some(value) => {
                        let segments = key.split('.').collect::<Vec<_>>();
                        set_in_document(&mut seed, &segments, value, &[])?;
                    }
                    None => continue,
                }
                continue;
            }
        }

        let segments = key.split('.').collect::<Vec<_>>();
        set_in_document(&mut seed, &segments, condition, &[])?;
    }

    Ok(seed)
}
