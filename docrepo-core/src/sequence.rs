//! Auto-increment identifier generation.

use bson::{Bson, doc};
use tracing::debug;

use crate::{
    backend::{FindOptions, StoreBackend},
    cancel::CancellationToken,
    connection::ConnectionHandle,
    document::ID_FIELD,
    error::DocumentStoreResult,
};

/// Parses an identifier as an integer sequence value.
fn numeric_id(id: &Bson) -> Option<i64> {
    match id {
        Bson::String(s) => s.trim().parse().ok(),
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

/// Returns one more than the largest numeric id in `ids`, or 1 when there is none.
pub fn next_in_sequence<'a>(ids: impl IntoIterator<Item = &'a Bson>) -> i64 {
    ids.into_iter()
        .filter_map(numeric_id)
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

impl<B: StoreBackend> ConnectionHandle<B> {
    /// Computes the next integer identifier for `collection`.
    ///
    /// Returns the largest `_id` that parses as an integer, plus one, or 1 for an empty
    /// collection or one with no numeric ids. Identifiers are strings, so a sorted read would
    /// rank `"9"` above `"10"`; every id is inspected instead.
    ///
    /// # Performance
    ///
    /// Each call reads the `_id` of every document in the collection, so the cost grows
    /// linearly with its size and is paid on every insert without a caller-supplied id. Pass
    /// an explicit id for large collections.
    ///
    /// Nothing is reserved: two callers outside a shared transaction can receive the same value.
    pub async fn next_id(
        &mut self,
        collection: &str,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<i64> {
        let options = FindOptions {
            projection: Some(doc! { ID_FIELD: 1 }),
            ..FindOptions::default()
        };

        let rows = self
            .find_with_options(collection, doc! {}, options, cancel)
            .await?;
        let next = next_in_sequence(rows.iter().filter_map(|row| row.get(ID_FIELD)));

        debug!(target: "docrepo", collection, next, "Generated identifier");

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continues_after_the_largest_numeric_id() {
        let ids = [Bson::from("1"), Bson::from("3"), Bson::from("2")];

        assert_eq!(next_in_sequence(&ids), 4);
    }

    #[test]
    fn compares_numerically_not_lexically() {
        let ids = [Bson::from("9"), Bson::from("10")];

        assert_eq!(next_in_sequence(&ids), 11);
    }

    #[test]
    fn starts_at_one_without_numeric_ids() {
        assert_eq!(next_in_sequence(&[Bson::from("abc")]), 1);
        assert_eq!(next_in_sequence(Vec::<&Bson>::new()), 1);
    }
}
