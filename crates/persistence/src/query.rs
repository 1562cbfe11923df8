//! Filters for the content retrieval engine.

use {
    chrono::{DateTime, Utc},
    ctigate_common::{ContentBinding, entities::CollectionId},
    sqlx::{QueryBuilder, Sqlite},
};

/// Which content blocks a query, count or page covers.
///
/// The time window is `(start_time, end_time]`: a block labelled exactly
/// `start_time` is excluded, one labelled exactly `end_time` is included.
/// An empty `bindings` list matches every block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentQuery {
    pub collection_id: Option<CollectionId>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub bindings: Vec<ContentBinding>,
}

impl ContentQuery {
    pub fn collection(collection_id: CollectionId) -> Self {
        Self {
            collection_id: Some(collection_id),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn window(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    #[must_use]
    pub fn bindings(mut self, bindings: Vec<ContentBinding>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Append a `WHERE` clause over the `cb` alias of `content_blocks`.
    pub(crate) fn push_filters(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(collection_id) = self.collection_id {
            qb.push(
                " AND cb.id IN (SELECT content_block_id FROM collection_content_blocks \
                 WHERE collection_id = ",
            )
            .push_bind(collection_id)
            .push(")");
        }
        if let Some(start) = self.start_time {
            qb.push(" AND cb.timestamp_label > ")
                .push_bind(start.timestamp_micros());
        }
        if let Some(end) = self.end_time {
            qb.push(" AND cb.timestamp_label <= ")
                .push_bind(end.timestamp_micros());
        }
        if self.bindings.is_empty() {
            return;
        }
        qb.push(" AND (");
        for (i, binding) in self.bindings.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push("(cb.binding_id = ").push_bind(binding.binding.clone());
            if !binding.subtypes.is_empty() {
                qb.push(" AND cb.binding_subtype IN (");
                let mut list = qb.separated(", ");
                for subtype in &binding.subtypes {
                    list.push_bind(subtype.clone());
                }
                list.push_unseparated(")");
            }
            qb.push(")");
        }
        qb.push(")");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn sql(query: &ContentQuery) -> String {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM content_blocks cb");
        query.push_filters(&mut qb);
        qb.sql().to_string()
    }

    #[test]
    fn empty_query_has_no_conditions() {
        assert_eq!(
            sql(&ContentQuery::default()),
            "SELECT COUNT(*) FROM content_blocks cb WHERE 1 = 1"
        );
    }

    #[test]
    fn window_is_start_exclusive_end_inclusive() {
        let now = Utc::now();
        let s = sql(&ContentQuery::collection(1).window(Some(now), Some(now)));
        assert!(s.contains("cb.timestamp_label > ?"));
        assert!(s.contains("cb.timestamp_label <= ?"));
        assert!(s.contains("collection_id = ?"));
    }

    #[test]
    fn bindings_are_or_joined_with_subtype_lists() {
        let s = sql(&ContentQuery::default().bindings(vec![
            ContentBinding::new("a"),
            ContentBinding::with_subtypes("b", ["x", "y"]),
        ]));
        assert!(s.ends_with(
            " AND ((cb.binding_id = ?) OR (cb.binding_id = ? AND cb.binding_subtype IN (?, ?)))"
        ));
    }
}
