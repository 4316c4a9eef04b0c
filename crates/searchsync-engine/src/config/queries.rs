//! Built-in extract queries for the `content` schema.
//!
//! All of them page by last-modified timestamp: `$1` is the watermark bound
//! as text, `$2` the batch size. Rows come back ascending on `modified`.

use searchsync_types::entity::EntityKind;

/// Film works with their people and genres pre-aggregated as JSON arrays.
/// `modified` is the latest change across the film and its relations, so an
/// edit to a person or genre re-indexes the films that reference it.
const MOVIES_QUERY: &str = r"
SELECT
    fw.id,
    fw.title,
    fw.description,
    fw.rating,
    fw.type,
    fw.created,
    GREATEST(fw.modified, COALESCE(MAX(p.modified), fw.modified), COALESCE(MAX(g.modified), fw.modified)) AS modified,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object(
            'person_role', pfw.role,
            'person_id', p.id,
            'person_name', p.full_name
        )) FILTER (WHERE p.id IS NOT NULL),
        '[]'
    ) AS persons,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object(
            'genre_id', g.id,
            'genre_name', g.name
        )) FILTER (WHERE g.id IS NOT NULL),
        '[]'
    ) AS genres
FROM content.film_work fw
LEFT JOIN content.person_film_work pfw ON pfw.film_work_id = fw.id
LEFT JOIN content.person p ON p.id = pfw.person_id
LEFT JOIN content.genre_film_work gfw ON gfw.film_work_id = fw.id
LEFT JOIN content.genre g ON g.id = gfw.genre_id
GROUP BY fw.id
HAVING GREATEST(fw.modified, COALESCE(MAX(p.modified), fw.modified), COALESCE(MAX(g.modified), fw.modified)) > $1::text::timestamptz
ORDER BY modified ASC
LIMIT $2
";

const PERSONS_QUERY: &str = r"
SELECT p.id, p.full_name, p.modified
FROM content.person p
WHERE p.modified > $1::text::timestamptz
ORDER BY p.modified ASC
LIMIT $2
";

const GENRES_QUERY: &str = r"
SELECT g.id, g.name, g.description, g.modified
FROM content.genre g
WHERE g.modified > $1::text::timestamptz
ORDER BY g.modified ASC
LIMIT $2
";

/// Default query for an entity kind (timestamp cursor on `modified`).
#[must_use]
pub fn default_query(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Movie => MOVIES_QUERY,
        EntityKind::Person => PERSONS_QUERY,
        EntityKind::Genre => GENRES_QUERY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_query_binds_both_parameters_and_orders_ascending() {
        for kind in [EntityKind::Movie, EntityKind::Person, EntityKind::Genre] {
            let q = default_query(kind);
            assert!(q.contains("$1::text::timestamptz"), "{kind}");
            assert!(q.contains("LIMIT $2"), "{kind}");
            assert!(q.contains("ASC"), "{kind}");
        }
    }
}
