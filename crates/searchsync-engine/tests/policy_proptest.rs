use std::time::Duration;

use proptest::prelude::*;
use searchsync_engine::config::{parser, validator};
use searchsync_engine::{compute_backoff, BackoffPolicy};
use searchsync_state::{commit_watermark, load_watermark, SqliteCheckpointStore};
use searchsync_types::entity::{CursorKind, EntityName};
use searchsync_types::watermark::Watermark;

proptest! {
    #[test]
    fn backoff_is_monotone_and_clamped(
        start in 0.001_f64..5.0,
        factor in 0.0_f64..4.0,
        extra in 0.0_f64..60.0,
        attempt in 0_u32..64,
    ) {
        let policy = BackoffPolicy { start_secs: start, factor, border_secs: start + extra };
        let current = compute_backoff(&policy, attempt);
        let next = compute_backoff(&policy, attempt + 1);
        let border = Duration::from_secs_f64(policy.border_secs);

        prop_assert!(current <= next);
        prop_assert!(next <= border);
        prop_assert!(compute_backoff(&policy, 0) >= Duration::from_secs_f64(start).min(border));
    }

    #[test]
    fn stored_watermark_never_regresses(values in prop::collection::vec(any::<i64>(), 1..20)) {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let entity = EntityName::new("genres");
        for value in &values {
            commit_watermark(&store, &entity, &Watermark::Int64 { value: *value }).unwrap();
        }
        let stored = load_watermark(&store, &entity, CursorKind::Int64).unwrap();
        let max = values.iter().copied().max().unwrap();
        prop_assert_eq!(stored, Watermark::Int64 { value: max });
    }

    #[test]
    fn non_timestamp_cursor_requires_custom_query(cursor_idx in 0_usize..3, with_query in any::<bool>()) {
        let cursor = ["uuid", "timestamp", "int64"][cursor_idx];
        let query_yaml = if with_query {
            "    query: \"SELECT * FROM content.person WHERE id > $1::text::uuid LIMIT $2\"\n"
        } else {
            ""
        };

        let yaml = format!(
            r#"
version: "1.0"
pipeline: prop_cursor_policy
source:
  host: localhost
  user: app
  database: movies_database
index:
  url: http://localhost:9200
entities:
  - name: persons
    kind: person
    cursor: {cursor}
    cursor_field: id
{query_yaml}"#
        );

        let config = parser::parse_pipeline_str(&yaml).expect("generated yaml must parse");
        let result = validator::validate_pipeline(&config);

        if cursor == "timestamp" || with_query {
            prop_assert!(result.is_ok(), "{:?}", result.err());
        } else {
            prop_assert!(result.is_err());
        }
    }
}
