//! Row shaping: turn one result row into a JSON object with stable keys.
//!
//! The first occurrence of a column name claims the bare key; any further
//! occurrence (same column name selected through another table) is keyed
//! `<qualifier>_<name>`. Backends hand values over already converted to
//! JSON (ISO strings for temporals, parsed trees for json/jsonb columns).

use crate::statement::SelectColumn;
use serde_json::Value;
use std::collections::HashSet;

/// A shaped result row; insertion order follows the projection
pub type JsonRow = serde_json::Map<String, Value>;

/// Build the JSON object for one row.
///
/// `values` must be in projection order and the same length as `columns`.
pub fn shape_row(columns: &[SelectColumn], values: Vec<Value>) -> JsonRow {
    let mut row = JsonRow::new();
    let mut used: HashSet<&str> = HashSet::with_capacity(columns.len());

    for (column, value) in columns.iter().zip(values) {
        let key = if used.contains(column.name.as_str()) {
            format!("{}_{}", column.qualifier, column.name)
        } else {
            used.insert(column.name.as_str());
            column.name.clone()
        };

        row.insert(key, value);
    }

    row
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(qualifier: &str, name: &str) -> SelectColumn {
        SelectColumn {
            qualifier: qualifier.into(),
            name: name.into(),
        }
    }

    #[test]
    fn first_occurrence_keeps_bare_key() {
        let columns = vec![col("u", "id"), col("u", "name")];
        let row = shape_row(
            &columns,
            vec![serde_json::json!(1), serde_json::json!("Alice")],
        );

        assert_eq!(row["id"], serde_json::json!(1));
        assert_eq!(row["name"], serde_json::json!("Alice"));
    }

    #[test]
    fn collisions_are_prefixed_with_qualifier() {
        let columns = vec![col("u", "id"), col("o", "id"), col("o", "price")];
        let row = shape_row(
            &columns,
            vec![
                serde_json::json!(1),
                serde_json::json!(77),
                serde_json::json!(999.99),
            ],
        );

        assert_eq!(row["id"], serde_json::json!(1));
        assert_eq!(row["o_id"], serde_json::json!(77));
        assert_eq!(row["price"], serde_json::json!(999.99));
    }

    #[test]
    fn keys_keep_projection_order() {
        let columns = vec![col("u", "b"), col("u", "a"), col("o", "b")];
        let row = shape_row(
            &columns,
            vec![
                serde_json::json!(1),
                serde_json::json!(2),
                serde_json::json!(3),
            ],
        );

        let keys: Vec<&String> = row.keys().collect();
        assert_eq!(keys, ["b", "a", "o_b"]);
    }

    #[test]
    fn triple_collision_reuses_prefixed_form() {
        let columns = vec![col("a", "id"), col("b", "id"), col("c", "id")];
        let row = shape_row(
            &columns,
            vec![
                serde_json::json!(1),
                serde_json::json!(2),
                serde_json::json!(3),
            ],
        );

        assert_eq!(row["id"], serde_json::json!(1));
        assert_eq!(row["b_id"], serde_json::json!(2));
        assert_eq!(row["c_id"], serde_json::json!(3));
    }
}
