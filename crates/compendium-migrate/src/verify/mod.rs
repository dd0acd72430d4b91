//! Validation report comparing legacy collection columns with their
//! normalized relation tables.
//!
//! For every relation table of every layer the report counts:
//!
//! - parent rows whose legacy column still holds a non-empty collection
//! - rows and distinct parents in the relation table
//! - orphaned rows whose referenced id is missing from its table
//!
//! The comparison is reported, never asserted. A gap is expected whenever
//! elements were skipped during normalization.

pub mod query;
pub mod types;

pub use types::RelationValidation;

use crate::core::db::column_exists;
use crate::core::schema::{CategorySchema, Layer, RelationSpec};
use crate::error::Result;
use query::{legacy_count_query, normalized_count_query, orphan_count_query};
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, warn};

/// Validate one relation table.
pub async fn validate_relation(
    conn: &mut SqliteConnection,
    category: &CategorySchema,
    relation: &RelationSpec,
    layer: Layer,
) -> Result<RelationValidation> {
    let parent_table = category.table(layer);

    let mut legacy_column = None;
    if let Some(ref column) = relation.legacy_column {
        if column_exists(conn, parent_table, column).await? {
            legacy_column = Some(column.clone());
        }
    }
    let legacy_rows_with_values = match legacy_column {
        Some(ref column) => {
            sqlx::query_scalar::<_, i64>(&legacy_count_query(parent_table, column)?)
                .fetch_one(&mut *conn)
                .await?
        }
        None => 0,
    };

    let (normalized_rows, normalized_parents): (i64, i64) =
        sqlx::query_as(&normalized_count_query(relation, layer)?)
            .fetch_one(&mut *conn)
            .await?;

    let orphaned_rows: i64 = sqlx::query_scalar(&orphan_count_query(relation, layer)?)
        .fetch_one(&mut *conn)
        .await?;

    let validation = RelationValidation {
        relation: relation.name.clone(),
        layer,
        parent_table: parent_table.to_string(),
        relation_table: relation.table(layer).to_string(),
        legacy_column,
        legacy_rows_with_values,
        normalized_rows,
        normalized_parents,
        orphaned_rows,
    };

    debug!(
        "{}: legacy={}, normalized={} ({} parents), orphaned={}",
        validation.relation_table,
        validation.legacy_rows_with_values,
        validation.normalized_rows,
        validation.normalized_parents,
        validation.orphaned_rows
    );
    if validation.orphaned_rows > 0 {
        warn!(
            "{}: {} rows reference missing entities",
            validation.relation_table, validation.orphaned_rows
        );
    }
    if validation.unmatched_parents() > 0 {
        warn!(
            "{}: {} parents with legacy values have no normalized rows",
            validation.relation_table,
            validation.unmatched_parents()
        );
    }

    Ok(validation)
}

/// Validate every relation of `categories`, core layer first.
pub async fn validate_categories(
    conn: &mut SqliteConnection,
    categories: &[&CategorySchema],
) -> Result<Vec<RelationValidation>> {
    let mut results = Vec::new();
    for category in categories {
        for relation in &category.relations {
            for layer in Layer::ALL {
                results.push(validate_relation(conn, category, relation, layer).await?);
            }
        }
    }
    Ok(results)
}
