//! SQL generation for the validation report.
//!
//! All three counts are plain `COUNT(*)` queries so they can run inside the
//! migration transaction before it commits.

use crate::core::identifier::{qualified, quote, string_literal};
use crate::core::schema::{Layer, RelationSpec, RelationTarget, SOURCE_TABLE};
use crate::error::Result;

/// Count parent rows whose legacy column holds a non-empty collection.
pub fn legacy_count_query(parent_table: &str, legacy_column: &str) -> Result<String> {
    let col = quote(legacy_column)?;
    Ok(format!(
        "SELECT COUNT(*) FROM {table}\n\
         WHERE {col} IS NOT NULL AND TRIM({col}) NOT IN ('', '[]', 'null')",
        table = quote(parent_table)?,
        col = col,
    ))
}

/// Count rows and distinct parents of a relation table.
pub fn normalized_count_query(relation: &RelationSpec, layer: Layer) -> Result<String> {
    Ok(format!(
        "SELECT COUNT(*), COUNT(DISTINCT {parent}) FROM {table}",
        parent = quote(&relation.parent_column)?,
        table = quote(relation.table(layer))?,
    ))
}

/// Count relation rows whose referenced id is missing from the table named
/// by their discriminator (or the fixed target).
pub fn orphan_count_query(relation: &RelationSpec, layer: Layer) -> Result<String> {
    let reference = qualified("r", &relation.reference_column)?;
    let id = quote("id")?;
    let exists_in = |table: &str| -> Result<String> {
        Ok(format!(
            "EXISTS (SELECT 1 FROM {} AS t WHERE t.{} = {})",
            quote(table)?,
            id,
            reference
        ))
    };

    let present = match relation.target {
        RelationTarget::Fixed { ref table } => exists_in(table)?,
        RelationTarget::Discriminated { ref candidates, .. } => {
            let discriminator = qualified("r", SOURCE_TABLE)?;
            let arms = candidates
                .iter()
                .map(|table| {
                    Ok(format!(
                        "({} = {} AND {})",
                        discriminator,
                        string_literal(table),
                        exists_in(table)?
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            format!("({})", arms.join(" OR "))
        }
    };

    Ok(format!(
        "SELECT COUNT(*) FROM {} AS r WHERE NOT {}",
        quote(relation.table(layer))?,
        present
    ))
}
