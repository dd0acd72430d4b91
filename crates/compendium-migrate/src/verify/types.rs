//! Type definitions for the validation report.

use crate::core::schema::Layer;
use serde::{Deserialize, Serialize};

/// Legacy versus normalized counts for one relation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationValidation {
    pub relation: String,
    pub layer: Layer,
    pub parent_table: String,
    pub relation_table: String,
    /// `None` when the parent table no longer has its legacy column.
    pub legacy_column: Option<String>,
    /// Parent rows whose legacy column holds a non-empty collection.
    pub legacy_rows_with_values: i64,
    /// Rows in the relation table.
    pub normalized_rows: i64,
    /// Distinct parents in the relation table.
    pub normalized_parents: i64,
    /// Relation rows whose referenced id is missing from its table.
    pub orphaned_rows: i64,
}

impl RelationValidation {
    /// Parents with legacy values that gained no relation rows. Expected
    /// when every element of a value was skipped.
    pub fn unmatched_parents(&self) -> i64 {
        (self.legacy_rows_with_values - self.normalized_parents).max(0)
    }

    /// Whether the counts line up and nothing is orphaned.
    pub fn is_consistent(&self) -> bool {
        self.orphaned_rows == 0 && self.unmatched_parents() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validation(legacy: i64, parents: i64, orphans: i64) -> RelationValidation {
        RelationValidation {
            relation: "equipment_items".into(),
            layer: Layer::Core,
            parent_table: "core_equipment".into(),
            relation_table: "core_equipment_items".into(),
            legacy_column: Some("items".into()),
            legacy_rows_with_values: legacy,
            normalized_rows: parents * 2,
            normalized_parents: parents,
            orphaned_rows: orphans,
        }
    }

    #[test]
    fn test_consistency() {
        assert!(validation(3, 3, 0).is_consistent());
        assert_eq!(validation(3, 2, 0).unmatched_parents(), 1);
        assert!(!validation(3, 2, 0).is_consistent());
        assert!(!validation(3, 3, 1).is_consistent());
        // Rows authored directly in the relation table have no legacy value.
        assert_eq!(validation(1, 4, 0).unmatched_parents(), 0);
    }
}
