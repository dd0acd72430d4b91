//! Collection normalizer: legacy JSON collection columns to relation rows.
//!
//! Older rows keep their child collections as a JSON array in a single
//! column, e.g. `[{"item_id": "dagger", "quantity": 2}]`. The normalizer
//! decomposes such a value into rows of the declared relation table. Problems
//! with one value or one element are recorded as [`Diagnostic`]s and never
//! abort the batch; only store failures that are not constraint violations
//! propagate as errors. The legacy column itself is never modified.

use crate::core::db::column_exists;
use crate::core::identifier::{quote, quote_list};
use crate::core::schema::{
    CategorySchema, Layer, RelationSpec, RelationTarget, QUANTITY, SOURCE_TABLE,
};
use crate::core::value::{bind_value, Attributes};
use crate::error::{MigrateError, Result};
use crate::resolver::EntityResolver;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::error::ErrorKind;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use tracing::{debug, info, warn};

/// Generic id key accepted in every legacy element.
const GENERIC_ID_KEY: &str = "id";

/// Class of a row- or element-level problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Legacy value is not a JSON array.
    Parse,
    /// Element carries no referenced-entity id.
    MissingReference,
    /// Element is malformed in another way (e.g. bad quantity).
    InvalidElement,
    /// Referenced id is absent from the table its discriminator names.
    Referential,
    /// The store rejected the row with a constraint violation.
    Integrity,
    /// A free-text reference matched nothing in any candidate table.
    Unresolved,
}

/// One row- or element-level problem, reported rather than raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub parent_id: String,
    pub relation: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        parent_id: impl Into<String>,
        relation: impl Into<String>,
        kind: DiagnosticKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            parent_id: parent_id.into(),
            relation: relation.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Counts and diagnostics for one or more normalized values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeOutcome {
    /// Relation rows newly inserted.
    pub migrated: usize,
    /// Elements whose row already existed (re-runs, duplicates in a value).
    pub already_present: usize,
    /// Elements skipped because they could not become a row.
    pub skipped: usize,
    pub errors: Vec<Diagnostic>,
}

impl NormalizeOutcome {
    pub fn absorb(&mut self, other: NormalizeOutcome) {
        self.migrated += other.migrated;
        self.already_present += other.already_present;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }
}

/// A legacy element decoded into relation row values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRow {
    pub reference_id: String,
    pub quantity: i64,
    /// Table the reference lives in.
    pub source_table: String,
    /// Values of the relation's payload columns present in the element.
    pub payload: Attributes,
}

/// Whether a legacy value denotes "no collection".
pub fn is_empty_collection(raw: Option<&str>) -> bool {
    match raw.map(str::trim) {
        None => true,
        Some(v) => v.is_empty() || v == "[]" || v == "null",
    }
}

/// Parse a legacy value into its elements. Anything but a JSON array is a
/// parse error.
pub fn parse_collection(raw: &str) -> std::result::Result<Vec<Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(elements)) => Ok(elements),
        Ok(other) => Err(format!("expected a JSON array, got {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decode one legacy element for `relation`.
pub fn decode_element(
    relation: &RelationSpec,
    element: &Value,
) -> std::result::Result<RelationRow, (DiagnosticKind, String)> {
    let object = element.as_object().ok_or_else(|| {
        (
            DiagnosticKind::MissingReference,
            format!("element is {}, not an object", json_kind(element)),
        )
    })?;

    let non_empty = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let reference_id = non_empty(&relation.legacy_key)
        .or_else(|| non_empty(GENERIC_ID_KEY))
        .ok_or_else(|| {
            (
                DiagnosticKind::MissingReference,
                format!(
                    "element has no '{}' or '{}'",
                    relation.legacy_key, GENERIC_ID_KEY
                ),
            )
        })?
        .to_string();

    let quantity = match object.get(QUANTITY) {
        None | Some(Value::Null) => 1,
        Some(q) => match q.as_i64() {
            Some(n) if n > 0 => n,
            _ => {
                return Err((
                    DiagnosticKind::InvalidElement,
                    format!("{}: invalid quantity {}", reference_id, q),
                ))
            }
        },
    };

    let source_table = match relation.target {
        RelationTarget::Fixed { ref table } => table.clone(),
        RelationTarget::Discriminated {
            ref candidates,
            ref default,
        } => match non_empty(SOURCE_TABLE) {
            None => default.clone(),
            Some(declared) if candidates.iter().any(|c| c == declared) => declared.to_string(),
            Some(declared) => {
                return Err((
                    DiagnosticKind::Referential,
                    format!(
                        "{}: source_table '{}' is not one of {:?}",
                        reference_id, declared, candidates
                    ),
                ))
            }
        },
    };

    let payload = relation
        .columns
        .iter()
        .filter_map(|c| object.get(&c.name).map(|v| (c.name.clone(), v.clone())))
        .collect();

    Ok(RelationRow {
        reference_id,
        quantity,
        source_table,
        payload,
    })
}

/// Constraint violation message, if `err` is one.
fn constraint_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => Some(db.message().to_string()),
            _ => None,
        },
        _ => None,
    }
}

/// Normalizer for one relation table of one layer.
pub struct CollectionNormalizer<'a> {
    relation: &'a RelationSpec,
    resolver: &'a EntityResolver,
    insert_sql: String,
}

impl<'a> CollectionNormalizer<'a> {
    /// `resolver` must cover every candidate table of the relation.
    pub fn new(relation: &'a RelationSpec, layer: Layer, resolver: &'a EntityResolver) -> Result<Self> {
        for table in relation.target.candidates() {
            if !resolver.covers(table) {
                return Err(MigrateError::Schema(format!(
                    "relation '{}': resolver snapshot does not cover '{}'",
                    relation.name, table
                )));
            }
        }

        let mut columns = vec![
            relation.parent_column.as_str(),
            relation.reference_column.as_str(),
        ];
        if relation.has_quantity {
            columns.push(QUANTITY);
        }
        if relation.target.is_discriminated() {
            columns.push(SOURCE_TABLE);
        }
        columns.extend(relation.columns.iter().map(|c| c.name.as_str()));
        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert_sql = format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
            quote(relation.table(layer))?,
            quote_list(&columns)?,
            placeholders
        );

        Ok(Self {
            relation,
            resolver,
            insert_sql,
        })
    }

    /// Normalize the legacy value of one parent row.
    pub async fn normalize(
        &self,
        conn: &mut SqliteConnection,
        parent_id: &str,
        legacy_value: Option<&str>,
    ) -> Result<NormalizeOutcome> {
        let mut outcome = NormalizeOutcome::default();
        let raw = match legacy_value {
            Some(raw) if !is_empty_collection(Some(raw)) => raw,
            _ => return Ok(outcome),
        };

        let elements = match parse_collection(raw) {
            Ok(elements) => elements,
            Err(message) => {
                outcome.errors.push(self.diagnostic(parent_id, DiagnosticKind::Parse, message));
                return Ok(outcome);
            }
        };

        for element in &elements {
            let row = match decode_element(self.relation, element) {
                Ok(row) => row,
                Err((kind, message)) => {
                    outcome.skipped += 1;
                    outcome.errors.push(self.diagnostic(parent_id, kind, message));
                    continue;
                }
            };

            if !self.resolver.contains(&row.source_table, &row.reference_id) {
                outcome.skipped += 1;
                outcome.errors.push(self.diagnostic(
                    parent_id,
                    DiagnosticKind::Referential,
                    format!("'{}' not found in {}", row.reference_id, row.source_table),
                ));
                continue;
            }

            let mut query = sqlx::query(&self.insert_sql)
                .bind(parent_id)
                .bind(row.reference_id.as_str());
            if self.relation.has_quantity {
                query = query.bind(row.quantity);
            }
            if self.relation.target.is_discriminated() {
                query = query.bind(row.source_table.as_str());
            }
            let mut bound = Ok(query);
            for column in &self.relation.columns {
                let value = row.payload.get(&column.name).unwrap_or(&Value::Null);
                bound = bound.and_then(|q| bind_value(q, &column.name, value, column.column_type));
            }
            let query = match bound {
                Ok(query) => query,
                Err(e) => {
                    outcome.skipped += 1;
                    outcome.errors.push(self.diagnostic(
                        parent_id,
                        DiagnosticKind::InvalidElement,
                        format!("{}: {}", row.reference_id, e),
                    ));
                    continue;
                }
            };

            match query.execute(&mut *conn).await {
                Ok(done) if done.rows_affected() == 0 => outcome.already_present += 1,
                Ok(_) => outcome.migrated += 1,
                Err(e) => match constraint_violation(&e) {
                    Some(message) => {
                        outcome.skipped += 1;
                        outcome.errors.push(self.diagnostic(
                            parent_id,
                            DiagnosticKind::Integrity,
                            format!("{}: {}", row.reference_id, message),
                        ));
                    }
                    None => return Err(e.into()),
                },
            }
        }

        Ok(outcome)
    }

    fn diagnostic(&self, parent_id: &str, kind: DiagnosticKind, message: String) -> Diagnostic {
        debug!("{} [{}] {:?}: {}", self.relation.name, parent_id, kind, message);
        Diagnostic::new(parent_id, self.relation.name.clone(), kind, message)
    }
}

/// Result of normalizing one relation over every row of one parent table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRun {
    pub relation: String,
    pub parent_table: String,
    pub target_table: String,
    /// Parent rows read.
    pub parents_scanned: usize,
    /// Parent rows that gained at least one relation row.
    pub parents_migrated: usize,
    /// The parent table no longer has the legacy column.
    pub legacy_column_missing: bool,
    pub outcome: NormalizeOutcome,
}

/// Normalize `relation` for every row of the `layer` table of `category`.
pub async fn normalize_relation(
    conn: &mut SqliteConnection,
    category: &CategorySchema,
    relation: &RelationSpec,
    layer: Layer,
    resolver: &EntityResolver,
) -> Result<RelationRun> {
    let legacy_column = relation.legacy_column.as_deref().ok_or_else(|| {
        MigrateError::Schema(format!(
            "relation '{}' has no legacy column to normalize",
            relation.name
        ))
    })?;
    let parent_table = category.table(layer);

    let mut run = RelationRun {
        relation: relation.name.clone(),
        parent_table: parent_table.to_string(),
        target_table: relation.table(layer).to_string(),
        ..Default::default()
    };

    if !column_exists(conn, parent_table, legacy_column).await? {
        info!(
            "{}.{}: legacy column absent, nothing to normalize",
            parent_table, legacy_column
        );
        run.legacy_column_missing = true;
        return Ok(run);
    }

    let sql = format!(
        "SELECT {id}, {legacy} FROM {table} ORDER BY {id}",
        id = quote("id")?,
        legacy = quote(legacy_column)?,
        table = quote(parent_table)?
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    let mut parents = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.try_get("id")?;
        let value: Option<String> = row.try_get_unchecked(legacy_column)?;
        parents.push((id, value));
    }

    let normalizer = CollectionNormalizer::new(relation, layer, resolver)?;
    for (parent_id, value) in &parents {
        run.parents_scanned += 1;
        let outcome = normalizer.normalize(conn, parent_id, value.as_deref()).await?;
        if outcome.migrated > 0 {
            run.parents_migrated += 1;
        }
        run.outcome.absorb(outcome);
    }

    info!(
        "{}.{} -> {}: {} migrated, {} already present, {} skipped",
        parent_table,
        legacy_column,
        run.target_table,
        run.outcome.migrated,
        run.outcome.already_present,
        run.outcome.skipped
    );
    if !run.outcome.errors.is_empty() {
        warn!(
            "{} -> {}: {} diagnostics",
            parent_table,
            run.target_table,
            run.outcome.errors.len()
        );
    }

    Ok(run)
}
