//! Authoring of custom rows: overrides of core entities and homebrew.

use crate::core::content_id::content_id;
use crate::core::identifier::{quote, quote_list};
use crate::core::schema::{CategorySchema, Layer, IS_HOMEBREW, PARENT_ID};
use crate::core::value::{bind_value, Attributes, SqliteQuery};
use crate::error::{MigrateError, Result};
use serde_json::Value;
use sqlx::error::ErrorKind;
use sqlx::sqlite::SqliteConnection;
use tracing::info;

/// Create the override of core entity `parent_id`. Returns the new row's id.
///
/// The override starts as a copy of the core row's attributes with
/// `attributes` laid over it, so it is complete even when only a few
/// attributes change. The id is the content identifier of the given `name`
/// attribute, or `parent_id` when no name is given. Fails with a conflict if
/// the core entity is missing or already overridden.
pub async fn create_override(
    conn: &mut SqliteConnection,
    category: &CategorySchema,
    parent_id: &str,
    attributes: &Attributes,
) -> Result<String> {
    let custom = &category.custom_table;

    let exists_sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?",
        quote(&category.core_table)?,
        quote("id")?
    );
    let parents: i64 = sqlx::query_scalar(&exists_sql)
        .bind(parent_id)
        .fetch_one(&mut *conn)
        .await?;
    if parents == 0 {
        return Err(MigrateError::conflict(
            custom.as_str(),
            format!("core entity '{}' does not exist", parent_id),
        ));
    }

    let existing_sql = format!(
        "SELECT {} FROM {} WHERE {} = ?",
        quote("id")?,
        quote(custom)?,
        quote(PARENT_ID)?
    );
    let existing: Option<String> = sqlx::query_scalar(&existing_sql)
        .bind(parent_id)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(existing) = existing {
        return Err(MigrateError::conflict(
            custom.as_str(),
            format!("'{}' is already overridden by '{}'", parent_id, existing),
        ));
    }

    let id = name_id(attributes).unwrap_or_else(|| parent_id.to_string());
    check_attributes(category, attributes)?;

    // Columns not given are copied from the core row.
    let core = quote(&category.core_table)?;
    let mut names = vec!["id"];
    let mut values = vec!["?".to_string()];
    for column in &category.columns {
        names.push(column.name.as_str());
        if attributes.contains_key(&column.name) {
            values.push("?".to_string());
        } else {
            values.push(format!("{}.{}", core, quote(&column.name)?));
        }
    }
    names.push(PARENT_ID);
    names.push(IS_HOMEBREW);
    values.push(format!("{}.{}", core, quote("id")?));
    values.push("0".to_string());

    let sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {}.{} = ?",
        quote(custom)?,
        quote_list(&names)?,
        values.join(", "),
        core,
        core,
        quote("id")?
    );
    let query = bind_attributes(sqlx::query(&sql).bind(id.as_str()), category, attributes)?;
    execute_insert(conn, query.bind(parent_id), custom, &id).await?;
    info!("{}: '{}' overrides '{}'", custom, id, parent_id);
    Ok(id)
}

/// Create a standalone custom entity. Returns its id, the content
/// identifier of its `name` attribute.
pub async fn create_homebrew(
    conn: &mut SqliteConnection,
    category: &CategorySchema,
    attributes: &Attributes,
) -> Result<String> {
    let id = name_id(attributes).ok_or_else(|| {
        MigrateError::Schema(format!(
            "{}: homebrew entities need a non-empty name",
            category.custom_table
        ))
    })?;
    insert_homebrew(conn, category, &id, attributes).await?;
    info!("{}: homebrew '{}' created", category.custom_table, id);
    Ok(id)
}

/// Delete the override of core entity `parent_id`, so the core row is
/// effective again. The override's child rows cascade. Returns whether an
/// override existed.
pub async fn restore_core(
    conn: &mut SqliteConnection,
    category: &CategorySchema,
    parent_id: &str,
) -> Result<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?",
        quote(&category.custom_table)?,
        quote(PARENT_ID)?
    );
    let done = sqlx::query(&sql).bind(parent_id).execute(&mut *conn).await?;
    let restored = done.rows_affected() > 0;
    if restored {
        info!("{}: override of '{}' removed", category.custom_table, parent_id);
    }
    Ok(restored)
}

fn name_id(attributes: &Attributes) -> Option<String> {
    attributes
        .get("name")
        .and_then(Value::as_str)
        .map(content_id)
        .filter(|id| !id.is_empty())
}

fn check_attributes(category: &CategorySchema, attributes: &Attributes) -> Result<()> {
    for key in attributes.keys() {
        if category.column(key).is_none() {
            return Err(MigrateError::Schema(format!(
                "{}: unknown attribute '{}'",
                category.custom_table, key
            )));
        }
    }
    Ok(())
}

/// Bind the given attributes in column order.
fn bind_attributes<'q>(
    mut query: SqliteQuery<'q>,
    category: &CategorySchema,
    attributes: &Attributes,
) -> Result<SqliteQuery<'q>> {
    for column in &category.columns {
        if let Some(value) = attributes.get(&column.name) {
            query = bind_value(query, &column.name, value, column.column_type)?;
        }
    }
    Ok(query)
}

async fn execute_insert(
    conn: &mut SqliteConnection,
    query: SqliteQuery<'_>,
    table: &str,
    id: &str,
) -> Result<()> {
    match query.execute(&mut *conn).await {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if matches!(db.kind(), ErrorKind::UniqueViolation) => Err(
            MigrateError::conflict(table, format!("'{}' already exists: {}", id, db.message())),
        ),
        Err(e) => Err(e.into()),
    }
}

async fn insert_homebrew(
    conn: &mut SqliteConnection,
    category: &CategorySchema,
    id: &str,
    attributes: &Attributes,
) -> Result<()> {
    check_attributes(category, attributes)?;
    let table = category.table(Layer::Custom);

    let mut columns = vec!["id"];
    for column in &category.columns {
        if attributes.contains_key(&column.name) {
            columns.push(column.name.as_str());
        }
    }
    columns.push(IS_HOMEBREW);

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table)?,
        quote_list(&columns)?,
        vec!["?"; columns.len()].join(", ")
    );
    let query = bind_attributes(sqlx::query(&sql).bind(id), category, attributes)?;
    execute_insert(conn, query.bind(true), table, id).await
}
