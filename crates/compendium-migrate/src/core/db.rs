//! SQLite connection setup and catalog helpers.

use crate::config::DatabaseConfig;
use crate::core::identifier::quote;
use crate::core::schema::SchemaRegistry;
use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::ConnectOptions;
use std::str::FromStr;
use tracing::debug;

/// Open the single writer connection described by `config`.
pub async fn connect(config: &DatabaseConfig) -> Result<SqliteConnection> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .foreign_keys(config.foreign_keys)
        .create_if_missing(true);
    let conn = options.connect().await?;
    debug!("Opened database {}", config.url);
    Ok(conn)
}

/// Check whether a table or view exists.
pub async fn object_exists(conn: &mut SqliteConnection, name: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

/// Check whether `table` has a column named `column`.
pub async fn column_exists(conn: &mut SqliteConnection, table: &str, column: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(&mut *conn)
            .await?;
    Ok(count > 0)
}

/// Count the rows of a table or view.
pub async fn count_rows(conn: &mut SqliteConnection, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote(table)?);
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await?;
    Ok(count)
}

/// Create every table and index the registry declares, if absent.
pub async fn create_schema(conn: &mut SqliteConnection, registry: &SchemaRegistry) -> Result<usize> {
    let stmts = registry.ddl_statements()?;
    for stmt in &stmts {
        debug!("{}", stmt);
        sqlx::query(stmt).execute(&mut *conn).await?;
    }
    Ok(stmts.len())
}

/// Open a fresh in-memory database with foreign keys enforced.
#[cfg(test)]
pub(crate) async fn memory() -> SqliteConnection {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        foreign_keys: true,
    };
    connect(&config).await.unwrap()
}
