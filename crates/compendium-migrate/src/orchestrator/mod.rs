//! Migration orchestrator - main workflow coordinator.
//!
//! One run is one transaction: schema creation, normalization of every legacy
//! collection column in scope, view rebuild and the validation report all
//! see the same uncommitted state. Any fatal error rolls the whole run back.

use crate::config::Config;
use crate::core::db::{connect, create_schema};
use crate::core::schema::{CategorySchema, Layer, SchemaRegistry};
use crate::error::Result;
use crate::normalize::{normalize_relation, Diagnostic};
use crate::resolver::EntityResolver;
use crate::verify::{validate_categories, RelationValidation};
use crate::views::rebuild_views;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tracing::{error, info, warn};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    registry: SchemaRegistry,
    conn: SqliteConnection,
}

/// Outcome of normalizing one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: String,

    /// Parent rows that gained at least one relation row.
    pub entities_migrated: usize,

    /// Relation rows inserted.
    pub relations_migrated: usize,

    /// Elements whose relation row already existed.
    pub already_present: usize,

    /// Elements that could not become a relation row.
    pub skipped: usize,

    /// Row- and element-level problems, in processing order.
    pub diagnostics: Vec<Diagnostic>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: `completed` or `dry_run`.
    pub status: String,

    /// Hash of the configuration the run used.
    pub config_hash: String,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Whether the run was rolled back on purpose.
    pub dry_run: bool,

    /// Per-category normalization reports.
    pub categories: Vec<CategoryReport>,

    /// Legacy versus normalized counts per relation table.
    pub validation: Vec<RelationValidation>,
}

impl MigrationResult {
    /// Convert result to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Number of diagnostics across all categories.
    pub fn diagnostic_count(&self) -> usize {
        self.categories.iter().map(|c| c.diagnostics.len()).sum()
    }
}

impl Orchestrator {
    /// Create a new orchestrator, opening the configured database.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let conn = connect(&config.database).await?;
        Self::with_connection(config, conn)
    }

    /// Create an orchestrator over an already open connection.
    pub fn with_connection(config: Config, conn: SqliteConnection) -> Result<Self> {
        config.validate()?;
        let registry = config.registry();
        Ok(Self {
            config,
            registry,
            conn,
        })
    }

    /// The connection the orchestrator runs on.
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    /// Give back the connection.
    pub fn into_connection(self) -> SqliteConnection {
        self.conn
    }

    /// Run the migration.
    pub async fn run(&mut self) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let dry_run = self.config.migration.dry_run;

        info!("Starting migration run: {}", run_id);

        let categories = select_categories(&self.registry, &self.config.migration.categories)?;
        info!(
            "Categories in scope: {}",
            categories
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut tx = self.conn.begin().await?;
        let outcome = apply(&mut *tx, &self.registry, &categories, &self.config).await;

        let (reports, validation) = match outcome {
            Ok(out) => out,
            Err(e) => {
                error!("Migration failed, rolling back: {}", e);
                if let Err(rollback) = tx.rollback().await {
                    error!("Rollback failed: {}", rollback);
                }
                return Err(e);
            }
        };

        let status = if dry_run {
            info!("Dry run: rolling back");
            tx.rollback().await?;
            "dry_run"
        } else {
            tx.commit().await?;
            "completed"
        };

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let result = MigrationResult {
            run_id,
            status: status.to_string(),
            config_hash: self.config.hash(),
            started_at,
            completed_at,
            duration_seconds: duration,
            dry_run,
            categories: reports,
            validation,
        };

        info!(
            "Migration {}: {} categories, {} relation rows, {} diagnostics in {:.1}s",
            result.status,
            result.categories.len(),
            result
                .categories
                .iter()
                .map(|c| c.relations_migrated)
                .sum::<usize>(),
            result.diagnostic_count(),
            result.duration_seconds
        );

        Ok(result)
    }
}

/// Categories named in the configuration, or every category that still has
/// legacy collection columns.
fn select_categories<'a>(
    registry: &'a SchemaRegistry,
    names: &[String],
) -> Result<Vec<&'a CategorySchema>> {
    if names.is_empty() {
        return Ok(registry
            .categories
            .iter()
            .filter(|c| c.legacy_relations().next().is_some())
            .collect());
    }
    names
        .iter()
        .map(|name| registry.category(name))
        .collect()
}

/// Every mutating step plus the validation report, on one connection.
async fn apply(
    conn: &mut SqliteConnection,
    registry: &SchemaRegistry,
    categories: &[&CategorySchema],
    config: &Config,
) -> Result<(Vec<CategoryReport>, Vec<RelationValidation>)> {
    info!("Phase 1: Creating normalized tables");
    let statements = create_schema(conn, registry).await?;
    info!("Applied {} schema statements", statements);

    info!("Phase 2: Normalizing legacy collections");
    let mut reports = Vec::with_capacity(categories.len());
    for category in categories {
        reports.push(normalize_category(conn, category, config).await?);
    }

    if config.migration.rebuild_views {
        info!("Phase 3: Rebuilding merge views");
        let all: Vec<&CategorySchema> = registry.categories.iter().collect();
        rebuild_views(conn, &all).await?;
    } else {
        info!("Phase 3: View rebuild disabled");
    }

    info!("Phase 4: Validating");
    let validation = match validate_categories(conn, categories).await {
        Ok(validation) => validation,
        Err(e) => {
            warn!("Validation report unavailable: {}", e);
            Vec::new()
        }
    };

    Ok((reports, validation))
}

async fn normalize_category(
    conn: &mut SqliteConnection,
    category: &CategorySchema,
    config: &Config,
) -> Result<CategoryReport> {
    let mut report = CategoryReport {
        category: category.name.clone(),
        ..Default::default()
    };

    for relation in category.legacy_relations() {
        let resolver =
            EntityResolver::snapshot(conn, &relation.target.candidates(), &config.resolver).await?;
        for layer in Layer::ALL {
            let run = normalize_relation(conn, category, relation, layer, &resolver).await?;
            report.entities_migrated += run.parents_migrated;
            report.relations_migrated += run.outcome.migrated;
            report.already_present += run.outcome.already_present;
            report.skipped += run.outcome.skipped;
            report.diagnostics.extend(run.outcome.errors);
        }
    }

    info!(
        "{}: {} entities, {} relation rows migrated, {} already present, {} skipped",
        report.category,
        report.entities_migrated,
        report.relations_migrated,
        report.already_present,
        report.skipped
    );
    if !report.diagnostics.is_empty() {
        warn!(
            "{}: {} diagnostics",
            report.category,
            report.diagnostics.len()
        );
    }

    Ok(report)
}
