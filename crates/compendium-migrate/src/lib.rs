//! # compendium-migrate
//!
//! Content override and normalization engine for a two-layer game
//! compendium stored in SQLite.
//!
//! Every content category exists as an immutable core table and a mutable
//! custom table. This library provides:
//!
//! - **Merge views** with one effective row per entity and a provenance tag
//!   (`core`, `override`, `homebrew`); override is whole-row
//! - **Collection normalization** of legacy JSON collection columns into
//!   relation tables, idempotent and with per-row diagnostics
//! - **Entity resolution** of free-text names to ids across candidate tables
//! - **Atomic runs**: schema, normalization and views in one transaction
//!
//! ## Example
//!
//! ```rust,no_run
//! use compendium_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> compendium_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let mut orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run().await?;
//!     println!("{}", result.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod import;
pub mod normalize;
pub mod orchestrator;
pub mod overrides;
pub mod resolver;
pub mod verify;
pub mod views;

// Re-exports for convenient access
pub use crate::core::{
    content_id, fold_name, Attributes, CategorySchema, ColumnSpec, ColumnType, DetailSpec, Facts,
    Layer, ReferenceTable, RelationSpec, RelationTarget, SchemaRegistry,
};
pub use config::{Config, DatabaseConfig, MigrationConfig, ResolverConfig};
pub use error::{MigrateError, Result};
pub use import::{import_file, import_magic_items, ImportReport, MagicItemRecord};
pub use normalize::{CollectionNormalizer, Diagnostic, DiagnosticKind, NormalizeOutcome};
pub use orchestrator::{CategoryReport, MigrationResult, Orchestrator};
pub use overrides::{create_homebrew, create_override, restore_core};
pub use resolver::{EntityResolver, MatchStrategy, Resolution, ResolvedRef};
pub use verify::RelationValidation;
pub use views::{effective_entities, effective_entity, rebuild_views, EffectiveEntity, Provenance};
