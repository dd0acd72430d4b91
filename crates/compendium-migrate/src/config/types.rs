//! Configuration type definitions.

use crate::core::schema::SchemaRegistry;
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Compendium database.
    pub database: DatabaseConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Entity resolver configuration.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Category declarations. Uses the built-in compendium registry if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<SchemaRegistry>,
}

impl Config {
    /// Configuration for the database at `url` with every other setting at
    /// its default.
    pub fn for_database(url: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig {
                url: url.into(),
                foreign_keys: true,
            },
            migration: MigrationConfig::default(),
            resolver: ResolverConfig::default(),
            registry: None,
        }
    }

    /// The registry in effect: the configured one or the built-in one.
    pub fn registry(&self) -> SchemaRegistry {
        self.registry.clone().unwrap_or_else(SchemaRegistry::builtin)
    }
}

/// Compendium database (SQLite) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL, e.g. `sqlite://dnd-nexus.db` or `sqlite::memory:`.
    pub url: String,

    /// Enforce foreign keys (default: true). Cascading deletes of overrides
    /// and child relations depend on it.
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Categories to normalize. Empty means every category with legacy
    /// collection columns.
    #[serde(default)]
    pub categories: Vec<String>,

    /// Drop and recreate merge views after normalization (default: true).
    #[serde(default = "default_true")]
    pub rebuild_views: bool,

    /// Run every step, report, then roll back instead of committing.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            rebuild_views: true,
            dry_run: false,
        }
    }
}

/// Entity resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Generic words stripped from a reference before the cleaned substring
    /// search (matched case-insensitively).
    #[serde(default = "default_noise_tokens")]
    pub noise_tokens: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            noise_tokens: default_noise_tokens(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_noise_tokens() -> Vec<String> {
    vec!["werkzeug".to_string()]
}
