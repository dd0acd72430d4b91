//! Entity resolver: free-text references to canonical entity ids.
//!
//! A reference such as a tool name written in prose is looked up in an
//! ordered list of candidate tables. Each table is tried with a cascade of
//! strategies, cheapest and most precise first, before moving on to the next
//! table:
//!
//! 1. exact id: the reference's content identifier equals a row id
//! 2. normalized name: folded reference equals a folded display name
//! 3. cleaned substring: the reference minus noise tokens ("werkzeug") is
//!    contained in a folded display name
//! 4. raw substring: the raw reference is contained in a display name,
//!    case-insensitively
//!
//! Candidates are snapshotted once, ordered by id ascending, so repeated
//! resolutions see a consistent view of the tables and ties always resolve
//! to the smallest id. The number of rows a strategy matched is returned so
//! callers can tell ambiguous matches from unique ones.

use crate::config::ResolverConfig;
use crate::core::content_id::{content_id, fold_name};
use crate::core::identifier::quote;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use std::collections::HashSet;
use tracing::debug;

/// Strategy that produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    ExactId,
    NormalizedName,
    CleanedSubstring,
    RawSubstring,
}

/// Strategies in the order each table is tried.
const STRATEGIES: [MatchStrategy; 4] = [
    MatchStrategy::ExactId,
    MatchStrategy::NormalizedName,
    MatchStrategy::CleanedSubstring,
    MatchStrategy::RawSubstring,
];

/// A resolved reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRef {
    pub id: String,
    pub source_table: String,
    pub strategy: MatchStrategy,
    /// Rows the winning strategy matched in `source_table`.
    pub match_count: usize,
}

impl ResolvedRef {
    /// More than one candidate matched; the smallest id was chosen.
    pub fn is_ambiguous(&self) -> bool {
        self.match_count > 1
    }
}

/// Outcome of a resolution. `Unresolved` is a reportable condition, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedRef),
    Unresolved,
}

impl Resolution {
    pub fn resolved(&self) -> Option<&ResolvedRef> {
        match self {
            Resolution::Resolved(r) => Some(r),
            Resolution::Unresolved => None,
        }
    }
}

/// One searchable row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub name: String,
}

#[derive(Debug)]
struct CandidateTable {
    name: String,
    candidates: Vec<Candidate>,
    folded_names: Vec<String>,
    lower_names: Vec<String>,
    ids: HashSet<String>,
}

impl CandidateTable {
    fn new(name: String, mut candidates: Vec<Candidate>) -> Self {
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        let folded_names = candidates.iter().map(|c| fold_name(&c.name)).collect();
        let lower_names = candidates.iter().map(|c| c.name.to_lowercase()).collect();
        let ids = candidates.iter().map(|c| c.id.clone()).collect();
        Self {
            name,
            candidates,
            folded_names,
            lower_names,
            ids,
        }
    }

    /// First matching candidate in id order and the number of matches.
    fn first_match<F>(&self, pred: F) -> Option<(&Candidate, usize)>
    where
        F: Fn(usize) -> bool,
    {
        let mut hits = (0..self.candidates.len()).filter(|&i| pred(i));
        let first = hits.next()?;
        Some((&self.candidates[first], 1 + hits.count()))
    }
}

/// Resolver over a snapshot of candidate tables, in search order.
#[derive(Debug)]
pub struct EntityResolver {
    tables: Vec<CandidateTable>,
    noise_tokens: Vec<String>,
}

impl EntityResolver {
    /// Build a resolver from already loaded candidates.
    pub fn from_candidates(tables: Vec<(String, Vec<Candidate>)>, config: &ResolverConfig) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|(name, candidates)| CandidateTable::new(name, candidates))
                .collect(),
            noise_tokens: config
                .noise_tokens
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
        }
    }

    /// Snapshot `id`/`name` of every table in `search_order`.
    pub async fn snapshot(
        conn: &mut SqliteConnection,
        search_order: &[&str],
        config: &ResolverConfig,
    ) -> Result<Self> {
        let mut tables = Vec::with_capacity(search_order.len());
        for table in search_order {
            let sql = format!(
                "SELECT {id}, {name} FROM {table} ORDER BY {id}",
                id = quote("id")?,
                name = quote("name")?,
                table = quote(table)?
            );
            let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
            let mut candidates = Vec::with_capacity(rows.len());
            for row in rows {
                candidates.push(Candidate {
                    id: row.try_get("id")?,
                    name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
                });
            }
            debug!("Resolver snapshot: {} ({} candidates)", table, candidates.len());
            tables.push((table.to_string(), candidates));
        }
        Ok(Self::from_candidates(tables, config))
    }

    /// Tables in the order they are searched.
    pub fn search_order(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Whether `table` (part of the snapshot) holds a row with `id`.
    pub fn contains(&self, table: &str, id: &str) -> bool {
        self.tables
            .iter()
            .any(|t| t.name == table && t.ids.contains(id))
    }

    /// Whether `table` is part of the snapshot.
    pub fn covers(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.name == table)
    }

    /// Resolve a free-text reference.
    pub fn resolve(&self, reference: &str) -> Resolution {
        if reference.trim().is_empty() {
            return Resolution::Unresolved;
        }

        let exact = content_id(reference);
        let folded = fold_name(reference);
        let cleaned = fold_name(&self.strip_noise(reference));
        let raw = reference.to_lowercase();

        for table in &self.tables {
            for strategy in STRATEGIES {
                let hit = match strategy {
                    MatchStrategy::ExactId => table
                        .first_match(|i| !exact.is_empty() && table.candidates[i].id == exact),
                    MatchStrategy::NormalizedName => table
                        .first_match(|i| !folded.is_empty() && table.folded_names[i] == folded),
                    MatchStrategy::CleanedSubstring => table.first_match(|i| {
                        !cleaned.is_empty() && table.folded_names[i].contains(cleaned.as_str())
                    }),
                    MatchStrategy::RawSubstring => {
                        table.first_match(|i| table.lower_names[i].contains(raw.as_str()))
                    }
                };

                if let Some((candidate, count)) = hit {
                    debug!(
                        "Resolved {:?} -> {}.{} via {:?} ({} matches)",
                        reference, table.name, candidate.id, strategy, count
                    );
                    return Resolution::Resolved(ResolvedRef {
                        id: candidate.id.clone(),
                        source_table: table.name.clone(),
                        strategy,
                        match_count: count,
                    });
                }
            }
        }

        debug!("Unresolved reference {:?}", reference);
        Resolution::Unresolved
    }

    fn strip_noise(&self, reference: &str) -> String {
        let mut cleaned = reference.to_lowercase();
        for token in &self.noise_tokens {
            cleaned = cleaned.replace(token.as_str(), "");
        }
        cleaned.trim().to_string()
    }
}

/// One-shot resolution against the current contents of `search_order`.
pub async fn resolve(
    conn: &mut SqliteConnection,
    reference: &str,
    search_order: &[&str],
    config: &ResolverConfig,
) -> Result<Resolution> {
    let resolver = EntityResolver::snapshot(conn, search_order, config).await?;
    Ok(resolver.resolve(reference))
}
