//! Magic item import into the core layer.
//!
//! Reads exported magic item records, writes base rows with
//! insert-or-overwrite semantics, routes each record to its category detail
//! table and links crafting tools through the [`EntityResolver`]. Base rows
//! are upserted in place: deleting and re-inserting them would cascade into
//! custom overrides.

use crate::config::ResolverConfig;
use crate::core::content_id::content_id;
use crate::core::db::create_schema;
use crate::core::identifier::{quote, quote_list};
use crate::core::schema::{CategorySchema, ColumnSpec, Layer, SchemaRegistry, SOURCE_TABLE};
use crate::core::value::{bind_value, facts_i64, facts_text, Attributes, Facts};
use crate::error::{MigrateError, Result};
use crate::normalize::{Diagnostic, DiagnosticKind};
use crate::resolver::{EntityResolver, Resolution};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use std::path::Path;
use tracing::{debug, info, warn};

/// Category that owns magic items.
pub const MAGIC_ITEMS: &str = "magic_items";

/// Relation linking magic items to the tools that craft them.
pub const CRAFTING: &str = "mag_item_crafting";

/// Rarity stored when a record has none.
pub const UNKNOWN_RARITY: &str = "unbekannt";

/// One exported item record.
#[derive(Debug, Clone, Deserialize)]
pub struct MagicItemRecord {
    pub name: String,
    #[serde(default)]
    pub source: Option<SourceRef>,
    #[serde(default)]
    pub magic: Option<MagicSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRef {
    #[serde(default)]
    pub book: Option<String>,
    #[serde(default)]
    pub start_page_physical: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MagicSection {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub rarity: Option<String>,
    #[serde(default)]
    pub requires_attunement: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub facts: Facts,
    #[serde(default)]
    pub crafting: Option<Crafting>,
}

impl MagicSection {
    fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.rarity.is_none()
            && self.requires_attunement.is_none()
            && self.facts.is_empty()
            && self.crafting.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Crafting {
    #[serde(default, deserialize_with = "null_as_default")]
    pub tools: Vec<String>,
}

/// Treat an explicit `null` like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl MagicItemRecord {
    /// Decode one exported record.
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Summary of one import.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Records without a magic section.
    pub skipped: usize,
    /// Records that could not be decoded or that the store rejected.
    pub failed: usize,
    pub crafting_links: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Split an export into its raw records. Only the outer array is checked
/// here; each record is decoded on its own during the import.
pub fn parse_records(json: &str) -> Result<Vec<Value>> {
    Ok(serde_json::from_str(json)?)
}

/// Name used in diagnostics for a record that could not be decoded.
fn record_label(index: usize, record: &Value) -> String {
    match record.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => content_id(name),
        _ => format!("record {}", index + 1),
    }
}

/// Detail table a magic item category routes to, with the row attributes
/// extracted from its facts. Unknown categories get no detail row.
pub fn detail_row(category: &str, facts: &Facts) -> Option<(&'static str, Attributes)> {
    let int = |path: &[&str]| facts_i64(facts, path).map(Value::from).unwrap_or(Value::Null);

    let (detail, row) = match category {
        "Rüstung" => (
            "armor",
            json!({ "armor_type": null, "ac_bonus": int(&["bonuses", "ac"]) }),
        ),
        "Waffe" => (
            "weapons",
            json!({
                "weapon_type": null,
                "attack_bonus": int(&["bonuses", "attack_roll"]),
                "damage_bonus": int(&["bonuses", "damage_roll"]),
            }),
        ),
        "Trank" | "Schriftrolle" => ("consumables", json!({ "type": category })),
        "Stab" | "Zepter" => (
            "focus_items",
            json!({
                "focus_type": category,
                "charges_max": int(&["charges", "max"]),
                "recharge": facts_text(facts, &["charges", "recharge"]),
            }),
        ),
        "Ring" => ("jewelry", json!({ "type": "Ring" })),
        "Wundersamer Gegenstand" => ("wondrous", json!({})),
        _ => return None,
    };

    match row {
        Value::Object(map) => Some((detail, map)),
        _ => None,
    }
}

/// Read `path` and import its records.
pub async fn import_file<P: AsRef<Path>>(
    conn: &mut SqliteConnection,
    registry: &SchemaRegistry,
    path: P,
    config: &ResolverConfig,
) -> Result<ImportReport> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let records = parse_records(&content)?;
    info!("Read {} records from {}", records.len(), path.as_ref().display());
    import_magic_items(conn, registry, &records, config).await
}

/// Import raw `records` in one transaction. A record that does not decode
/// is counted as failed and the import moves on.
pub async fn import_magic_items(
    conn: &mut SqliteConnection,
    registry: &SchemaRegistry,
    records: &[Value],
    config: &ResolverConfig,
) -> Result<ImportReport> {
    let category = registry.category(MAGIC_ITEMS)?;
    let crafting = category.relation(CRAFTING).ok_or_else(|| {
        MigrateError::Schema(format!("category '{}' has no relation '{}'", MAGIC_ITEMS, CRAFTING))
    })?;

    let mut tx = conn.begin().await?;
    create_schema(&mut *tx, registry).await?;
    let resolver = EntityResolver::snapshot(&mut *tx, &crafting.target.candidates(), config).await?;

    let mut report = ImportReport::default();
    for (index, raw) in records.iter().enumerate() {
        let record = match MagicItemRecord::from_value(raw) {
            Ok(record) => record,
            Err(e) => {
                let label = record_label(index, raw);
                warn!("Cannot read record '{}': {}", label, e);
                report.failed += 1;
                report.diagnostics.push(Diagnostic::new(
                    label,
                    category.core_table.clone(),
                    DiagnosticKind::Parse,
                    e.to_string(),
                ));
                continue;
            }
        };
        let magic = match record.magic {
            Some(ref magic) if !magic.is_empty() => magic,
            _ => {
                debug!("Skipping '{}': no magic section", record.name);
                report.skipped += 1;
                continue;
            }
        };
        let id = content_id(&record.name);

        let mut savepoint = tx.begin().await?;
        match import_record(&mut *savepoint, category, &resolver, &id, &record, magic).await {
            Ok(linked) => {
                savepoint.commit().await?;
                report.imported += 1;
                report.crafting_links += linked.crafting_links;
                report.diagnostics.extend(linked.diagnostics);
            }
            Err(e) if is_record_failure(&e) => {
                savepoint.rollback().await?;
                warn!("Import of '{}' failed: {}", record.name, e);
                report.failed += 1;
                report.diagnostics.push(Diagnostic::new(
                    id,
                    category.core_table.clone(),
                    DiagnosticKind::Integrity,
                    e.to_string(),
                ));
            }
            Err(e) => return Err(e),
        }
    }
    tx.commit().await?;

    info!(
        "Magic item import: {} imported, {} skipped, {} failed, {} crafting links",
        report.imported, report.skipped, report.failed, report.crafting_links
    );
    Ok(report)
}

fn is_record_failure(err: &MigrateError) -> bool {
    matches!(
        err,
        MigrateError::Database(sqlx::Error::Database(_)) | MigrateError::Schema(_)
    )
}

/// What one record added besides its own rows. Merged into the report only
/// once the record's savepoint commits.
#[derive(Debug, Default)]
struct RecordLinks {
    crafting_links: usize,
    diagnostics: Vec<Diagnostic>,
}

async fn import_record(
    conn: &mut SqliteConnection,
    category: &CategorySchema,
    resolver: &EntityResolver,
    id: &str,
    record: &MagicItemRecord,
    magic: &MagicSection,
) -> Result<RecordLinks> {
    let mut linked = RecordLinks::default();
    let source = record.source.clone().unwrap_or_default();
    let base = json!({
        "name": record.name,
        "rarity": magic.rarity.as_deref().unwrap_or(UNKNOWN_RARITY),
        "category": magic.category,
        "source_book": source.book,
        "source_page": source.start_page_physical.unwrap_or(Value::Null),
        "requires_attunement": magic.requires_attunement.unwrap_or(false),
        "facts_json": Value::Object(magic.facts.clone()),
    });
    if let Value::Object(ref attributes) = base {
        upsert(conn, category.table(Layer::Core), "id", id, &category.columns, attributes).await?;
    }

    if let Some((name, attributes)) = magic
        .category
        .as_deref()
        .and_then(|c| detail_row(c, &magic.facts))
    {
        let detail = category.detail(name).ok_or_else(|| {
            MigrateError::Schema(format!("category '{}' has no detail '{}'", category.name, name))
        })?;
        upsert(
            conn,
            detail.table(Layer::Core),
            &detail.key_column,
            id,
            &detail.columns,
            &attributes,
        )
        .await?;
    }

    let tools = magic.crafting.as_ref().map(|c| c.tools.as_slice()).unwrap_or(&[]);
    if tools.is_empty() {
        return Ok(linked);
    }
    let crafting = category.relation(CRAFTING).ok_or_else(|| {
        MigrateError::Schema(format!("category '{}' has no relation '{}'", category.name, CRAFTING))
    })?;
    let link_sql = format!(
        "INSERT OR IGNORE INTO {} ({}) VALUES (?, ?, ?)",
        quote(crafting.table(Layer::Core))?,
        quote_list(&[
            crafting.parent_column.as_str(),
            crafting.reference_column.as_str(),
            SOURCE_TABLE
        ])?
    );
    for tool in tools {
        match resolver.resolve(tool) {
            Resolution::Resolved(found) => {
                if found.is_ambiguous() {
                    warn!(
                        "'{}': tool '{}' matched {} candidates in {}, using '{}'",
                        record.name, tool, found.match_count, found.source_table, found.id
                    );
                }
                let done = sqlx::query(&link_sql)
                    .bind(id)
                    .bind(found.id.as_str())
                    .bind(found.source_table.as_str())
                    .execute(&mut *conn)
                    .await?;
                linked.crafting_links += done.rows_affected() as usize;
            }
            Resolution::Unresolved => {
                warn!("'{}': tool '{}' not found", record.name, tool);
                linked.diagnostics.push(Diagnostic::new(
                    id,
                    CRAFTING,
                    DiagnosticKind::Unresolved,
                    format!("tool '{}' not found in {:?}", tool, resolver.search_order()),
                ));
            }
        }
    }
    Ok(linked)
}

/// Insert or overwrite one row keyed by `key_column`, in place.
async fn upsert(
    conn: &mut SqliteConnection,
    table: &str,
    key_column: &str,
    key: &str,
    columns: &[ColumnSpec],
    attributes: &Attributes,
) -> Result<()> {
    let present: Vec<&ColumnSpec> = columns
        .iter()
        .filter(|c| attributes.contains_key(&c.name))
        .collect();

    let mut names = vec![key_column];
    names.extend(present.iter().map(|c| c.name.as_str()));
    let conflict = if present.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let assignments = present
            .iter()
            .map(|c| quote(&c.name).map(|q| format!("{q} = excluded.{q}")))
            .collect::<Result<Vec<_>>>()?;
        format!("DO UPDATE SET {}", assignments.join(", "))
    };
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) {}",
        quote(table)?,
        quote_list(&names)?,
        vec!["?"; names.len()].join(", "),
        quote(key_column)?,
        conflict
    );

    let mut query = sqlx::query(&sql).bind(key);
    for column in present {
        let value = attributes.get(&column.name).unwrap_or(&Value::Null);
        query = bind_value(query, &column.name, value, column.column_type)?;
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::{count_rows, memory};
    use crate::overrides::create_override;

    const RECORDS: &str = r#"[
        {
            "name": "Flammenzunge",
            "source": { "book": "SL", "start_page_physical": 212 },
            "magic": {
                "category": "Waffe",
                "rarity": "selten",
                "requires_attunement": true,
                "facts": { "bonuses": { "attack_roll": 1, "damage_roll": 2 } },
                "crafting": { "tools": ["Schmiedewerkzeug", "Nonexistent Tool XYZ"] }
            }
        },
        {
            "name": "Stab des Frosts",
            "magic": {
                "category": "Stab",
                "rarity": null,
                "facts": { "charges": { "max": 10, "recharge": "1W6+4 bei Morgengrauen" } }
            }
        },
        {
            "name": "Umhang der Fledermaus",
            "magic": { "category": "Wundersamer Gegenstand", "rarity": "selten" }
        },
        { "name": "Seil", "source": { "book": "SL" } }
    ]"#;

    async fn seeded() -> (SqliteConnection, SchemaRegistry) {
        let mut conn = memory().await;
        let registry = SchemaRegistry::builtin();
        create_schema(&mut conn, &registry).await.unwrap();
        sqlx::query("INSERT INTO core_tools (id, name) VALUES ('schmiedewerkzeug', 'Schmiedewerkzeug')")
            .execute(&mut conn)
            .await
            .unwrap();
        (conn, registry)
    }

    #[test]
    fn test_detail_routing() {
        let facts: Facts = serde_json::from_str(r#"{"bonuses": {"ac": 1}}"#).unwrap();
        let (detail, row) = detail_row("Rüstung", &facts).unwrap();
        assert_eq!(detail, "armor");
        assert_eq!(row["ac_bonus"], json!(1));

        let (detail, row) = detail_row("Waffe", &Facts::new()).unwrap();
        assert_eq!(detail, "weapons");
        assert_eq!(row["attack_bonus"], Value::Null);

        assert_eq!(detail_row("Schriftrolle", &Facts::new()).unwrap().1["type"], json!("Schriftrolle"));
        assert_eq!(detail_row("Ring", &Facts::new()).unwrap().0, "jewelry");
        assert!(detail_row("Artefakt", &Facts::new()).is_none());
    }

    #[tokio::test]
    async fn test_import_records() {
        let (mut conn, registry) = seeded().await;
        let records = parse_records(RECORDS).unwrap();
        let report = import_magic_items(&mut conn, &registry, &records, &ResolverConfig::default())
            .await
            .unwrap();

        assert_eq!(report.imported, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.crafting_links, 1);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].kind, DiagnosticKind::Unresolved);
        assert_eq!(report.diagnostics[0].parent_id, "flammenzunge");

        let (rarity, facts): (String, String) =
            sqlx::query_as("SELECT rarity, facts_json FROM core_mag_items_base WHERE id = 'stab_des_frosts'")
                .fetch_one(&mut conn)
                .await
                .unwrap();
        assert_eq!(rarity, UNKNOWN_RARITY);
        assert!(facts.contains("Morgengrauen"));

        let (charges, recharge): (Option<i64>, Option<String>) = sqlx::query_as(
            "SELECT charges_max, recharge FROM core_mag_focus_items WHERE item_base_id = 'stab_des_frosts'",
        )
        .fetch_one(&mut conn)
        .await
        .unwrap();
        assert_eq!(charges, Some(10));
        assert_eq!(recharge.as_deref(), Some("1W6+4 bei Morgengrauen"));

        let (attack, damage): (Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT attack_bonus, damage_bonus FROM core_mag_weapons WHERE item_base_id = 'flammenzunge'",
        )
        .fetch_one(&mut conn)
        .await
        .unwrap();
        assert_eq!((attack, damage), (Some(1), Some(2)));

        assert_eq!(count_rows(&mut conn, "core_mag_wondrous").await.unwrap(), 1);
        let (tool, table): (String, String) =
            sqlx::query_as("SELECT tool_id, source_table FROM core_mag_item_crafting")
                .fetch_one(&mut conn)
                .await
                .unwrap();
        assert_eq!(tool, "schmiedewerkzeug");
        assert_eq!(table, "core_tools");
    }

    #[tokio::test]
    async fn test_reimport_keeps_overrides() {
        let (mut conn, registry) = seeded().await;
        let records = parse_records(RECORDS).unwrap();
        let config = ResolverConfig::default();
        import_magic_items(&mut conn, &registry, &records, &config).await.unwrap();

        let magic = registry.category(MAGIC_ITEMS).unwrap();
        let attrs = json!({"name": "Meine Flammenzunge", "rarity": "sehr selten", "category": "Waffe"});
        create_override(&mut conn, magic, "flammenzunge", attrs.as_object().unwrap())
            .await
            .unwrap();

        let report = import_magic_items(&mut conn, &registry, &records, &config).await.unwrap();
        assert_eq!(report.imported, 3);
        assert_eq!(report.crafting_links, 0);
        assert_eq!(count_rows(&mut conn, "custom_mag_items_base").await.unwrap(), 1);
        assert_eq!(count_rows(&mut conn, "core_mag_items_base").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_record_does_not_abort() {
        let (mut conn, registry) = seeded().await;
        let records = parse_records(
            r#"[
                { "name": "Namenloser Trank", "magic": { "rarity": "gewöhnlich" } },
                { "name": "Heiltrank", "magic": { "category": "Trank", "rarity": "gewöhnlich" } }
            ]"#,
        )
        .unwrap();
        let report = import_magic_items(&mut conn, &registry, &records, &ResolverConfig::default())
            .await
            .unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.diagnostics[0].parent_id, "namenloser_trank");
        assert_eq!(count_rows(&mut conn, "core_mag_items_base").await.unwrap(), 1);
        assert_eq!(count_rows(&mut conn, "core_mag_consumables").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_file() {
        let (mut conn, registry) = seeded().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, RECORDS.as_bytes()).unwrap();
        let report = import_file(&mut conn, &registry, file.path(), &ResolverConfig::default())
            .await
            .unwrap();
        assert_eq!(report.imported, 3);
    }

    #[tokio::test]
    async fn test_undecodable_records_are_counted_not_fatal() {
        let (mut conn, registry) = seeded().await;
        let records = parse_records(
            r#"[
                { "name": "Heiltrank", "magic": { "category": "Trank", "rarity": "gewöhnlich" } },
                { "name": "Trank der Leere", "magic": { "category": "Trank", "facts": null,
                  "crafting": { "tools": null } } },
                { "magic": { "category": "Ring", "rarity": "selten" } },
                { "name": "Ring der Wärme", "magic": { "category": "Ring", "requires_attunement": "ja" } }
            ]"#,
        )
        .unwrap();
        let report = import_magic_items(&mut conn, &registry, &records, &ResolverConfig::default())
            .await
            .unwrap();

        assert_eq!(report.imported, 2);
        assert_eq!(report.failed, 2);
        let failures: Vec<_> = report
            .diagnostics
            .iter()
            .map(|d| (d.parent_id.as_str(), d.kind))
            .collect();
        assert_eq!(
            failures,
            vec![
                ("record 3", DiagnosticKind::Parse),
                ("ring_der_waerme", DiagnosticKind::Parse),
            ]
        );

        let facts: String =
            sqlx::query_scalar("SELECT facts_json FROM core_mag_items_base WHERE id = 'trank_der_leere'")
                .fetch_one(&mut conn)
                .await
                .unwrap();
        assert_eq!(facts, "{}");
        assert!(parse_records(r#"{"name": "Heiltrank"}"#).is_err());
    }

    #[tokio::test]
    async fn test_rolled_back_record_leaves_no_links_or_diagnostics() {
        let (mut conn, registry) = seeded().await;
        sqlx::query(
            "CREATE TRIGGER refuse_smithing BEFORE INSERT ON core_mag_item_crafting \
             WHEN NEW.tool_id = 'schmiedewerkzeug' BEGIN SELECT RAISE(ABORT, 'refused'); END",
        )
        .execute(&mut conn)
        .await
        .unwrap();

        let records = parse_records(
            r#"[{ "name": "Flammenzunge", "magic": { "category": "Waffe", "rarity": "selten",
                  "crafting": { "tools": ["Nonexistent Tool XYZ", "Schmiedewerkzeug"] } } }]"#,
        )
        .unwrap();
        let report = import_magic_items(&mut conn, &registry, &records, &ResolverConfig::default())
            .await
            .unwrap();

        assert_eq!(report.imported, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.crafting_links, 0);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].kind, DiagnosticKind::Integrity);
        assert_eq!(count_rows(&mut conn, "core_mag_items_base").await.unwrap(), 0);
    }
}
