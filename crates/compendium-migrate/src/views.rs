//! Override merge views.
//!
//! Every category gets a read-only view with one row per logical entity:
//! core rows, core rows superseded by their override, and standalone
//! homebrew rows. Override is whole-row. When a custom row overrides a core
//! row, every attribute comes from the custom row, including its NULLs.
//! Detail views follow the same shape and take their provenance from the
//! base view so both always agree. Relations may also get a plain listing of
//! both layers' rows, tagged with the layer they come from.

use crate::core::identifier::{qualified, quote, string_literal};
use crate::core::schema::{CategorySchema, DetailSpec, Layer, RelationSpec, PARENT_ID, QUANTITY, SOURCE_TABLE};
use crate::core::value::{decode_column, Attributes};
use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Logical identity column of every merge view.
pub const ENTITY_ID: &str = "entity_id";

/// Provenance column of every merge view.
pub const SOURCE: &str = "source";

/// Which layer is authoritative for a merged row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Only a core row exists.
    Core,
    /// A custom row with `parent_id` supersedes the core row.
    Override,
    /// A standalone custom row.
    Homebrew,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Core => "core",
            Provenance::Override => "override",
            Provenance::Homebrew => "homebrew",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provenance {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "core" => Ok(Provenance::Core),
            "override" => Ok(Provenance::Override),
            "homebrew" => Ok(Provenance::Homebrew),
            other => Err(MigrateError::Schema(format!("unknown provenance '{}'", other))),
        }
    }
}

/// One row of a category's merge view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveEntity {
    /// Logical identity: the core id, or the custom id for homebrew.
    pub entity_id: String,
    /// Id of the raw row the attributes come from.
    pub id: String,
    pub provenance: Provenance,
    pub attributes: Attributes,
}

fn check_reserved(view: &str, columns: &[&str]) -> Result<()> {
    for reserved in [ENTITY_ID, SOURCE] {
        if columns.contains(&reserved) {
            return Err(MigrateError::Schema(format!(
                "view '{}': column '{}' is reserved",
                view, reserved
            )));
        }
    }
    Ok(())
}

/// Pick the override's value when an override row was joined.
fn whole_row(guard: &str, custom: &str, core: &str, column: &str) -> Result<String> {
    Ok(format!(
        "CASE WHEN {guard} IS NOT NULL THEN {c} ELSE {d} END AS {col}",
        guard = guard,
        c = qualified(custom, column)?,
        d = qualified(core, column)?,
        col = quote(column)?
    ))
}

/// `CREATE VIEW` statement of a category's base merge view.
pub fn base_view_sql(category: &CategorySchema) -> Result<String> {
    let columns: Vec<&str> = category.columns.iter().map(|c| c.name.as_str()).collect();
    check_reserved(&category.view_name, &columns)?;

    let core = quote(&category.core_table)?;
    let custom = quote(&category.custom_table)?;
    let id = quote("id")?;
    let parent = quote(PARENT_ID)?;
    let guard = qualified("c", "id")?;

    let mut merged = vec![
        format!("core.{} AS {}", id, quote(ENTITY_ID)?),
        whole_row(&guard, "c", "core", "id")?,
    ];
    let mut homebrew = vec![
        format!("h.{} AS {}", id, quote(ENTITY_ID)?),
        format!("h.{} AS {}", id, id),
    ];
    for column in &columns {
        merged.push(whole_row(&guard, "c", "core", column)?);
        homebrew.push(format!("{} AS {}", qualified("h", column)?, quote(column)?));
    }
    merged.push(format!(
        "CASE WHEN {} IS NOT NULL THEN {} ELSE {} END AS {}",
        guard,
        string_literal(Provenance::Override.as_str()),
        string_literal(Provenance::Core.as_str()),
        quote(SOURCE)?
    ));
    homebrew.push(format!(
        "{} AS {}",
        string_literal(Provenance::Homebrew.as_str()),
        quote(SOURCE)?
    ));

    Ok(format!(
        "CREATE VIEW IF NOT EXISTS {view} AS\n\
         SELECT {merged}\n\
         FROM {core} AS core\n\
         LEFT JOIN {custom} AS c ON c.{parent} = core.{id}\n\
         WHERE NOT EXISTS (SELECT 1 FROM {custom} AS s WHERE s.{parent} IS NULL AND s.{id} = core.{id})\n\
         UNION ALL\n\
         SELECT {homebrew}\n\
         FROM {custom} AS h\n\
         WHERE h.{parent} IS NULL",
        view = quote(&category.view_name)?,
        merged = merged.join(",\n       "),
        homebrew = homebrew.join(",\n       "),
        core = core,
        custom = custom,
        parent = parent,
        id = id,
    ))
}

/// `CREATE VIEW` statement of one detail merge view.
pub fn detail_view_sql(category: &CategorySchema, detail: &DetailSpec) -> Result<String> {
    let columns: Vec<&str> = detail.columns.iter().map(|c| c.name.as_str()).collect();
    check_reserved(&detail.view_name, &columns)?;

    let key = quote(&detail.key_column)?;
    let id = quote("id")?;
    let parent = quote(PARENT_ID)?;
    let core_detail = quote(&detail.core_table)?;
    let custom_detail = quote(&detail.custom_table)?;
    let custom_base = quote(&category.custom_table)?;
    let base_view = quote(&category.view_name)?;
    let guard = qualified("cd", &detail.key_column)?;
    let source_of = |entity: &str| -> Result<String> {
        Ok(format!(
            "(SELECT v.{src} FROM {view} AS v WHERE v.{eid} = {entity}) AS {src}",
            src = quote(SOURCE)?,
            view = base_view,
            eid = quote(ENTITY_ID)?,
            entity = entity
        ))
    };

    let mut merged = vec![
        format!("d.{} AS {}", key, quote(ENTITY_ID)?),
        whole_row(&guard, "cd", "d", &detail.key_column)?,
    ];
    let custom_entity = format!("COALESCE(cb.{}, cd.{})", parent, key);
    let mut custom_only = vec![
        format!("{} AS {}", custom_entity, quote(ENTITY_ID)?),
        format!("cd.{} AS {}", key, key),
    ];
    for column in &columns {
        merged.push(whole_row(&guard, "cd", "d", column)?);
        custom_only.push(format!("{} AS {}", qualified("cd", column)?, quote(column)?));
    }
    merged.push(source_of(&format!("d.{}", key))?);
    custom_only.push(source_of(&custom_entity)?);

    Ok(format!(
        "CREATE VIEW IF NOT EXISTS {view} AS\n\
         SELECT {merged}\n\
         FROM {core_detail} AS d\n\
         LEFT JOIN {custom_base} AS cb ON cb.{parent} = d.{key}\n\
         LEFT JOIN {custom_detail} AS cd ON cd.{key} = cb.{id}\n\
         WHERE NOT EXISTS (SELECT 1 FROM {custom_base} AS s WHERE s.{parent} IS NULL AND s.{id} = d.{key})\n\
         UNION ALL\n\
         SELECT {custom_only}\n\
         FROM {custom_detail} AS cd\n\
         JOIN {custom_base} AS cb ON cb.{id} = cd.{key}\n\
         WHERE cb.{parent} IS NULL\n\
            OR NOT EXISTS (SELECT 1 FROM {core_detail} AS e WHERE e.{key} = cb.{parent})",
        view = quote(&detail.view_name)?,
        merged = merged.join(",\n       "),
        custom_only = custom_only.join(",\n       "),
        core_detail = core_detail,
        custom_detail = custom_detail,
        custom_base = custom_base,
        parent = parent,
        key = key,
        id = id,
    ))
}

/// `CREATE VIEW` statement listing the rows of both layers of a relation,
/// or `None` if the relation declares no view.
pub fn relation_view_sql(relation: &RelationSpec) -> Result<Option<String>> {
    let view = match relation.view_name {
        Some(ref view) => view,
        None => return Ok(None),
    };
    let payload: Vec<&str> = relation.columns.iter().map(|c| c.name.as_str()).collect();
    check_reserved(view, &payload)?;

    let mut columns = vec![relation.parent_column.as_str(), relation.reference_column.as_str()];
    if relation.has_quantity {
        columns.push(QUANTITY);
    }
    if relation.target.is_discriminated() {
        columns.push(SOURCE_TABLE);
    }
    columns.extend(payload);
    let select = columns.iter().map(|c| quote(c)).collect::<Result<Vec<_>>>()?.join(", ");

    let arms = Layer::ALL
        .iter()
        .map(|layer| {
            Ok(format!(
                "SELECT {}, {} AS {} FROM {}",
                select,
                string_literal(layer.as_str()),
                quote(SOURCE)?,
                quote(relation.table(*layer))?
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(format!(
        "CREATE VIEW IF NOT EXISTS {} AS\n{}",
        quote(view)?,
        arms.join("\nUNION ALL\n")
    )))
}

/// Drop and recreate the merge views of `categories`.
///
/// Detail views depend on their base view, so they are dropped first and
/// created last. Returns the number of views created.
pub async fn rebuild_views(conn: &mut SqliteConnection, categories: &[&CategorySchema]) -> Result<usize> {
    for category in categories {
        for relation in &category.relations {
            if let Some(ref view) = relation.view_name {
                drop_view(conn, view).await?;
            }
        }
        for detail in &category.details {
            drop_view(conn, &detail.view_name).await?;
        }
    }
    for category in categories {
        drop_view(conn, &category.view_name).await?;
    }

    let mut created = 0;
    for category in categories {
        create_view(conn, &category.view_name, &base_view_sql(category)?).await?;
        created += 1;
    }
    for category in categories {
        for detail in &category.details {
            create_view(conn, &detail.view_name, &detail_view_sql(category, detail)?).await?;
            created += 1;
        }
        for relation in &category.relations {
            if let (Some(view), Some(sql)) = (&relation.view_name, relation_view_sql(relation)?) {
                create_view(conn, view, &sql).await?;
                created += 1;
            }
        }
    }

    info!("Rebuilt {} merge views", created);
    Ok(created)
}

async fn drop_view(conn: &mut SqliteConnection, name: &str) -> Result<()> {
    let sql = format!("DROP VIEW IF EXISTS {}", quote(name)?);
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

async fn create_view(conn: &mut SqliteConnection, name: &str, sql: &str) -> Result<()> {
    debug!("Creating view {}", name);
    sqlx::query(sql).execute(&mut *conn).await?;
    Ok(())
}

fn select_effective(category: &CategorySchema, filtered: bool) -> Result<String> {
    let mut columns = vec![quote(ENTITY_ID)?, quote("id")?, quote(SOURCE)?];
    for column in &category.columns {
        columns.push(quote(&column.name)?);
    }
    Ok(format!(
        "SELECT {} FROM {}{} ORDER BY {}",
        columns.join(", "),
        quote(&category.view_name)?,
        if filtered {
            format!(" WHERE {} = ?", quote(ENTITY_ID)?)
        } else {
            String::new()
        },
        quote(ENTITY_ID)?
    ))
}

fn decode_effective(category: &CategorySchema, row: &SqliteRow) -> Result<EffectiveEntity> {
    let mut attributes = Attributes::new();
    for column in &category.columns {
        attributes.insert(
            column.name.clone(),
            decode_column(row, &column.name, column.column_type)?,
        );
    }
    let source: String = row.try_get_unchecked(SOURCE)?;
    Ok(EffectiveEntity {
        entity_id: row.try_get_unchecked(ENTITY_ID)?,
        id: row.try_get_unchecked("id")?,
        provenance: source.parse()?,
        attributes,
    })
}

/// Every effective entity of `category`, ordered by `entity_id`.
pub async fn effective_entities(
    conn: &mut SqliteConnection,
    category: &CategorySchema,
) -> Result<Vec<EffectiveEntity>> {
    let sql = select_effective(category, false)?;
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter().map(|row| decode_effective(category, row)).collect()
}

/// The effective entity with logical identity `entity_id`, if any.
pub async fn effective_entity(
    conn: &mut SqliteConnection,
    category: &CategorySchema,
    entity_id: &str,
) -> Result<Option<EffectiveEntity>> {
    let sql = select_effective(category, true)?;
    let row = sqlx::query(&sql)
        .bind(entity_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|row| decode_effective(category, &row)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::{count_rows, create_schema, memory, object_exists};
    use crate::core::schema::SchemaRegistry;
    use serde_json::{json, Value};

    async fn exec(conn: &mut SqliteConnection, sql: &str) {
        sqlx::query(sql).execute(&mut *conn).await.unwrap();
    }

    async fn compendium() -> (SqliteConnection, SchemaRegistry) {
        let mut conn = memory().await;
        let registry = SchemaRegistry::builtin();
        create_schema(&mut conn, &registry).await.unwrap();
        exec(
            &mut conn,
            "INSERT INTO core_items (id, name, description, cost_gp) VALUES \
             ('dagger', 'Dagger', 'A small blade', 2.0), \
             ('rope', 'Rope', 'Hempen, 15 m', 1.0)",
        )
        .await;
        exec(
            &mut conn,
            "INSERT INTO custom_items (id, name, description, cost_gp, parent_id, is_homebrew) VALUES \
             ('silk_rope', 'Silk Rope', NULL, 10.0, 'rope', 0), \
             ('moon_blade', 'Moon Blade', 'Glows faintly', 500.0, NULL, 1)",
        )
        .await;
        let categories: Vec<&CategorySchema> = registry.categories.iter().collect();
        rebuild_views(&mut conn, &categories).await.unwrap();
        (conn, registry)
    }

    #[test]
    fn test_base_view_is_whole_row() {
        let registry = SchemaRegistry::builtin();
        let sql = base_view_sql(registry.category("items").unwrap()).unwrap();
        assert!(sql.contains("CASE WHEN c.\"id\" IS NOT NULL THEN c.\"description\" ELSE core.\"description\" END"));
        assert!(!sql.contains("COALESCE"));
        assert!(sql.contains("UNION ALL"));
    }

    #[test]
    fn test_reserved_column_rejected() {
        let mut registry = SchemaRegistry::builtin();
        registry.categories[0]
            .columns
            .push(crate::core::schema::ColumnSpec::text("source"));
        assert!(base_view_sql(&registry.categories[0]).is_err());
    }

    #[test]
    fn test_provenance_parse() {
        assert_eq!("override".parse::<Provenance>().unwrap(), Provenance::Override);
        assert!("official".parse::<Provenance>().is_err());
        assert_eq!(Provenance::Homebrew.to_string(), "homebrew");
    }

    #[tokio::test]
    async fn test_core_row_passes_through() {
        let (mut conn, registry) = compendium().await;
        let items = registry.category("items").unwrap();
        let dagger = effective_entity(&mut conn, items, "dagger").await.unwrap().unwrap();
        assert_eq!(dagger.provenance, Provenance::Core);
        assert_eq!(dagger.id, "dagger");
        assert_eq!(dagger.attributes["name"], json!("Dagger"));
        assert_eq!(dagger.attributes["cost_gp"], json!(2.0));
    }

    #[tokio::test]
    async fn test_override_wins_entirely() {
        let (mut conn, registry) = compendium().await;
        let items = registry.category("items").unwrap();
        let rope = effective_entity(&mut conn, items, "rope").await.unwrap().unwrap();
        assert_eq!(rope.provenance, Provenance::Override);
        assert_eq!(rope.id, "silk_rope");
        assert_eq!(rope.attributes["name"], json!("Silk Rope"));
        // The override's NULL is not filled from the core row.
        assert_eq!(rope.attributes["description"], Value::Null);

        assert!(effective_entity(&mut conn, items, "silk_rope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_row_per_entity() {
        let (mut conn, registry) = compendium().await;
        let items = registry.category("items").unwrap();
        let all = effective_entities(&mut conn, items).await.unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["dagger", "moon_blade", "rope"]);
        assert_eq!(all[1].provenance, Provenance::Homebrew);
    }

    #[tokio::test]
    async fn test_homebrew_shadows_core_id() {
        let (mut conn, registry) = compendium().await;
        exec(&mut conn, "INSERT INTO custom_items (id, name, parent_id) VALUES ('dagger', 'My Dagger', NULL)").await;
        let items = registry.category("items").unwrap();
        let all = effective_entities(&mut conn, items).await.unwrap();
        let daggers: Vec<_> = all.iter().filter(|e| e.entity_id == "dagger").collect();
        assert_eq!(daggers.len(), 1);
        assert_eq!(daggers[0].provenance, Provenance::Homebrew);
        assert_eq!(daggers[0].attributes["name"], json!("My Dagger"));
    }

    #[tokio::test]
    async fn test_cascade_removes_override_from_view() {
        let (mut conn, registry) = compendium().await;
        exec(&mut conn, "DELETE FROM core_items WHERE id = 'rope'").await;
        assert_eq!(count_rows(&mut conn, "custom_items").await.unwrap(), 1);
        let items = registry.category("items").unwrap();
        assert!(effective_entity(&mut conn, items, "rope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rebuild_is_repeatable() {
        let (mut conn, registry) = compendium().await;
        let categories: Vec<&CategorySchema> = registry.categories.iter().collect();
        let created = rebuild_views(&mut conn, &categories).await.unwrap();
        assert_eq!(created, 12 + 6 + 2);
        assert!(object_exists(&mut conn, "all_spells").await.unwrap());
        assert!(object_exists(&mut conn, "weapon_property_mappings_unified").await.unwrap());
        assert!(object_exists(&mut conn, "all_mag_weapons").await.unwrap());
        assert!(object_exists(&mut conn, "all_equipment").await.unwrap());
    }

    #[tokio::test]
    async fn test_detail_view_follows_base_provenance() {
        let (mut conn, _registry) = compendium().await;
        exec(
            &mut conn,
            "INSERT INTO core_mag_items_base (id, name, rarity, category) VALUES \
             ('flame_tongue', 'Flame Tongue', 'selten', 'Waffe'), \
             ('vicious_blade', 'Vicious Blade', 'selten', 'Waffe')",
        )
        .await;
        exec(
            &mut conn,
            "INSERT INTO core_mag_weapons (item_base_id, weapon_type, attack_bonus) VALUES \
             ('flame_tongue', 'Langschwert', 0), ('vicious_blade', 'Kurzschwert', 1)",
        )
        .await;
        exec(
            &mut conn,
            "INSERT INTO custom_mag_items_base (id, name, rarity, category, parent_id, is_homebrew) VALUES \
             ('my_flame_tongue', 'Flame Tongue+', 'sehr selten', 'Waffe', 'flame_tongue', 0), \
             ('star_edge', 'Star Edge', 'legendär', 'Waffe', NULL, 1)",
        )
        .await;
        exec(
            &mut conn,
            "INSERT INTO custom_mag_weapons (item_base_id, weapon_type, attack_bonus) VALUES \
             ('my_flame_tongue', 'Langschwert', 2), ('star_edge', NULL, 3)",
        )
        .await;

        let rows: Vec<(String, String, Option<i64>, String)> = sqlx::query_as(
            "SELECT entity_id, item_base_id, attack_bonus, source FROM all_mag_weapons ORDER BY entity_id",
        )
        .fetch_all(&mut conn)
        .await
        .unwrap();
        assert_eq!(
            rows,
            vec![
                ("flame_tongue".into(), "my_flame_tongue".into(), Some(2), "override".into()),
                ("star_edge".into(), "star_edge".into(), Some(3), "homebrew".into()),
                ("vicious_blade".into(), "vicious_blade".into(), Some(1), "core".into()),
            ]
        );
    }

    #[test]
    fn test_relation_view_sql() {
        let registry = SchemaRegistry::builtin();
        let (_, rel) = registry.relation("weapon_property_mappings").unwrap();
        let sql = relation_view_sql(rel).unwrap().unwrap();
        assert!(sql.starts_with("CREATE VIEW IF NOT EXISTS \"weapon_property_mappings_unified\""));
        assert!(sql.contains("'core' AS \"source\" FROM \"core_weapon_property_mappings\""));
        assert!(sql.contains("'custom' AS \"source\" FROM \"custom_weapon_property_mappings\""));

        let (_, plain) = registry.relation("equipment_items").unwrap();
        assert!(relation_view_sql(plain).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relation_view_lists_both_layers() {
        let (mut conn, _registry) = compendium().await;
        for stmt in [
            "INSERT INTO weapon_properties (id, name, description) VALUES \
             ('finesse', 'Finesse', 'Use DEX'), ('thrown', 'Wurfwaffe', 'Can be thrown')",
            "INSERT INTO core_weapons (id, name, category, damage_dice, damage_type, weight_kg, cost_gp) VALUES \
             ('dolch', 'Dolch', 'simple_melee', '1W4', 'stich', 0.5, 2.0)",
            "INSERT INTO custom_weapons (id, name, category, damage_dice, damage_type, weight_kg, cost_gp) VALUES \
             ('sternklinge', 'Sternklinge', 'martial_melee', '1W8', 'hieb', 1.5, 50.0)",
            "INSERT INTO core_weapon_property_mappings (weapon_id, property_id, parameter_value) VALUES \
             ('dolch', 'finesse', NULL), ('dolch', 'thrown', '6/18')",
            "INSERT INTO custom_weapon_property_mappings (weapon_id, property_id) VALUES \
             ('sternklinge', 'finesse')",
        ] {
            exec(&mut conn, stmt).await;
        }

        let rows: Vec<(String, String, Option<String>, String)> = sqlx::query_as(
            "SELECT weapon_id, property_id, parameter_value, source FROM weapon_property_mappings_unified \
             ORDER BY weapon_id, property_id",
        )
        .fetch_all(&mut conn)
        .await
        .unwrap();
        assert_eq!(
            rows,
            vec![
                ("dolch".into(), "finesse".into(), None, "core".into()),
                ("dolch".into(), "thrown".into(), Some("6/18".into()), "core".into()),
                ("sternklinge".into(), "finesse".into(), None, "custom".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_weapon_damage_type_is_checked() {
        let (mut conn, _registry) = compendium().await;
        let result = sqlx::query(
            "INSERT INTO core_weapons (id, name, category, damage_dice, damage_type, weight_kg, cost_gp) VALUES \
             ('keule', 'Keule', 'simple_melee', '1W4', 'feuer', 1.0, 0.1)",
        )
        .execute(&mut conn)
        .await;
        assert!(result.is_err());
    }
}
