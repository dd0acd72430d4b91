//! Schema registry: the declared shape of every content category.
//!
//! Each category exists twice, as an immutable core table and a mutable
//! custom table whose rows may override a core row through `parent_id`.
//! Categories may also own 1:1 detail tables and child-relation tables that
//! replace legacy JSON collection columns. The registry is pure data; it
//! renders idempotent DDL but never touches the store itself.

use crate::core::identifier::{quote, quote_list, string_literal};
use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Column holding the override back-reference in custom tables.
pub const PARENT_ID: &str = "parent_id";

/// Column flagging standalone user content in custom tables.
pub const IS_HOMEBREW: &str = "is_homebrew";

/// Discriminator column of relations whose target table is ambiguous.
pub const SOURCE_TABLE: &str = "source_table";

/// Quantity column of relations that carry one.
pub const QUANTITY: &str = "quantity";

/// Declared storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    /// Serialized JSON stored as text.
    Json,
}

impl ColumnType {
    /// SQLite type name used in DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Json => "JSON",
        }
    }
}

/// A declared column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub column_type: ColumnType,

    #[serde(default)]
    pub not_null: bool,

    /// SQL default expression, rendered verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Closed set of allowed values, enforced with a `CHECK`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,

    /// Table whose `id` this column references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            not_null: false,
            default: None,
            allowed: Vec::new(),
            references: None,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn real(name: &str) -> Self {
        Self::new(name, ColumnType::Real)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    pub fn json(name: &str) -> Self {
        Self::new(name, ColumnType::Json)
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default_expr(mut self, expr: &str) -> Self {
        self.default = Some(expr.to_string());
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn references(mut self, table: &str) -> Self {
        self.references = Some(table.to_string());
        self
    }

    fn ddl(&self) -> Result<String> {
        let name = quote(&self.name)?;
        let mut out = format!("{} {}", name, self.column_type.sql_type());
        if self.not_null {
            out.push_str(" NOT NULL");
        }
        if let Some(ref default) = self.default {
            out.push_str(&format!(" DEFAULT {}", default));
        }
        if !self.allowed.is_empty() {
            let allowed = self
                .allowed
                .iter()
                .map(|v| string_literal(v))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(" CHECK({} IN ({}))", name, allowed));
        }
        Ok(out)
    }

    /// Table constraint for `references`, if any.
    fn foreign_key(&self) -> Result<Option<String>> {
        match self.references {
            Some(ref table) => Ok(Some(format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                quote(&self.name)?,
                quote(table)?,
                quote("id")?
            ))),
            None => Ok(None),
        }
    }
}

/// A plain lookup table outside the two-layer model, such as weapon
/// properties. Relations may target it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTable {
    pub name: String,
    /// Columns besides `id`.
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

impl ReferenceTable {
    fn ddl(&self) -> Result<String> {
        let mut defs = vec![format!("{} TEXT PRIMARY KEY", quote("id")?)];
        for col in &self.columns {
            defs.push(col.ddl()?);
        }
        for col in &self.columns {
            defs.extend(col.foreign_key()?);
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote(&self.name)?,
            defs.join(",\n    ")
        ))
    }
}

/// Which of the two parallel datasets a table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Core,
    Custom,
}

impl Layer {
    pub const ALL: [Layer; 2] = [Layer::Core, Layer::Custom];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Core => "core",
            Layer::Custom => "custom",
        }
    }
}

/// Table that a relation's referenced ids live in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationTarget {
    /// Referenced ids always live in one table, enforced by a foreign key.
    Fixed { table: String },

    /// Referenced ids may live in any of the candidate tables; each row names
    /// its table in a `source_table` discriminator.
    Discriminated {
        candidates: Vec<String>,
        default: String,
    },
}

impl RelationTarget {
    pub fn is_discriminated(&self) -> bool {
        matches!(self, RelationTarget::Discriminated { .. })
    }

    /// Candidate tables in search order.
    pub fn candidates(&self) -> Vec<&str> {
        match self {
            RelationTarget::Fixed { table } => vec![table.as_str()],
            RelationTarget::Discriminated { candidates, .. } => {
                candidates.iter().map(String::as_str).collect()
            }
        }
    }

    /// Table used when an element does not name one.
    pub fn default_table(&self) -> &str {
        match self {
            RelationTarget::Fixed { table } => table,
            RelationTarget::Discriminated { default, .. } => default,
        }
    }
}

/// A child-relation table pair replacing a legacy collection column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSpec {
    /// Relation name, unique across the registry (e.g. `equipment_tools`).
    pub name: String,
    pub core_table: String,
    pub custom_table: String,
    /// Column referencing the owning base entity.
    pub parent_column: String,
    /// Column holding the referenced entity id.
    pub reference_column: String,
    /// Legacy JSON column on the base tables this relation replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_column: Option<String>,
    /// Relation-specific id key in legacy elements; `id` is always accepted too.
    pub legacy_key: String,
    #[serde(default)]
    pub has_quantity: bool,
    pub target: RelationTarget,
    /// Payload columns carried by each relation row.
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    /// Name of the view listing the rows of both layers, if one is wanted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_name: Option<String>,
}

impl RelationSpec {
    pub fn table(&self, layer: Layer) -> &str {
        match layer {
            Layer::Core => &self.core_table,
            Layer::Custom => &self.custom_table,
        }
    }

    /// Primary key columns: parent, reference, and the discriminator if any.
    pub fn key_columns(&self) -> Vec<&str> {
        let mut cols = vec![self.parent_column.as_str(), self.reference_column.as_str()];
        if self.target.is_discriminated() {
            cols.push(SOURCE_TABLE);
        }
        cols
    }
}

/// 1:1 category-specific detail rows keyed by base-entity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailSpec {
    pub name: String,
    pub core_table: String,
    pub custom_table: String,
    pub view_name: String,
    pub key_column: String,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

impl DetailSpec {
    pub fn table(&self, layer: Layer) -> &str {
        match layer {
            Layer::Core => &self.core_table,
            Layer::Custom => &self.custom_table,
        }
    }
}

/// Full declaration of one content category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySchema {
    pub name: String,
    pub core_table: String,
    pub custom_table: String,
    /// Name of the override merge view.
    pub view_name: String,
    /// Attribute columns shared by the core and custom tables (excluding `id`).
    pub columns: Vec<ColumnSpec>,
    /// Denormalized collection columns kept until an explicit cleanup.
    #[serde(default)]
    pub legacy_columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub details: Vec<DetailSpec>,
    #[serde(default)]
    pub relations: Vec<RelationSpec>,
}

impl CategorySchema {
    pub fn table(&self, layer: Layer) -> &str {
        match layer {
            Layer::Core => &self.core_table,
            Layer::Custom => &self.custom_table,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn detail(&self, name: &str) -> Option<&DetailSpec> {
        self.details.iter().find(|d| d.name == name)
    }

    /// Relations that still have a legacy column to migrate from.
    pub fn legacy_relations(&self) -> impl Iterator<Item = &RelationSpec> {
        self.relations.iter().filter(|r| r.legacy_column.is_some())
    }

    fn base_table_ddl(&self, layer: Layer) -> Result<String> {
        let table = self.table(layer);
        let mut defs = vec![format!("{} TEXT PRIMARY KEY", quote("id")?)];
        for col in self.columns.iter().chain(self.legacy_columns.iter()) {
            defs.push(col.ddl()?);
        }
        if layer == Layer::Custom {
            defs.push(format!("{} TEXT", quote(PARENT_ID)?));
            defs.push(format!("{} BOOLEAN NOT NULL DEFAULT 1", quote(IS_HOMEBREW)?));
        }
        for col in &self.columns {
            defs.extend(col.foreign_key()?);
        }
        if layer == Layer::Custom {
            defs.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE CASCADE",
                quote(PARENT_ID)?,
                quote(&self.core_table)?,
                quote("id")?
            ));
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote(table)?,
            defs.join(",\n    ")
        ))
    }

    fn detail_table_ddl(&self, detail: &DetailSpec, layer: Layer) -> Result<String> {
        let mut defs = vec![format!("{} TEXT PRIMARY KEY", quote(&detail.key_column)?)];
        for col in &detail.columns {
            defs.push(col.ddl()?);
        }
        defs.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE CASCADE",
            quote(&detail.key_column)?,
            quote(self.table(layer))?,
            quote("id")?
        ));
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote(detail.table(layer))?,
            defs.join(",\n    ")
        ))
    }

    fn relation_table_ddl(&self, rel: &RelationSpec, layer: Layer) -> Result<String> {
        let mut defs = vec![
            format!("{} TEXT NOT NULL", quote(&rel.parent_column)?),
            format!("{} TEXT NOT NULL", quote(&rel.reference_column)?),
        ];
        if rel.has_quantity {
            defs.push(format!("{} INTEGER NOT NULL DEFAULT 1", quote(QUANTITY)?));
        }
        for col in &rel.columns {
            defs.push(col.ddl()?);
        }
        if let RelationTarget::Discriminated { ref candidates, .. } = rel.target {
            let allowed = candidates
                .iter()
                .map(|c| string_literal(c))
                .collect::<Vec<_>>()
                .join(", ");
            defs.push(format!(
                "{col} TEXT NOT NULL CHECK({col} IN ({allowed}))",
                col = quote(SOURCE_TABLE)?,
                allowed = allowed
            ));
        }
        defs.push(format!("PRIMARY KEY ({})", quote_list(&rel.key_columns())?));
        for col in &rel.columns {
            defs.extend(col.foreign_key()?);
        }
        defs.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE CASCADE",
            quote(&rel.parent_column)?,
            quote(self.table(layer))?,
            quote("id")?
        ));
        if let RelationTarget::Fixed { ref table } = rel.target {
            defs.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE CASCADE",
                quote(&rel.reference_column)?,
                quote(table)?,
                quote("id")?
            ));
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote(rel.table(layer))?,
            defs.join(",\n    ")
        ))
    }

    fn index_ddl(&self) -> Result<Vec<String>> {
        let mut stmts = vec![format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {}({})",
            quote(&format!("uq_{}_parent", self.custom_table))?,
            quote(&self.custom_table)?,
            quote(PARENT_ID)?
        )];
        for rel in &self.relations {
            for layer in Layer::ALL {
                let table = rel.table(layer);
                for col in [&rel.parent_column, &rel.reference_column] {
                    stmts.push(format!(
                        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                        quote(&format!("idx_{}_{}", table, col))?,
                        quote(table)?,
                        quote(col)?
                    ));
                }
            }
        }
        Ok(stmts)
    }
}

/// The set of declared categories, in dependency order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    pub categories: Vec<CategorySchema>,

    /// Lookup tables created before any category.
    #[serde(default)]
    pub reference_tables: Vec<ReferenceTable>,
}

impl SchemaRegistry {
    pub fn new(categories: Vec<CategorySchema>, reference_tables: Vec<ReferenceTable>) -> Result<Self> {
        let registry = Self {
            categories,
            reference_tables,
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Look up a category by name.
    pub fn category(&self, name: &str) -> Result<&CategorySchema> {
        self.categories
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| MigrateError::unknown_category(name))
    }

    /// Look up a relation and its owning category by relation name.
    pub fn relation(&self, name: &str) -> Result<(&CategorySchema, &RelationSpec)> {
        self.categories
            .iter()
            .find_map(|c| c.relation(name).map(|r| (c, r)))
            .ok_or_else(|| MigrateError::Schema(format!("unknown relation '{}'", name)))
    }

    /// Check the declarations for internal consistency.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut relations = HashSet::new();
        for category in &self.categories {
            if !names.insert(category.name.as_str()) {
                return Err(MigrateError::Schema(format!(
                    "duplicate category '{}'",
                    category.name
                )));
            }
            if category.column("id").is_some() {
                return Err(MigrateError::Schema(format!(
                    "category '{}' must not declare 'id' as an attribute column",
                    category.name
                )));
            }
            for rel in &category.relations {
                if !relations.insert(rel.name.as_str()) {
                    return Err(MigrateError::Schema(format!(
                        "duplicate relation '{}'",
                        rel.name
                    )));
                }
                if let RelationTarget::Discriminated {
                    ref candidates,
                    ref default,
                } = rel.target
                {
                    if !candidates.contains(default) {
                        return Err(MigrateError::Schema(format!(
                            "relation '{}': default discriminator '{}' is not a candidate",
                            rel.name, default
                        )));
                    }
                }
                if let RelationTarget::Fixed { ref table } = rel.target {
                    if !self.has_table(table) {
                        return Err(MigrateError::Schema(format!(
                            "relation '{}': target table '{}' is not declared",
                            rel.name, table
                        )));
                    }
                }
                if let Some(ref legacy) = rel.legacy_column {
                    if !category.legacy_columns.iter().any(|c| &c.name == legacy) {
                        return Err(MigrateError::Schema(format!(
                            "relation '{}': legacy column '{}' is not declared on '{}'",
                            rel.name, legacy, category.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether `table` is a declared base or reference table.
    pub fn has_table(&self, table: &str) -> bool {
        self.reference_tables.iter().any(|t| t.name == table)
            || self
                .categories
                .iter()
                .any(|c| c.core_table == table || c.custom_table == table)
    }

    /// Idempotent DDL for every declared table and index, in creation order:
    /// reference tables, base tables, detail tables, relation tables, then
    /// indexes.
    pub fn ddl_statements(&self) -> Result<Vec<String>> {
        let mut stmts = Vec::new();
        for table in &self.reference_tables {
            stmts.push(table.ddl()?);
        }
        for category in &self.categories {
            for layer in Layer::ALL {
                stmts.push(category.base_table_ddl(layer)?);
            }
        }
        for category in &self.categories {
            for detail in &category.details {
                for layer in Layer::ALL {
                    stmts.push(category.detail_table_ddl(detail, layer)?);
                }
            }
        }
        for category in &self.categories {
            for rel in &category.relations {
                for layer in Layer::ALL {
                    stmts.push(category.relation_table_ddl(rel, layer)?);
                }
            }
        }
        for category in &self.categories {
            stmts.extend(category.index_ddl()?);
        }
        Ok(stmts)
    }

    /// The compendium's built-in categories.
    pub fn builtin() -> Self {
        let tool_target = RelationTarget::Discriminated {
            candidates: vec!["core_tools".into(), "custom_tools".into()],
            default: "core_tools".into(),
        };

        let tools = CategorySchema {
            name: "tools".into(),
            core_table: "core_tools".into(),
            custom_table: "custom_tools".into(),
            view_name: "all_tools".into(),
            columns: vec![
                ColumnSpec::text("name").not_null(),
                ColumnSpec::text("category"),
                ColumnSpec::real("cost_gp"),
                ColumnSpec::real("weight_kg"),
                ColumnSpec::json("data").default_expr("'{}'"),
            ],
            legacy_columns: vec![],
            details: vec![],
            relations: vec![],
        };

        let items = CategorySchema {
            name: "items".into(),
            core_table: "core_items".into(),
            custom_table: "custom_items".into(),
            view_name: "all_items".into(),
            columns: vec![
                ColumnSpec::text("name").not_null(),
                ColumnSpec::text("description"),
                ColumnSpec::real("cost_gp"),
                ColumnSpec::real("weight_kg"),
                ColumnSpec::text("category"),
                ColumnSpec::json("data").default_expr("'{}'"),
            ],
            legacy_columns: vec![],
            details: vec![],
            relations: vec![],
        };

        let equipment = CategorySchema {
            name: "equipment".into(),
            core_table: "core_equipment".into(),
            custom_table: "custom_equipment".into(),
            view_name: "all_equipment".into(),
            columns: vec![
                ColumnSpec::text("name").not_null(),
                ColumnSpec::text("description"),
                ColumnSpec::real("total_cost_gp"),
                ColumnSpec::real("total_weight_kg"),
                ColumnSpec::json("data").default_expr("'{}'"),
            ],
            legacy_columns: vec![
                ColumnSpec::json("items").default_expr("'[]'"),
                ColumnSpec::json("tools").default_expr("'[]'"),
            ],
            details: vec![],
            relations: vec![
                RelationSpec {
                    name: "equipment_items".into(),
                    core_table: "core_equipment_items".into(),
                    custom_table: "custom_equipment_items".into(),
                    parent_column: "equipment_id".into(),
                    reference_column: "item_id".into(),
                    legacy_column: Some("items".into()),
                    legacy_key: "item_id".into(),
                    has_quantity: true,
                    target: RelationTarget::Fixed {
                        table: "core_items".into(),
                    },
                    columns: vec![],
                    view_name: None,
                },
                RelationSpec {
                    name: "equipment_tools".into(),
                    core_table: "core_equipment_tools".into(),
                    custom_table: "custom_equipment_tools".into(),
                    parent_column: "equipment_id".into(),
                    reference_column: "tool_id".into(),
                    legacy_column: Some("tools".into()),
                    legacy_key: "tool_id".into(),
                    has_quantity: true,
                    target: tool_target.clone(),
                    columns: vec![],
                    view_name: None,
                },
            ],
        };

        let magic_detail = |name: &str, columns: Vec<ColumnSpec>| DetailSpec {
            name: name.to_string(),
            core_table: format!("core_mag_{}", name),
            custom_table: format!("custom_mag_{}", name),
            view_name: format!("all_mag_{}", name),
            key_column: "item_base_id".into(),
            columns,
        };

        let magic_items = CategorySchema {
            name: "magic_items".into(),
            core_table: "core_mag_items_base".into(),
            custom_table: "custom_mag_items_base".into(),
            view_name: "all_mag_items_base".into(),
            columns: vec![
                ColumnSpec::text("name").not_null(),
                ColumnSpec::text("rarity").not_null(),
                ColumnSpec::text("category").not_null(),
                ColumnSpec::text("source_book"),
                ColumnSpec::integer("source_page"),
                ColumnSpec::boolean("requires_attunement")
                    .not_null()
                    .default_expr("0"),
                ColumnSpec::json("facts_json").not_null().default_expr("'{}'"),
            ],
            legacy_columns: vec![],
            details: vec![
                magic_detail(
                    "weapons",
                    vec![
                        ColumnSpec::text("weapon_type"),
                        ColumnSpec::integer("attack_bonus"),
                        ColumnSpec::integer("damage_bonus"),
                    ],
                ),
                magic_detail(
                    "armor",
                    vec![ColumnSpec::text("armor_type"), ColumnSpec::integer("ac_bonus")],
                ),
                magic_detail("consumables", vec![ColumnSpec::text("type").not_null()]),
                magic_detail(
                    "focus_items",
                    vec![
                        ColumnSpec::text("focus_type").not_null(),
                        ColumnSpec::integer("charges_max"),
                        ColumnSpec::text("recharge"),
                    ],
                ),
                magic_detail("jewelry", vec![ColumnSpec::text("type").not_null()]),
                magic_detail("wondrous", vec![]),
            ],
            relations: vec![RelationSpec {
                name: "mag_item_crafting".into(),
                core_table: "core_mag_item_crafting".into(),
                custom_table: "custom_mag_item_crafting".into(),
                parent_column: "item_base_id".into(),
                reference_column: "tool_id".into(),
                legacy_column: None,
                legacy_key: "tool_id".into(),
                has_quantity: false,
                target: tool_target,
                columns: vec![],
                view_name: None,
            }],
        };

        // Categories whose rows are a name plus an opaque payload.
        let named_data = |name: &str| CategorySchema {
            name: name.to_string(),
            core_table: format!("core_{}", name),
            custom_table: format!("custom_{}", name),
            view_name: format!("all_{}", name),
            columns: vec![
                ColumnSpec::text("name").not_null(),
                ColumnSpec::json("data").not_null().default_expr("'{}'"),
            ],
            legacy_columns: vec![],
            details: vec![],
            relations: vec![],
        };

        let spells = CategorySchema {
            name: "spells".into(),
            core_table: "core_spells".into(),
            custom_table: "custom_spells".into(),
            view_name: "all_spells".into(),
            columns: vec![
                ColumnSpec::text("name").not_null(),
                ColumnSpec::integer("level").not_null(),
                ColumnSpec::text("school").not_null(),
                ColumnSpec::text("casting_time").not_null(),
                ColumnSpec::text("range").not_null(),
                ColumnSpec::text("components").not_null(),
                ColumnSpec::text("material_components"),
                ColumnSpec::text("duration").not_null(),
                ColumnSpec::boolean("concentration").default_expr("0"),
                ColumnSpec::boolean("ritual").default_expr("0"),
                ColumnSpec::text("description").not_null(),
                ColumnSpec::text("higher_levels"),
                ColumnSpec::text("classes").not_null(),
                ColumnSpec::json("data").not_null().default_expr("'{}'"),
            ],
            legacy_columns: vec![],
            details: vec![],
            relations: vec![],
        };

        let gear = CategorySchema {
            name: "gear".into(),
            core_table: "core_gear".into(),
            custom_table: "custom_gear".into(),
            view_name: "all_gear".into(),
            columns: vec![
                ColumnSpec::text("name").not_null(),
                ColumnSpec::text("description").not_null(),
                ColumnSpec::real("cost_gp").not_null(),
                ColumnSpec::real("weight_kg").not_null(),
                ColumnSpec::json("data"),
            ],
            legacy_columns: vec![],
            details: vec![],
            relations: vec![],
        };

        let property_mappings = |owner: &str, properties: &str| RelationSpec {
            name: format!("{}_property_mappings", owner),
            core_table: format!("core_{}_property_mappings", owner),
            custom_table: format!("custom_{}_property_mappings", owner),
            parent_column: format!("{}_id", owner),
            reference_column: "property_id".into(),
            legacy_column: None,
            legacy_key: "property_id".into(),
            has_quantity: false,
            target: RelationTarget::Fixed {
                table: properties.to_string(),
            },
            columns: vec![ColumnSpec::text("parameter_value")],
            view_name: Some(format!("{}_property_mappings_unified", owner)),
        };

        let weapons = CategorySchema {
            name: "weapons".into(),
            core_table: "core_weapons".into(),
            custom_table: "custom_weapons".into(),
            view_name: "all_weapons".into(),
            columns: vec![
                ColumnSpec::text("name").not_null(),
                ColumnSpec::text("category").not_null().one_of(&[
                    "simple_melee",
                    "simple_ranged",
                    "martial_melee",
                    "martial_ranged",
                ]),
                ColumnSpec::text("category_label"),
                ColumnSpec::text("weapon_type"),
                ColumnSpec::text("weapon_subtype"),
                ColumnSpec::text("mastery_id").references("weapon_masteries"),
                ColumnSpec::text("damage_dice").not_null(),
                ColumnSpec::text("damage_type")
                    .not_null()
                    .one_of(&["hieb", "stich", "wucht"]),
                ColumnSpec::real("weight_kg").not_null(),
                ColumnSpec::real("cost_gp").not_null(),
                ColumnSpec::json("data").not_null().default_expr("'{}'"),
            ],
            legacy_columns: vec![],
            details: vec![],
            relations: vec![property_mappings("weapon", "weapon_properties")],
        };

        let armors = CategorySchema {
            name: "armors".into(),
            core_table: "core_armors".into(),
            custom_table: "custom_armors".into(),
            view_name: "all_armors".into(),
            columns: vec![
                ColumnSpec::text("name").not_null(),
                ColumnSpec::text("category").not_null().one_of(&[
                    "leichte_ruestung",
                    "mittelschwere_ruestung",
                    "schwere_ruestung",
                    "schild",
                ]),
                ColumnSpec::text("category_label"),
                ColumnSpec::integer("base_ac"),
                ColumnSpec::integer("ac_bonus").default_expr("0"),
                ColumnSpec::text("ac_formula"),
                ColumnSpec::integer("strength_requirement"),
                ColumnSpec::boolean("stealth_disadvantage")
                    .not_null()
                    .default_expr("0"),
                ColumnSpec::integer("don_time_minutes"),
                ColumnSpec::integer("doff_time_minutes"),
                ColumnSpec::real("weight_kg").not_null(),
                ColumnSpec::real("cost_gp").not_null(),
                ColumnSpec::json("data").not_null().default_expr("'{}'"),
            ],
            legacy_columns: vec![],
            details: vec![],
            relations: vec![property_mappings("armor", "armor_properties")],
        };

        let mut feats = named_data("feats");
        feats
            .columns
            .insert(1, ColumnSpec::text("category").not_null());

        let reference_tables = vec![
            ReferenceTable {
                name: "weapon_masteries".into(),
                columns: vec![
                    ColumnSpec::text("name").not_null(),
                    ColumnSpec::text("description").not_null(),
                    ColumnSpec::json("data"),
                ],
            },
            ReferenceTable {
                name: "weapon_properties".into(),
                columns: vec![
                    ColumnSpec::text("name").not_null(),
                    ColumnSpec::text("description").not_null(),
                    ColumnSpec::boolean("has_parameter").default_expr("0"),
                    ColumnSpec::text("parameter_type").one_of(&[
                        "range",
                        "damage",
                        "ammo",
                        "range+ammo",
                        "bonus",
                        "special",
                    ]),
                    ColumnSpec::boolean("parameter_required").default_expr("0"),
                    ColumnSpec::json("data"),
                ],
            },
            ReferenceTable {
                name: "armor_properties".into(),
                columns: vec![
                    ColumnSpec::text("name").not_null(),
                    ColumnSpec::text("description").not_null(),
                    ColumnSpec::text("affects_field"),
                    ColumnSpec::json("data"),
                ],
            },
        ];

        Self {
            categories: vec![
                tools,
                items,
                equipment,
                magic_items,
                spells,
                named_data("species"),
                named_data("classes"),
                gear,
                weapons,
                armors,
                feats,
                named_data("backgrounds"),
            ],
            reference_tables,
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
