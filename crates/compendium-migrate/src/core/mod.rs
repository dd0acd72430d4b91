//! Core types shared by every engine component.
//!
//! - [`schema`]: the schema registry (categories, detail tables, relations,
//!   lookup tables)
//! - [`content_id`]: display name to content identifier normalization
//! - [`identifier`]: SQL identifier validation and quoting
//! - [`value`]: attribute maps and their SQLite encoding
//! - [`db`]: connection setup and small catalog queries

pub mod content_id;
pub mod db;
pub mod identifier;
pub mod schema;
pub mod value;

pub use content_id::{content_id, fold_name};
pub use schema::{
    CategorySchema, ColumnSpec, ColumnType, DetailSpec, Layer, ReferenceTable, RelationSpec,
    RelationTarget, SchemaRegistry,
};
pub use value::{Attributes, Facts};
