//! Normalized schema model produced by catalog inspection.
//!
//! These types are immutable snapshots: one inspection produces one
//! [`DatabaseSchema`] instance, and re-sync re-inspects rather than mutating
//! an existing one. Two instances (source, target) are only ever compared,
//! never merged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column names conventionally marking the last-modification time.
///
/// A table qualifies as syncable only if one of these exists with a
/// timestamp storage type and a NOT NULL constraint.
pub const UPDATED_AT_CANDIDATES: &[&str] = &[
    "updated_at",
    "updatedat",
    "modified_at",
    "last_modified",
    "last_modified_at",
];

/// The row-identity column every syncable table must expose.
pub const ID_COLUMN: &str = "id";

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Declared type (e.g., "character varying", "timestamp with time zone").
    pub data_type: String,

    /// Underlying storage type (e.g., "varchar", "timestamptz", "int4").
    pub udt_name: String,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Default expression, if any.
    pub default: Option<String>,

    /// Maximum length for string types.
    pub max_length: Option<i32>,

    /// Numeric precision.
    pub precision: Option<i32>,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,

    /// Whether the column is part of the primary key.
    pub is_primary_key: bool,
}

impl Column {
    /// Check if the underlying type is a timestamp type.
    pub fn is_timestamp(&self) -> bool {
        matches!(self.udt_name.as_str(), "timestamp" | "timestamptz")
    }

    /// Check if the underlying type is UUID.
    pub fn is_uuid(&self) -> bool {
        self.udt_name == "uuid"
    }
}

/// Primary key metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKey {
    /// Originating table name.
    pub table: String,

    /// Constraint name.
    pub name: String,

    /// Key column names, in key order.
    pub columns: Vec<String>,
}

/// Foreign key metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Originating table name.
    pub table: String,

    /// Constraint name.
    pub name: String,

    /// Source column names.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    /// ON DELETE action.
    pub on_delete: String,

    /// ON UPDATE action.
    pub on_update: String,
}

impl ForeignKey {
    /// Structural identity used for set-difference diffing.
    pub fn identity(&self) -> String {
        format!(
            "{}({})->{}({})",
            self.name,
            self.columns.join(","),
            self.ref_table,
            self.ref_columns.join(",")
        )
    }
}

/// Check constraint metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConstraint {
    /// Originating table name.
    pub table: String,

    /// Constraint name.
    pub name: String,

    /// Constraint definition (SQL expression).
    pub definition: String,
}

impl CheckConstraint {
    /// Structural identity used for set-difference diffing.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.name, self.definition)
    }
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// Originating table name.
    pub table: String,

    /// Index name.
    pub name: String,

    /// Full index definition as reported by the catalog.
    pub definition: String,

    /// Whether the index is unique.
    pub is_unique: bool,
}

impl Index {
    /// Structural identity used for set-difference diffing.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.name, self.definition)
    }
}

/// Enum type metadata, independent of tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumType {
    /// Type name.
    pub name: String,

    /// Labels in declared order.
    pub values: Vec<String>,
}

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<Column>,

    /// Primary key, if the table has one.
    pub primary_key: Option<PrimaryKey>,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKey>,

    /// Check constraints.
    pub check_constraints: Vec<CheckConstraint>,

    /// Non-primary-key indexes.
    pub indexes: Vec<Index>,

    /// Approximate row count from catalog statistics (never COUNT(*)).
    pub row_estimate: i64,

    /// Approximate total size in bytes from catalog statistics.
    pub size_bytes: i64,
}

impl TableSchema {
    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The UUID `id` column, if present.
    pub fn id_column(&self) -> Option<&Column> {
        self.column(ID_COLUMN).filter(|c| c.is_uuid())
    }

    /// The non-null last-modification timestamp column, if present.
    pub fn updated_at_column(&self) -> Option<&Column> {
        UPDATED_AT_CANDIDATES.iter().find_map(|name| {
            self.columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name) && c.is_timestamp() && !c.is_nullable)
        })
    }

    /// A table is syncable iff it exposes a UUID `id` and a non-null
    /// last-modification timestamp. This is the engine's row-identity and
    /// change-detection contract.
    pub fn is_syncable(&self) -> bool {
        self.id_column().is_some() && self.updated_at_column().is_some()
    }
}

/// Full database schema snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// All user tables.
    pub tables: Vec<TableSchema>,

    /// All enum types.
    pub enums: Vec<EnumType>,

    /// Names of tables that passed the syncability test at inspection time.
    pub syncable_tables: Vec<String>,

    /// Server version string.
    pub server_version: String,

    /// When the inspection ran.
    pub inspected_at: DateTime<Utc>,
}

impl DatabaseSchema {
    /// Find a table by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// All table names.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Find an enum type by name.
    pub fn enum_type(&self, name: &str) -> Option<&EnumType> {
        self.enums.iter().find(|e| e.name == name)
    }

    /// Whether the schema contains no tables at all.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
