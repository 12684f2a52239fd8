//! Catalog inspection.
//!
//! Reads a database's structural metadata into a [`DatabaseSchema`]. Row
//! counts and sizes come from catalog statistics (`pg_class.reltuples`,
//! `pg_total_relation_size`) rather than `COUNT(*)`; callers must treat them
//! as estimates. Any catalog query failure aborts the whole inspection - no
//! partial schema is ever returned.

use chrono::Utc;
use deadpool_postgres::Object;
use tracing::{debug, info};

use crate::db::Db;
use crate::error::{Result, SyncError};
use crate::schema::{
    CheckConstraint, Column, DatabaseSchema, EnumType, ForeignKey, Index, PrimaryKey, TableSchema,
};

/// Tables the engine itself maintains; never inspected or synced.
pub const ENGINE_TABLES: &[&str] = &["_sync_jobs", "_sync_checkpoints", "_sync_schedules"];

/// Catalog inspector for one database schema (namespace).
#[derive(Debug, Clone)]
pub struct Inspector {
    schema: String,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inspector {
    /// Inspector over the `public` schema.
    pub fn new() -> Self {
        Self {
            schema: "public".to_string(),
        }
    }

    /// Inspector over a specific schema.
    pub fn with_schema(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    /// Inspect the database and return an immutable schema snapshot.
    ///
    /// The connection is acquired once, scoped to this call, and released on
    /// every exit path when the pooled client drops.
    pub async fn inspect(&self, db: &Db) -> Result<DatabaseSchema> {
        let client = db.client("acquiring inspection connection").await?;

        let server_version = self.load_version(&client).await?;
        let enums = self.load_enums(&client).await?;
        let table_names = self.load_table_names(&client).await?;

        let mut tables = Vec::with_capacity(table_names.len());
        for name in &table_names {
            let mut table = TableSchema {
                name: name.clone(),
                columns: self.load_columns(&client, name).await?,
                primary_key: None,
                foreign_keys: Vec::new(),
                check_constraints: Vec::new(),
                indexes: Vec::new(),
                row_estimate: 0,
                size_bytes: 0,
            };

            self.load_primary_key(&client, &mut table).await?;
            self.load_foreign_keys(&client, &mut table).await?;
            self.load_check_constraints(&client, &mut table).await?;
            self.load_indexes(&client, &mut table).await?;
            self.load_estimates(&client, &mut table).await?;

            tables.push(table);
        }

        let syncable_tables: Vec<String> = tables
            .iter()
            .filter(|t| t.is_syncable())
            .map(|t| t.name.clone())
            .collect();

        info!(
            "Inspected {}: {} tables ({} syncable), {} enum types",
            db.label(),
            tables.len(),
            syncable_tables.len(),
            enums.len()
        );

        Ok(DatabaseSchema {
            tables,
            enums,
            syncable_tables,
            server_version,
            inspected_at: Utc::now(),
        })
    }

    async fn load_version(&self, client: &Object) -> Result<String> {
        let row = client
            .query_one("SHOW server_version", &[])
            .await
            .map_err(|e| SyncError::inspection(format!("reading server version: {}", e)))?;
        Ok(row.get::<_, String>(0))
    }

    async fn load_enums(&self, client: &Object) -> Result<Vec<EnumType>> {
        let query = r#"
            SELECT t.typname, e.enumlabel
            FROM pg_catalog.pg_type t
            JOIN pg_catalog.pg_enum e ON e.enumtypid = t.oid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
            WHERE n.nspname = $1
            ORDER BY t.typname, e.enumsortorder
        "#;

        let rows = client
            .query(query, &[&self.schema])
            .await
            .map_err(|e| SyncError::inspection(format!("enumerating enum types: {}", e)))?;

        let labeled: Vec<(String, String)> = rows
            .into_iter()
            .map(|r| (r.get::<_, String>(0), r.get::<_, String>(1)))
            .collect();

        Ok(group_enum_labels(labeled))
    }

    async fn load_table_names(&self, client: &Object) -> Result<Vec<String>> {
        let query = r#"
            SELECT table_name
            FROM information_schema.tables
            WHERE table_schema = $1
              AND table_type = 'BASE TABLE'
              AND NOT (table_name = ANY($2))
            ORDER BY table_name
        "#;

        let excluded: Vec<&str> = ENGINE_TABLES.to_vec();
        let rows = client
            .query(query, &[&self.schema, &excluded])
            .await
            .map_err(|e| SyncError::inspection(format!("enumerating tables: {}", e)))?;

        Ok(rows.into_iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn load_columns(&self, client: &Object, table: &str) -> Result<Vec<Column>> {
        let query = r#"
            SELECT
                column_name,
                data_type,
                udt_name,
                is_nullable = 'YES',
                column_default,
                character_maximum_length::int4,
                numeric_precision::int4,
                ordinal_position::int4
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = client
            .query(query, &[&self.schema, &table])
            .await
            .map_err(|e| SyncError::inspection(format!("loading columns for {}: {}", table, e)))?;

        let columns: Vec<Column> = rows
            .into_iter()
            .map(|row| Column {
                name: row.get(0),
                data_type: row.get(1),
                udt_name: row.get(2),
                is_nullable: row.get(3),
                default: row.get(4),
                max_length: row.get(5),
                precision: row.get(6),
                ordinal_pos: row.get(7),
                is_primary_key: false,
            })
            .collect();

        debug!("Loaded {} columns for {}", columns.len(), table);
        Ok(columns)
    }

    async fn load_primary_key(&self, client: &Object, table: &mut TableSchema) -> Result<()> {
        let query = r#"
            SELECT c.conname, a.attname
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(c.conkey)
            WHERE n.nspname = $1 AND t.relname = $2 AND c.contype = 'p'
            ORDER BY array_position(c.conkey, a.attnum)
        "#;

        let rows = client
            .query(query, &[&self.schema, &table.name])
            .await
            .map_err(|e| {
                SyncError::inspection(format!("loading primary key for {}: {}", table.name, e))
            })?;

        if rows.is_empty() {
            return Ok(());
        }

        let name: String = rows[0].get(0);
        let columns: Vec<String> = rows.iter().map(|r| r.get::<_, String>(1)).collect();

        for col in &mut table.columns {
            if columns.contains(&col.name) {
                col.is_primary_key = true;
            }
        }

        table.primary_key = Some(PrimaryKey {
            table: table.name.clone(),
            name,
            columns,
        });
        Ok(())
    }

    async fn load_foreign_keys(&self, client: &Object, table: &mut TableSchema) -> Result<()> {
        let query = r#"
            SELECT
                c.conname,
                array_agg(a.attname ORDER BY array_position(c.conkey, a.attnum)) AS columns,
                rt.relname AS ref_table,
                array_agg(ra.attname ORDER BY array_position(c.confkey, ra.attnum)) AS ref_columns,
                CASE c.confdeltype
                    WHEN 'a' THEN 'NO_ACTION'
                    WHEN 'r' THEN 'RESTRICT'
                    WHEN 'c' THEN 'CASCADE'
                    WHEN 'n' THEN 'SET_NULL'
                    WHEN 'd' THEN 'SET_DEFAULT'
                    ELSE 'NO_ACTION'
                END AS on_delete,
                CASE c.confupdtype
                    WHEN 'a' THEN 'NO_ACTION'
                    WHEN 'r' THEN 'RESTRICT'
                    WHEN 'c' THEN 'CASCADE'
                    WHEN 'n' THEN 'SET_NULL'
                    WHEN 'd' THEN 'SET_DEFAULT'
                    ELSE 'NO_ACTION'
                END AS on_update
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(c.conkey)
            JOIN pg_catalog.pg_attribute ra ON ra.attrelid = rt.oid AND ra.attnum = ANY(c.confkey)
            WHERE n.nspname = $1 AND t.relname = $2 AND c.contype = 'f'
            GROUP BY c.conname, rt.relname, c.confdeltype, c.confupdtype
            ORDER BY c.conname
        "#;

        let rows = client
            .query(query, &[&self.schema, &table.name])
            .await
            .map_err(|e| {
                SyncError::inspection(format!("loading foreign keys for {}: {}", table.name, e))
            })?;

        for row in rows {
            table.foreign_keys.push(ForeignKey {
                table: table.name.clone(),
                name: row.get(0),
                columns: row.get(1),
                ref_table: row.get(2),
                ref_columns: row.get(3),
                on_delete: row.get(4),
                on_update: row.get(5),
            });
        }

        Ok(())
    }

    async fn load_check_constraints(
        &self,
        client: &Object,
        table: &mut TableSchema,
    ) -> Result<()> {
        let query = r#"
            SELECT c.conname, pg_get_constraintdef(c.oid)
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            WHERE n.nspname = $1 AND t.relname = $2 AND c.contype = 'c'
            ORDER BY c.conname
        "#;

        let rows = client
            .query(query, &[&self.schema, &table.name])
            .await
            .map_err(|e| {
                SyncError::inspection(format!(
                    "loading check constraints for {}: {}",
                    table.name, e
                ))
            })?;

        for row in rows {
            table.check_constraints.push(CheckConstraint {
                table: table.name.clone(),
                name: row.get(0),
                definition: row.get(1),
            });
        }

        Ok(())
    }

    async fn load_indexes(&self, client: &Object, table: &mut TableSchema) -> Result<()> {
        let query = r#"
            SELECT indexname, indexdef
            FROM pg_catalog.pg_indexes
            WHERE schemaname = $1 AND tablename = $2
            ORDER BY indexname
        "#;

        let rows = client
            .query(query, &[&self.schema, &table.name])
            .await
            .map_err(|e| {
                SyncError::inspection(format!("loading indexes for {}: {}", table.name, e))
            })?;

        let pk_index = table.primary_key.as_ref().map(|pk| pk.name.clone());

        for row in rows {
            let name: String = row.get(0);
            if Some(&name) == pk_index.as_ref() {
                continue;
            }
            let definition: String = row.get(1);
            let is_unique = index_is_unique(&definition);
            table.indexes.push(Index {
                table: table.name.clone(),
                name,
                definition,
                is_unique,
            });
        }

        Ok(())
    }

    async fn load_estimates(&self, client: &Object, table: &mut TableSchema) -> Result<()> {
        // reltuples is -1 for never-analyzed tables on newer servers.
        let query = r#"
            SELECT GREATEST(c.reltuples, 0)::int8, pg_total_relation_size(c.oid)
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2
        "#;

        let row = client
            .query_one(query, &[&self.schema, &table.name])
            .await
            .map_err(|e| {
                SyncError::inspection(format!("loading estimates for {}: {}", table.name, e))
            })?;

        table.row_estimate = row.get(0);
        table.size_bytes = row.get(1);
        Ok(())
    }
}

/// Group (type name, label) rows, already sorted by sort order, into enums.
fn group_enum_labels(rows: Vec<(String, String)>) -> Vec<EnumType> {
    let mut enums: Vec<EnumType> = Vec::new();
    for (name, label) in rows {
        match enums.last_mut() {
            Some(e) if e.name == name => e.values.push(label),
            _ => enums.push(EnumType {
                name,
                values: vec![label],
            }),
        }
    }
    enums
}

fn index_is_unique(definition: &str) -> bool {
    definition.trim_start().to_uppercase().starts_with("CREATE UNIQUE")
}
