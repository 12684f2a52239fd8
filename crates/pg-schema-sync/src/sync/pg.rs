//! PostgreSQL reader and writer for the sync executor.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_postgres::types::ToSql;
use tracing::debug;
use uuid::Uuid;

use crate::db::Db;
use crate::error::{Result, SyncError};
use crate::schema::ID_COLUMN;
use crate::sync::{
    find_change_column, BatchCursor, ColumnRef, SyncRow, TableReader, TableWriter, UpsertCounts,
};
use crate::value::SqlValue;

/// Upper bound on bind parameters per statement; the wire protocol caps at
/// 65535. Batches with wide rows are split to stay under it.
const PARAM_LIMIT: usize = 60_000;

/// Storage types read without a cast. Everything else (enums, xml, inet,
/// ...) is selected as `::text` and written back as text.
const DIRECT_UDTS: &[&str] = &[
    "bool", "int2", "int4", "int8", "float4", "float8", "numeric", "uuid", "timestamptz",
    "timestamp", "date", "time", "bytea", "json", "jsonb", "text", "varchar", "bpchar", "name",
];

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn select_expr(col: &ColumnRef) -> String {
    if DIRECT_UDTS.contains(&col.udt.as_str()) {
        quote_ident(&col.name)
    } else {
        format!("{}::text", quote_ident(&col.name))
    }
}

/// PostgreSQL source-side reader.
pub struct PgTableReader {
    db: Db,
    schema: String,
}

impl PgTableReader {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            schema: "public".to_string(),
        }
    }

    pub fn with_schema(db: Db, schema: impl Into<String>) -> Self {
        Self {
            db,
            schema: schema.into(),
        }
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }
}

#[async_trait]
impl TableReader for PgTableReader {
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnRef>> {
        let client = self.db.client("loading sync columns").await?;

        let query = r#"
            SELECT column_name, udt_name
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = client
            .query(query, &[&self.schema, &table])
            .await
            .map_err(|e| SyncError::table(table, e))?;

        if rows.is_empty() {
            return Err(SyncError::table(table, "table not found"));
        }

        Ok(rows
            .into_iter()
            .map(|r| ColumnRef::new(r.get::<_, String>(0), r.get::<_, String>(1)))
            .collect())
    }

    async fn read_batch(
        &self,
        table: &str,
        columns: &[ColumnRef],
        after: Option<&BatchCursor>,
        limit: usize,
    ) -> Result<Vec<SyncRow>> {
        let client = self.db.client("reading sync batch").await?;

        let change_column = find_change_column(columns)
            .ok_or_else(|| SyncError::table(table, "no usable change-timestamp column"))?;
        let id_idx = columns
            .iter()
            .position(|c| c.name == ID_COLUMN)
            .ok_or_else(|| SyncError::table(table, "no id column"))?;
        let ts_idx = columns
            .iter()
            .position(|c| c.name == change_column)
            .ok_or_else(|| SyncError::table(table, "change column vanished"))?;
        let ts_is_tz = columns[ts_idx].udt == "timestamptz";

        let select_list = columns
            .iter()
            .map(select_expr)
            .collect::<Vec<_>>()
            .join(", ");
        let ts_ident = quote_ident(&change_column);
        let id_ident = quote_ident(ID_COLUMN);

        let mut sql = format!("SELECT {} FROM {}", select_list, self.qualified(table));
        if after.is_some() {
            sql.push_str(&format!(" WHERE ({}, {}) > ($1, $2)", ts_ident, id_ident));
        }
        sql.push_str(&format!(
            " ORDER BY {} ASC, {} ASC LIMIT {}",
            ts_ident, id_ident, limit
        ));

        let rows = match after {
            None => client.query(&sql, &[]).await,
            Some(cursor) if ts_is_tz => {
                client.query(&sql, &[&cursor.updated_at, &cursor.id]).await
            }
            Some(cursor) => {
                let naive = cursor.updated_at.naive_utc();
                client.query(&sql, &[&naive, &cursor.id]).await
            }
        }
        .map_err(|e| SyncError::table(table, e))?;

        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get(id_idx).map_err(|e| SyncError::table(table, e))?;
            let updated_at: DateTime<Utc> = if ts_is_tz {
                row.try_get(ts_idx).map_err(|e| SyncError::table(table, e))?
            } else {
                row.try_get::<_, NaiveDateTime>(ts_idx)
                    .map_err(|e| SyncError::table(table, e))?
                    .and_utc()
            };

            let mut values = Vec::with_capacity(columns.len());
            for (idx, col) in columns.iter().enumerate() {
                values.push(SqlValue::from_row(&row, idx, &col.udt)?);
            }

            batch.push(SyncRow {
                id,
                updated_at,
                values,
            });
        }

        debug!("Read {} rows from {}", batch.len(), table);
        Ok(batch)
    }

    async fn estimate_rows(&self, table: &str) -> Result<i64> {
        let client = self.db.client("estimating rows").await?;
        let query = r#"
            SELECT GREATEST(c.reltuples, 0)::int8
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2
        "#;
        let row = client
            .query_opt(query, &[&self.schema, &table])
            .await
            .map_err(|e| SyncError::table(table, e))?;
        Ok(row.map(|r| r.get::<_, i64>(0)).unwrap_or(0))
    }
}

/// PostgreSQL target-side writer.
pub struct PgTableWriter {
    db: Db,
    schema: String,
}

impl PgTableWriter {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            schema: "public".to_string(),
        }
    }

    pub fn with_schema(db: Db, schema: impl Into<String>) -> Self {
        Self {
            db,
            schema: schema.into(),
        }
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }
}

#[async_trait]
impl TableWriter for PgTableWriter {
    async fn upsert_batch(
        &self,
        table: &str,
        columns: &[ColumnRef],
        rows: &[SyncRow],
    ) -> Result<UpsertCounts> {
        if rows.is_empty() {
            return Ok(UpsertCounts::default());
        }

        for row in rows {
            if row.values.len() != columns.len() {
                return Err(SyncError::table(
                    table,
                    format!(
                        "row has {} values for {} columns",
                        row.values.len(),
                        columns.len()
                    ),
                ));
            }
        }

        let client = self.db.client("acquiring upsert connection").await?;
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let rows_per_stmt = (PARAM_LIMIT / names.len()).max(1);

        let mut counts = UpsertCounts::default();
        for chunk in rows.chunks(rows_per_stmt) {
            let sql = build_upsert_sql(&self.qualified(table), &names, chunk.len());

            let mut params: Vec<&(dyn ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * names.len());
            for row in chunk {
                for value in &row.values {
                    params.push(value);
                }
            }

            let returned = client
                .query(&sql, &params)
                .await
                .map_err(|e| SyncError::table(table, e))?;

            for row in &returned {
                if row.get::<_, bool>(0) {
                    counts.inserted += 1;
                } else {
                    counts.updated += 1;
                }
            }
        }

        debug!(
            "Upserted {} rows into {} ({} inserted, {} updated)",
            rows.len(),
            table,
            counts.inserted,
            counts.updated
        );
        Ok(counts)
    }

    async fn row_versions(
        &self,
        table: &str,
        change_column: &str,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, DateTime<Utc>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let client = self.db.client("loading target row versions").await?;
        let sql = format!(
            "SELECT {}, {} FROM {} WHERE {} = ANY($1)",
            quote_ident(ID_COLUMN),
            quote_ident(change_column),
            self.qualified(table),
            quote_ident(ID_COLUMN)
        );

        let rows = client
            .query(&sql, &[&ids])
            .await
            .map_err(|e| SyncError::table(table, e))?;

        let mut versions = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get(0).map_err(|e| SyncError::table(table, e))?;
            let updated_at: DateTime<Utc> = match row.try_get::<_, DateTime<Utc>>(1) {
                Ok(ts) => ts,
                Err(_) => row
                    .try_get::<_, NaiveDateTime>(1)
                    .map_err(|e| SyncError::table(table, e))?
                    .and_utc(),
            };
            versions.insert(id, updated_at);
        }

        Ok(versions)
    }
}

/// Build a multi-row UPSERT keyed on `id`. Rows that exist are updated in
/// place; `(xmax = 0)` distinguishes inserts from updates in the RETURNING
/// set.
fn build_upsert_sql(qualified_table: &str, columns: &[String], row_count: usize) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let col_list = quoted.join(", ");

    let mut placeholders = Vec::with_capacity(row_count);
    let mut param = 1;
    for _ in 0..row_count {
        let row_params: Vec<String> = (0..columns.len())
            .map(|_| {
                let p = format!("${}", param);
                param += 1;
                p
            })
            .collect();
        placeholders.push(format!("({})", row_params.join(", ")));
    }

    let non_pk: Vec<&String> = columns.iter().filter(|c| c.as_str() != ID_COLUMN).collect();

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table,
        col_list,
        placeholders.join(", ")
    );

    if non_pk.is_empty() {
        sql.push_str(&format!(
            " ON CONFLICT ({}) DO NOTHING",
            quote_ident(ID_COLUMN)
        ));
    } else {
        let updates = non_pk
            .iter()
            .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            quote_ident(ID_COLUMN),
            updates
        ));
    }

    sql.push_str(" RETURNING (xmax = 0)");
    sql
}
