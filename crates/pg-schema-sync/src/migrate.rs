//! Migration generation.
//!
//! Derives idempotent DDL from a schema diff. Idempotency is a hard
//! contract: running the combined script twice must be a no-op the second
//! time, so every emitted statement carries an `IF NOT EXISTS`-style guard
//! or is naturally re-runnable. Statements that could drop or narrow data
//! are segregated into a manual-review bucket and never included in the
//! auto-runnable combined script.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compat::{insert_risk, InsertRisk};
use crate::error::{Result, SyncError};
use crate::schema::{Column, DatabaseSchema, EnumType, TableSchema};

/// Direction of migration generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationDirection {
    SourceToTarget,
    TargetToSource,
}

/// What a script does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateEnum,
    AddEnumValue,
    CreateTable,
    AddColumn,
    AlterColumnType,
    DropNotNull,
    SetNotNull,
    SetDefault,
    DropColumn,
    CreateIndex,
}

/// Estimated risk of running a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Medium,
    High,
}

/// One DDL statement with its classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationScript {
    /// The statement itself.
    pub sql: String,

    /// Target table (or type name for enum operations).
    pub table: String,

    /// Operation kind.
    pub kind: OperationKind,

    /// Whether the statement could drop or narrow data.
    pub destructive: bool,

    /// Risk estimate.
    pub risk: Risk,

    /// Human description.
    pub description: String,

    /// Inverse statement, where one exists.
    pub rollback: Option<String>,
}

impl MigrationScript {
    /// Whether this script belongs in the manual-review bucket instead of
    /// the auto-runnable combined script. Type changes always go to review:
    /// even a widening rewrite can lock a large table.
    pub fn requires_review(&self) -> bool {
        self.destructive
            || matches!(
                self.kind,
                OperationKind::AlterColumnType | OperationKind::SetNotNull
            )
    }
}

/// A full migration plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Every generated script, in apply order.
    pub scripts: Vec<MigrationScript>,

    /// Concatenated auto-runnable forward script.
    pub combined_script: String,

    /// Scripts requiring manual review; never auto-applied.
    pub manual_scripts: Vec<MigrationScript>,

    /// Concatenated rollback script, inverse operations in reverse order.
    pub rollback_script: String,

    /// True when any forward operation is destructive, making the rollback
    /// best-effort rather than exact.
    pub rollback_is_best_effort: bool,
}

impl MigrationPlan {
    /// Whether the plan contains nothing to do.
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// Generate a migration plan that adjusts `target` to accept data shaped
/// like `source`.
pub fn generate_migration(
    source: &DatabaseSchema,
    target: &DatabaseSchema,
    direction: MigrationDirection,
) -> Result<MigrationPlan> {
    if direction != MigrationDirection::SourceToTarget {
        return Err(SyncError::Migration(
            "target-to-source generation is not supported; swap the schemas and generate source-to-target".into(),
        ));
    }

    let mut scripts = Vec::new();

    for en in &source.enums {
        match target.enum_type(&en.name) {
            None => scripts.push(create_enum(en)),
            Some(existing) => {
                for value in en.values.iter().filter(|v| !existing.values.contains(v)) {
                    scripts.push(add_enum_value(&en.name, value));
                }
            }
        }
    }

    for src_table in &source.tables {
        match target.table(&src_table.name) {
            None => {
                scripts.push(create_table(src_table));
                for idx in &src_table.indexes {
                    scripts.push(create_index(&src_table.name, &idx.name, &idx.definition));
                }
            }
            Some(tgt_table) => diff_columns(src_table, tgt_table, &mut scripts),
        }
    }

    let manual_scripts: Vec<MigrationScript> = scripts
        .iter()
        .filter(|s| s.requires_review())
        .cloned()
        .collect();

    let combined_script = scripts
        .iter()
        .filter(|s| !s.requires_review())
        .map(|s| s.sql.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let rollback_is_best_effort = scripts.iter().any(|s| s.destructive);
    let mut rollback_lines: Vec<String> = Vec::new();
    if rollback_is_best_effort {
        rollback_lines
            .push("-- Best-effort rollback: destructive forward operations cannot be fully undone.".into());
    }
    for script in scripts.iter().rev() {
        if let Some(rb) = &script.rollback {
            rollback_lines.push(rb.clone());
        }
    }
    let rollback_script = rollback_lines.join("\n");

    debug!(
        "Generated {} scripts ({} manual-review)",
        scripts.len(),
        manual_scripts.len()
    );

    Ok(MigrationPlan {
        scripts,
        combined_script,
        manual_scripts,
        rollback_script,
        rollback_is_best_effort,
    })
}

/// Diff the columns of one matched table.
fn diff_columns(source: &TableSchema, target: &TableSchema, scripts: &mut Vec<MigrationScript>) {
    for src_col in &source.columns {
        let Some(tgt_col) = target.column(&src_col.name) else {
            scripts.push(add_column(&source.name, src_col));
            continue;
        };

        match insert_risk(src_col, tgt_col) {
            Some(InsertRisk::Incompatible(_)) | Some(InsertRisk::Narrowing(_)) => {
                scripts.push(alter_column_type(&source.name, src_col, tgt_col));
            }
            Some(InsertRisk::NullabilityLoss(_)) => {
                scripts.push(drop_not_null(&source.name, &src_col.name));
            }
            None => {}
        }

        if src_col.default != tgt_col.default {
            scripts.push(set_default(&source.name, src_col, tgt_col));
        }

        if !src_col.is_nullable && tgt_col.is_nullable {
            scripts.push(set_not_null(&source.name, &src_col.name));
        }
    }

    for tgt_col in &target.columns {
        if source.column(&tgt_col.name).is_none() {
            scripts.push(drop_column(&source.name, tgt_col));
        }
    }

    for idx in &source.indexes {
        if !target.indexes.iter().any(|t| t.identity() == idx.identity()) {
            scripts.push(create_index(&source.name, &idx.name, &idx.definition));
        }
    }
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a column's type from its underlying storage type and modifiers.
fn render_type(col: &Column) -> String {
    match col.udt_name.as_str() {
        "varchar" => match col.max_length {
            Some(len) => format!("varchar({})", len),
            None => "varchar".to_string(),
        },
        "bpchar" => match col.max_length {
            Some(len) => format!("char({})", len),
            None => "char".to_string(),
        },
        "numeric" => match col.precision {
            Some(p) => format!("numeric({})", p),
            None => "numeric".to_string(),
        },
        other => other.to_string(),
    }
}

fn render_column_def(col: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(&col.name), render_type(col));
    if !col.is_nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default {
        def.push_str(&format!(" DEFAULT {}", default));
    }
    def
}

fn create_enum(en: &EnumType) -> MigrationScript {
    // CREATE TYPE has no IF NOT EXISTS; the duplicate_object guard gives
    // the same re-run safety.
    let values = en
        .values
        .iter()
        .map(|v| quote_literal(v))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "DO $$ BEGIN CREATE TYPE {} AS ENUM ({}); EXCEPTION WHEN duplicate_object THEN NULL; END $$;",
        quote_ident(&en.name),
        values
    );
    MigrationScript {
        sql,
        table: en.name.clone(),
        kind: OperationKind::CreateEnum,
        destructive: false,
        risk: Risk::Low,
        description: format!("create enum type {}", en.name),
        rollback: Some(format!("DROP TYPE IF EXISTS {};", quote_ident(&en.name))),
    }
}

fn add_enum_value(name: &str, value: &str) -> MigrationScript {
    MigrationScript {
        sql: format!(
            "ALTER TYPE {} ADD VALUE IF NOT EXISTS {};",
            quote_ident(name),
            quote_literal(value)
        ),
        table: name.to_string(),
        kind: OperationKind::AddEnumValue,
        destructive: false,
        risk: Risk::Low,
        description: format!("add value {} to enum {}", value, name),
        // Enum values cannot be removed without recreating the type.
        rollback: None,
    }
}

fn create_table(table: &TableSchema) -> MigrationScript {
    let mut parts: Vec<String> = table.columns.iter().map(render_column_def).collect();
    if let Some(pk) = &table.primary_key {
        let cols = pk
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("PRIMARY KEY ({})", cols));
    }

    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n);",
        quote_ident(&table.name),
        parts.join(",\n  ")
    );

    MigrationScript {
        sql,
        table: table.name.clone(),
        kind: OperationKind::CreateTable,
        destructive: false,
        risk: Risk::Low,
        description: format!("create table {}", table.name),
        rollback: Some(format!(
            "DROP TABLE IF EXISTS {};",
            quote_ident(&table.name)
        )),
    }
}

fn add_column(table: &str, col: &Column) -> MigrationScript {
    let destructive = !col.is_nullable && col.default.is_none();
    MigrationScript {
        sql: format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};",
            quote_ident(table),
            render_column_def(col)
        ),
        table: table.to_string(),
        kind: OperationKind::AddColumn,
        destructive,
        risk: if destructive { Risk::High } else { Risk::Low },
        description: if destructive {
            format!(
                "add NOT NULL column {} without default - fails on non-empty tables",
                col.name
            )
        } else {
            format!("add column {} to {}", col.name, table)
        },
        rollback: Some(format!(
            "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
            quote_ident(table),
            quote_ident(&col.name)
        )),
    }
}

fn alter_column_type(table: &str, src_col: &Column, tgt_col: &Column) -> MigrationScript {
    // Narrowing is judged from the target's point of view: existing target
    // data may not fit the new type.
    let narrowing = matches!(
        insert_risk(tgt_col, src_col),
        Some(InsertRisk::Narrowing(_)) | Some(InsertRisk::Incompatible(_))
    );
    MigrationScript {
        sql: format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {};",
            quote_ident(table),
            quote_ident(&src_col.name),
            render_type(src_col)
        ),
        table: table.to_string(),
        kind: OperationKind::AlterColumnType,
        destructive: narrowing,
        risk: if narrowing { Risk::High } else { Risk::Medium },
        description: format!(
            "change {}.{} from {} to {}",
            table,
            src_col.name,
            render_type(tgt_col),
            render_type(src_col)
        ),
        rollback: Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {};",
            quote_ident(table),
            quote_ident(&src_col.name),
            render_type(tgt_col)
        )),
    }
}

fn drop_not_null(table: &str, column: &str) -> MigrationScript {
    MigrationScript {
        sql: format!(
            "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL;",
            quote_ident(table),
            quote_ident(column)
        ),
        table: table.to_string(),
        kind: OperationKind::DropNotNull,
        destructive: false,
        risk: Risk::Low,
        description: format!("allow NULLs in {}.{}", table, column),
        rollback: Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL;",
            quote_ident(table),
            quote_ident(column)
        )),
    }
}

fn set_not_null(table: &str, column: &str) -> MigrationScript {
    MigrationScript {
        sql: format!(
            "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL;",
            quote_ident(table),
            quote_ident(column)
        ),
        table: table.to_string(),
        kind: OperationKind::SetNotNull,
        // Fails if existing rows hold NULLs; review before running.
        destructive: true,
        risk: Risk::High,
        description: format!("add NOT NULL constraint on {}.{}", table, column),
        rollback: Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL;",
            quote_ident(table),
            quote_ident(column)
        )),
    }
}

fn set_default(table: &str, src_col: &Column, tgt_col: &Column) -> MigrationScript {
    let (sql, description) = match &src_col.default {
        Some(default) => (
            format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {};",
                quote_ident(table),
                quote_ident(&src_col.name),
                default
            ),
            format!("set default on {}.{}", table, src_col.name),
        ),
        None => (
            format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;",
                quote_ident(table),
                quote_ident(&src_col.name)
            ),
            format!("drop default on {}.{}", table, src_col.name),
        ),
    };

    let rollback = match &tgt_col.default {
        Some(default) => format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {};",
            quote_ident(table),
            quote_ident(&src_col.name),
            default
        ),
        None => format!(
            "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;",
            quote_ident(table),
            quote_ident(&src_col.name)
        ),
    };

    MigrationScript {
        sql,
        table: table.to_string(),
        kind: OperationKind::SetDefault,
        destructive: false,
        risk: Risk::Low,
        description,
        rollback: Some(rollback),
    }
}

fn drop_column(table: &str, col: &Column) -> MigrationScript {
    MigrationScript {
        sql: format!(
            "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
            quote_ident(table),
            quote_ident(&col.name)
        ),
        table: table.to_string(),
        kind: OperationKind::DropColumn,
        destructive: true,
        risk: Risk::High,
        description: format!("drop column {}.{} (data is lost)", table, col.name),
        // Re-adding the column restores the shape, not the data.
        rollback: Some(format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};",
            quote_ident(table),
            render_column_def(col)
        )),
    }
}

fn create_index(table: &str, name: &str, definition: &str) -> MigrationScript {
    MigrationScript {
        sql: format!("{};", make_index_idempotent(definition)),
        table: table.to_string(),
        kind: OperationKind::CreateIndex,
        destructive: false,
        risk: Risk::Low,
        description: format!("create index {} on {}", name, table),
        rollback: Some(format!("DROP INDEX IF EXISTS {};", quote_ident(name))),
    }
}

/// Rewrite a catalog index definition with an IF NOT EXISTS guard.
fn make_index_idempotent(definition: &str) -> String {
    let def = definition.trim().trim_end_matches(';');
    if def.to_uppercase().contains("IF NOT EXISTS") {
        return def.to_string();
    }
    if let Some(rest) = def.strip_prefix("CREATE UNIQUE INDEX ") {
        return format!("CREATE UNIQUE INDEX IF NOT EXISTS {}", rest);
    }
    if let Some(rest) = def.strip_prefix("CREATE INDEX ") {
        return format!("CREATE INDEX IF NOT EXISTS {}", rest);
    }
    def.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Index, PrimaryKey};
    use chrono::Utc;

    fn col(name: &str, udt: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: udt.to_string(),
            udt_name: udt.to_string(),
            is_nullable: false,
            default: None,
            max_length: None,
            precision: None,
            ordinal_pos: 1,
            is_primary_key: false,
        }
    }

    fn varchar(name: &str, len: i32) -> Column {
        let mut c = col(name, "varchar");
        c.max_length = Some(len);
        c
    }

    fn table(name: &str, columns: Vec<Column>) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            columns,
            primary_key: None,
            foreign_keys: vec![],
            check_constraints: vec![],
            indexes: vec![],
            row_estimate: 0,
            size_bytes: 0,
        }
    }

    fn schema(tables: Vec<TableSchema>, enums: Vec<EnumType>) -> DatabaseSchema {
        DatabaseSchema {
            tables,
            enums,
            syncable_tables: vec![],
            server_version: "16.2".into(),
            inspected_at: Utc::now(),
        }
    }

    #[test]
    fn test_reverse_direction_rejected() {
        let empty = schema(vec![], vec![]);
        let result = generate_migration(&empty, &empty, MigrationDirection::TargetToSource);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_table_creates_idempotent_ddl() {
        let mut users = table(
            "users",
            vec![col("id", "uuid"), col("updated_at", "timestamptz"), varchar("name", 50)],
        );
        users.primary_key = Some(PrimaryKey {
            table: "users".into(),
            name: "users_pkey".into(),
            columns: vec!["id".into()],
        });

        let src = schema(vec![users], vec![]);
        let tgt = schema(vec![], vec![]);

        let plan = generate_migration(&src, &tgt, MigrationDirection::SourceToTarget).unwrap();
        assert_eq!(plan.scripts.len(), 1);

        let script = &plan.scripts[0];
        assert_eq!(script.kind, OperationKind::CreateTable);
        assert!(!script.destructive);
        assert!(script.sql.starts_with("CREATE TABLE IF NOT EXISTS \"users\""));
        assert!(script.sql.contains("\"name\" varchar(50) NOT NULL"));
        assert!(script.sql.contains("PRIMARY KEY (\"id\")"));
        assert_eq!(
            script.rollback.as_deref(),
            Some("DROP TABLE IF EXISTS \"users\";")
        );
        assert!(plan.combined_script.contains("CREATE TABLE IF NOT EXISTS"));
    }

    #[test]
    fn test_combined_script_is_guarded_everywhere() {
        let src = schema(
            vec![table(
                "users",
                vec![col("id", "uuid"), varchar("name", 50)],
            )],
            vec![EnumType {
                name: "mood".into(),
                values: vec!["ok".into()],
            }],
        );
        let tgt = schema(vec![table("users", vec![col("id", "uuid")])], vec![]);

        let plan = generate_migration(&src, &tgt, MigrationDirection::SourceToTarget).unwrap();

        // Every auto-runnable statement must be re-runnable: guarded or a
        // naturally idempotent ALTER.
        for script in plan.scripts.iter().filter(|s| !s.requires_review()) {
            let guarded = script.sql.contains("IF NOT EXISTS")
                || script.sql.contains("duplicate_object")
                || script.sql.contains("DROP NOT NULL")
                || script.sql.contains("SET DEFAULT")
                || script.sql.contains("DROP DEFAULT");
            assert!(guarded, "unguarded statement: {}", script.sql);
        }
    }

    #[test]
    fn test_varchar_widening_is_manual_review() {
        let src = schema(
            vec![table("users", vec![col("id", "uuid"), varchar("name", 50)])],
            vec![],
        );
        let tgt = schema(
            vec![table("users", vec![col("id", "uuid"), varchar("name", 20)])],
            vec![],
        );

        let plan = generate_migration(&src, &tgt, MigrationDirection::SourceToTarget).unwrap();

        assert_eq!(plan.manual_scripts.len(), 1);
        let script = &plan.manual_scripts[0];
        assert_eq!(script.kind, OperationKind::AlterColumnType);
        assert_eq!(
            script.sql,
            "ALTER TABLE \"users\" ALTER COLUMN \"name\" TYPE varchar(50);"
        );
        // Widening the target loses nothing.
        assert!(!script.destructive);
        // And it stays out of the auto-runnable script.
        assert!(!plan.combined_script.contains("ALTER COLUMN \"name\" TYPE"));
    }

    #[test]
    fn test_narrowing_is_destructive() {
        let src = schema(
            vec![table("users", vec![col("id", "uuid"), varchar("name", 20)])],
            vec![],
        );
        let tgt = schema(
            vec![table("users", vec![col("id", "uuid"), varchar("name", 50)])],
            vec![],
        );

        let plan = generate_migration(&src, &tgt, MigrationDirection::SourceToTarget).unwrap();
        let script = &plan.manual_scripts[0];
        assert!(script.destructive);
        assert_eq!(script.risk, Risk::High);
        assert!(plan.rollback_is_best_effort);
    }

    #[test]
    fn test_drop_column_is_segregated() {
        let src = schema(vec![table("users", vec![col("id", "uuid")])], vec![]);
        let tgt = schema(
            vec![table("users", vec![col("id", "uuid"), col("legacy", "text")])],
            vec![],
        );

        let plan = generate_migration(&src, &tgt, MigrationDirection::SourceToTarget).unwrap();
        assert_eq!(plan.manual_scripts.len(), 1);
        assert_eq!(plan.manual_scripts[0].kind, OperationKind::DropColumn);
        assert!(plan.manual_scripts[0].destructive);
        assert!(plan.combined_script.is_empty());
        assert!(plan.rollback_is_best_effort);
        assert!(plan
            .rollback_script
            .starts_with("-- Best-effort rollback"));
    }

    #[test]
    fn test_rollback_is_reverse_order() {
        let src = schema(
            vec![
                table("a", vec![col("id", "uuid")]),
                table("b", vec![col("id", "uuid")]),
            ],
            vec![],
        );
        let tgt = schema(vec![], vec![]);

        let plan = generate_migration(&src, &tgt, MigrationDirection::SourceToTarget).unwrap();
        let pos_a = plan.rollback_script.find("\"a\"").unwrap();
        let pos_b = plan.rollback_script.find("\"b\"").unwrap();
        assert!(pos_b < pos_a, "rollback must undo in reverse order");
    }

    #[test]
    fn test_enum_creation_and_value_addition() {
        let src = schema(
            vec![],
            vec![
                EnumType {
                    name: "mood".into(),
                    values: vec!["sad".into(), "ok".into(), "happy".into()],
                },
                EnumType {
                    name: "status".into(),
                    values: vec!["open".into(), "closed".into()],
                },
            ],
        );
        let tgt = schema(
            vec![],
            vec![EnumType {
                name: "status".into(),
                values: vec!["open".into()],
            }],
        );

        let plan = generate_migration(&src, &tgt, MigrationDirection::SourceToTarget).unwrap();

        let create = plan
            .scripts
            .iter()
            .find(|s| s.kind == OperationKind::CreateEnum)
            .unwrap();
        assert!(create.sql.contains("CREATE TYPE \"mood\" AS ENUM ('sad', 'ok', 'happy')"));
        assert!(create.sql.contains("duplicate_object"));

        let add = plan
            .scripts
            .iter()
            .find(|s| s.kind == OperationKind::AddEnumValue)
            .unwrap();
        assert_eq!(
            add.sql,
            "ALTER TYPE \"status\" ADD VALUE IF NOT EXISTS 'closed';"
        );
    }

    #[test]
    fn test_missing_index_gets_guard() {
        let mut src_table = table("users", vec![col("id", "uuid")]);
        src_table.indexes.push(Index {
            table: "users".into(),
            name: "users_email_idx".into(),
            definition: "CREATE UNIQUE INDEX users_email_idx ON public.users USING btree (email)"
                .into(),
            is_unique: true,
        });
        let src = schema(vec![src_table], vec![]);
        let tgt = schema(vec![table("users", vec![col("id", "uuid")])], vec![]);

        let plan = generate_migration(&src, &tgt, MigrationDirection::SourceToTarget).unwrap();
        let idx = plan
            .scripts
            .iter()
            .find(|s| s.kind == OperationKind::CreateIndex)
            .unwrap();
        assert!(idx.sql.starts_with("CREATE UNIQUE INDEX IF NOT EXISTS users_email_idx"));
    }

    #[test]
    fn test_nullable_source_relaxes_target() {
        let mut src_email = col("email", "text");
        src_email.is_nullable = true;
        let src = schema(
            vec![table("users", vec![col("id", "uuid"), src_email])],
            vec![],
        );
        let tgt = schema(
            vec![table("users", vec![col("id", "uuid"), col("email", "text")])],
            vec![],
        );

        let plan = generate_migration(&src, &tgt, MigrationDirection::SourceToTarget).unwrap();
        let script = plan
            .scripts
            .iter()
            .find(|s| s.kind == OperationKind::DropNotNull)
            .unwrap();
        assert_eq!(
            script.sql,
            "ALTER TABLE \"users\" ALTER COLUMN \"email\" DROP NOT NULL;"
        );
        assert!(!script.requires_review());
    }

    #[test]
    fn test_not_null_addition_requires_review() {
        let src = schema(
            vec![table("users", vec![col("id", "uuid"), col("email", "text")])],
            vec![],
        );
        let mut tgt_email = col("email", "text");
        tgt_email.is_nullable = true;
        let tgt = schema(
            vec![table("users", vec![col("id", "uuid"), tgt_email])],
            vec![],
        );

        let plan = generate_migration(&src, &tgt, MigrationDirection::SourceToTarget).unwrap();
        let script = plan
            .scripts
            .iter()
            .find(|s| s.kind == OperationKind::SetNotNull)
            .unwrap();
        assert!(script.requires_review());
        assert!(script.destructive);
    }

    #[test]
    fn test_running_twice_adds_nothing() {
        // Idempotence at the plan level: generating against a target that
        // already matches the source yields an empty plan.
        let users = table("users", vec![col("id", "uuid"), varchar("name", 50)]);
        let src = schema(vec![users.clone()], vec![]);
        let tgt = schema(vec![users], vec![]);

        let plan = generate_migration(&src, &tgt, MigrationDirection::SourceToTarget).unwrap();
        assert!(plan.is_empty());
        assert!(plan.combined_script.is_empty());
    }
}
