//! Schema diffing and validation.
//!
//! Compares two inspected schemas and emits severity-tagged issues plus a
//! proceed/confirm decision. Issues are data, not errors: a validation call
//! always succeeds and returns its findings.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compat::{insert_risk, InsertRisk};
use crate::schema::{DatabaseSchema, TableSchema};

/// Issue severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// What kind of difference an issue describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    MissingInSource,
    MissingInTarget,
    NotFound,
    TypeMismatch,
    Narrowing,
    NullabilityMismatch,
    ColumnMissing,
    ColumnExtra,
    ConstraintMismatch,
    IndexMismatch,
    NotSyncable,
}

/// A single validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: IssueCategory,
    pub table: String,
    pub column: Option<String>,
    pub message: String,
    pub recommendation: String,
    pub auto_fixable: bool,
}

/// Aggregate result of a validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub info_count: usize,
    pub is_valid: bool,
    pub can_proceed: bool,
    pub requires_confirmation: bool,
}

/// Options controlling the proceed/confirm decision.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Whether the target is a production environment. Production targets
    /// always require confirmation.
    pub production_target: bool,
}

/// Compare two inspected schemas.
///
/// `tables` selects what to compare; an empty list means auto-discovery
/// over the union of both schemas' table names. Table eligibility for sync
/// is re-checked here on every call, never read from a cache.
pub fn validate(
    source: &DatabaseSchema,
    target: &DatabaseSchema,
    tables: &[String],
    opts: &ValidateOptions,
) -> ValidationResult {
    // Two empty schemas are a boundary case, not a failure: short-circuit
    // to success with an explicit warning instead of an empty-issue pass.
    if source.is_empty() && target.is_empty() {
        return ValidationResult::build(
            Vec::new(),
            vec!["both schemas contain no tables".to_string()],
            opts,
            false,
        );
    }

    let explicit = !tables.is_empty();
    let scope: Vec<String> = if explicit {
        tables.to_vec()
    } else {
        let mut union: BTreeSet<String> = source.table_names().into_iter().collect();
        union.extend(target.table_names());
        union.into_iter().collect()
    };

    let mut issues = Vec::new();

    for name in &scope {
        match (source.table(name), target.table(name)) {
            (Some(src), Some(tgt)) => diff_table(src, tgt, explicit, &mut issues),
            (Some(_), None) => issues.push(ValidationIssue {
                severity: Severity::Critical,
                category: IssueCategory::MissingInTarget,
                table: name.clone(),
                column: None,
                message: format!("table {} does not exist in target", name),
                recommendation: "generate and apply a migration before syncing".to_string(),
                auto_fixable: true,
            }),
            (None, Some(_)) => issues.push(ValidationIssue {
                severity: Severity::High,
                category: IssueCategory::MissingInSource,
                table: name.clone(),
                column: None,
                message: format!("table {} exists only in target", name),
                recommendation: "exclude the table or sync in the other direction".to_string(),
                auto_fixable: false,
            }),
            (None, None) => issues.push(ValidationIssue {
                severity: Severity::High,
                category: IssueCategory::NotFound,
                table: name.clone(),
                column: None,
                message: format!("table {} was requested but exists in neither schema", name),
                recommendation: "remove the table from the sync configuration".to_string(),
                auto_fixable: false,
            }),
        }
    }

    // Syncable eligibility is recomputed from the live snapshots.
    let source_syncable: BTreeSet<&str> = source
        .tables
        .iter()
        .filter(|t| t.is_syncable())
        .map(|t| t.name.as_str())
        .collect();
    let target_syncable: BTreeSet<&str> = target
        .tables
        .iter()
        .filter(|t| t.is_syncable())
        .map(|t| t.name.as_str())
        .collect();
    let no_overlap = source_syncable.intersection(&target_syncable).next().is_none();

    debug!(
        "Validation: {} tables in scope, {} issues, syncable overlap empty: {}",
        scope.len(),
        issues.len(),
        no_overlap
    );

    ValidationResult::build(issues, Vec::new(), opts, no_overlap)
}

/// Diff one table that exists on both sides.
fn diff_table(
    source: &TableSchema,
    target: &TableSchema,
    explicit: bool,
    issues: &mut Vec<ValidationIssue>,
) {
    let table = source.name.clone();

    // Syncability on both sides, re-checked every time.
    for (side, schema_table) in [("source", source), ("target", target)] {
        if !schema_table.is_syncable() {
            issues.push(ValidationIssue {
                severity: if explicit { Severity::High } else { Severity::Info },
                category: IssueCategory::NotSyncable,
                table: table.clone(),
                column: None,
                message: format!(
                    "table {} is not syncable in {}: it needs a UUID id and a non-null last-modified timestamp",
                    table, side
                ),
                recommendation: "add the id/updated_at columns or exclude the table".to_string(),
                auto_fixable: false,
            });
        }
    }

    for src_col in &source.columns {
        let Some(tgt_col) = target.column(&src_col.name) else {
            issues.push(ValidationIssue {
                severity: Severity::High,
                category: IssueCategory::ColumnMissing,
                table: table.clone(),
                column: Some(src_col.name.clone()),
                message: format!("column {} is missing in target", src_col.name),
                recommendation: "generate a migration to add the column".to_string(),
                auto_fixable: true,
            });
            continue;
        };

        match insert_risk(src_col, tgt_col) {
            Some(InsertRisk::Incompatible(message)) => issues.push(ValidationIssue {
                severity: Severity::Critical,
                category: IssueCategory::TypeMismatch,
                table: table.clone(),
                column: Some(src_col.name.clone()),
                message,
                recommendation: "change the target column type before syncing".to_string(),
                auto_fixable: false,
            }),
            Some(InsertRisk::Narrowing(message)) => issues.push(ValidationIssue {
                severity: Severity::High,
                category: IssueCategory::Narrowing,
                table: table.clone(),
                column: Some(src_col.name.clone()),
                message,
                recommendation: "widen the target column to the source size".to_string(),
                auto_fixable: true,
            }),
            Some(InsertRisk::NullabilityLoss(message)) => issues.push(ValidationIssue {
                severity: Severity::Medium,
                category: IssueCategory::NullabilityMismatch,
                table: table.clone(),
                column: Some(src_col.name.clone()),
                message,
                recommendation: "relax the target NOT NULL constraint or add a default"
                    .to_string(),
                auto_fixable: true,
            }),
            None => {}
        }

        // Default drift is worth surfacing even when inserts are safe.
        if src_col.default != tgt_col.default {
            issues.push(ValidationIssue {
                severity: Severity::Medium,
                category: IssueCategory::NullabilityMismatch,
                table: table.clone(),
                column: Some(src_col.name.clone()),
                message: format!(
                    "column {} default differs: source {:?}, target {:?}",
                    src_col.name, src_col.default, tgt_col.default
                ),
                recommendation: "align the column defaults".to_string(),
                auto_fixable: true,
            });
        }
    }

    for tgt_col in &target.columns {
        if source.column(&tgt_col.name).is_none() {
            // Extra target columns only break the sync when inserts cannot
            // leave them unset.
            let blocks_insert = !tgt_col.is_nullable && tgt_col.default.is_none();
            issues.push(ValidationIssue {
                severity: if blocks_insert { Severity::High } else { Severity::Info },
                category: IssueCategory::ColumnExtra,
                table: table.clone(),
                column: Some(tgt_col.name.clone()),
                message: if blocks_insert {
                    format!(
                        "column {} exists only in target and is NOT NULL without default",
                        tgt_col.name
                    )
                } else {
                    format!("column {} exists only in target", tgt_col.name)
                },
                recommendation: "add the column to source or give it a default".to_string(),
                auto_fixable: false,
            });
        }
    }

    // Structural facts diff by set difference on identity.
    let src_fks: BTreeSet<String> = source.foreign_keys.iter().map(|f| f.identity()).collect();
    let tgt_fks: BTreeSet<String> = target.foreign_keys.iter().map(|f| f.identity()).collect();
    for missing in src_fks.difference(&tgt_fks) {
        issues.push(constraint_issue(&table, "foreign key", missing, Severity::Low));
    }
    for extra in tgt_fks.difference(&src_fks) {
        issues.push(constraint_issue(&table, "foreign key only in target", extra, Severity::Info));
    }

    let src_checks: BTreeSet<String> =
        source.check_constraints.iter().map(|c| c.identity()).collect();
    let tgt_checks: BTreeSet<String> =
        target.check_constraints.iter().map(|c| c.identity()).collect();
    for missing in src_checks.difference(&tgt_checks) {
        issues.push(constraint_issue(&table, "check constraint", missing, Severity::Low));
    }
    for extra in tgt_checks.difference(&src_checks) {
        issues.push(constraint_issue(
            &table,
            "check constraint only in target",
            extra,
            Severity::Info,
        ));
    }

    let src_idx: BTreeSet<String> = source.indexes.iter().map(|i| i.identity()).collect();
    let tgt_idx: BTreeSet<String> = target.indexes.iter().map(|i| i.identity()).collect();
    for missing in src_idx.difference(&tgt_idx) {
        issues.push(ValidationIssue {
            severity: Severity::Low,
            category: IssueCategory::IndexMismatch,
            table: table.clone(),
            column: None,
            message: format!("index differs or is missing in target: {}", missing),
            recommendation: "generate a migration to create the index".to_string(),
            auto_fixable: true,
        });
    }
    for extra in tgt_idx.difference(&src_idx) {
        issues.push(ValidationIssue {
            severity: Severity::Info,
            category: IssueCategory::IndexMismatch,
            table: table.clone(),
            column: None,
            message: format!("index exists only in target: {}", extra),
            recommendation: "no action needed".to_string(),
            auto_fixable: false,
        });
    }
}

fn constraint_issue(
    table: &str,
    what: &str,
    identity: &str,
    severity: Severity,
) -> ValidationIssue {
    ValidationIssue {
        severity,
        category: IssueCategory::ConstraintMismatch,
        table: table.to_string(),
        column: None,
        message: format!("{}: {}", what, identity),
        recommendation: "review constraint differences manually".to_string(),
        auto_fixable: false,
    }
}

impl ValidationResult {
    fn build(
        issues: Vec<ValidationIssue>,
        warnings: Vec<String>,
        opts: &ValidateOptions,
        no_syncable_overlap: bool,
    ) -> Self {
        let count = |s: Severity| issues.iter().filter(|i| i.severity == s).count();
        let critical_count = count(Severity::Critical);
        let high_count = count(Severity::High);
        let medium_count = count(Severity::Medium);
        let low_count = count(Severity::Low);
        let info_count = count(Severity::Info);

        let can_proceed = critical_count == 0;
        let is_valid = critical_count == 0 && high_count == 0;
        let requires_confirmation =
            opts.production_target || high_count > 0 || no_syncable_overlap;

        Self {
            issues,
            warnings,
            critical_count,
            high_count,
            medium_count,
            low_count,
            info_count,
            is_valid,
            can_proceed,
            requires_confirmation,
        }
    }

    /// Issues for one table.
    pub fn issues_for(&self, table: &str) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.table == table).collect()
    }
}
