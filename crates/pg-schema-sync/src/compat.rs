//! Type compatibility rules.
//!
//! Pure, connection-free functions shared by the validator and the migration
//! generator so the two can never disagree about what is safe to write.

use crate::schema::Column;

/// Type family used for equivalence grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeFamily {
    Integer,
    Float,
    String,
    Timestamp,
    Boolean,
    Json,
}

/// Normalize a type name: lowercase, collapsed whitespace.
pub fn normalize_type(name: &str) -> String {
    name.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn family(normalized: &str) -> Option<TypeFamily> {
    match normalized {
        "int2" | "int4" | "int8" | "smallint" | "int" | "integer" | "bigint" | "smallserial"
        | "serial" | "bigserial" => Some(TypeFamily::Integer),
        "float4" | "float8" | "real" | "double precision" | "numeric" | "decimal" | "money" => {
            Some(TypeFamily::Float)
        }
        "varchar" | "character varying" | "char" | "character" | "bpchar" | "text" | "citext"
        | "name" => Some(TypeFamily::String),
        "timestamp" | "timestamptz" | "timestamp without time zone"
        | "timestamp with time zone" => Some(TypeFamily::Timestamp),
        "bool" | "boolean" => Some(TypeFamily::Boolean),
        "json" | "jsonb" => Some(TypeFamily::Json),
        _ => None,
    }
}

/// Check whether data of type `a` can be compared/exchanged with type `b`.
///
/// Exact match wins; otherwise both names are normalized and checked against
/// fixed equivalence groups (integer, float/numeric, string, timestamp,
/// boolean, json).
pub fn types_compatible(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }

    let a = normalize_type(a);
    let b = normalize_type(b);
    if a == b {
        return true;
    }

    match (family(&a), family(&b)) {
        (Some(fa), Some(fb)) => fa == fb,
        _ => false,
    }
}

/// Why writing `source` data into `target` is unsafe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertRisk {
    /// The types belong to different equivalence groups.
    Incompatible(String),

    /// Source length or precision exceeds the target's.
    Narrowing(String),

    /// Source NULLs would violate the target's NOT NULL constraint.
    NullabilityLoss(String),
}

impl InsertRisk {
    /// The warning message.
    pub fn message(&self) -> &str {
        match self {
            InsertRisk::Incompatible(m) | InsertRisk::Narrowing(m) | InsertRisk::NullabilityLoss(m) => m,
        }
    }
}

/// Classify why rows from `source` cannot be safely written into `target`,
/// or `None` when the insert is safe.
pub fn insert_risk(source: &Column, target: &Column) -> Option<InsertRisk> {
    if !types_compatible(&source.udt_name, &target.udt_name) {
        return Some(InsertRisk::Incompatible(format!(
            "incompatible types: source {} is {}, target is {}",
            source.name, source.udt_name, target.udt_name
        )));
    }

    if let (Some(src_len), Some(tgt_len)) = (source.max_length, target.max_length) {
        if src_len > tgt_len {
            return Some(InsertRisk::Narrowing(format!(
                "{} exceeds target max length {} (source allows {})",
                source.name, tgt_len, src_len
            )));
        }
    }

    if let (Some(src_prec), Some(tgt_prec)) = (source.precision, target.precision) {
        if src_prec > tgt_prec {
            return Some(InsertRisk::Narrowing(format!(
                "{} exceeds target precision {} (source allows {})",
                source.name, tgt_prec, src_prec
            )));
        }
    }

    if source.is_nullable && !target.is_nullable && target.default.is_none() {
        return Some(InsertRisk::NullabilityLoss(format!(
            "{} is nullable in source but NOT NULL without default in target",
            source.name
        )));
    }

    None
}

/// Check whether rows from `source` can be written into `target` without
/// loss or constraint violations.
///
/// Returns `None` when the insert is safe, or a specific warning describing
/// why it is not.
pub fn can_safely_insert(source: &Column, target: &Column) -> Option<String> {
    insert_risk(source, target).map(|r| r.message().to_string())
}
