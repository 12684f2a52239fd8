//! SQL value types for dynamic row handling.
//!
//! The sync executor moves rows for tables it has never seen at compile
//! time, so values are carried through a typed enum rather than a generic
//! row struct. The enum implements [`ToSql`] so whole batches can be bound
//! as upsert parameters without knowing the column types statically.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::Result;

/// A single SQL value read from a source row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL. The target column's declared type drives the wire encoding,
    /// so no type hint is needed here.
    Null,

    /// Boolean value.
    Bool(bool),

    /// 16-bit signed integer (smallint).
    I16(i16),

    /// 32-bit signed integer (integer).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 32-bit floating point (real).
    F32(f32),

    /// 64-bit floating point (double precision).
    F64(f64),

    /// Arbitrary-precision numeric.
    Decimal(Decimal),

    /// Text data. Enum values also travel as text.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// UUID value.
    Uuid(Uuid),

    /// Timestamp with time zone.
    Timestamp(DateTime<Utc>),

    /// Timestamp without time zone.
    NaiveTimestamp(NaiveDateTime),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),

    /// JSON document (json or jsonb).
    Json(serde_json::Value),
}

impl SqlValue {
    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Read one value from a row position, driven by the column's
    /// underlying storage type.
    pub fn from_row(row: &Row, idx: usize, udt: &str) -> Result<SqlValue> {
        let value = match udt {
            "bool" | "boolean" => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool),
            "int2" | "smallint" => row.try_get::<_, Option<i16>>(idx)?.map(SqlValue::I16),
            "int4" | "integer" | "int" => row.try_get::<_, Option<i32>>(idx)?.map(SqlValue::I32),
            "int8" | "bigint" => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::I64),
            "float4" | "real" => row.try_get::<_, Option<f32>>(idx)?.map(SqlValue::F32),
            "float8" | "double precision" => {
                row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::F64)
            }
            "numeric" | "decimal" => row
                .try_get::<_, Option<Decimal>>(idx)?
                .map(SqlValue::Decimal),
            "uuid" => row.try_get::<_, Option<Uuid>>(idx)?.map(SqlValue::Uuid),
            "timestamptz" => row
                .try_get::<_, Option<DateTime<Utc>>>(idx)?
                .map(SqlValue::Timestamp),
            "timestamp" => row
                .try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(SqlValue::NaiveTimestamp),
            "date" => row.try_get::<_, Option<NaiveDate>>(idx)?.map(SqlValue::Date),
            "time" => row.try_get::<_, Option<NaiveTime>>(idx)?.map(SqlValue::Time),
            "bytea" => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes),
            "json" | "jsonb" => row
                .try_get::<_, Option<serde_json::Value>>(idx)?
                .map(SqlValue::Json),
            // Everything else (enums, xml, inet, ...) is selected with a
            // ::text cast by the reader and travels as text.
            _ => row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text),
        };

        Ok(value.unwrap_or(SqlValue::Null))
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql(ty, out),
            SqlValue::I16(v) => v.to_sql(ty, out),
            SqlValue::I32(v) => v.to_sql(ty, out),
            SqlValue::I64(v) => v.to_sql(ty, out),
            SqlValue::F32(v) => v.to_sql(ty, out),
            SqlValue::F64(v) => v.to_sql(ty, out),
            SqlValue::Decimal(v) => v.to_sql(ty, out),
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::Bytes(v) => v.to_sql(ty, out),
            SqlValue::Uuid(v) => v.to_sql(ty, out),
            SqlValue::Timestamp(v) => v.to_sql(ty, out),
            SqlValue::NaiveTimestamp(v) => v.to_sql(ty, out),
            SqlValue::Date(v) => v.to_sql(ty, out),
            SqlValue::Time(v) => v.to_sql(ty, out),
            SqlValue::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Dispatch happens at runtime against the actual variant; the
        // server-declared parameter type is authoritative.
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_null() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Bool(true).is_null());
        assert!(!SqlValue::Text(String::new()).is_null());
    }

    #[test]
    fn test_values_compare_by_content() {
        assert_eq!(SqlValue::I64(7), SqlValue::I64(7));
        assert_ne!(SqlValue::I64(7), SqlValue::I32(7));
        assert_eq!(
            SqlValue::Uuid(Uuid::nil()),
            SqlValue::Uuid(Uuid::nil())
        );
    }
}
