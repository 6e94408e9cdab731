//! Conversions between DuckDB values and the engine's raw value model.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use duckdb::types::{TimeUnit, ToSql, Value};
use duckdb::Row;

use drillbit_core::normalize::RawValue;
use drillbit_core::sql::{Query, SqlParam};

/// Owned DuckDB parameters for `query`, in placeholder order.
pub(crate) fn bind_query(query: &Query) -> Vec<Box<dyn ToSql>> {
    tracing::debug!(sql = %query.sql, params = query.params.len(), "binding statement");
    bind_params(&query.params)
}

fn bind_params(params: &[SqlParam]) -> Vec<Box<dyn ToSql>> {
    params
        .iter()
        .map(|param| -> Box<dyn ToSql> {
            match param {
                SqlParam::Text(value) => Box::new(value.clone()),
                SqlParam::Int(value) => Box::new(*value),
                SqlParam::Float(value) => Box::new(*value),
                SqlParam::Bool(value) => Box::new(*value),
            }
        })
        .collect()
}

/// Read column `idx` of `row` as a [`RawValue`].
pub(crate) fn raw_at(row: &Row<'_>, idx: usize) -> duckdb::Result<RawValue> {
    Ok(raw_value(row.get::<usize, Value>(idx)?))
}

pub(crate) fn raw_value(value: Value) -> RawValue {
    match value {
        Value::Null => RawValue::Null,
        Value::Boolean(b) => RawValue::Bool(b),
        Value::TinyInt(i) => RawValue::Int(i.into()),
        Value::SmallInt(i) => RawValue::Int(i.into()),
        Value::Int(i) => RawValue::Int(i.into()),
        Value::BigInt(i) => RawValue::Int(i),
        Value::HugeInt(i) => i64::try_from(i)
            .map(RawValue::Int)
            .unwrap_or(RawValue::Float(i as f64)),
        Value::UTinyInt(i) => RawValue::Int(i.into()),
        Value::USmallInt(i) => RawValue::Int(i.into()),
        Value::UInt(i) => RawValue::Int(i.into()),
        Value::UBigInt(i) => i64::try_from(i)
            .map(RawValue::Int)
            .unwrap_or(RawValue::Float(i as f64)),
        Value::Float(f) => RawValue::Float(f.into()),
        Value::Double(f) => RawValue::Float(f),
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(RawValue::Float)
            .unwrap_or(RawValue::Null),
        Value::Text(s) => RawValue::Text(s),
        Value::Date32(days) => date_from_days(days)
            .map(RawValue::Date)
            .unwrap_or(RawValue::Null),
        Value::Timestamp(unit, raw) => timestamp_from(unit, raw)
            .map(RawValue::Timestamp)
            .unwrap_or(RawValue::Null),
        _ => RawValue::Null,
    }
}

fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?
        .checked_add_signed(chrono::Duration::days(i64::from(days)))
}

fn timestamp_from(unit: TimeUnit, raw: i64) -> Option<NaiveDateTime> {
    let (per_second, nanos_per_tick) = match unit {
        TimeUnit::Second => (1, 1_000_000_000),
        TimeUnit::Millisecond => (1_000, 1_000_000),
        TimeUnit::Microsecond => (1_000_000, 1_000),
        TimeUnit::Nanosecond => (1_000_000_000, 1),
    };
    let secs = raw.div_euclid(per_second);
    let nanos = raw.rem_euclid(per_second) * nanos_per_tick;
    DateTime::from_timestamp(secs, u32::try_from(nanos).ok()?).map(|dt| dt.naive_utc())
}
