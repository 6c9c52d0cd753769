//! DuckDB values to JSON

use chrono::{DateTime, Duration, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, ValueRef};
use serde_json::{json, Value};

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

/// Convert one cell to JSON.
///
/// Integers wider than i64 and decimals that do not fit a float fall back to
/// strings. Dates and timestamps are rendered ISO-8601.
pub fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => json!(i),
        ValueRef::SmallInt(i) => json!(i),
        ValueRef::Int(i) => json!(i),
        ValueRef::BigInt(i) => json!(i),
        ValueRef::HugeInt(i) => i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string())),
        ValueRef::UTinyInt(i) => json!(i),
        ValueRef::USmallInt(i) => json!(i),
        ValueRef::UInt(i) => json!(i),
        ValueRef::UBigInt(i) => json!(i),
        ValueRef::Float(f) => json!(f),
        ValueRef::Double(f) => json!(f),
        ValueRef::Decimal(d) => {
            let text = d.to_string();
            match text.parse::<f64>() {
                Ok(f) if f.is_finite() => json!(f),
                _ => Value::String(text),
            }
        }
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
        ValueRef::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(Duration::days(days as i64)))
            .map(|date| Value::String(date.to_string()))
            .unwrap_or(Value::Null),
        ValueRef::Timestamp(unit, value) => DateTime::from_timestamp_micros(to_micros(unit, value))
            .map(|ts| Value::String(ts.naive_utc().to_string()))
            .unwrap_or(Value::Null),
        ValueRef::Time64(unit, value) => {
            let micros = to_micros(unit, value);
            NaiveTime::from_num_seconds_from_midnight_opt(
                (micros / 1_000_000) as u32,
                ((micros % 1_000_000) * 1_000) as u32,
            )
            .map(|time| Value::String(time.to_string()))
            .unwrap_or(Value::Null)
        }
        _ => Value::String("<unsupported>".to_string()),
    }
}

/// Convert a row to JSON values in column order
pub fn row_to_json(row: &duckdb::Row<'_>, column_count: usize) -> duckdb::Result<Vec<Value>> {
    (0..column_count)
        .map(|i| row.get_ref(i).map(value_to_json))
        .collect()
}
